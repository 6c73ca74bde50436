use crate::logging::DEFAULT_FILTER;

/// Runtime configuration for the Thicket pipeline.
#[derive(Debug, Clone)]
pub struct Config {
    pub profiling: ProfilingMode,
    /// `tracing-subscriber` env-filter directives.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            profiling: ProfilingMode::Off,
            log_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl Config {
    pub fn with_profiling(mut self, profiling: ProfilingMode) -> Self {
        self.profiling = profiling;
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = filter.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilingMode {
    /// Profiling scopes are disabled
    Off,
    /// Scopes are recorded, and can be inspected in-process
    InProcess,
    /// Scopes are recorded and served to external tools such as 'puffin_viewer'
    PuffinHttp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.profiling, ProfilingMode::Off);
        assert_eq!(config.log_filter, DEFAULT_FILTER);
    }

    #[test]
    fn test_builder() {
        let config = Config::default()
            .with_profiling(ProfilingMode::InProcess)
            .with_log_filter("info");
        assert_eq!(config.profiling, ProfilingMode::InProcess);
        assert_eq!(config.log_filter, "info");
    }
}
