//! Thicket Core
//!
//! Shared utilities for the Thicket instancing pipeline: logging bootstrap,
//! profiling scopes, bounds math and the top-level runtime configuration.

pub mod config;
pub mod geometry;
pub mod logging;
pub mod math;
pub mod profiling;

pub use config::{Config, ProfilingMode};

/// Initialize logging (and profiling, if requested) from a [`Config`].
pub fn init(config: &Config) {
    logging::init_with_filter(&config.log_filter);

    #[cfg(feature = "profiling")]
    if let ProfilingMode::PuffinHttp = config.profiling {
        profiling::init_profiling(profiling::ProfilingBackend::PuffinHttp);
    }
    #[cfg(feature = "profiling")]
    if let ProfilingMode::InProcess = config.profiling {
        puffin::set_scopes_on(true);
    }
}
