//! Logging bootstrap built on `tracing-subscriber`.

/// Filter used when no explicit directives are given.
pub const DEFAULT_FILTER: &str =
    "debug,wgpu_core=info,wgpu_hal=info,naga=info,thicket_render=trace";

pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Install a fmt subscriber with the given env-filter directives.
///
/// Safe to call more than once; only the first call installs a subscriber.
pub fn init_with_filter(filter: &str) {
    let result = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();

    if result.is_ok() {
        tracing::debug!("Logging initialized with filter `{}`", filter);
    }
}
