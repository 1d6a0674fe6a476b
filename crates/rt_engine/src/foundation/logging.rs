//! Logging setup
//!
//! All engine code logs through the `log` facade. The binary installs
//! `env_logger` once at startup; `RUST_LOG` takes precedence over the
//! configured level.

pub use log::{debug, error, info, trace, warn};

/// Initialize the logging system with a fallback filter
///
/// The filter string uses `env_logger` syntax (for example `"info"` or
/// `"rt_engine=debug,warn"`). Calling this more than once is harmless.
pub fn init(default_filter: &str) {
    let env = env_logger::Env::default().default_filter_or(default_filter);
    if env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init()
        .is_err()
    {
        log::debug!("Logger already initialized, keeping existing configuration");
    }
}
