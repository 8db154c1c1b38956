//! Logging configuration and initialization

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default filter when `RUST_LOG` is unset (default: "info")
    pub default_level: String,
    /// Include module paths in log lines (default: false)
    pub show_module: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            default_level: "info".to_string(),
            show_module: false,
        }
    }
}

impl LogConfig {
    /// Configuration with a raised level, e.g. for `--verbose`.
    pub fn verbose() -> Self {
        Self {
            default_level: "debug".to_string(),
            show_module: true,
        }
    }
}

/// Initialize `env_logger` with millisecond timestamps.
///
/// `RUST_LOG` overrides the configured default filter. Calling this more
/// than once is harmless; later calls are ignored.
pub fn init_logging(config: &LogConfig) {
    let result = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(config.default_level.as_str()),
    )
    .format_timestamp_millis()
    .format_module_path(config.show_module)
    .try_init();

    if result.is_err() {
        log::debug!("Logger already initialized");
    }
}
