//! Logging setup
//!
//! Structured logging built on `tracing`; the CLI installs one global
//! subscriber at startup.

use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Controls the global subscriber installed at startup
#[derive(Debug, Clone, Copy)]
pub struct LogConfig {
    max_level: Level,
    show_module: bool,
    ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            max_level: Level::INFO,
            show_module: false,
            ansi: true,
        }
    }
}

impl LogConfig {
    /// Debug-level output with module paths, for troubleshooting
    pub fn verbose() -> Self {
        Self {
            max_level: Level::DEBUG,
            show_module: true,
            ..Self::default()
        }
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            max_level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Disable ANSI colors, for output captured to files
    pub fn without_colors(mut self) -> Self {
        self.ansi = false;
        self
    }

    /// Maximum level the subscriber will emit
    pub fn max_level(&self) -> Level {
        self.max_level
    }
}

/// Install the global subscriber. Fails if one was already installed;
/// callers that may run twice (tests) can ignore the error.
pub fn init_logging(config: &LogConfig) -> Result<(), String> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(config.max_level)
        .with_target(config.show_module)
        .with_ansi(config.ansi)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("logging already initialized: {e}"))
}
