//! Tracing subscriber setup.

use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

/// Log output format on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `default_level`. Uses `try_init()`, so a
/// second call is ignored.
pub fn init_logging(format: LogFormat, default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    match format {
        LogFormat::Plain => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .try_init();
        }
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter)
                .json()
                .with_writer(std::io::stderr)
                .try_init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_format_is_plain() {
        assert_eq!(LogFormat::default(), LogFormat::Plain);
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init_logging(LogFormat::Plain, "warn");
        init_logging(LogFormat::Json, "debug");
    }
}
