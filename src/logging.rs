// Tracing subscriber setup.
// Logs go to stderr so rendered reports on stdout stay machine-readable.

use tracing_subscriber::EnvFilter;

use crate::config::LogLevel;

/// Filter from `RUST_LOG` when set and valid, else from the configured level.
pub fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| filter_for(level))
}

fn filter_for(level: LogLevel) -> EnvFilter {
    EnvFilter::new(format!("warn,pipekit={}", level.as_filter()))
}

/// Install the global subscriber. Later calls are ignored.
pub fn init(level: LogLevel) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(level))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_filter_follows_configured_level() {
        assert_eq!(
            filter_for(LogLevel::Debug).max_level_hint(),
            Some(LevelFilter::DEBUG)
        );
        // Dependencies stay at warn even when the crate is quieter.
        assert_eq!(
            filter_for(LogLevel::Error).max_level_hint(),
            Some(LevelFilter::WARN)
        );
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(LogLevel::Info);
        init(LogLevel::Debug);
    }
}
