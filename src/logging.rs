use env_logger::{Builder, WriteStyle};
use log::LevelFilter;
use std::sync::Once;

const FILTER_ENV: &str = "RUST_LOG";

/// How log lines are filtered and styled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter in `env_logger` syntax, e.g. `lepus=debug,winit=warn`
    pub filter: Option<String>,
    pub color: WriteStyle,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: None,
            color: WriteStyle::Auto,
        }
    }
}

impl LoggingConfig {
    /// The filter actually applied: the configured one, else `RUST_LOG`
    fn resolved_filter(&self, env: Option<String>) -> Option<String> {
        self.filter.clone().or(env).filter(|filter| !filter.trim().is_empty())
    }

    fn builder(&self) -> Builder {
        let mut builder = Builder::new();
        match self.resolved_filter(std::env::var(FILTER_ENV).ok()) {
            Some(filter) => builder.parse_filters(&filter),
            None => builder.filter_level(LevelFilter::Info),
        };
        builder.write_style(self.color).format_timestamp_millis();
        builder
    }
}

static INIT: Once = Once::new();

/// Install the global logger. Later calls are ignored.
pub fn init_logging(config: LoggingConfig) {
    INIT.call_once(|| {
        // A test harness may own the logger already
        if config.builder().try_init().is_ok() {
            log::debug!("Logging to stderr, color {:?}", config.color);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_filter_beats_environment() {
        let config = LoggingConfig {
            filter: Some("lepus=trace".into()),
            ..LoggingConfig::default()
        };
        let filter = config.resolved_filter(Some("warn".into()));
        assert_eq!(filter.as_deref(), Some("lepus=trace"));
    }

    #[test]
    fn environment_filter_is_the_fallback() {
        let config = LoggingConfig::default();
        assert_eq!(config.resolved_filter(Some("warn".into())).as_deref(), Some("warn"));
        assert_eq!(config.resolved_filter(Some("  ".into())), None);
        assert_eq!(config.resolved_filter(None), None);
    }

    #[test]
    fn second_init_is_ignored() {
        init_logging(LoggingConfig {
            filter: Some("warn".into()),
            color: WriteStyle::Never,
        });
        init_logging(LoggingConfig::default());
        assert!(INIT.is_completed());
    }
}
