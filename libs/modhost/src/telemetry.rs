//! Process-wide `tracing` setup for host binaries.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogFormat, LoggingConfig};

/// Filter directive for `-v` flags; `0` keeps the configured level.
#[must_use]
pub fn verbosity_directive(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("info"),
        2 => Some("debug"),
        _ => Some("trace"),
    }
}

/// Build the filter: `RUST_LOG` wins, then `-v` flags, then the configured level.
///
/// # Errors
/// Returns an error if the resulting directive cannot be parsed.
pub fn build_filter(cfg: &LoggingConfig, verbose: u8) -> anyhow::Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let directive = verbosity_directive(verbose).unwrap_or(cfg.level.as_str());
    EnvFilter::try_new(directive)
        .map_err(|e| anyhow::anyhow!("invalid log level '{directive}': {e}"))
}

/// Install the global subscriber.
///
/// # Errors
/// Fails on an invalid level or if a global subscriber is already set.
pub fn init_logging(cfg: &LoggingConfig, verbose: u8) -> anyhow::Result<()> {
    let filter = build_filter(cfg, verbose)?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match cfg.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels() {
        assert_eq!(verbosity_directive(0), None);
        assert_eq!(verbosity_directive(1), Some("info"));
        assert_eq!(verbosity_directive(2), Some("debug"));
        assert_eq!(verbosity_directive(7), Some("trace"));
    }

    #[test]
    fn rust_log_overrides_configured_level() {
        temp_env::with_var("RUST_LOG", Some("warn"), || {
            let filter = build_filter(&LoggingConfig::default(), 2).unwrap();
            assert_eq!(filter.to_string(), "warn");
        });
    }

    #[test]
    fn configured_level_applies_without_overrides() {
        temp_env::with_var_unset("RUST_LOG", || {
            let cfg = LoggingConfig {
                level: "modhost=debug,info".to_owned(),
                ..LoggingConfig::default()
            };
            let filter = build_filter(&cfg, 0).unwrap();
            assert!(filter.to_string().contains("modhost=debug"));
        });
    }

    #[test]
    fn invalid_level_is_reported() {
        temp_env::with_var_unset("RUST_LOG", || {
            let cfg = LoggingConfig {
                level: "modhost=loud".to_owned(),
                ..LoggingConfig::default()
            };
            assert!(build_filter(&cfg, 0).is_err());
        });
    }
}
