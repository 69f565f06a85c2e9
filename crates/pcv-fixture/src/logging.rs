//! Subscriber setup for conformance runs.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use pcv_core::{PcvError, PcvResult};

use crate::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `config.level` when set.
///
/// # Errors
/// Returns [`PcvError::Config`] if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> PcvResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        subscriber
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    };

    result.map_err(|e| PcvError::Config {
        message: format!("logging init: {e}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_config_error() {
        let config = LoggingConfig {
            level: "warn".into(),
            json: true,
        };
        // The first call may race another harness; the second never succeeds.
        let _ = init_logging(&config);
        let err = init_logging(&config).unwrap_err();
        assert_eq!(err.code(), "config");
    }
}
