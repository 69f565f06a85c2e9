//! Tracing setup for tests.
//!
//! The initializer is idempotent: the first call in a test binary installs
//! the global subscriber, later calls do nothing. Output goes through the
//! test writer so it is captured per test.

use std::sync::Once;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

const DEFAULT_FILTER: &str = "info,pcv_fixture=debug";

/// Initialize tracing for tests. `RUST_LOG` wins over the default
/// `info,pcv_fixture=debug`.
///
/// ```rust
/// pcv_testkit::init_test_tracing();
/// ```
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        // Another harness may have installed a subscriber first.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_test_writer()
                    .compact(),
            )
            .try_init();
    });
}
