use std::sync::Once;

use tracing_subscriber::{EnvFilter, prelude::*};

use crate::settings::LogFormat;

static TEST_INIT: Once = Once::new();

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. `RUST_LOG` overrides the default `info`
/// filter.
///
/// `log_format` selects human-readable text or structured JSON. Fails if a
/// global subscriber is already installed.
pub fn init(log_format: LogFormat) -> anyhow::Result<()> {
    let filter = build_env_filter();
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true);
    match log_format {
        LogFormat::Text => tracing_subscriber::registry()
            .with(layer.compact().with_filter(filter))
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(layer.json().with_filter(filter))
            .try_init()?,
    }
    Ok(())
}

/// Run an async test body with tracing installed.
pub async fn with_test_tracing<F, Fut, T>(_test_name: &str, f: F) -> T
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = T>,
{
    install_for_tests();
    f().await
}

/// Run a sync test body with tracing installed.
pub fn with_test_tracing_sync<F, T>(_test_name: &str, f: F) -> T
where
    F: FnOnce() -> T,
{
    install_for_tests();
    f()
}

fn install_for_tests() {
    TEST_INIT.call_once(|| {
        // Another harness may already own the global subscriber.
        if let Err(e) = init(LogFormat::Text) {
            eprintln!("tracing init skipped: {e}");
        }
    });
}
