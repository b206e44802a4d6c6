//! Bootstrap utilities for validation services.
//!
//! Shared initialization code for the requester and responder sides.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LOG_ENV_VAR;

/// Initialize tracing with the VALIDATION_LOG environment variable.
///
/// Defaults to "info" level if VALIDATION_LOG is not set.
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Connect to a service, retrying with exponential backoff and jitter.
///
/// * `service_name` - Name used in logs (e.g., "broker")
/// * `address` - Address reported in logs, credentials already masked
/// * `max_attempts` - Total attempts before giving up; at least one is always made
///
/// Returns the connection, or the last error once attempts run out.
pub async fn connect_with_retry<T, E, F, Fut>(
    service_name: &str,
    address: &str,
    max_attempts: u32,
    connect: F,
) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = max_attempts.max(1);
    let backoff = ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(max_attempts as usize - 1)
        .with_jitter();

    let mut failed = 0;
    let result = connect
        .retry(backoff)
        .notify(|e: &E, delay: Duration| {
            failed += 1;
            warn!(
                service = service_name,
                attempt = failed,
                max_attempts,
                backoff_ms = %delay.as_millis(),
                error = %e,
                "Connection attempt failed, retrying"
            );
        })
        .await;

    match &result {
        Ok(_) => info!(service = service_name, address, "Connected"),
        Err(e) => error!(
            service = service_name,
            address,
            max_attempts,
            error = %e,
            "Giving up on connection"
        ),
    }
    result
}
