//! Bounded retry with exponential backoff for transient failures.

use std::future::Future;

use crate::config::RetryConfig;
use crate::domain::foundation::DomainError;

/// Runs `op`, retrying retryable errors up to the configured attempt
/// budget with exponential backoff. Non-retryable errors and exhaustion
/// return the last error.
pub(crate) async fn run_with_retry<T, F, Fut>(
    retry: &RetryConfig,
    what: &str,
    mut op: F,
) -> Result<T, DomainError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DomainError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < retry.max_attempts => {
                tracing::debug!(target = what, attempt, error = %e, "transient failure, retrying");
                tokio::time::sleep(retry.backoff_for(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
