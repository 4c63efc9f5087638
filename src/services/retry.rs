use crate::config::RetryConfig;
use crate::error::{AppError, AppResult};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Runs `operation` until it succeeds, fails with a non-retryable error, or
/// `config.max_attempts` is exhausted.
pub async fn retry_with_backoff<F, Fut, T>(
    mut operation: F,
    config: &RetryConfig,
    operation_name: &str,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = AppResult<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!("{operation_name} succeeded on attempt {attempt}");
                }
                return Ok(result);
            }
            Err(e) if !is_retryable_error(&e) => return Err(e),
            Err(e) if attempt >= max_attempts => {
                warn!("{} failed on final attempt {} ({})", operation_name, attempt, e);
                return Err(e);
            }
            Err(e) => {
                let delay = calculate_backoff_delay(attempt, config);
                warn!(
                    "{} failed on attempt {} ({}), retrying in {:?}",
                    operation_name, attempt, e, delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

fn calculate_backoff_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let delay_secs = config.base_delay.as_secs_f64()
        * config.backoff_multiplier.powi((attempt - 1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Only transport-level failures are worth repeating; everything else is a
/// statement about the request or the remote data.
pub fn is_retryable_error(error: &AppError) -> bool {
    matches!(error, AppError::Transport { .. })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Operation;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transport_error() -> AppError {
        AppError::Transport {
            operation: Operation::QueryStatus,
            job_id: None,
            cause: "connection reset".into(),
        }
    }

    fn fast_config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_delay_is_capped() {
        let config = fast_config();
        assert_eq!(calculate_backoff_delay(1, &config), Duration::from_millis(10));
        assert_eq!(calculate_backoff_delay(2, &config), Duration::from_millis(20));
        assert_eq!(calculate_backoff_delay(5, &config), Duration::from_millis(40));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transport_failures_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_with_backoff(
            || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transport_error())
                } else {
                    Ok(7)
                }
            },
            &fast_config(),
            "status query",
        )
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: AppResult<()> = retry_with_backoff(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(transport_error())
            },
            &fast_config(),
            "status query",
        )
        .await;

        assert!(matches!(result, Err(AppError::Transport { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_validation_errors() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: AppResult<()> = retry_with_backoff(
            || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(AppError::validation("email", "missing"))
            },
            &fast_config(),
            "allowlist add",
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
