/// Resilience patterns for the valuation pipeline
///
/// This library provides:
/// - **Timeout**: Enforces time limits (relative or absolute deadline) on external calls
/// - **Retry**: Exponential backoff with jitter, retrying only transient failures
///
/// # Example: Predictor call with timeout and retry
///
/// ```rust,no_run
/// use resilience::{with_retry, with_timeout_result, RetryConfig, Retryable};
/// use std::time::Duration;
///
/// #[derive(Debug)]
/// struct Unavailable;
///
/// impl std::fmt::Display for Unavailable {
///     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
///         write!(f, "service unavailable")
///     }
/// }
///
/// impl Retryable for Unavailable {
///     fn is_retryable(&self) -> bool {
///         true
///     }
/// }
///
/// #[tokio::main]
/// async fn main() {
///     let result = with_retry(&RetryConfig::default(), |_attempt| async {
///         with_timeout_result(Duration::from_secs(2), async { Ok::<_, Unavailable>(42) })
///             .await
///             .map_err(|_| Unavailable)
///     })
///     .await;
/// }
/// ```

pub mod retry;
pub mod timeout;

pub use retry::{with_retry, Backoff, RetryConfig, RetryError, Retryable};
pub use timeout::{with_deadline, with_timeout_result, TimeoutError};
