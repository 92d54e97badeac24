/// Integration tests for resilience library
use resilience::{
    retry::{with_retry, RetryConfig, RetryError, Retryable},
    timeout::{with_timeout_result, TimeoutError},
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct CallError(TimeoutError<String>);

impl std::fmt::Display for CallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Retryable for CallError {
    fn is_retryable(&self) -> bool {
        self.0.is_elapsed()
    }
}

fn config(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_backoff: Duration::from_millis(5),
        jitter: false,
        ..Default::default()
    }
}

// ==================== Retry + Timeout ====================

#[tokio::test(start_paused = true)]
async fn test_timeouts_are_retried_until_ceiling() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();

    let result = with_retry(&config(3), move |_| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        async {
            with_timeout_result(Duration::from_millis(20), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<u32, String>(1)
            })
            .await
            .map_err(CallError)
        }
    })
    .await;

    match result {
        Err(RetryError::Exhausted { attempts, last_error }) => {
            assert_eq!(attempts, 3);
            assert!(matches!(last_error.0, TimeoutError::Elapsed(_)));
        }
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_then_fast_call_succeeds() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();

    let result = with_retry(&config(3), move |attempt| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        async move {
            with_timeout_result(Duration::from_millis(20), async move {
                if attempt == 1 {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
                Ok::<u32, String>(attempt)
            })
            .await
            .map_err(CallError)
        }
    })
    .await;

    assert_eq!(result.unwrap(), 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_operation_errors_are_not_retried() {
    let calls = Arc::new(AtomicU32::new(0));
    let calls_clone = calls.clone();

    let result = with_retry(&config(5), move |_| {
        calls_clone.fetch_add(1, Ordering::SeqCst);
        async {
            with_timeout_result(Duration::from_secs(1), async {
                Err::<u32, _>("bad input".to_string())
            })
            .await
            .map_err(CallError)
        }
    })
    .await;

    assert!(matches!(result, Err(RetryError::Permanent { attempts: 1, .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
