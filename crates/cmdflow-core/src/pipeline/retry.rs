//! Per-stage retry with fixed backoff.

use std::future::Future;
use std::time::Duration;

use serde_json::Value;

use crate::domain::{RetryPolicy, StageStatus};
use crate::obs;
use crate::pipeline::error::StageError;

/// Outcome of running one stage under a retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryOutcome {
    /// Output of the successful attempt, or the last error.
    pub result: Result<Value, StageError>,
    /// Attempts actually started (0 when cancelled before the first).
    pub attempts: u32,
}

/// Run `attempt_fn` until it succeeds, fails with a kind outside
/// `policy.retry_on`, or `policy.max_attempts` attempts were made.
///
/// `attempt_fn` receives the 1-based attempt number. `is_cancelled` is
/// checked before every attempt; a raised signal ends the loop with a
/// `Cancelled` error. The delay between attempts is `policy.backoff_ms`.
///
/// `on_status` observes the stage moving to `Running` before each attempt
/// and to `Retrying` before each backoff, with the attempt number.
pub async fn execute_with_retry<F, Fut, C, S>(
    stage_id: &str,
    policy: &RetryPolicy,
    is_cancelled: C,
    mut on_status: S,
    mut attempt_fn: F,
) -> RetryOutcome
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Value, StageError>>,
    C: Fn() -> bool,
    S: FnMut(StageStatus, u32),
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempts = 0;

    loop {
        if is_cancelled() {
            return RetryOutcome {
                result: Err(StageError::cancelled(format!(
                    "stage {stage_id} cancelled before attempt {}",
                    attempts + 1
                ))),
                attempts,
            };
        }

        attempts += 1;
        on_status(StageStatus::Running, attempts);
        match attempt_fn(attempts).await {
            Ok(value) => {
                return RetryOutcome {
                    result: Ok(value),
                    attempts,
                }
            }
            Err(err) => {
                if attempts >= max_attempts || !policy.should_retry(err.kind) {
                    return RetryOutcome {
                        result: Err(err),
                        attempts,
                    };
                }
                on_status(StageStatus::Retrying, attempts);
                obs::emit_stage_retry(stage_id, attempts, err.kind, policy.backoff_ms);
                if policy.backoff_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(policy.backoff_ms)).await;
                }
            }
        }
    }
}
