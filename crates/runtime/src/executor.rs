//! Single-step execution: timeout enforcement, retry with backoff, and the
//! append-only attempt history.

use std::future::Future;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, warn};

use leadflow_core::domain::run::{AttemptOutcome, Run, StepAttempt};
use leadflow_core::domain::workflow::{Step, WorkflowDefaults};
use leadflow_core::errors::StepError;

#[derive(Clone, Copy, Debug, Default)]
pub struct StepExecutor;

impl StepExecutor {
    pub fn new() -> Self {
        Self
    }

    /// Run one step to success or final failure. `attempt_fn` produces a
    /// fresh invocation future per attempt; an attempt that outlives the
    /// step timeout is dropped and recorded as `Timeout`. Exactly
    /// `max_attempts` invocations happen for persistently retryable
    /// failures; fatal classes return immediately.
    pub async fn execute<F, Fut>(
        &self,
        step: &Step,
        defaults: &WorkflowDefaults,
        run: &mut Run,
        attempt_fn: F,
    ) -> Result<Value, StepError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, StepError>>,
    {
        let retry = step.retry_settings(defaults);
        let timeout = step.timeout(defaults);
        let mut last_error = StepError::Fatal("step was never attempted".to_string());

        for attempt in 1..=retry.max_attempts {
            let started_at = Utc::now();
            let result = match tokio::time::timeout(timeout, attempt_fn()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StepError::Timeout {
                    step: step.name.clone(),
                    timeout_secs: timeout.as_secs(),
                }),
            };
            let finished_at = Utc::now();

            match result {
                Ok(output) => {
                    run.record_attempt(StepAttempt {
                        step: step.name.clone(),
                        attempt,
                        outcome: AttemptOutcome::Succeeded,
                        started_at,
                        finished_at,
                    });
                    debug!(run = %run.id, step = %step.name, attempt, "step succeeded");
                    return Ok(output);
                }
                Err(error) => {
                    run.record_attempt(StepAttempt {
                        step: step.name.clone(),
                        attempt,
                        outcome: AttemptOutcome::Failed {
                            class: error.class().to_string(),
                            message: error.to_string(),
                        },
                        started_at,
                        finished_at,
                    });
                    warn!(
                        run = %run.id,
                        step = %step.name,
                        attempt,
                        class = error.class(),
                        "step attempt failed: {error}"
                    );

                    if error.is_retryable() && attempt < retry.max_attempts {
                        tokio::time::sleep(retry.delay_after(attempt)).await;
                        last_error = error;
                    } else {
                        return Err(error);
                    }
                }
            }
        }

        Err(last_error)
    }
}
