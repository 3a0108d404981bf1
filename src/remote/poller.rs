//! Polls a submitted task until it reaches a terminal state.
//!
//! The first query waits for the predicted generation time plus a safety
//! margin. Afterwards the task is queried every `interval` until it succeeds,
//! fails, reports an unknown status, or the policy runs out of attempts or
//! time. Every query is signed again since signatures embed the timestamp.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::client::SynthesisApi;
use super::error::RemoteError;
use super::models::{SongResult, Task, TaskStatus};

/// Upper bound on any single wait, so instant arithmetic cannot overflow.
const MAX_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 30);

fn after(from: Instant, duration: Duration) -> Instant {
    from + duration.min(MAX_WAIT)
}

fn timed_out(task: &Task, attempts: u32, started: Instant) -> RemoteError {
    RemoteError::Timeout {
        task_id: task.id.clone(),
        attempts,
        elapsed: started.elapsed(),
    }
}

/// Bounds applied to a polling run.
#[derive(Debug, Clone, PartialEq)]
pub struct PollPolicy {
    /// Delay between two queries.
    pub interval: Duration,
    /// Added to the predicted wait before the first query.
    pub safety_margin: Duration,
    /// Maximum number of status queries.
    pub max_attempts: u32,
    /// Maximum time spent polling, initial wait included.
    pub deadline: Duration,
    /// Consecutive retryable query failures tolerated before giving up.
    pub max_transient_failures: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            safety_margin: Duration::from_secs(5),
            max_attempts: 120,
            deadline: Duration::from_secs(15 * 60),
            max_transient_failures: 3,
        }
    }
}

pub struct TaskPoller {
    api: Arc<dyn SynthesisApi>,
    policy: PollPolicy,
}

impl TaskPoller {
    pub fn new(api: Arc<dyn SynthesisApi>, policy: PollPolicy) -> Self {
        Self { api, policy }
    }

    pub fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Waits for `task` to finish and returns its song.
    ///
    /// `on_update` is called after every successful query.
    pub async fn wait_for_completion<F>(
        &self,
        mut task: Task,
        cancel: &CancellationToken,
        on_update: F,
    ) -> Result<SongResult, RemoteError>
    where
        F: Fn(&Task) + Send + Sync,
    {
        let started = Instant::now();
        let deadline = after(started, self.policy.deadline);

        let initial_wait = task.predicted_wait.saturating_add(self.policy.safety_margin);
        debug!(
            task_id = %task.id,
            "Waiting {:?} before the first status query", initial_wait
        );
        self.pause(&task, initial_wait, started, deadline, 0, cancel)
            .await?;

        let mut attempts: u32 = 0;
        let mut transient_failures: u32 = 0;
        loop {
            if attempts >= self.policy.max_attempts {
                return Err(timed_out(&task, attempts, started));
            }
            attempts += 1;

            let report = tokio::select! {
                report = self.api.query(&task.id) => report,
                _ = cancel.cancelled() => {
                    return Err(RemoteError::Cancelled { task_id: task.id.clone() });
                }
            };

            match report {
                Ok(report) => {
                    transient_failures = 0;
                    task.advance(report.status, report.progress)?;
                    on_update(&task);

                    match report.status {
                        TaskStatus::Succeeded => {
                            info!(task_id = %task.id, attempts, "Generation task succeeded");
                            return report.song.ok_or_else(|| {
                                RemoteError::InvalidResponse(format!(
                                    "task {} succeeded without SongDetail: {}",
                                    task.id, report.raw
                                ))
                            });
                        }
                        TaskStatus::Failed => {
                            warn!(task_id = %task.id, "Generation task failed");
                            return Err(RemoteError::GenerationFailed {
                                task_id: task.id.clone(),
                                raw: report.raw,
                            });
                        }
                        TaskStatus::Unknown(status) => {
                            warn!(task_id = %task.id, status, "Unknown task status");
                            return Err(RemoteError::UnexpectedStatus {
                                task_id: task.id.clone(),
                                status,
                                raw: report.raw,
                            });
                        }
                        TaskStatus::Waiting | TaskStatus::Handling => {
                            debug!(
                                task_id = %task.id,
                                status = report.status.as_str(),
                                progress = report.progress,
                                "Task still running"
                            );
                        }
                    }
                }
                Err(err)
                    if err.is_retryable()
                        && transient_failures < self.policy.max_transient_failures =>
                {
                    transient_failures += 1;
                    warn!(
                        task_id = %task.id,
                        "Status query failed ({}/{}): {}",
                        transient_failures,
                        self.policy.max_transient_failures,
                        err
                    );
                }
                Err(err) => return Err(err),
            }

            if attempts >= self.policy.max_attempts {
                return Err(timed_out(&task, attempts, started));
            }
            self.pause(&task, self.policy.interval, started, deadline, attempts, cancel)
                .await?;
        }
    }

    /// Sleeps for `duration`, never past `deadline`.
    async fn pause(
        &self,
        task: &Task,
        duration: Duration,
        started: Instant,
        deadline: Instant,
        attempts: u32,
        cancel: &CancellationToken,
    ) -> Result<(), RemoteError> {
        let wake_at = after(Instant::now(), duration).min(deadline);
        tokio::select! {
            _ = tokio::time::sleep_until(wake_at) => {}
            _ = cancel.cancelled() => {
                return Err(RemoteError::Cancelled { task_id: task.id.clone() });
            }
        }
        if Instant::now() >= deadline {
            return Err(timed_out(task, attempts, started));
        }
        Ok(())
    }
}
