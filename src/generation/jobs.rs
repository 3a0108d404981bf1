//! Background generation jobs.
//!
//! A job runs the generation pipeline on its own task and publishes its
//! current phase through a watch channel. Every job gets a child of the
//! server shutdown token, so it can be cancelled individually or together
//! with the server. Finished jobs are dropped once older than the retention.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::error::GenerationError;
use super::service::{GenerationOutcome, GenerationService};
use crate::remote::{GenerationRequest, Task};
use crate::server::metrics;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobPhase {
    Submitting,
    Polling {
        task_id: String,
        status: &'static str,
        progress: f64,
    },
    Downloading {
        task_id: String,
    },
    Completed {
        outcome: GenerationOutcome,
    },
    Failed {
        stage: &'static str,
        error: String,
    },
    Cancelled,
}

impl JobPhase {
    pub(crate) fn polling(task: &Task) -> Self {
        JobPhase::Polling {
            task_id: task.id.clone(),
            status: task.status.as_str(),
            progress: task.progress,
        }
    }

    /// Stage reported when the pipeline task dies without returning.
    pub const INTERNAL_STAGE: &'static str = "internal";

    fn from_result(result: Result<GenerationOutcome, GenerationError>) -> Self {
        match result {
            Ok(outcome) => JobPhase::Completed { outcome },
            Err(GenerationError::Cancelled) => JobPhase::Cancelled,
            Err(err) => JobPhase::Failed {
                stage: err.stage(),
                error: err.to_string(),
            },
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            JobPhase::Completed { .. } | JobPhase::Failed { .. } | JobPhase::Cancelled
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobError {
    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job {0} already finished")]
    AlreadyFinished(String),
}

#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub age_secs: u64,
    pub phase: JobPhase,
}

struct JobEntry {
    phase: watch::Receiver<JobPhase>,
    cancel: CancellationToken,
    created_at: Instant,
}

pub struct GenerationJobs {
    service: Arc<GenerationService>,
    shutdown: CancellationToken,
    retention: Duration,
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl GenerationJobs {
    pub fn new(
        service: Arc<GenerationService>,
        shutdown: CancellationToken,
        retention: Duration,
    ) -> Self {
        Self {
            service,
            shutdown,
            retention,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Starts a job in the background and returns its id.
    pub fn start(&self, request: GenerationRequest) -> String {
        self.prune();

        let job_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = watch::channel(JobPhase::Submitting);
        let cancel = self.shutdown.child_token();

        self.jobs.lock().unwrap().insert(
            job_id.clone(),
            JobEntry {
                phase: rx,
                cancel: cancel.clone(),
                created_at: Instant::now(),
            },
        );

        let service = self.service.clone();
        let id = job_id.clone();
        let tx = Arc::new(tx);
        metrics::record_job_started();
        tokio::spawn(async move {
            // The pipeline runs on its own task so a panic still ends the job.
            let pipeline = {
                let tx = tx.clone();
                tokio::spawn(async move {
                    service
                        .generate_with_progress(&request, &cancel, |phase| {
                            tx.send_replace(phase);
                        })
                        .await
                })
            };
            let phase = match pipeline.await {
                Ok(result) => JobPhase::from_result(result),
                Err(err) => {
                    error!(job_id = %id, "Job pipeline aborted: {}", err);
                    JobPhase::Failed {
                        stage: JobPhase::INTERNAL_STAGE,
                        error: err.to_string(),
                    }
                }
            };
            debug!(job_id = %id, "Job finished: {:?}", phase);
            tx.send_replace(phase);
            metrics::record_job_finished();
        });

        info!(job_id = %job_id, "Started generation job");
        job_id
    }

    pub fn get(&self, job_id: &str) -> Option<JobSnapshot> {
        self.prune();
        let jobs = self.jobs.lock().unwrap();
        jobs.get(job_id).map(|entry| JobSnapshot {
            job_id: job_id.to_string(),
            age_secs: entry.created_at.elapsed().as_secs(),
            phase: entry.phase.borrow().clone(),
        })
    }

    /// Requests cancellation of a running job.
    pub fn cancel(&self, job_id: &str) -> Result<(), JobError> {
        let jobs = self.jobs.lock().unwrap();
        let entry = jobs
            .get(job_id)
            .ok_or_else(|| JobError::NotFound(job_id.to_string()))?;
        if entry.phase.borrow().is_finished() {
            return Err(JobError::AlreadyFinished(job_id.to_string()));
        }
        entry.cancel.cancel();
        info!(job_id, "Cancellation requested");
        Ok(())
    }

    /// Waits until the job finishes and returns its final phase.
    pub async fn wait(&self, job_id: &str) -> Option<JobPhase> {
        let mut rx = {
            let jobs = self.jobs.lock().unwrap();
            jobs.get(job_id)?.phase.clone()
        };
        let phase = rx.wait_for(JobPhase::is_finished).await.ok()?;
        Some(phase.clone())
    }

    pub fn active_count(&self) -> usize {
        let jobs = self.jobs.lock().unwrap();
        jobs.values()
            .filter(|entry| !entry.phase.borrow().is_finished())
            .count()
    }

    fn prune(&self) {
        let mut jobs = self.jobs.lock().unwrap();
        let before = jobs.len();
        jobs.retain(|_, entry| {
            !entry.phase.borrow().is_finished() || entry.created_at.elapsed() < self.retention
        });
        let pruned = before - jobs.len();
        if pruned > 0 {
            debug!("Pruned {} finished jobs", pruned);
        }
    }
}
