//! End to end generation pipeline: submit, poll, then cache the audio.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::error::GenerationError;
use super::jobs::JobPhase;
use crate::cache::CacheManager;
use crate::remote::{Captions, GenerationRequest, PollPolicy, SynthesisApi, TaskPoller};
use crate::server::metrics;

/// A song generated remotely and stored in the local cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationOutcome {
    pub task_id: String,
    pub filename: String,
    pub local_asset_path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: String,
    pub duration: Option<f64>,
    pub captions: Option<Captions>,
}

pub struct GenerationService {
    api: Arc<dyn SynthesisApi>,
    poller: TaskPoller,
    cache: Arc<CacheManager>,
}

impl GenerationService {
    pub fn new(api: Arc<dyn SynthesisApi>, policy: PollPolicy, cache: Arc<CacheManager>) -> Self {
        let poller = TaskPoller::new(api.clone(), policy);
        Self { api, poller, cache }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    /// Rejects requests that must not reach the remote API.
    pub fn validate(request: &GenerationRequest) -> Result<(), GenerationError> {
        if request.prompt.trim().is_empty() {
            return Err(GenerationError::InvalidRequest(
                "prompt must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
    ) -> Result<GenerationOutcome, GenerationError> {
        self.generate_with_progress(request, cancel, |_| {}).await
    }

    /// Runs the pipeline, reporting every phase change through `on_phase`.
    pub async fn generate_with_progress<F>(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        on_phase: F,
    ) -> Result<GenerationOutcome, GenerationError>
    where
        F: Fn(JobPhase) + Send + Sync,
    {
        let started = Instant::now();
        let result = self.run(request, cancel, &on_phase).await;

        let outcome = match &result {
            Ok(outcome) => {
                info!(
                    task_id = %outcome.task_id,
                    filename = %outcome.filename,
                    size_bytes = outcome.size_bytes,
                    "Generation completed in {:?}",
                    started.elapsed()
                );
                "success"
            }
            Err(err) => {
                error!(stage = err.stage(), "Generation failed: {}", err);
                err.stage()
            }
        };
        metrics::record_generation(outcome, started.elapsed());
        result
    }

    async fn run<F>(
        &self,
        request: &GenerationRequest,
        cancel: &CancellationToken,
        on_phase: &F,
    ) -> Result<GenerationOutcome, GenerationError>
    where
        F: Fn(JobPhase) + Send + Sync,
    {
        Self::validate(request)?;
        if cancel.is_cancelled() {
            return Err(GenerationError::Cancelled);
        }

        on_phase(JobPhase::Submitting);
        let task = tokio::select! {
            task = self.api.submit(request) => task.map_err(GenerationError::Submit)?,
            _ = cancel.cancelled() => return Err(GenerationError::Cancelled),
        };
        let task_id = task.id.clone();

        on_phase(JobPhase::polling(&task));
        let song = self
            .poller
            .wait_for_completion(task, cancel, |task| on_phase(JobPhase::polling(task)))
            .await
            .map_err(GenerationError::from_poll)?;

        on_phase(JobPhase::Downloading {
            task_id: task_id.clone(),
        });
        let asset = self
            .cache
            .store(&song.audio_url, cancel)
            .await
            .map_err(GenerationError::from_cache)?;

        Ok(GenerationOutcome {
            task_id,
            filename: asset.filename,
            local_asset_path: asset.path,
            size_bytes: asset.size_bytes,
            mime_type: asset.mime_type,
            duration: song.duration,
            captions: song.captions,
        })
    }
}
