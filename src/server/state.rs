use axum::extract::FromRef;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cache::CacheManager;
use crate::generation::{GenerationJobs, GenerationService};

use super::ServerConfig;

pub type GuardedCacheManager = Arc<CacheManager>;
pub type GuardedGenerationService = Arc<GenerationService>;
pub type GuardedGenerationJobs = Arc<GenerationJobs>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub cache: GuardedCacheManager,
    pub generation: GuardedGenerationService,
    pub jobs: GuardedGenerationJobs,
    /// Root token, cancelled when the server shuts down.
    pub shutdown: CancellationToken,
}

impl ServerState {
    /// Builds the state around `generation`, whose cache is served under `/cache`.
    pub fn new(
        config: ServerConfig,
        generation: GuardedGenerationService,
        shutdown: CancellationToken,
        job_retention: std::time::Duration,
    ) -> Self {
        let jobs = Arc::new(GenerationJobs::new(
            generation.clone(),
            shutdown.clone(),
            job_retention,
        ));
        ServerState {
            config,
            start_time: Instant::now(),
            cache: generation.cache().clone(),
            generation,
            jobs,
            shutdown,
        }
    }
}

impl FromRef<ServerState> for GuardedCacheManager {
    fn from_ref(input: &ServerState) -> Self {
        input.cache.clone()
    }
}

impl FromRef<ServerState> for GuardedGenerationService {
    fn from_ref(input: &ServerState) -> Self {
        input.generation.clone()
    }
}

impl FromRef<ServerState> for GuardedGenerationJobs {
    fn from_ref(input: &ServerState) -> Self {
        input.jobs.clone()
    }
}

impl FromRef<ServerState> for ServerConfig {
    fn from_ref(input: &ServerState) -> Self {
        input.config.clone()
    }
}
