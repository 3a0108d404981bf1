//! Test server lifecycle management
//!
//! This module manages spawning and shutting down test HTTP servers.
//! Each test gets an isolated server with its own cache directory and its
//! own fake synthesis API.

use super::constants::*;
use super::fake_remote::{FakeRemote, RemoteBehavior};
use songforge_server::cache::CacheManager;
use songforge_server::generation::GenerationService;
use songforge_server::remote::{
    ApiActions, Credentials, PollPolicy, RequestSigner, SigningScope, SynthesisClient,
};
use songforge_server::server::{serve, RequestsLoggingLevel, ServerConfig, ServerState};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Test server instance backed by a fake synthesis API
///
/// When dropped, the server gracefully shuts down, in-flight generations are
/// cancelled and the cache directory is removed.
pub struct TestServer {
    /// Base URL for making requests (e.g., "http://127.0.0.1:12345")
    pub base_url: String,

    /// The port the server is listening on
    pub port: u16,

    /// The fake synthesis API the server talks to
    pub remote: FakeRemote,

    /// Directory holding the cached audio files
    pub cache_dir: PathBuf,

    // Private fields - keep resources alive until drop
    _temp_cache_dir: TempDir,
    shutdown: CancellationToken,
}

impl TestServer {
    /// Spawns a new test server on a random port
    ///
    /// This function:
    /// 1. Starts a fake synthesis API with the given behavior
    /// 2. Opens a cache in a temporary directory
    /// 3. Binds to a random port (127.0.0.1:0)
    /// 4. Spawns the server in a background task
    /// 5. Waits for the server to be ready
    ///
    /// # Panics
    ///
    /// Panics if any of these steps fails.
    pub async fn spawn(behavior: RemoteBehavior) -> Self {
        let remote = FakeRemote::spawn(behavior).await;

        let temp_cache_dir = TempDir::new().expect("Failed to create cache dir");
        let cache = CacheManager::open(temp_cache_dir.path(), Duration::from_secs(10), 4096)
            .await
            .expect("Failed to open cache");
        let cache_dir = cache.cache_dir().to_path_buf();

        let signer = RequestSigner::new(
            Credentials::new(TEST_ACCESS_KEY, TEST_SECRET_KEY).expect("Invalid credentials"),
            SigningScope::new("cn-beijing", "imagination"),
        );
        let client = SynthesisClient::new(
            &remote.base_url,
            ApiActions::default(),
            signer,
            Duration::from_secs(5),
        )
        .expect("Failed to build synthesis client");

        let policy = PollPolicy {
            interval: Duration::from_millis(TASK_POLL_INTERVAL_MS),
            safety_margin: Duration::ZERO,
            max_attempts: 500,
            deadline: Duration::from_secs(30),
            max_transient_failures: 2,
        };
        let generation = GenerationService::new(Arc::new(client), policy, Arc::new(cache));

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind to random port");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let config = ServerConfig {
            port,
            requests_logging_level: RequestsLoggingLevel::None,
            content_cache_age_sec: 0, // Disable caching in tests
            ..Default::default()
        };
        let shutdown = CancellationToken::new();
        let state = ServerState::new(
            config,
            Arc::new(generation),
            shutdown.clone(),
            Duration::from_secs(600),
        );

        tokio::spawn(async move {
            serve(listener, state).await.expect("Server failed");
        });

        let server = Self {
            base_url,
            port,
            remote,
            cache_dir,
            _temp_cache_dir: temp_cache_dir,
            shutdown,
        };

        server.wait_for_ready().await;

        server
    }

    /// Puts `content` in the cache under `filename`, bypassing the pipeline.
    pub fn seed_cache(&self, filename: &str, content: &[u8]) {
        std::fs::write(self.cache_dir.join(filename), content).expect("Failed to seed cache");
    }

    /// Names of the files currently in the cache directory.
    pub fn cached_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(&self.cache_dir)
            .expect("Failed to read cache dir")
            .map(|entry| {
                entry
                    .expect("Failed to read cache entry")
                    .file_name()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        names.sort();
        names
    }

    /// Waits for the server to become ready by polling the /status endpoint
    async fn wait_for_ready(&self) {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(100))
            .build()
            .expect("Failed to build reqwest client");

        let start = std::time::Instant::now();
        let timeout = Duration::from_millis(SERVER_READY_TIMEOUT_MS);

        loop {
            if start.elapsed() > timeout {
                panic!(
                    "Server did not become ready within {}ms",
                    SERVER_READY_TIMEOUT_MS
                );
            }

            match client.get(format!("{}/status", self.base_url)).send().await {
                Ok(response) if response.status().is_success() => return,
                _ => {
                    tokio::time::sleep(Duration::from_millis(SERVER_READY_POLL_INTERVAL_MS)).await;
                }
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        // TempDir will be cleaned up automatically
    }
}
