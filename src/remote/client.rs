//! HTTP client for the song synthesis API.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, Url};
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::error::RemoteError;
use super::models::{
    Envelope, GenerationRequest, QueryBody, QueryResult, SubmitResult, Task, TaskReport,
    TaskStatus,
};
use super::signer::{RequestSigner, SignedRequest};
use crate::server::metrics;

const SIGNED_PATH: &str = "/";
const CONTENT_TYPE_JSON: &str = "application/json";
const STATUS_CODE_SUCCESS: i64 = 0;

/// The two remote operations the generation pipeline depends on.
#[async_trait]
pub trait SynthesisApi: Send + Sync {
    /// Creates a generation job and returns it in the `Waiting` state.
    async fn submit(&self, request: &GenerationRequest) -> Result<Task, RemoteError>;

    /// Fetches the current status of a job.
    async fn query(&self, task_id: &str) -> Result<TaskReport, RemoteError>;
}

/// Action names and API version of the synthesis service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiActions {
    pub version: String,
    pub submit: String,
    pub query: String,
}

impl Default for ApiActions {
    fn default() -> Self {
        Self {
            version: "2024-08-12".to_string(),
            submit: "GenSongV4".to_string(),
            query: "QuerySong".to_string(),
        }
    }
}

pub struct SynthesisClient {
    client: Client,
    endpoint: Url,
    host: String,
    actions: ApiActions,
    signer: RequestSigner,
}

impl SynthesisClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `endpoint` - Scheme and host of the API (e.g., "https://open.volcengineapi.com")
    /// * `timeout` - Timeout applied to every call
    pub fn new(
        endpoint: &str,
        actions: ApiActions,
        signer: RequestSigner,
        timeout: Duration,
    ) -> Result<Self, RemoteError> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            RemoteError::Configuration(format!("invalid endpoint {}: {}", endpoint, e))
        })?;
        let host = host_header(&endpoint)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Configuration(format!("failed to build client: {}", e)))?;

        Ok(Self {
            client,
            endpoint,
            host,
            actions,
            signer,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn sign<B: Serialize>(
        &self,
        action: &str,
        body: &B,
    ) -> Result<(SignedRequest, Vec<u8>), RemoteError> {
        let body = serde_json::to_vec(body)
            .map_err(|e| RemoteError::InvalidResponse(format!("failed to encode body: {}", e)))?;
        let signed = self.signer.sign(
            "POST",
            SIGNED_PATH,
            &[("Action", action), ("Version", &self.actions.version)],
            &[("Content-Type", CONTENT_TYPE_JSON), ("Host", &self.host)],
            &body,
            Utc::now(),
        );
        Ok((signed, body))
    }

    /// Signs and sends one call, returning the unwrapped `Result` and the raw payload.
    async fn call<B, R>(&self, action: &str, body: &B) -> Result<(R, String), RemoteError>
    where
        B: Serialize,
        R: DeserializeOwned,
    {
        let (signed, body) = self.sign(action, body)?;

        let mut url = self.endpoint.clone();
        url.set_path(SIGNED_PATH);
        url.set_query(Some(&signed.query_string()));

        let mut request = self.client.post(url).body(body);
        for (name, value) in &signed.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await?;
        let status = response.status();
        let raw = response.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Transport {
                status: status.as_u16(),
                body: raw,
            });
        }

        let envelope: Envelope<R> = serde_json::from_str(&raw).map_err(|e| {
            RemoteError::InvalidResponse(format!("{} response: {}: {}", action, e, raw))
        })?;
        if let Some(request_id) = envelope
            .response_metadata
            .as_ref()
            .and_then(|m| m.request_id.as_deref())
        {
            debug!(action, request_id, "Remote call answered");
        }

        if envelope.code != STATUS_CODE_SUCCESS {
            return Err(RemoteError::RemoteApi {
                code: envelope.code,
                message: envelope.message,
                raw,
            });
        }
        match envelope.result {
            Some(result) => Ok((result, raw)),
            None => Err(RemoteError::InvalidResponse(format!(
                "{} response has no Result: {}",
                action, raw
            ))),
        }
    }
}

#[async_trait]
impl SynthesisApi for SynthesisClient {
    async fn submit(&self, request: &GenerationRequest) -> Result<Task, RemoteError> {
        let (result, _raw): (SubmitResult, _) =
            self.call(&self.actions.submit, &request.to_body()).await?;

        if result.task_id.trim().is_empty() {
            return Err(RemoteError::InvalidResponse(
                "submission returned an empty TaskID".to_string(),
            ));
        }
        let predicted_wait = Duration::try_from_secs_f64(result.predicted_wait_time.max(0.0))
            .map_err(|e| {
                RemoteError::InvalidResponse(format!(
                    "invalid PredictedWaitTime {}: {}",
                    result.predicted_wait_time, e
                ))
            })?;
        info!(
            task_id = %result.task_id,
            predicted_wait_secs = predicted_wait.as_secs_f64(),
            "Generation task submitted"
        );
        Ok(Task::new(result.task_id, predicted_wait))
    }

    async fn query(&self, task_id: &str) -> Result<TaskReport, RemoteError> {
        let (result, raw): (QueryResult, _) = self
            .call(&self.actions.query, &QueryBody { task_id })
            .await?;

        let status = TaskStatus::from_code(result.status);
        metrics::record_task_poll(status.as_str());
        Ok(TaskReport {
            status,
            progress: result.progress,
            song: result.song_detail.map(Into::into),
            raw,
        })
    }
}

/// Value of the `Host` header for `endpoint`, port included when not the default.
fn host_header(endpoint: &Url) -> Result<String, RemoteError> {
    let host = endpoint.host_str().ok_or_else(|| {
        RemoteError::Configuration(format!("endpoint {} has no host", endpoint))
    })?;
    Ok(match endpoint.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    })
}
