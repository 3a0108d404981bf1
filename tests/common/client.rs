//! HTTP client for end-to-end tests
//!
//! This module provides a high-level HTTP client that wraps reqwest
//! and provides methods for all songforge-server endpoints.
//!
//! When API routes or request formats change, update only this file.

use super::constants::*;
use reqwest::Response;
use serde_json::json;
use std::time::Duration;

/// HTTP test client
pub struct TestClient {
    /// The underlying reqwest client (public for custom requests in tests)
    pub client: reqwest::Client,
    /// The base URL of the test server
    pub base_url: String,
}

impl TestClient {
    pub fn new(base_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("Failed to build reqwest client");

        Self { client, base_url }
    }

    // ========================================================================
    // Status
    // ========================================================================

    /// GET /status
    pub async fn get_status(&self) -> Response {
        self.client
            .get(format!("{}/status", self.base_url))
            .send()
            .await
            .expect("Status request failed")
    }

    // ========================================================================
    // Generation Endpoints
    // ========================================================================

    /// POST /music/generate
    pub async fn generate(&self, prompt: &str) -> Response {
        self.client
            .post(format!("{}/music/generate", self.base_url))
            .json(&json!({ "prompt": prompt }))
            .send()
            .await
            .expect("Generate request failed")
    }

    /// POST /music/jobs
    pub async fn start_job(&self, prompt: &str) -> Response {
        self.client
            .post(format!("{}/music/jobs", self.base_url))
            .json(&json!({ "prompt": prompt, "genre": "Folk", "mood": "Calm" }))
            .send()
            .await
            .expect("Start job request failed")
    }

    /// GET /music/jobs/{id}
    pub async fn get_job(&self, job_id: &str) -> Response {
        self.client
            .get(format!("{}/music/jobs/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Get job request failed")
    }

    /// DELETE /music/jobs/{id}
    pub async fn cancel_job(&self, job_id: &str) -> Response {
        self.client
            .delete(format!("{}/music/jobs/{}", self.base_url, job_id))
            .send()
            .await
            .expect("Cancel job request failed")
    }

    /// Polls a job until its phase is terminal and returns the final snapshot.
    ///
    /// # Panics
    ///
    /// Panics if the job does not finish within the request timeout.
    pub async fn wait_for_job(&self, job_id: &str) -> serde_json::Value {
        let start = std::time::Instant::now();
        loop {
            let response = self.get_job(job_id).await;
            assert_eq!(response.status(), reqwest::StatusCode::OK);
            let snapshot: serde_json::Value = response.json().await.unwrap();
            match snapshot["phase"]["state"].as_str() {
                Some("completed") | Some("failed") | Some("cancelled") => return snapshot,
                _ => {}
            }
            if start.elapsed() > Duration::from_secs(REQUEST_TIMEOUT_SECS) {
                panic!("Job {} did not finish: {}", job_id, snapshot);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // ========================================================================
    // Cache Endpoints
    // ========================================================================

    /// GET /cache/{filename}
    pub async fn get_cached(&self, filename: &str) -> Response {
        self.client
            .get(format!("{}/cache/{}", self.base_url, filename))
            .send()
            .await
            .expect("Cache request failed")
    }

    /// GET /cache/{filename} with a Range header
    pub async fn get_cached_range(&self, filename: &str, range: &str) -> Response {
        self.client
            .get(format!("{}/cache/{}", self.base_url, filename))
            .header("Range", range)
            .send()
            .await
            .expect("Cache range request failed")
    }

    /// GET on a path relative to the server, e.g. the `music_url` of a generation
    pub async fn get_path(&self, path: &str) -> Response {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .expect("Request failed")
    }
}
