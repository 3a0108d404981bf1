//! Fake synthesis API
//!
//! Speaks the signed JSON protocol of the remote service on a random local
//! port and serves the generated audio file. Every call is signed again on
//! this side, and calls whose signature does not match are rejected the way
//! the real service does.

use super::constants::*;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use chrono::NaiveDateTime;
use songforge_server::remote::signer::{
    hash_sha256, Credentials, RequestSigner, SigningScope, HEADER_AUTHORIZATION,
    HEADER_CONTENT_SHA256, HEADER_DATE,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

/// How the fake API answers the generation pipeline.
#[derive(Clone, Copy, Debug)]
pub enum RemoteBehavior {
    /// Reports `pending` running queries, then a succeeded task.
    Succeed { pending: usize },
    /// The task fails on the first query.
    Fail,
    /// Submission is refused with a non-zero business code.
    Reject,
    /// The task never leaves the running state.
    Hang,
}

/// Deterministic content of the generated song.
pub fn test_audio_bytes() -> Vec<u8> {
    (0..TEST_AUDIO_SIZE_BYTES).map(|i| (i % 251) as u8).collect()
}

struct FakeState {
    behavior: RemoteBehavior,
    base_url: String,
    submits: AtomicUsize,
    queries: AtomicUsize,
    rejected_signatures: AtomicUsize,
}

/// Handle on a running fake API.
pub struct FakeRemote {
    pub base_url: String,
    state: Arc<FakeState>,
}

impl FakeRemote {
    pub async fn spawn(behavior: RemoteBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake remote");
        let port = listener
            .local_addr()
            .expect("Failed to get local address")
            .port();
        let base_url = format!("http://127.0.0.1:{}", port);

        let state = Arc::new(FakeState {
            behavior,
            base_url: base_url.clone(),
            submits: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
            rejected_signatures: AtomicUsize::new(0),
        });

        let app = Router::new()
            .route("/", post(handle_action))
            .route(TEST_AUDIO_PATH, get(|| async { test_audio_bytes() }))
            .with_state(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("Fake remote failed");
        });

        Self { base_url, state }
    }

    pub fn submit_calls(&self) -> usize {
        self.state.submits.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.state.queries.load(Ordering::SeqCst)
    }

    /// Number of calls refused because of a bad signature.
    pub fn rejected_signatures(&self) -> usize {
        self.state.rejected_signatures.load(Ordering::SeqCst)
    }
}

fn envelope(code: i64, message: &str, result: Value) -> Response {
    Json(json!({
        "ResponseMetadata": { "RequestId": "fake-request" },
        "Code": code,
        "Message": message,
        "Result": result,
    }))
    .into_response()
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Signs the received request again with the test credentials and compares
/// the result with its `Authorization` header.
fn signature_is_valid(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    body: &[u8],
) -> bool {
    let (Some(authorization), Some(timestamp), Some(payload_hash)) = (
        header(headers, HEADER_AUTHORIZATION),
        header(headers, HEADER_DATE),
        header(headers, HEADER_CONTENT_SHA256),
    ) else {
        return false;
    };
    if payload_hash != hash_sha256(body) {
        return false;
    }
    let Ok(signed_at) = NaiveDateTime::parse_from_str(timestamp, "%Y%m%dT%H%M%SZ") else {
        return false;
    };

    let signer = RequestSigner::new(
        Credentials::new(TEST_ACCESS_KEY, TEST_SECRET_KEY).expect("Invalid credentials"),
        SigningScope::new("cn-beijing", "imagination"),
    );
    let query: Vec<(&str, &str)> = query
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let signed_headers = [
        ("Content-Type", header(headers, "content-type").unwrap_or_default()),
        ("Host", header(headers, "host").unwrap_or_default()),
    ];
    let expected = signer.sign(
        "POST",
        "/",
        &query,
        &signed_headers,
        body,
        signed_at.and_utc(),
    );
    expected.authorization == authorization
}

async fn handle_action(
    State(state): State<Arc<FakeState>>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !signature_is_valid(&headers, &query, &body) {
        state.rejected_signatures.fetch_add(1, Ordering::SeqCst);
        return (StatusCode::UNAUTHORIZED, "SignatureDoesNotMatch").into_response();
    }
    let payload: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(_) => return (StatusCode::BAD_REQUEST, "InvalidBody").into_response(),
    };

    match query.get("Action").map(String::as_str) {
        Some("GenSongV4") => {
            state.submits.fetch_add(1, Ordering::SeqCst);
            if payload["Prompt"].as_str().unwrap_or_default().is_empty() {
                return envelope(40000, "Prompt is required", Value::Null);
            }
            if let RemoteBehavior::Reject = state.behavior {
                return envelope(50000, "quota exceeded", Value::Null);
            }
            envelope(
                0,
                "Success",
                json!({ "TaskID": TEST_TASK_ID, "PredictedWaitTime": 0 }),
            )
        }
        Some("QuerySong") => {
            let seen = state.queries.fetch_add(1, Ordering::SeqCst);
            if payload["TaskID"] != TEST_TASK_ID {
                return envelope(40400, "task not found", Value::Null);
            }
            query_result(&state, seen)
        }
        _ => (StatusCode::BAD_REQUEST, "InvalidAction").into_response(),
    }
}

fn query_result(state: &FakeState, seen: usize) -> Response {
    let running = json!({ "Status": 1, "Progress": 50 });
    match state.behavior {
        RemoteBehavior::Succeed { pending } if seen >= pending => {
            let captions = json!({
                "duration": TEST_SONG_DURATION,
                "utterances": [
                    { "text": TEST_CAPTION_TEXT, "start_time": 0.5, "end_time": 4.0 }
                ],
            });
            envelope(
                0,
                "Success",
                json!({
                    "Status": 2,
                    "Progress": 100,
                    "SongDetail": {
                        "AudioUrl": format!("{}{}", state.base_url, TEST_AUDIO_PATH),
                        "Captions": captions.to_string(),
                        "Duration": TEST_SONG_DURATION,
                    },
                }),
            )
        }
        RemoteBehavior::Succeed { .. } | RemoteBehavior::Hang => envelope(0, "Success", running),
        RemoteBehavior::Fail => {
            envelope(0, "Success", json!({ "Status": 3, "Progress": 0, "FailureReason": "boom" }))
        }
        RemoteBehavior::Reject => envelope(40400, "task not found", Value::Null),
    }
}
