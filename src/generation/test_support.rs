//! Fakes shared by the generation unit tests.

use async_trait::async_trait;
use axum::{routing::get, Router};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::remote::{
    Captions, GenerationRequest, PollPolicy, RemoteError, SongResult, SynthesisApi, Task,
    TaskReport, TaskStatus, Utterance,
};

pub const SONG_LEN: usize = 48_000;

enum Ending {
    Succeed(String),
    Fail,
}

/// In-memory synthesis API reporting `pending` running polls before its ending.
pub struct FakeApi {
    submit_error: Mutex<Option<RemoteError>>,
    pending: usize,
    ending: Ending,
    submits: AtomicUsize,
    queries: AtomicUsize,
}

impl FakeApi {
    pub fn succeeding(audio_url: &str, pending: usize) -> Arc<Self> {
        Self::build(None, pending, Ending::Succeed(audio_url.to_string()))
    }

    pub fn failing(pending: usize) -> Arc<Self> {
        Self::build(None, pending, Ending::Fail)
    }

    pub fn rejecting(err: RemoteError) -> Arc<Self> {
        Self::build(Some(err), 0, Ending::Fail)
    }

    fn build(submit_error: Option<RemoteError>, pending: usize, ending: Ending) -> Arc<Self> {
        Arc::new(Self {
            submit_error: Mutex::new(submit_error),
            pending,
            ending,
            submits: AtomicUsize::new(0),
            queries: AtomicUsize::new(0),
        })
    }

    pub fn submit_calls(&self) -> usize {
        self.submits.load(Ordering::SeqCst)
    }

    pub fn query_calls(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SynthesisApi for FakeApi {
    async fn submit(&self, _request: &GenerationRequest) -> Result<Task, RemoteError> {
        self.submits.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.submit_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(Task::new("fake-task", Duration::ZERO))
    }

    async fn query(&self, _task_id: &str) -> Result<TaskReport, RemoteError> {
        let index = self.queries.fetch_add(1, Ordering::SeqCst);
        if index < self.pending {
            return Ok(TaskReport {
                status: TaskStatus::Handling,
                progress: 50.0,
                song: None,
                raw: "{\"Status\":1}".to_string(),
            });
        }
        Ok(match &self.ending {
            Ending::Succeed(url) => TaskReport {
                status: TaskStatus::Succeeded,
                progress: 100.0,
                song: Some(SongResult {
                    audio_url: url.clone(),
                    captions: Some(Captions {
                        duration: Some(30.0),
                        utterances: vec![Utterance {
                            text: "la la la".to_string(),
                            start_time: 0.0,
                            end_time: 2.5,
                        }],
                    }),
                    duration: Some(30.0),
                }),
                raw: "{\"Status\":2}".to_string(),
            },
            Ending::Fail => TaskReport {
                status: TaskStatus::Failed,
                progress: 0.0,
                song: None,
                raw: "{\"Status\":3}".to_string(),
            },
        })
    }
}

pub fn fast_policy() -> PollPolicy {
    PollPolicy {
        interval: Duration::from_millis(5),
        safety_margin: Duration::ZERO,
        max_attempts: 50,
        deadline: Duration::from_secs(5),
        max_transient_failures: 2,
    }
}

/// Serves `SONG_LEN` bytes at `/files/song.mp3`; every other path is a 404.
pub async fn spawn_cdn() -> String {
    let app = Router::new().route(
        "/files/song.mp3",
        get(|| async { vec![7u8; SONG_LEN] }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{}", port)
}
