//! Request, task and response types of the song synthesis API.

use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

use super::error::RemoteError;

/// Status codes reported by the query endpoint.
const STATUS_WAITING: i64 = 0;
const STATUS_HANDLING: i64 = 1;
const STATUS_SUCCEEDED: i64 = 2;
const STATUS_FAILED: i64 = 3;

/// A song generation request as submitted by the surrounding application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub mood: Option<String>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn with_genre(mut self, genre: impl Into<String>) -> Self {
        self.genre = Some(genre.into());
        self
    }

    pub fn with_mood(mut self, mood: impl Into<String>) -> Self {
        self.mood = Some(mood.into());
        self
    }

    /// Builds the wire body of the job creation call.
    pub(crate) fn to_body(&self) -> SubmitBody<'_> {
        SubmitBody {
            prompt: &self.prompt,
            gender: non_blank(&self.gender),
            genre: non_blank(&self.genre),
            mood: non_blank(&self.mood),
        }
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct SubmitBody<'a> {
    pub prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub genre: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mood: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct QueryBody<'a> {
    #[serde(rename = "TaskID")]
    pub task_id: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Handling,
    Succeeded,
    Failed,
    Unknown(i64),
}

impl TaskStatus {
    pub fn from_code(code: i64) -> Self {
        match code {
            STATUS_WAITING => TaskStatus::Waiting,
            STATUS_HANDLING => TaskStatus::Handling,
            STATUS_SUCCEEDED => TaskStatus::Succeeded,
            STATUS_FAILED => TaskStatus::Failed,
            other => TaskStatus::Unknown(other),
        }
    }

    /// Unknown statuses abort polling, so they count as terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Waiting | TaskStatus::Handling)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Waiting => "waiting",
            TaskStatus::Handling => "handling",
            TaskStatus::Succeeded => "succeeded",
            TaskStatus::Failed => "failed",
            TaskStatus::Unknown(_) => "unknown",
        }
    }
}

/// Server-side handle of a generation job.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: String,
    pub status: TaskStatus,
    pub progress: f64,
    pub predicted_wait: Duration,
}

impl Task {
    pub fn new(id: impl Into<String>, predicted_wait: Duration) -> Self {
        Self {
            id: id.into(),
            status: TaskStatus::Waiting,
            progress: 0.0,
            predicted_wait,
        }
    }

    /// Moves the task to `status`. Terminal states are final.
    pub fn advance(&mut self, status: TaskStatus, progress: f64) -> Result<(), RemoteError> {
        if self.status.is_terminal() {
            return Err(RemoteError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        self.progress = progress;
        Ok(())
    }
}

/// One timed line of the generated lyrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Utterance {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Captions {
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub utterances: Vec<Utterance>,
}

/// Output of a succeeded task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SongResult {
    pub audio_url: String,
    pub captions: Option<Captions>,
    pub duration: Option<f64>,
}

/// Snapshot returned by a single status query.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub status: TaskStatus,
    pub progress: f64,
    pub song: Option<SongResult>,
    pub raw: String,
}

// Wire schemas

#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(rename = "Code")]
    pub code: i64,
    #[serde(rename = "Message", default)]
    pub message: String,
    #[serde(rename = "Result")]
    pub result: Option<T>,
    #[serde(rename = "ResponseMetadata", default)]
    pub response_metadata: Option<ResponseMetadata>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMetadata {
    #[serde(rename = "RequestId", default)]
    pub request_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SubmitResult {
    #[serde(rename = "TaskID")]
    pub task_id: String,
    #[serde(rename = "PredictedWaitTime", default)]
    pub predicted_wait_time: f64,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResult {
    #[serde(rename = "Status")]
    pub status: i64,
    #[serde(rename = "Progress", default)]
    pub progress: f64,
    #[serde(rename = "SongDetail", default)]
    pub song_detail: Option<SongDetail>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SongDetail {
    #[serde(rename = "AudioUrl")]
    pub audio_url: String,
    #[serde(rename = "Captions", default, deserialize_with = "deserialize_captions")]
    pub captions: Option<Captions>,
    #[serde(rename = "Duration", default)]
    pub duration: Option<f64>,
}

impl From<SongDetail> for SongResult {
    fn from(detail: SongDetail) -> Self {
        SongResult {
            audio_url: detail.audio_url,
            captions: detail.captions,
            duration: detail.duration,
        }
    }
}

/// Captions come either as an embedded JSON document or as a plain object.
fn deserialize_captions<'de, D>(deserializer: D) -> Result<Option<Captions>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    match value {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(serde_json::Value::String(s)) => serde_json::from_str(&s)
            .map(Some)
            .map_err(serde::de::Error::custom),
        Some(other) => serde_json::from_value(other)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}
