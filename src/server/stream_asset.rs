//! Streaming of cached audio assets with byte range support

use super::metrics;
use super::state::GuardedCacheManager;
use crate::cache::mime_type_for_filename;
use axum::{
    body::Body,
    extract::{OptionalFromRequestParts, Path, State},
    http::{
        header::{self, InvalidHeaderValue},
        request::Parts,
        HeaderValue, StatusCode,
    },
    response::{IntoResponse, Response},
};
use std::convert::Infallible;
use thiserror::Error;
use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt, BufReader, SeekFrom},
};
use tokio_util::io::ReaderStream;
use tracing::{debug, error};

const STREAM_CHUNK_SIZE: usize = 4096 * 16;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Asset not found")]
    NotFound,

    #[error("Range not satisfiable for an asset of {size} bytes")]
    RangeNotSatisfiable { size: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] InvalidHeaderValue),
}

impl IntoResponse for AssetError {
    fn into_response(self) -> Response {
        match self {
            AssetError::NotFound => {
                metrics::record_asset_response("not_found");
                StatusCode::NOT_FOUND.into_response()
            }
            AssetError::RangeNotSatisfiable { size } => {
                metrics::record_asset_response("unsatisfiable");
                (
                    StatusCode::RANGE_NOT_SATISFIABLE,
                    [(header::CONTENT_RANGE, format!("bytes */{}", size))],
                )
                    .into_response()
            }
            err => {
                error!("Failed to serve cached asset: {}", err);
                metrics::record_asset_response("error");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    start_inclusive: Option<u64>,
    end_inclusive: Option<u64>,
}

impl ByteRange {
    pub fn new(start_inclusive: Option<u64>, end_inclusive: Option<u64>) -> ByteRange {
        ByteRange {
            start_inclusive,
            end_inclusive,
        }
    }

    /// Parses a single `bytes=start-end` range, either bound may be empty.
    fn parse<S: AsRef<str>>(s: S) -> Option<ByteRange> {
        let v = s.as_ref().trim().strip_prefix("bytes=")?;

        let parts: Vec<&str> = v.split('-').collect();
        if parts.len() != 2 {
            return None;
        }

        Some(ByteRange {
            start_inclusive: parse_bound(parts[0])?,
            end_inclusive: parse_bound(parts[1])?,
        })
    }

    /// Inclusive `(start, end)` offsets of this range in an asset of `size` bytes.
    pub fn resolve(&self, size: u64) -> Result<(u64, u64), AssetError> {
        let unsatisfiable = AssetError::RangeNotSatisfiable { size };
        if size == 0 {
            return Err(unsatisfiable);
        }
        let start = self.start_inclusive.unwrap_or(0);
        let end = self.end_inclusive.unwrap_or(size - 1);
        if start > end || start >= size || end >= size {
            return Err(unsatisfiable);
        }
        Ok((start, end))
    }
}

/// `Some(None)` for an empty bound, `None` when the bound is not a number.
fn parse_bound(s: &str) -> Option<Option<u64>> {
    let s = s.trim();
    if s.is_empty() {
        return Some(None);
    }
    s.parse::<u64>().ok().map(Some)
}

impl<S> OptionalFromRequestParts<S> for ByteRange
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        Ok(parts
            .headers
            .get(header::RANGE)
            .and_then(|x| x.to_str().ok())
            .and_then(ByteRange::parse))
    }
}

pub async fn stream_cached_asset(
    byte_range: Option<ByteRange>,
    State(cache): State<GuardedCacheManager>,
    Path(filename): Path<String>,
) -> Result<Response, AssetError> {
    let path = cache.asset_path(&filename).ok_or(AssetError::NotFound)?;

    let mut file = match File::open(&path).await {
        Ok(x) => x,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Err(AssetError::NotFound),
        Err(e) => return Err(e.into()),
    };
    let file_length = file.metadata().await?.len();

    let (status_code, start, chunk_size) = match byte_range {
        None => (StatusCode::OK, 0, file_length),
        Some(range) => {
            let (start, end) = range.resolve(file_length)?;
            (StatusCode::PARTIAL_CONTENT, start, end - start + 1)
        }
    };
    debug!(
        "Streaming {} ({} bytes from {}) of {}",
        filename, chunk_size, start, file_length
    );

    if start > 0 {
        file.seek(SeekFrom::Start(start)).await?;
    }
    let file_reader = BufReader::with_capacity(STREAM_CHUNK_SIZE, file.take(chunk_size));
    let stream = ReaderStream::with_capacity(file_reader, STREAM_CHUNK_SIZE);

    let mut response = Body::from_stream(stream).into_response();
    *response.status_mut() = status_code;
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(mime_type_for_filename(&filename)),
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(chunk_size));
    if status_code == StatusCode::PARTIAL_CONTENT {
        headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!(
                "bytes {}-{}/{}",
                start,
                start + chunk_size - 1,
                file_length
            ))?,
        );
        metrics::record_asset_response("partial");
    } else {
        metrics::record_asset_response("full");
    }

    Ok(response)
}
