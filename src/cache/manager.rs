//! Downloads generated audio into the local content cache.
//!
//! Downloads are streamed into a hidden `.<id>.<ext>.part` file that is
//! renamed to `<id>.<ext>` once complete, so readers only ever see finished
//! assets. Failed or cancelled downloads remove their partial file.

use futures::StreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::{Client, Url};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::server::metrics;

pub const PARTIAL_SUFFIX: &str = ".part";
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

const DEFAULT_EXTENSION: &str = "mp3";
const KNOWN_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg"];
const DEFAULT_MIME_TYPE: &str = "audio/mpeg";

// Some CDNs refuse requests that do not look like they come from a browser.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/126.0.0.0 Safari/537.36";
const BROWSER_ACCEPT: &str =
    "audio/webm,audio/ogg,audio/wav,audio/*;q=0.9,application/ogg;q=0.7,video/*;q=0.6,*/*;q=0.5";
const BROWSER_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache write error: {0}")]
    Write(String),

    #[error("Download cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A finished audio file in the cache. Never modified after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CachedAsset {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub mime_type: String,
}

pub struct CacheManager {
    client: Client,
    cache_dir: PathBuf,
    buffer_size: usize,
}

impl CacheManager {
    /// Opens the cache at `cache_dir`, creating the directory if needed.
    ///
    /// # Arguments
    /// * `cache_dir` - Directory holding cached assets
    /// * `timeout` - Timeout of a whole download
    /// * `buffer_size` - Size of the write buffer, in bytes
    pub async fn open(
        cache_dir: impl Into<PathBuf>,
        timeout: Duration,
        buffer_size: usize,
    ) -> Result<Self, CacheError> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir).await?;
        let cache_dir = fs::canonicalize(&cache_dir).await?;

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(browser_headers())
            .build()
            .map_err(|e| CacheError::Write(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            cache_dir,
            buffer_size: buffer_size.max(1),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Downloads `url` into a new uniquely named asset.
    pub async fn store(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<CachedAsset, CacheError> {
        let extension = extension_for_url(url);
        let id = uuid::Uuid::new_v4().simple().to_string();
        let filename = format!("{}.{}", id, extension);
        let final_path = self.cache_dir.join(&filename);
        let temp_path = self
            .cache_dir
            .join(format!(".{}{}", filename, PARTIAL_SUFFIX));

        debug!(url, filename = %filename, "Caching generated audio");
        let size_bytes = match self.download_to(url, &temp_path, cancel).await {
            Ok(size) => size,
            Err(err) => {
                remove_partial(&temp_path).await;
                metrics::record_cache_download("failure", 0);
                return Err(err);
            }
        };

        if let Err(err) = publish(&temp_path, &final_path).await {
            metrics::record_cache_download("failure", 0);
            return Err(err);
        }

        metrics::record_cache_download("success", size_bytes);
        info!(filename = %filename, size_bytes, "Cached generated audio");

        Ok(CachedAsset {
            mime_type: mime_type_for_extension(extension).to_string(),
            filename,
            path: final_path,
            size_bytes,
        })
    }

    async fn download_to(
        &self,
        url: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<u64, CacheError> {
        let response = tokio::select! {
            response = self.client.get(url).send() => response
                .map_err(|e| CacheError::Write(format!("failed to connect to {}: {}", url, e)))?,
            _ = cancel.cancelled() => return Err(CacheError::Cancelled),
        };

        if !response.status().is_success() {
            return Err(CacheError::Write(format!(
                "download of {} failed with status: {}",
                url,
                response.status()
            )));
        }

        let file = File::create(dest)
            .await
            .map_err(|e| CacheError::Write(format!("failed to create {:?}: {}", dest, e)))?;
        let mut writer = BufWriter::with_capacity(self.buffer_size, file);
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                chunk = stream.next() => chunk,
                _ = cancel.cancelled() => return Err(CacheError::Cancelled),
            };
            let bytes = match chunk {
                None => break,
                Some(Ok(bytes)) => bytes,
                Some(Err(e)) => {
                    return Err(CacheError::Write(format!(
                        "failed to read body of {}: {}",
                        url, e
                    )))
                }
            };
            writer
                .write_all(&bytes)
                .await
                .map_err(|e| CacheError::Write(format!("failed to write {:?}: {}", dest, e)))?;
            written += bytes.len() as u64;
        }

        writer
            .flush()
            .await
            .map_err(|e| CacheError::Write(format!("failed to flush {:?}: {}", dest, e)))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| CacheError::Write(format!("failed to sync {:?}: {}", dest, e)))?;

        Ok(written)
    }

    /// Path of a published asset, or `None` when `filename` cannot name one.
    pub fn asset_path(&self, filename: &str) -> Option<PathBuf> {
        if !is_asset_filename(filename) {
            return None;
        }
        Some(self.cache_dir.join(filename))
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_USER_AGENT));
    headers.insert(ACCEPT, HeaderValue::from_static(BROWSER_ACCEPT));
    headers.insert(
        ACCEPT_LANGUAGE,
        HeaderValue::from_static(BROWSER_ACCEPT_LANGUAGE),
    );
    headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("audio"));
    headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("no-cors"));
    headers
}

/// Moves a finished download to its final name, discarding it on failure.
async fn publish(temp_path: &Path, final_path: &Path) -> Result<(), CacheError> {
    if let Err(e) = fs::rename(temp_path, final_path).await {
        remove_partial(temp_path).await;
        return Err(CacheError::Write(format!(
            "failed to publish {:?}: {}",
            final_path, e
        )));
    }
    Ok(())
}

async fn remove_partial(temp_path: &Path) {
    if let Err(e) = fs::remove_file(temp_path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!("Failed to remove partial file {:?}: {}", temp_path, e);
        }
    }
}

/// Picks the file extension by looking for a known one in the URL path.
pub fn extension_for_url(url: &str) -> &'static str {
    let path = match Url::parse(url) {
        Ok(parsed) => parsed.path().to_ascii_lowercase(),
        Err(_) => url.to_ascii_lowercase(),
    };
    KNOWN_EXTENSIONS
        .iter()
        .copied()
        .find(|ext| path.contains(ext))
        .unwrap_or(DEFAULT_EXTENSION)
}

pub fn mime_type_for_extension(extension: &str) -> &'static str {
    match extension.to_ascii_lowercase().as_str() {
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "ogg" => "audio/ogg",
        "flac" => "audio/flac",
        "m4a" => "audio/mp4",
        _ => DEFAULT_MIME_TYPE,
    }
}

pub fn mime_type_for_filename(filename: &str) -> &'static str {
    match filename.rsplit_once('.') {
        Some((_, extension)) => mime_type_for_extension(extension),
        None => DEFAULT_MIME_TYPE,
    }
}

fn is_asset_filename(filename: &str) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.ends_with(PARTIAL_SUFFIX)
        && !filename.contains(['/', '\\'])
}
