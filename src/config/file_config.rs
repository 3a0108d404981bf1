use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub cache_dir: Option<String>,
    pub port: Option<u16>,
    pub metrics_port: Option<u16>,
    pub logging_level: Option<String>,
    pub content_cache_age_sec: Option<usize>,
    pub frontend_dir_path: Option<String>,

    // Sections
    pub remote: Option<RemoteConfig>,
    pub polling: Option<PollingConfig>,
    pub download: Option<DownloadConfig>,
    pub jobs: Option<JobsConfig>,
}

#[derive(Deserialize, Default, Clone)]
#[serde(default)]
pub struct RemoteConfig {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub service: Option<String>,
    pub version: Option<String>,
    pub submit_action: Option<String>,
    pub query_action: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub request_timeout_sec: Option<u64>,
}

impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("service", &self.service)
            .field("version", &self.version)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_secs: Option<u64>,
    pub safety_margin_secs: Option<u64>,
    pub max_attempts: Option<u32>,
    pub deadline_secs: Option<u64>,
    pub max_transient_failures: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct DownloadConfig {
    pub timeout_sec: Option<u64>,
    pub buffer_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobsConfig {
    pub retention_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
