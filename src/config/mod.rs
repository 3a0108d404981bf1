mod file_config;

pub use file_config::{DownloadConfig, FileConfig, JobsConfig, PollingConfig, RemoteConfig};

use crate::remote::{ApiActions, Credentials, PollPolicy, RemoteError, SigningScope};
use crate::server::{RequestsLoggingLevel, ServerConfig};
use anyhow::{bail, Result};
use clap::ValueEnum;
use reqwest::Url;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_REMOTE_ENDPOINT: &str = "https://open.volcengineapi.com";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Clone, Default)]
pub struct CliConfig {
    pub cache_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub content_cache_age_sec: usize,
    pub frontend_dir_path: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub remote_endpoint: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub cache_dir: PathBuf,
    pub port: u16,
    pub metrics_port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub content_cache_age_sec: usize,
    pub frontend_dir_path: Option<String>,

    // Sections (with defaults)
    pub remote: RemoteSettings,
    pub polling: PollingSettings,
    pub download: DownloadSettings,
    pub jobs: JobsSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let cache_dir = file
            .cache_dir
            .map(PathBuf::from)
            .unwrap_or_else(|| cli.cache_dir.clone());
        if cache_dir.as_os_str().is_empty() {
            bail!("cache_dir must be specified via --cache-dir or in config file");
        }
        if cache_dir.exists() && !cache_dir.is_dir() {
            bail!("cache_dir is not a directory: {:?}", cache_dir);
        }

        let port = file.port.unwrap_or(cli.port);
        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let content_cache_age_sec = file
            .content_cache_age_sec
            .unwrap_or(cli.content_cache_age_sec);
        let frontend_dir_path = file
            .frontend_dir_path
            .or_else(|| cli.frontend_dir_path.clone());

        // Remote settings - TOML [remote] section first, then CLI, then defaults
        let remote_file = file.remote.unwrap_or_default();
        let defaults = RemoteSettings::default();
        let actions = ApiActions::default();
        let remote = RemoteSettings {
            endpoint: remote_file
                .endpoint
                .or_else(|| cli.remote_endpoint.clone())
                .unwrap_or(defaults.endpoint),
            region: remote_file.region.unwrap_or(defaults.region),
            service: remote_file.service.unwrap_or(defaults.service),
            version: remote_file.version.unwrap_or(actions.version),
            submit_action: remote_file.submit_action.unwrap_or(actions.submit),
            query_action: remote_file.query_action.unwrap_or(actions.query),
            access_key: remote_file.access_key.or_else(|| cli.access_key.clone()),
            secret_key: remote_file.secret_key.or_else(|| cli.secret_key.clone()),
            request_timeout_sec: remote_file
                .request_timeout_sec
                .unwrap_or(defaults.request_timeout_sec),
        };
        if let Err(e) = Url::parse(&remote.endpoint) {
            bail!("Invalid remote endpoint {:?}: {}", remote.endpoint, e);
        }

        let polling_file = file.polling.unwrap_or_default();
        let polling_defaults = PollingSettings::default();
        let polling = PollingSettings {
            interval_secs: polling_file
                .interval_secs
                .unwrap_or(polling_defaults.interval_secs),
            safety_margin_secs: polling_file
                .safety_margin_secs
                .unwrap_or(polling_defaults.safety_margin_secs),
            max_attempts: polling_file
                .max_attempts
                .unwrap_or(polling_defaults.max_attempts),
            deadline_secs: polling_file
                .deadline_secs
                .unwrap_or(polling_defaults.deadline_secs),
            max_transient_failures: polling_file
                .max_transient_failures
                .unwrap_or(polling_defaults.max_transient_failures),
        };
        if polling.interval_secs == 0 {
            bail!("polling.interval_secs must be greater than 0");
        }
        if polling.max_attempts == 0 {
            bail!("polling.max_attempts must be greater than 0");
        }
        if polling.deadline_secs == 0 {
            bail!("polling.deadline_secs must be greater than 0");
        }

        let download_file = file.download.unwrap_or_default();
        let download = DownloadSettings {
            timeout_sec: download_file.timeout_sec.unwrap_or(300),
            buffer_size: download_file
                .buffer_size
                .unwrap_or(crate::cache::DEFAULT_BUFFER_SIZE),
        };

        let jobs = JobsSettings {
            retention_secs: file
                .jobs
                .and_then(|j| j.retention_secs)
                .unwrap_or(JobsSettings::default().retention_secs),
        };

        Ok(Self {
            cache_dir,
            port,
            metrics_port,
            logging_level,
            content_cache_age_sec,
            frontend_dir_path,
            remote,
            polling,
            download,
            jobs,
        })
    }

    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            requests_logging_level: self.logging_level.clone(),
            port: self.port,
            metrics_port: self.metrics_port,
            content_cache_age_sec: self.content_cache_age_sec,
            frontend_dir_path: self.frontend_dir_path.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RemoteSettings {
    pub endpoint: String,
    pub region: String,
    pub service: String,
    pub version: String,
    pub submit_action: String,
    pub query_action: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub request_timeout_sec: u64,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        let actions = ApiActions::default();
        Self {
            endpoint: DEFAULT_REMOTE_ENDPOINT.to_string(),
            region: "cn-beijing".to_string(),
            service: "imagination".to_string(),
            version: actions.version,
            submit_action: actions.submit,
            query_action: actions.query,
            access_key: None,
            secret_key: None,
            request_timeout_sec: 30,
        }
    }
}

impl std::fmt::Debug for RemoteSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSettings")
            .field("endpoint", &self.endpoint)
            .field("region", &self.region)
            .field("service", &self.service)
            .field("version", &self.version)
            .field("submit_action", &self.submit_action)
            .field("query_action", &self.query_action)
            .field("access_key", &self.access_key)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_sec", &self.request_timeout_sec)
            .finish()
    }
}

impl RemoteSettings {
    /// Fails when either key is missing or blank.
    pub fn credentials(&self) -> Result<Credentials, RemoteError> {
        Credentials::new(
            self.access_key.clone().unwrap_or_default(),
            self.secret_key.clone().unwrap_or_default(),
        )
    }

    pub fn scope(&self) -> SigningScope {
        SigningScope::new(&self.region, &self.service)
    }

    pub fn actions(&self) -> ApiActions {
        ApiActions {
            version: self.version.clone(),
            submit: self.submit_action.clone(),
            query: self.query_action.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_sec)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollingSettings {
    pub interval_secs: u64,
    pub safety_margin_secs: u64,
    pub max_attempts: u32,
    pub deadline_secs: u64,
    pub max_transient_failures: u32,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_secs: 5,
            safety_margin_secs: 5,
            max_attempts: 120,
            deadline_secs: 900,
            max_transient_failures: 3,
        }
    }
}

impl PollingSettings {
    pub fn to_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_secs(self.interval_secs),
            safety_margin: Duration::from_secs(self.safety_margin_secs),
            max_attempts: self.max_attempts,
            deadline: Duration::from_secs(self.deadline_secs),
            max_transient_failures: self.max_transient_failures,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub timeout_sec: u64,
    pub buffer_size: usize,
}

impl DownloadSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_sec)
    }
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub retention_secs: u64,
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
        }
    }
}

impl JobsSettings {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
