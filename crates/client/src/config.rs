//! Client configuration: backend location, timeouts, polling, credential
//! storage, and the KYC resubmission policy.

use std::path::PathBuf;
use std::time::Duration;

use hamro_core::kyc::ResubmissionPolicy;
use hamro_core::notification::{DEFAULT_FEED_LIMIT, DEFAULT_POLL_INTERVAL};

use crate::error::{ClientError, ClientResult};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CREDENTIALS_PATH: &str = ".hamro/credentials.json";

/// Client configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Backend API root, e.g. `http://localhost:8000/api` (no trailing slash).
    pub api_base_url: String,
    /// Upper bound for a single request, including the body.
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    /// Interval between scheduled unread-count polls.
    pub poll_interval: Duration,
    /// Number of notifications fetched for the feed.
    pub feed_limit: u32,
    /// Location of the persisted token pair.
    pub credentials_path: PathBuf,
    pub resubmission_policy: ResubmissionPolicy,
}

impl ClientConfig {
    /// Configuration with defaults for everything but the backend URL.
    ///
    /// `backend_url` is the server root; `/api` is appended.
    pub fn new(backend_url: &str) -> Self {
        Self {
            api_base_url: api_base(backend_url),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            poll_interval: DEFAULT_POLL_INTERVAL,
            feed_limit: DEFAULT_FEED_LIMIT,
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            resubmission_policy: ResubmissionPolicy::default(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// | Env Var                         | Default                   |
    /// |---------------------------------|---------------------------|
    /// | `HAMRO_BACKEND_URL`             | required                  |
    /// | `HAMRO_REQUEST_TIMEOUT_SECS`    | `30`                      |
    /// | `HAMRO_CONNECT_TIMEOUT_SECS`    | `10`                      |
    /// | `HAMRO_NOTIFICATION_POLL_SECS`  | `30`                      |
    /// | `HAMRO_NOTIFICATION_FEED_LIMIT` | `5`                       |
    /// | `HAMRO_CREDENTIALS_PATH`        | `.hamro/credentials.json` |
    /// | `HAMRO_KYC_RESUBMISSION`        | `allow_after_rejection`   |
    pub fn from_env() -> ClientResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> ClientResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let backend_url = lookup("HAMRO_BACKEND_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ClientError::Config("HAMRO_BACKEND_URL is required".into()))?;

        let mut config = Self::new(backend_url.trim());

        if let Some(secs) = parse_var::<u64>(&lookup, "HAMRO_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = positive_secs("HAMRO_REQUEST_TIMEOUT_SECS", secs)?;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HAMRO_CONNECT_TIMEOUT_SECS")? {
            config.connect_timeout = positive_secs("HAMRO_CONNECT_TIMEOUT_SECS", secs)?;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "HAMRO_NOTIFICATION_POLL_SECS")? {
            config.poll_interval = positive_secs("HAMRO_NOTIFICATION_POLL_SECS", secs)?;
        }
        if let Some(limit) = parse_var::<u32>(&lookup, "HAMRO_NOTIFICATION_FEED_LIMIT")? {
            if limit == 0 {
                return Err(ClientError::Config(
                    "HAMRO_NOTIFICATION_FEED_LIMIT must be at least 1".into(),
                ));
            }
            config.feed_limit = limit;
        }
        if let Some(path) = lookup("HAMRO_CREDENTIALS_PATH").filter(|v| !v.trim().is_empty()) {
            config.credentials_path = PathBuf::from(path);
        }
        if let Some(policy) = lookup("HAMRO_KYC_RESUBMISSION") {
            config.resubmission_policy = policy
                .trim()
                .parse()
                .map_err(|e: hamro_core::CoreError| ClientError::Config(e.to_string()))?;
        }

        Ok(config)
    }

    /// Join an API path (starting with `/`) onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base_url, path)
    }
}

fn api_base(backend_url: &str) -> String {
    format!("{}/api", backend_url.trim_end_matches('/'))
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> ClientResult<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ClientError::Config(format!("{key} must be a valid number, got '{raw}'"))),
    }
}

fn positive_secs(key: &str, secs: u64) -> ClientResult<Duration> {
    if secs == 0 {
        return Err(ClientError::Config(format!("{key} must be greater than 0")));
    }
    Ok(Duration::from_secs(secs))
}
