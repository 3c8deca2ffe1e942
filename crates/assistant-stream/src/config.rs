use std::time::Duration;

use crate::errors::ClientError;

const DEFAULT_API_KEY_HEADER: &str = "x-api-key";

/// Connection settings shared by the run, ingestion and title clients.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base URL of the assistant API (for example `http://localhost:8100`).
    pub base_url: String,
    /// Static API key attached to every request when set.
    pub api_key: Option<String>,
    /// Header the API key is sent in.
    pub api_key_header: String,
    /// Timeout for establishing the HTTP connection.
    pub connect_timeout: Duration,
    /// Maximum silence between two frames before a stream is failed as
    /// stalled. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Path of the run stream endpoint, relative to `base_url`.
    pub run_stream_path: String,
    /// Path prefix of the ingestion endpoints, relative to `base_url`.
    pub ingest_path: String,
    /// Path of the title generation endpoint, relative to `base_url`.
    pub title_path: String,
}

impl ClientConfig {
    /// Creates a config with defaults for everything but the base URL.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            api_key_header: DEFAULT_API_KEY_HEADER.to_string(),
            connect_timeout: Duration::from_secs(10),
            idle_timeout: None,
            run_stream_path: "runs/stream".to_string(),
            ingest_path: "ingest".to_string(),
            title_path: "runs/title".to_string(),
        }
    }

    /// Builds a config from the environment.
    ///
    /// - `ASSISTANT_API_URL` (required)
    /// - `ASSISTANT_API_KEY`
    /// - `ASSISTANT_API_KEY_HEADER`
    /// - `ASSISTANT_STREAM_IDLE_TIMEOUT_SECS`
    pub fn from_env() -> Result<Self, ClientError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`ClientConfig::from_env`] with variables resolved by `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ClientError> {
        let base_url = lookup("ASSISTANT_API_URL").unwrap_or_default();
        if base_url.trim().is_empty() {
            return Err(ClientError::Config("missing ASSISTANT_API_URL".into()));
        }
        let mut config = Self::new(base_url.trim());
        if let Some(key) = lookup("ASSISTANT_API_KEY").filter(|k| !k.trim().is_empty()) {
            config.api_key = Some(key.trim().to_string());
        }
        if let Some(header) = lookup("ASSISTANT_API_KEY_HEADER").filter(|h| !h.trim().is_empty()) {
            config.api_key_header = header.trim().to_string();
        }
        if let Some(raw) = lookup("ASSISTANT_STREAM_IDLE_TIMEOUT_SECS") {
            let secs: u64 = raw.trim().parse().map_err(|_| {
                ClientError::Config(format!(
                    "ASSISTANT_STREAM_IDLE_TIMEOUT_SECS must be a whole number of seconds, got {raw:?}"
                ))
            })?;
            config.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        config.validate()?;
        Ok(config)
    }

    /// Sets the API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Overrides the API key header name.
    pub fn api_key_header(mut self, header: impl Into<String>) -> Self {
        self.api_key_header = header.into();
        self
    }

    /// Overrides the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Fails streams that stay silent for longer than `timeout`.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Overrides the run stream endpoint path.
    pub fn run_stream_path(mut self, path: impl Into<String>) -> Self {
        self.run_stream_path = path.into();
        self
    }

    /// Overrides the ingestion endpoint prefix.
    pub fn ingest_path(mut self, path: impl Into<String>) -> Self {
        self.ingest_path = path.into();
        self
    }

    /// Overrides the title endpoint path.
    pub fn title_path(mut self, path: impl Into<String>) -> Self {
        self.title_path = path.into();
        self
    }

    /// Checks that the base URL and header name are usable.
    pub fn validate(&self) -> Result<(), ClientError> {
        let base = self.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(ClientError::Config(format!(
                "base_url must start with http:// or https://, got {base:?}"
            )));
        }
        if self.api_key_header.trim().is_empty() {
            return Err(ClientError::Config("api_key_header must not be empty".into()));
        }
        Ok(())
    }

    /// Joins a relative endpoint path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}
