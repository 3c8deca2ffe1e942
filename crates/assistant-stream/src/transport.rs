use std::pin::Pin;

use futures::StreamExt as _;
use reqwest::header::{ACCEPT, HeaderMap, HeaderName, HeaderValue};
use tracing::debug;

use crate::config::ClientConfig;
use crate::errors::{ClientError, StreamError};
use crate::sse::{ByteStream, SseFrame, frame_stream};

/// Ordered frames of one open stream. Ends when the server closes it.
pub type FrameStream =
    Pin<Box<dyn futures::Stream<Item = Result<SseFrame, StreamError>> + Send + 'static>>;

/// HTTP method and body of a stream request.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamMethod {
    Get,
    Post(serde_json::Value),
}

/// Endpoint-relative description of a stream to open.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub method: StreamMethod,
    pub path: String,
}

impl StreamRequest {
    /// `GET` request for `path`.
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: StreamMethod::Get,
            path: path.into(),
        }
    }

    /// `POST` request for `path` with a JSON body.
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: StreamMethod::Post(body),
            path: path.into(),
        }
    }
}

/// Opens event streams. Implemented over HTTP by [`HttpTransport`]; tests use
/// in-memory fakes.
#[async_trait::async_trait]
pub trait EventTransport: Send + Sync {
    /// Opens one stream. Errors here are connection failures; the returned
    /// stream may yield further errors while it is read.
    async fn open(&self, request: StreamRequest) -> Result<FrameStream, StreamError>;
}

/// SSE transport over reqwest with a static API key header.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTransport {
    /// Validates `config` and builds the underlying client.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(default_headers(&config)?)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    /// Returns the configuration this transport was built from.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Underlying client, already carrying the API key header.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

pub(crate) fn default_headers(config: &ClientConfig) -> Result<HeaderMap, ClientError> {
    let mut headers = HeaderMap::new();
    if let Some(key) = config.api_key.as_deref() {
        let name = HeaderName::from_bytes(config.api_key_header.trim().as_bytes())
            .map_err(|e| ClientError::Config(format!("invalid api key header name: {e}")))?;
        let mut value = HeaderValue::from_str(key)
            .map_err(|e| ClientError::Config(format!("invalid api key value: {e}")))?;
        value.set_sensitive(true);
        headers.insert(name, value);
    }
    Ok(headers)
}

#[async_trait::async_trait]
impl EventTransport for HttpTransport {
    async fn open(&self, request: StreamRequest) -> Result<FrameStream, StreamError> {
        let url = self.config.url(&request.path);
        let builder = match request.method {
            StreamMethod::Get => self.client.get(&url),
            StreamMethod::Post(body) => self.client.post(&url).json(&body),
        };
        debug!(url = %url, "opening event stream");

        let response = builder
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("stream request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes: ByteStream = Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(|e| StreamError::transport(format!("stream read failed: {e}")))),
        );
        Ok(Box::pin(frame_stream(bytes)))
    }
}
