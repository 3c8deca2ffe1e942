//! Conversation title generation, fired once after a thread's first run
//! completes.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::engine::{StateReceiver, StreamStatus};
use crate::errors::{ClientError, StreamError};
use crate::message::Message;
use crate::run::StreamState;
use crate::transport::default_headers;

/// Produces a title for a thread from its transcript.
#[async_trait::async_trait]
pub trait TitleGenerator: Send + Sync {
    async fn generate(&self, thread_id: &str, history: &[Message]) -> Result<(), StreamError>;
}

/// Title generator backed by the API's title endpoint.
pub struct HttpTitleGenerator {
    client: reqwest::Client,
    config: ClientConfig,
}

impl HttpTitleGenerator {
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .default_headers(default_headers(&config)?)
            .build()
            .map_err(|e| ClientError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }
}

pub(crate) fn title_body(thread_id: &str, history: &[Message]) -> serde_json::Value {
    serde_json::json!({
        "thread_id": thread_id,
        "history": history,
    })
}

#[async_trait::async_trait]
impl TitleGenerator for HttpTitleGenerator {
    async fn generate(&self, thread_id: &str, history: &[Message]) -> Result<(), StreamError> {
        let response = self
            .client
            .post(self.config.url(&self.config.title_path))
            .json(&title_body(thread_id, history))
            .send()
            .await
            .map_err(|e| StreamError::transport(format!("title request failed: {e}")))?;
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
        Ok(())
    }
}

/// Spawns a task that calls `generator` once the observed run is `Done`.
///
/// Spawn it right after starting the thread's first run. The task ends
/// without a call when the run fails, is stopped, or the controller is
/// dropped. Generator failures are logged only.
pub fn spawn_title_on_completion(
    mut receiver: StateReceiver<StreamState>,
    generator: Arc<dyn TitleGenerator>,
) -> tokio::task::JoinHandle<bool> {
    tokio::spawn(async move {
        loop {
            if let Some(state) = receiver.current() {
                match state.status {
                    StreamStatus::Done => return generate_title(&state, generator.as_ref()).await,
                    StreamStatus::Error => return false,
                    StreamStatus::Inflight if !receiver.is_active() => return false,
                    StreamStatus::Inflight => {}
                }
            }
            if !receiver.changed().await {
                return false;
            }
        }
    })
}

async fn generate_title(state: &StreamState, generator: &dyn TitleGenerator) -> bool {
    let Some(thread_id) = state.thread_id.as_deref() else {
        debug!("run finished without a thread id; skipping title");
        return false;
    };
    match generator.generate(thread_id, &state.messages).await {
        Ok(()) => true,
        Err(err) => {
            warn!(thread_id, error = %err, "title generation failed");
            false
        }
    }
}
