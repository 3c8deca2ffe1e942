use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::engine::{StreamController, StreamOperation, StreamSnapshot, StreamStatus};
use crate::errors::{ClientError, StreamError};
use crate::message::{Message, MessageBatch};
use crate::reconcile::merge_into;
use crate::sse::SseFrame;
use crate::transport::{EventTransport, HttpTransport, StreamRequest};

/// Input of a run.
#[derive(Clone, Debug, PartialEq)]
pub enum RunInput {
    /// New messages to append to the thread.
    Messages(Vec<Message>),
    /// Arbitrary structured input understood by the assistant.
    Payload(serde_json::Value),
    /// Continue the thread without new input; sent as `null`.
    Resume,
}

impl Serialize for RunInput {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Messages(messages) => messages.serialize(serializer),
            Self::Payload(value) => value.serialize(serializer),
            Self::Resume => serializer.serialize_none(),
        }
    }
}

/// Body of a run stream request.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RunRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub input: RunInput,
    pub thread_id: String,
    pub assistant_id: String,
}

impl RunRequest {
    /// Creates a request without a user id.
    pub fn new(input: RunInput, thread_id: impl Into<String>, assistant_id: impl Into<String>) -> Self {
        Self {
            user_id: None,
            input,
            thread_id: thread_id.into(),
            assistant_id: assistant_id.into(),
        }
    }

    /// Sets the user the run is attributed to.
    pub fn user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Snapshot of a run stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamState {
    pub status: StreamStatus,
    pub messages: Vec<Message>,
    pub run_id: Option<String>,
    pub thread_id: Option<String>,
    /// Why the run ended in `Error`.
    pub error: Option<String>,
}

impl StreamSnapshot for StreamState {
    fn status(&self) -> StreamStatus {
        self.status
    }

    fn finish(&mut self, status: StreamStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
    }
}

#[derive(Deserialize)]
struct RunMetadata {
    #[serde(default)]
    run_id: Option<String>,
    #[serde(default)]
    thread_id: Option<String>,
}

/// Event table of the run stream: `data` merges, `metadata` identifies,
/// `error` fails.
#[derive(Clone, Debug)]
pub struct RunStreamOperation {
    path: String,
}

impl RunStreamOperation {
    /// Creates the operation for the run endpoint at `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for RunStreamOperation {
    fn default() -> Self {
        Self::new("runs/stream")
    }
}

pub(crate) fn remote_error(data: &str) -> StreamError {
    let message = serde_json::from_str::<serde_json::Value>(data)
        .ok()
        .and_then(|value| match value {
            serde_json::Value::String(text) => Some(text),
            serde_json::Value::Object(map) => map
                .get("message")
                .or_else(|| map.get("detail"))
                .and_then(|v| v.as_str())
                .map(ToOwned::to_owned),
            _ => None,
        })
        .unwrap_or_else(|| {
            if data.trim().is_empty() {
                "stream reported an error".to_string()
            } else {
                data.trim().to_string()
            }
        });
    StreamError::Remote { message }
}

impl StreamOperation for RunStreamOperation {
    type Request = RunRequest;
    type State = StreamState;

    fn label(&self) -> &'static str {
        "run"
    }

    fn stream_request(&self, request: &RunRequest) -> Result<StreamRequest, StreamError> {
        let body = serde_json::to_value(request)
            .map_err(|e| StreamError::Config(format!("failed to encode run request: {e}")))?;
        Ok(StreamRequest::post(self.path.clone(), body))
    }

    fn initial_state(&self, request: &RunRequest) -> StreamState {
        StreamState {
            status: StreamStatus::Inflight,
            messages: Vec::new(),
            run_id: None,
            thread_id: Some(request.thread_id.clone()).filter(|id| !id.is_empty()),
            error: None,
        }
    }

    fn apply(&self, state: &mut StreamState, frame: &SseFrame) -> Result<bool, StreamError> {
        match frame.event_name() {
            "data" => {
                if frame.data.trim().is_empty() {
                    return Ok(false);
                }
                let batch: Option<MessageBatch> = serde_json::from_str(&frame.data)
                    .map_err(|e| StreamError::malformed("data", e))?;
                let Some(batch) = batch else {
                    return Ok(false);
                };
                merge_into(&mut state.messages, batch.messages());
                Ok(true)
            }
            "metadata" => {
                let metadata: RunMetadata = serde_json::from_str(&frame.data)
                    .map_err(|e| StreamError::malformed("metadata", e))?;
                state.run_id = metadata.run_id;
                state.thread_id = metadata.thread_id;
                Ok(true)
            }
            "error" => Err(remote_error(&frame.data)),
            other => {
                debug!(event = other, "ignoring run stream event");
                Ok(false)
            }
        }
    }
}

/// Controller for conversational run streams.
pub type RunStreamController = StreamController<RunStreamOperation>;

impl RunStreamController {
    /// Builds a controller talking HTTP to the configured API.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport: Arc<dyn EventTransport> = Arc::new(HttpTransport::new(config.clone())?);
        Ok(Self::with_transport(config, transport))
    }

    /// Builds a controller over `transport`, taking paths and the idle
    /// timeout from `config`.
    pub fn with_transport(config: &ClientConfig, transport: Arc<dyn EventTransport>) -> Self {
        StreamController::new(
            RunStreamOperation::new(config.run_stream_path.clone()),
            transport,
        )
        .idle_timeout(config.idle_timeout)
    }

    /// Starts a run that adds `messages` to the thread.
    pub fn send(
        &self,
        thread_id: impl Into<String>,
        assistant_id: impl Into<String>,
        messages: Vec<Message>,
    ) {
        self.start(RunRequest::new(
            RunInput::Messages(messages),
            thread_id,
            assistant_id,
        ));
    }

    /// Continues a run that stopped with output pending.
    pub fn resume(&self, thread_id: impl Into<String>, assistant_id: impl Into<String>) {
        self.start(RunRequest::new(RunInput::Resume, thread_id, assistant_id));
    }
}
