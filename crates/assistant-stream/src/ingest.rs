use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ClientConfig;
use crate::engine::{StreamController, StreamOperation, StreamSnapshot, StreamStatus};
use crate::errors::{ClientError, StreamError};
use crate::run::remote_error;
use crate::sse::SseFrame;
use crate::transport::{EventTransport, HttpTransport, StreamRequest};

/// Identifies the ingestion task to follow.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IngestRequest {
    pub task_id: String,
}

impl IngestRequest {
    /// Request to follow `task_id`.
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

/// Snapshot of an ingestion progress stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IngestionProgressState {
    pub status: StreamStatus,
    /// Latest progress value as sent by the server; not interpreted.
    pub progress: Option<serde_json::Value>,
    pub task_id: String,
    pub error: Option<String>,
}

impl StreamSnapshot for IngestionProgressState {
    fn status(&self) -> StreamStatus {
        self.status
    }

    fn finish(&mut self, status: StreamStatus, error: Option<String>) {
        self.status = status;
        self.error = error;
    }
}

/// Event table of the ingestion progress stream.
#[derive(Clone, Debug)]
pub struct IngestionProgressOperation {
    path: String,
}

impl IngestionProgressOperation {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for IngestionProgressOperation {
    fn default() -> Self {
        Self::new("ingest")
    }
}

impl StreamOperation for IngestionProgressOperation {
    type Request = IngestRequest;
    type State = IngestionProgressState;

    fn label(&self) -> &'static str {
        "ingest"
    }

    fn stream_request(&self, request: &IngestRequest) -> Result<StreamRequest, StreamError> {
        let task_id = request.task_id.trim();
        if task_id.is_empty() || task_id.contains('/') {
            return Err(ClientError::Validation(format!(
                "invalid ingestion task id {:?}",
                request.task_id
            ))
            .into());
        }
        Ok(StreamRequest::get(format!(
            "{}/{task_id}/progress",
            self.path.trim_end_matches('/')
        )))
    }

    fn initial_state(&self, request: &IngestRequest) -> IngestionProgressState {
        IngestionProgressState {
            status: StreamStatus::Inflight,
            progress: None,
            task_id: request.task_id.clone(),
            error: None,
        }
    }

    fn apply(
        &self,
        state: &mut IngestionProgressState,
        frame: &SseFrame,
    ) -> Result<bool, StreamError> {
        match frame.event_name() {
            "data" => {
                if frame.data.trim().is_empty() {
                    return Ok(false);
                }
                let progress: serde_json::Value = serde_json::from_str(&frame.data)
                    .map_err(|e| StreamError::malformed("data", e))?;
                if progress.is_null() {
                    return Ok(false);
                }
                state.progress = Some(progress);
                Ok(true)
            }
            "error" => Err(remote_error(&frame.data)),
            other => {
                debug!(event = other, "ignoring ingestion stream event");
                Ok(false)
            }
        }
    }
}

/// Controller for file ingestion progress streams.
pub type IngestionProgressController = StreamController<IngestionProgressOperation>;

impl IngestionProgressController {
    /// Builds a controller talking HTTP to the configured API.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let transport: Arc<dyn EventTransport> = Arc::new(HttpTransport::new(config.clone())?);
        Ok(Self::with_transport(config, transport))
    }

    pub fn with_transport(config: &ClientConfig, transport: Arc<dyn EventTransport>) -> Self {
        StreamController::new(
            IngestionProgressOperation::new(config.ingest_path.clone()),
            transport,
        )
        .idle_timeout(config.idle_timeout)
    }

    /// Starts following `task_id`.
    pub fn follow(&self, task_id: impl Into<String>) {
        self.start(IngestRequest::new(task_id));
    }
}
