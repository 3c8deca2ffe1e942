//! In-memory transport for controller tests.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::channel::mpsc;

use crate::errors::StreamError;
use crate::sse::SseFrame;
use crate::transport::{EventTransport, FrameStream, StreamRequest};

type FrameResult = Result<SseFrame, StreamError>;

/// Transport whose streams are fed by the test, one [`Feed`] per `open`.
#[derive(Default)]
pub(crate) struct ScriptedTransport {
    queued: Mutex<VecDeque<mpsc::UnboundedReceiver<FrameResult>>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues a stream for the next `open` and returns its sender.
    pub(crate) fn feed(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded();
        self.queued.lock().expect("queue lock").push_back(rx);
        Feed { tx }
    }

    pub(crate) fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

#[async_trait::async_trait]
impl EventTransport for ScriptedTransport {
    async fn open(&self, request: StreamRequest) -> Result<FrameStream, StreamError> {
        self.requests.lock().expect("requests lock").push(request);
        match self.queued.lock().expect("queue lock").pop_front() {
            Some(rx) => Ok(Box::pin(rx)),
            None => Err(StreamError::transport("connection refused")),
        }
    }
}

/// Sending side of one scripted stream.
pub(crate) struct Feed {
    tx: mpsc::UnboundedSender<FrameResult>,
}

impl Feed {
    pub(crate) fn send(&self, frame: SseFrame) {
        // the reader is gone once the stream was aborted
        let _ = self.tx.unbounded_send(Ok(frame));
    }

    pub(crate) fn event(&self, event: &str, data: serde_json::Value) {
        self.send(SseFrame::new(event, data.to_string()));
    }

    pub(crate) fn fail(&self, err: StreamError) {
        let _ = self.tx.unbounded_send(Err(err));
    }

    /// Ends the stream as a clean server close.
    pub(crate) fn close(&self) {
        self.tx.close_channel();
    }
}

/// Awaits `fut`, failing the test if it takes longer than a second.
pub(crate) async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(1), fut)
        .await
        .expect("timed out waiting for stream state")
}
