//! Generic observable event-stream operation.
//!
//! A [`StreamController`] owns one snapshot, opens at most one stream at a
//! time and folds that stream's frames into the snapshot through a
//! [`StreamOperation`]. Everything the engine tracks (snapshot, generation,
//! abort handle, last failure) lives in a single `watch` slot, so every
//! transition is taken under one lock and readers never see a half-applied
//! frame.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt as _;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::StreamError;
use crate::sse::SseFrame;
use crate::transport::{EventTransport, FrameStream, StreamRequest};

/// Lifecycle of one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Inflight,
    Done,
    Error,
}

impl StreamStatus {
    /// Returns true for `Done` and `Error`.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Inflight)
    }
}

/// Snapshot shape the engine can drive to a terminal status.
pub trait StreamSnapshot: Clone + Send + Sync + 'static {
    fn status(&self) -> StreamStatus;

    /// Moves the snapshot to `status`, keeping accumulated fields.
    fn finish(&mut self, status: StreamStatus, error: Option<String>);
}

/// Endpoint, initial state and event table of one kind of stream.
pub trait StreamOperation: Send + Sync + 'static {
    type Request: Send + 'static;
    type State: StreamSnapshot;

    /// Short name used in logs.
    fn label(&self) -> &'static str;

    /// Endpoint and body to open for `request`.
    fn stream_request(&self, request: &Self::Request) -> Result<StreamRequest, StreamError>;

    /// Fresh snapshot for a newly started stream; status must be `Inflight`.
    fn initial_state(&self, request: &Self::Request) -> Self::State;

    /// Applies one frame. Returns whether the snapshot changed. An error ends
    /// the stream with `Error` and must leave `state` untouched.
    fn apply(&self, state: &mut Self::State, frame: &SseFrame) -> Result<bool, StreamError>;
}

/// Handle used to abort a running stream task.
#[derive(Debug)]
pub(crate) struct AbortHandle {
    tx: watch::Sender<bool>,
}

impl AbortHandle {
    fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, rx)
    }

    pub(crate) fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

struct Slot<S> {
    generation: u64,
    snapshot: Option<S>,
    abort: Option<AbortHandle>,
    failure: Option<StreamError>,
}

struct Shared<O: StreamOperation> {
    operation: O,
    slot: watch::Sender<Slot<O::State>>,
}

impl<O: StreamOperation> Shared<O> {
    /// Applies `frame` if `generation` is still the live stream. Returns
    /// `None` for a superseded or stopped stream.
    fn apply_frame(&self, generation: u64, frame: &SseFrame) -> Option<Result<(), StreamError>> {
        let mut outcome = None;
        self.slot.send_if_modified(|slot| {
            if slot.generation != generation || slot.abort.is_none() {
                return false;
            }
            let Some(state) = slot.snapshot.as_mut() else {
                return false;
            };
            match self.operation.apply(state, frame) {
                Ok(changed) => {
                    outcome = Some(Ok(()));
                    changed
                }
                Err(err) => {
                    outcome = Some(Err(err));
                    false
                }
            }
        });
        outcome
    }

    /// Terminal transition for `generation`; ignored once stopped or
    /// superseded.
    fn finish(&self, generation: u64, result: Result<(), StreamError>) {
        let label = self.operation.label();
        self.slot.send_if_modified(|slot| {
            if slot.generation != generation || slot.abort.is_none() {
                return false;
            }
            slot.abort = None;
            let (status, error) = match &result {
                Ok(()) => (StreamStatus::Done, None),
                Err(err) => (StreamStatus::Error, Some(err.to_string())),
            };
            if let Some(state) = slot.snapshot.as_mut() {
                state.finish(status, error);
            }
            match result {
                Ok(()) => info!(stream = label, generation, "stream done"),
                Err(err) => {
                    warn!(stream = label, generation, error = %err, "stream failed");
                    slot.failure = Some(err);
                }
            }
            true
        });
    }
}

/// Read side of a controller's snapshot.
pub struct StateReceiver<S> {
    rx: watch::Receiver<Slot<S>>,
}

impl<S: Clone> StateReceiver<S> {
    /// Latest snapshot; `None` before the first start.
    pub fn current(&self) -> Option<S> {
        self.rx.borrow().snapshot.clone()
    }

    /// Whether a stream task is currently live.
    pub fn is_active(&self) -> bool {
        self.rx.borrow().abort.is_some()
    }

    /// Waits for the next change. Returns false once the controller is gone.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Waits until a snapshot satisfies `predicate` and returns it.
    pub async fn wait_for(&mut self, mut predicate: impl FnMut(&S) -> bool) -> Option<S> {
        let slot = self
            .rx
            .wait_for(|slot| slot.snapshot.as_ref().is_some_and(&mut predicate))
            .await
            .ok()?;
        slot.snapshot.clone()
    }
}

/// Runs one stream at a time and exposes its snapshot.
///
/// `start` must be called from within a Tokio runtime. Dropping the
/// controller stops its stream.
pub struct StreamController<O: StreamOperation> {
    shared: Arc<Shared<O>>,
    transport: Arc<dyn EventTransport>,
    idle_timeout: Option<Duration>,
}

impl<O: StreamOperation> StreamController<O> {
    /// Creates an idle controller; nothing is opened until `start`.
    pub fn new(operation: O, transport: Arc<dyn EventTransport>) -> Self {
        let (slot, _) = watch::channel(Slot {
            generation: 0,
            snapshot: None,
            abort: None,
            failure: None,
        });
        Self {
            shared: Arc::new(Shared { operation, slot }),
            transport,
            idle_timeout: None,
        }
    }

    /// Fails a stream with [`StreamError::Stalled`] when no frame arrives for
    /// `timeout`.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Returns the operation driving this controller's streams.
    pub fn operation(&self) -> &O {
        &self.shared.operation
    }

    /// Starts a stream, abandoning any previous one.
    ///
    /// The snapshot is reset to the operation's initial state before the
    /// connection is opened; frames of the abandoned stream are discarded
    /// from here on.
    pub fn start(&self, request: O::Request) {
        let label = self.shared.operation.label();
        let stream_request = self.shared.operation.stream_request(&request);
        let initial = self.shared.operation.initial_state(&request);
        let (abort, abort_rx) = AbortHandle::new();

        let mut generation = 0;
        self.shared.slot.send_modify(|slot| {
            if let Some(previous) = slot.abort.take() {
                previous.abort();
                info!(stream = label, generation = slot.generation, "replacing active stream");
            }
            slot.generation = slot.generation.wrapping_add(1);
            slot.snapshot = Some(initial);
            slot.abort = Some(abort);
            slot.failure = None;
            generation = slot.generation;
        });
        info!(stream = label, generation, "stream started");

        match stream_request {
            Ok(stream_request) => {
                tokio::spawn(stream_task(
                    self.shared.clone(),
                    self.transport.clone(),
                    self.idle_timeout,
                    generation,
                    stream_request,
                    abort_rx,
                ));
            }
            Err(err) => self.shared.finish(generation, Err(err)),
        }
    }

    /// Aborts the live stream, if any. The snapshot's status is left as is.
    pub fn stop(&self) {
        let label = self.shared.operation.label();
        self.shared.slot.send_if_modified(|slot| match slot.abort.take() {
            Some(handle) => {
                handle.abort();
                slot.generation = slot.generation.wrapping_add(1);
                info!(stream = label, "stream stopped");
                true
            }
            None => false,
        });
    }

    /// Latest snapshot; `None` before the first start.
    pub fn read(&self) -> Option<O::State> {
        self.shared.slot.borrow().snapshot.clone()
    }

    /// Whether a stream is live.
    pub fn is_active(&self) -> bool {
        self.shared.slot.borrow().abort.is_some()
    }

    /// Failure that ended the most recent stream, if it ended with one.
    pub fn last_failure(&self) -> Option<StreamError> {
        self.shared.slot.borrow().failure.clone()
    }

    /// Returns a receiver notified on every snapshot change.
    pub fn subscribe(&self) -> StateReceiver<O::State> {
        StateReceiver {
            rx: self.shared.slot.subscribe(),
        }
    }

    /// Waits until no stream is live and returns the final snapshot.
    pub async fn wait(&self) -> Option<O::State> {
        let mut rx = self.shared.slot.subscribe();
        match rx.wait_for(|slot| slot.abort.is_none()).await {
            Ok(slot) => slot.snapshot.clone(),
            Err(_) => self.read(),
        }
    }
}

impl<O: StreamOperation> Drop for StreamController<O> {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn aborted(rx: &mut watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Opens the stream; with an idle timeout, waiting for the response head
/// counts as silence too.
async fn open_stream(
    transport: &dyn EventTransport,
    request: StreamRequest,
    idle_timeout: Option<Duration>,
) -> Result<FrameStream, StreamError> {
    match idle_timeout {
        Some(after) => tokio::time::timeout(after, transport.open(request))
            .await
            .map_err(|_| StreamError::Stalled { after })?,
        None => transport.open(request).await,
    }
}

async fn next_frame(
    frames: &mut FrameStream,
    idle_timeout: Option<Duration>,
) -> Result<Option<SseFrame>, StreamError> {
    let next = match idle_timeout {
        Some(after) => tokio::time::timeout(after, frames.next())
            .await
            .map_err(|_| StreamError::Stalled { after })?,
        None => frames.next().await,
    };
    next.transpose()
}

async fn stream_task<O: StreamOperation>(
    shared: Arc<Shared<O>>,
    transport: Arc<dyn EventTransport>,
    idle_timeout: Option<Duration>,
    generation: u64,
    request: StreamRequest,
    mut abort_rx: watch::Receiver<bool>,
) {
    let label = shared.operation.label();

    let opened = tokio::select! {
        _ = aborted(&mut abort_rx) => {
            debug!(stream = label, generation, "aborted while connecting");
            return;
        }
        opened = open_stream(transport.as_ref(), request, idle_timeout) => opened,
    };
    let mut frames = match opened {
        Ok(frames) => frames,
        Err(err) => {
            shared.finish(generation, Err(err));
            return;
        }
    };

    loop {
        let next = tokio::select! {
            _ = aborted(&mut abort_rx) => {
                debug!(stream = label, generation, "aborted");
                return;
            }
            next = next_frame(&mut frames, idle_timeout) => next,
        };
        match next {
            Ok(Some(frame)) => {
                debug!(stream = label, generation, event = frame.event_name(), "frame");
                match shared.apply_frame(generation, &frame) {
                    Some(Ok(())) => {}
                    Some(Err(err)) => {
                        shared.finish(generation, Err(err));
                        return;
                    }
                    None => {
                        debug!(stream = label, generation, "discarding frame of abandoned stream");
                        return;
                    }
                }
            }
            Ok(None) => {
                shared.finish(generation, Ok(()));
                return;
            }
            Err(err) => {
                shared.finish(generation, Err(err));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedTransport, within};

    /// Counts `tick` frames; `fail` frames raise a remote error.
    struct Ticker;

    #[derive(Clone, Debug, PartialEq)]
    struct Ticks {
        status: StreamStatus,
        count: u32,
        error: Option<String>,
    }

    impl StreamSnapshot for Ticks {
        fn status(&self) -> StreamStatus {
            self.status
        }

        fn finish(&mut self, status: StreamStatus, error: Option<String>) {
            self.status = status;
            self.error = error;
        }
    }

    impl StreamOperation for Ticker {
        type Request = &'static str;
        type State = Ticks;

        fn label(&self) -> &'static str {
            "ticker"
        }

        fn stream_request(&self, request: &Self::Request) -> Result<StreamRequest, StreamError> {
            if request.is_empty() {
                return Err(StreamError::Config("empty path".into()));
            }
            Ok(StreamRequest::get(*request))
        }

        fn initial_state(&self, _request: &Self::Request) -> Ticks {
            Ticks {
                status: StreamStatus::Inflight,
                count: 0,
                error: None,
            }
        }

        fn apply(&self, state: &mut Ticks, frame: &SseFrame) -> Result<bool, StreamError> {
            match frame.event_name() {
                "tick" => {
                    state.count += 1;
                    Ok(true)
                }
                "fail" => Err(StreamError::Remote {
                    message: frame.data.clone(),
                }),
                _ => Ok(false),
            }
        }
    }

    fn tick() -> SseFrame {
        SseFrame::new("tick", "")
    }

    #[tokio::test]
    async fn read_is_none_before_first_start() {
        let transport = ScriptedTransport::new();
        let controller = StreamController::new(Ticker, transport.clone());
        assert_eq!(controller.read(), None);
        assert!(!controller.is_active());
    }

    #[tokio::test]
    async fn start_resets_to_inflight_and_close_gives_done() {
        let transport = ScriptedTransport::new();
        let feed = transport.feed();
        let controller = StreamController::new(Ticker, transport.clone());

        controller.start("ticks");
        assert_eq!(controller.read().map(|s| s.status), Some(StreamStatus::Inflight));
        assert!(controller.is_active());

        feed.send(tick());
        feed.send(tick());
        feed.close();

        let done = within(controller.wait()).await.expect("snapshot");
        assert_eq!(done.status, StreamStatus::Done);
        assert_eq!(done.count, 2);
        assert!(!controller.is_active());
        assert_eq!(controller.last_failure(), None);
        assert_eq!(transport.requests(), vec![StreamRequest::get("ticks")]);
    }

    #[tokio::test]
    async fn apply_error_is_terminal_and_keeps_progress() {
        let transport = ScriptedTransport::new();
        let feed = transport.feed();
        let controller = StreamController::new(Ticker, transport.clone());

        controller.start("ticks");
        feed.send(tick());
        feed.send(SseFrame::new("fail", "quota"));
        feed.send(tick());

        let failed = within(controller.wait()).await.expect("snapshot");
        assert_eq!(failed.status, StreamStatus::Error);
        assert_eq!(failed.count, 1);
        assert!(failed.error.as_deref().is_some_and(|e| e.contains("quota")));
        assert!(matches!(
            controller.last_failure(),
            Some(StreamError::Remote { .. })
        ));
    }

    #[tokio::test]
    async fn transport_errors_end_in_error() {
        let transport = ScriptedTransport::new();
        let feed = transport.feed();
        let controller = StreamController::new(Ticker, transport.clone());

        controller.start("ticks");
        feed.send(tick());
        feed.fail(StreamError::transport("connection reset"));

        let failed = within(controller.wait()).await.expect("snapshot");
        assert_eq!(failed.status, StreamStatus::Error);
        assert_eq!(failed.count, 1);
        assert!(controller.last_failure().is_some_and(|e| e.is_transport()));
    }

    #[tokio::test]
    async fn open_failure_ends_in_error() {
        let transport = ScriptedTransport::new();
        let controller = StreamController::new(Ticker, transport.clone());

        controller.start("nothing-scripted");
        let failed = within(controller.wait()).await.expect("snapshot");
        assert_eq!(failed.status, StreamStatus::Error);
    }

    #[tokio::test]
    async fn invalid_request_fails_without_opening() {
        let transport = ScriptedTransport::new();
        let controller = StreamController::new(Ticker, transport.clone());

        controller.start("");
        let failed = controller.read().expect("snapshot");
        assert_eq!(failed.status, StreamStatus::Error);
        assert!(!controller.is_active());
        assert!(transport.requests().is_empty());
    }

    #[tokio::test]
    async fn stop_keeps_status_and_is_idempotent() {
        let transport = ScriptedTransport::new();
        let feed = transport.feed();
        let controller = StreamController::new(Ticker, transport.clone());

        controller.stop();
        controller.start("ticks");
        feed.send(tick());
        let mut rx = controller.subscribe();
        within(rx.wait_for(|s| s.count == 1)).await;

        controller.stop();
        controller.stop();
        assert!(!controller.is_active());
        let snapshot = controller.read().expect("snapshot");
        assert_eq!(snapshot.status, StreamStatus::Inflight);
        assert_eq!(snapshot.count, 1);
    }

    #[tokio::test]
    async fn frames_after_stop_do_not_mutate() {
        let transport = ScriptedTransport::new();
        let feed = transport.feed();
        let controller = StreamController::new(Ticker, transport.clone());

        controller.start("ticks");
        controller.stop();
        feed.send(tick());
        feed.close();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = controller.read().expect("snapshot");
        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.status, StreamStatus::Inflight);
    }

    #[tokio::test]
    async fn stale_generation_is_rejected() {
        let transport = ScriptedTransport::new();
        let _feed = transport.feed();
        let controller = StreamController::new(Ticker, transport.clone());

        controller.start("ticks");
        let generation = controller.shared.slot.borrow().generation;
        controller.stop();

        // a callback that raced the abort still holds the old generation
        assert!(controller.shared.apply_frame(generation, &tick()).is_none());
        controller.shared.finish(generation, Ok(()));
        let snapshot = controller.read().expect("snapshot");
        assert_eq!(snapshot.count, 0);
        assert_eq!(snapshot.status, StreamStatus::Inflight);
    }

    #[tokio::test]
    async fn restart_abandons_previous_stream() {
        let transport = ScriptedTransport::new();
        let first = transport.feed();
        let second = transport.feed();
        let controller = StreamController::new(Ticker, transport.clone());

        controller.start("one");
        first.send(tick());
        let mut rx = controller.subscribe();
        within(rx.wait_for(|s| s.count == 1)).await;

        controller.start("two");
        assert_eq!(controller.read().map(|s| s.count), Some(0));
        first.send(tick());
        first.send(tick());
        first.close();
        second.send(tick());
        second.close();

        let done = within(controller.wait()).await.expect("snapshot");
        assert_eq!(done.status, StreamStatus::Done);
        assert_eq!(done.count, 1);
    }

    #[tokio::test]
    async fn silent_stream_stalls_after_idle_timeout() {
        let transport = ScriptedTransport::new();
        let feed = transport.feed();
        let controller = StreamController::new(Ticker, transport.clone())
            .idle_timeout(Some(Duration::from_millis(30)));

        controller.start("ticks");
        feed.send(tick());

        let failed = within(controller.wait()).await.expect("snapshot");
        assert_eq!(failed.status, StreamStatus::Error);
        assert_eq!(failed.count, 1);
        assert!(matches!(
            controller.last_failure(),
            Some(StreamError::Stalled { .. })
        ));
        drop(feed);
    }

    /// Accepts the request but never answers it.
    struct SilentServer;

    #[async_trait::async_trait]
    impl EventTransport for SilentServer {
        async fn open(&self, _request: StreamRequest) -> Result<FrameStream, StreamError> {
            futures::future::pending().await
        }
    }

    #[tokio::test]
    async fn unanswered_open_stalls_after_idle_timeout() {
        let controller = StreamController::new(Ticker, Arc::new(SilentServer))
            .idle_timeout(Some(Duration::from_millis(30)));

        controller.start("ticks");
        let failed = within(controller.wait()).await.expect("snapshot");
        assert_eq!(failed.status, StreamStatus::Error);
        assert_eq!(
            controller.last_failure(),
            Some(StreamError::Stalled {
                after: Duration::from_millis(30)
            })
        );
    }

    #[tokio::test]
    async fn subscribers_observe_each_applied_frame() {
        let transport = ScriptedTransport::new();
        let feed = transport.feed();
        let controller = StreamController::new(Ticker, transport.clone());
        let mut rx = controller.subscribe();

        controller.start("ticks");
        feed.send(tick());
        let seen = within(rx.wait_for(|s| s.count == 1)).await.expect("tick");
        assert_eq!(seen.status, StreamStatus::Inflight);
        feed.close();
        let seen = within(rx.wait_for(|s| s.status.is_terminal()))
            .await
            .expect("done");
        assert_eq!(seen.status, StreamStatus::Done);
        assert!(!rx.is_active());
    }
}
