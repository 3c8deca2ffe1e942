//! Common imports for typical usage.
pub use crate::{
    ClientConfig, ClientError, IngestionProgressController, IngestionProgressState, Message,
    MessageType, RunInput, RunRequest, RunStreamController, StateReceiver, StreamError,
    StreamState, StreamStatus,
};
