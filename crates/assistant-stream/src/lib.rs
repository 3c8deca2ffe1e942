//! Client-side consumption of an assistant API's event streams.
//!
//! A [`RunStreamController`] opens a run stream, merges streamed message
//! deltas into an ordered transcript by message id and exposes the resulting
//! [`StreamState`]. An [`IngestionProgressController`] follows a file
//! ingestion task the same way. Both are instances of the generic
//! [`StreamController`] engine.
//!
//! ```no_run
//! use assistant_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), ClientError> {
//! let config = ClientConfig::from_env()?;
//! let runs = RunStreamController::from_config(&config)?;
//!
//! let mut updates = runs.subscribe();
//! runs.send("thread-1", "assistant-1", vec![Message::human_input("hi")]);
//! while updates.changed().await {
//!     if let Some(state) = updates.current() {
//!         println!("{:?}: {} messages", state.status, state.messages.len());
//!         if state.status.is_terminal() || !updates.is_active() {
//!             break;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

/// Connection settings.
pub mod config;
/// Generic stream controller and snapshot traits.
pub mod engine;
/// Public error types.
pub mod errors;
/// Ingestion progress stream.
pub mod ingest;
/// Transcript message model.
pub mod message;
/// Tracing subscriber setup.
pub mod observability;
/// Common imports.
pub mod prelude;
/// Merge-by-id of message sequences.
pub mod reconcile;
/// Run stream.
pub mod run;
/// Server-sent event decoding.
pub mod sse;
/// Title generation after a thread's first run.
pub mod title;
/// Stream transports.
pub mod transport;

#[cfg(test)]
mod test_support;

pub use config::ClientConfig;
pub use engine::{StateReceiver, StreamController, StreamOperation, StreamSnapshot, StreamStatus};
pub use errors::{ClientError, StreamError};
pub use ingest::{IngestRequest, IngestionProgressController, IngestionProgressState};
pub use message::{ContentItem, Message, MessageBatch, MessageContent, MessageType, ToolCall};
pub use reconcile::{merge, merge_into};
pub use run::{RunInput, RunRequest, RunStreamController, StreamState};
pub use sse::{SseDecoder, SseFrame};
pub use title::{HttpTitleGenerator, TitleGenerator, spawn_title_on_completion};
pub use transport::{EventTransport, FrameStream, HttpTransport, StreamMethod, StreamRequest};
