use std::time::Duration;

/// Failures observed while opening or consuming an event stream.
///
/// Every variant is terminal for the stream it was raised on; the engine never
/// retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// The request could not be built from the current configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Connection-level failure (connect, read, TLS).
    #[error("transport error: {0}")]
    Transport(String),
    /// The server answered the stream request with a non-success status.
    #[error("stream request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The server sent an `error` event mid-stream.
    #[error("remote error: {message}")]
    Remote { message: String },
    /// An event payload could not be decoded.
    #[error("malformed `{event}` event: {message}")]
    Malformed { event: String, message: String },
    /// No frame arrived within the configured idle timeout.
    #[error("stream stalled: no event for {after:?}")]
    Stalled { after: Duration },
}

impl StreamError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub(crate) fn malformed(event: impl Into<String>, err: impl std::fmt::Display) -> Self {
        Self::Malformed {
            event: event.into(),
            message: err.to_string(),
        }
    }

    /// Returns true for failures raised by the connection rather than by the
    /// stream's content.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Status { .. } | Self::Stalled { .. }
        )
    }
}

/// Errors returned by configuration and request builders.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Invalid or missing client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input.
    #[error("validation error: {0}")]
    Validation(String),
}

impl From<ClientError> for StreamError {
    fn from(value: ClientError) -> Self {
        StreamError::Config(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_classification() {
        assert!(StreamError::transport("reset").is_transport());
        assert!(
            StreamError::Status {
                status: 502,
                body: String::new()
            }
            .is_transport()
        );
        assert!(
            !StreamError::Remote {
                message: "boom".into()
            }
            .is_transport()
        );
        assert!(!StreamError::malformed("data", "eof").is_transport());
    }

    #[test]
    fn client_error_converts_to_config_stream_error() {
        let err: StreamError = ClientError::Validation("empty task id".into()).into();
        assert!(matches!(err, StreamError::Config(msg) if msg.contains("empty task id")));
    }
}
