use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;

use crate::errors::StreamError;

/// One decoded server-sent event.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Event name; `None` when the frame carried no `event:` line.
    pub event: Option<String>,
    /// `data:` lines joined with `\n`.
    pub data: String,
    /// Last `id:` value seen in the frame.
    pub id: Option<String>,
}

impl SseFrame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            id: None,
        }
    }

    /// Event name, with the SSE default `message` for unnamed frames.
    pub fn event_name(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental decoder; feed it body chunks as they arrive.
///
/// Lines may end in `\n` or `\r\n`, mixed freely within a frame; a lone
/// `\r` is not treated as a line end.
#[derive(Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known not to start a blank line.
    scanned: usize,
}

impl SseDecoder {
    /// Buffers `chunk` and returns every frame completed by it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((frame_len, blank_len)) = find_blank_line(&self.buf, self.scanned) {
            let frame_bytes: Vec<u8> = self.buf.drain(..frame_len + blank_len).take(frame_len).collect();
            self.scanned = 0;
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
        }
        // an unfinished blank line can only start in the last two bytes
        self.scanned = self.buf.len().saturating_sub(2);
        frames
    }

    /// Flushes a trailing frame that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buf);
        parse_sse_frame(&rest)
    }
}

/// Locates the first line end followed directly by another one, starting the
/// search at `from`. Returns the frame length and the length of the
/// terminator run (`\n\n`, `\r\n\r\n`, `\r\n\n` or `\n\r\n`).
fn find_blank_line(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut from = from;
    loop {
        let newline = buf.iter().skip(from).position(|&b| b == b'\n')? + from;
        let rest = &buf[newline + 1..];
        let second = if rest.starts_with(b"\n") {
            1
        } else if rest.starts_with(b"\r\n") {
            2
        } else {
            from = newline + 1;
            continue;
        };
        let frame_len = if newline > 0 && buf[newline - 1] == b'\r' {
            newline - 1
        } else {
            newline
        };
        return Some((frame_len, newline + 1 + second - frame_len));
    }
}

fn field_value(rest: &str) -> &str {
    rest.strip_prefix(' ').unwrap_or(rest)
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut id: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(field_value(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(field_value(rest));
        } else if let Some(rest) = line.strip_prefix("id:") {
            id = Some(field_value(rest).to_string());
        } else if line == "data" {
            data_lines.push("");
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
        id,
    })
}

/// Body byte stream as produced by an HTTP client.
pub type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, StreamError>> + Send + 'static>>;

/// Decodes a byte stream into frames, preserving arrival order.
pub fn frame_stream(
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<SseFrame, StreamError>> + Send {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: std::collections::VecDeque<SseFrame>,
        done: bool,
    }

    stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: Default::default(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Ok(Some((frame, state)));
                }
                if state.done {
                    return Ok(None);
                }
                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.decoder.push_chunk(&chunk));
                    }
                    Some(Err(err)) => return Err(err),
                    None => {
                        state.done = true;
                        state.pending.extend(state.decoder.finish());
                    }
                }
            }
        },
    )
}
