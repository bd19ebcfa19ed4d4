//! Line framing for streamed HTTP response bodies (NDJSON and SSE)

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::pin::Pin;

use crate::error::{Error, Result};

/// Accumulates raw bytes and yields complete lines.
///
/// Network chunks do not respect record boundaries, and a multi-byte UTF-8
/// character can be split across two chunks, so bytes are held until a
/// newline arrives.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and drain every complete, non-blank line
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = Self::decode(&line) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush a trailing line that never got its newline
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.pending);
        Self::decode(&rest)
    }

    fn decode(raw: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim_end_matches(['\n', '\r']);
        if line.trim().is_empty() {
            None
        } else {
            Some(line.to_string())
        }
    }
}

struct LineState<S> {
    body: Pin<Box<S>>,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    finished: bool,
}

/// Turn a streamed body into a stream of lines.
///
/// The body is owned by the returned stream, so dropping the stream drops
/// the connection.
pub fn body_lines<S, E>(body: S) -> BoxStream<'static, Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = LineState {
        body: Box::pin(body),
        buffer: LineBuffer::new(),
        ready: VecDeque::new(),
        finished: false,
    };

    futures::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.finished {
                return None;
            }
            match st.body.next().await {
                Some(Ok(bytes)) => {
                    let lines = st.buffer.push(&bytes);
                    st.ready.extend(lines);
                }
                Some(Err(e)) => {
                    st.finished = true;
                    return Some((Err(Error::llm(format!("Stream error: {}", e))), st));
                }
                None => {
                    st.finished = true;
                    st.ready.extend(st.buffer.finish());
                }
            }
        }
    })
    .boxed()
}

/// Payload of an SSE `data:` line; `None` for comments and other fields
pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim_start)
}
