//!
//! Server-sent event framing.
//!
//! Inbound: backend byte streams are cut into complete lines and `data:`
//! payloads. Outbound: translators produce [`SseFrame`]s which the server turns
//! into axum events.
//!
//! Authors:
//!   Jaro <yarenty@gmail.com>
//!
//! Copyright (c) 2026 SkyCorp

/* --- uses ------------------------------------------------------------------------------------ */

use axum::response::sse::Event;
use serde::Serialize;

use crate::error::{ProxyError, Result};

/* --- constants ------------------------------------------------------------------------------- */

/// OpenAI stream terminator
pub const DONE: &str = "[DONE]";

/// Longest line accepted from a backend; inline image data arrives as one line
pub const MAX_LINE_BYTES: usize = 64 * 1024 * 1024;

/* --- types ----------------------------------------------------------------------------------- */

///
/// One outbound server-sent event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /** `event:` field; `None` sends a bare `data:` frame */
    pub event: Option<String>,
    /** `data:` payload, normally JSON */
    pub data: String,
}

///
/// Reassembles lines from arbitrarily split byte chunks.
#[derive(Debug)]
pub struct LineBuffer {
    /** bytes after the last newline seen */
    buffer: Vec<u8>,
    /** ceiling for an unterminated line */
    max_line: usize,
}

/* --- start of code -------------------------------------------------------------------------- */

impl SseFrame {
    /// Bare `data:` frame
    pub fn data(data: impl Into<String>) -> Self {
        Self { event: None, data: data.into() }
    }

    /// Named frame, as used by the Anthropic event taxonomy
    pub fn named(event: &str, data: impl Into<String>) -> Self {
        Self { event: Some(event.to_string()), data: data.into() }
    }

    /// JSON `data:` frame; serialization of plain structs cannot fail, `{}` is sent if it does
    pub fn json<T: Serialize>(event: Option<&str>, payload: &T) -> Self {
        let data = serde_json::to_string(payload).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize SSE payload: {}", e);
            "{}".to_string()
        });
        Self { event: event.map(str::to_string), data }
    }

    pub fn done() -> Self {
        Self::data(DONE)
    }

    pub fn is_done(&self) -> bool {
        self.event.is_none() && self.data == DONE
    }

    /// Convert into an axum SSE event
    pub fn into_event(self) -> Event {
        let event = Event::default().data(self.data);
        match self.event {
            Some(name) => event.event(name),
            None => event,
        }
    }

    /// Wire form, `event:` line first when present
    pub fn encode(&self) -> String {
        match &self.event {
            Some(name) => format!("event: {}\ndata: {}\n\n", name, self.data),
            None => format!("data: {}\n\n", self.data),
        }
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_line: usize) -> Self {
        Self { buffer: Vec::new(), max_line }
    }

    ///
    /// Feed a chunk and return the lines it completes.
    ///
    /// # Arguments
    ///  * `chunk` - raw bytes as received
    ///
    /// # Returns
    ///  * Complete lines without their terminators
    ///  * `ProxyError::Transport` once an unterminated line outgrows the limit
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(chunk);
        // cut at a newline so multi-byte characters are never split
        let Some(end) = self.buffer.iter().rposition(|b| *b == b'\n') else {
            return self.check_limit().map(|_| Vec::new());
        };
        let complete: Vec<u8> = self.buffer.drain(..=end).collect();
        self.check_limit()?;
        let text = String::from_utf8_lossy(&complete);
        let (lines, _) = split_sse_lines(&text);
        Ok(lines.into_iter().map(str::to_string).collect())
    }

    fn check_limit(&mut self) -> Result<()> {
        if self.buffer.len() <= self.max_line {
            return Ok(());
        }
        let size = self.buffer.len();
        self.buffer = Vec::new();
        Err(ProxyError::Transport(format!(
            "backend sent {} bytes without a line break (limit {})",
            size, self.max_line
        )))
    }

    /// Remaining partial line, returned once the stream has ended
    pub fn flush(&mut self) -> Option<String> {
        let rest = String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).to_string();
        (!rest.trim().is_empty()).then_some(rest)
    }
}

///
/// Split content into complete SSE lines and remaining buffer.
///
/// # Arguments
///  * `content` - content to split
///
/// # Returns
///  * Tuple of (complete lines, remaining buffer)
pub fn split_sse_lines(content: &str) -> (Vec<&str>, String) {
    let mut lines_to_process = Vec::new();
    let mut new_buffer = String::new();

    let ends_with_newline = content.ends_with('\n');
    let all_lines: Vec<&str> = content.lines().collect();
    let line_count = all_lines.len();

    for (i, line) in all_lines.into_iter().enumerate() {
        let is_last = i + 1 == line_count;
        if is_last && !ends_with_newline {
            new_buffer = line.to_string();
        } else {
            lines_to_process.push(line);
        }
    }

    (lines_to_process, new_buffer)
}

///
/// Extract data from SSE line if it's a data event.
///
/// # Arguments
///  * `line` - SSE line to process
///
/// # Returns
///  * Some(data) if line contains data event, None otherwise
pub fn extract_sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|data| data.strip_prefix(' ').unwrap_or(data))
}

/* --- tests ----------------------------------------------------------------------------------- */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_sse_lines_keeps_partial_tail() {
        let (lines, rest) = split_sse_lines("data: a\n\ndata: b\ndata: c");
        assert_eq!(lines, vec!["data: a", "", "data: b"]);
        assert_eq!(rest, "data: c");

        let (lines, rest) = split_sse_lines("data: a\r\n");
        assert_eq!(lines, vec!["data: a"]);
        assert!(rest.is_empty());
    }

    #[test]
    fn test_line_buffer_across_chunks() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"data: {\"a\"").unwrap().is_empty());
        assert_eq!(buffer.push(b":1}\n\nda").unwrap(), vec!["data: {\"a\":1}".to_string(), String::new()]);
        assert_eq!(buffer.push(b"ta: x\n").unwrap(), vec!["data: x".to_string()]);
        assert_eq!(buffer.flush(), None);
    }

    #[test]
    fn test_line_buffer_rejects_endless_line() {
        let mut buffer = LineBuffer::with_limit(16);
        assert!(buffer.push(b"data: 0123456789").unwrap().is_empty());
        let err = buffer.push(b"abcdef").unwrap_err();
        assert!(matches!(err, ProxyError::Transport(ref m) if m.contains("without a line break")));
        assert_eq!(buffer.flush(), None);

        // complete lines longer than the limit are fine
        let mut buffer = LineBuffer::with_limit(4);
        assert_eq!(buffer.push(b"data: long line\n").unwrap(), vec!["data: long line".to_string()]);
    }

    #[test]
    fn test_extract_sse_data() {
        assert_eq!(extract_sse_data("data: {}"), Some("{}"));
        assert_eq!(extract_sse_data("data:{}"), Some("{}"));
        assert_eq!(extract_sse_data("event: ping"), None);
    }

    #[test]
    fn test_frame_encoding() {
        assert_eq!(SseFrame::done().encode(), "data: [DONE]\n\n");
        assert_eq!(SseFrame::named("ping", "{}").encode(), "event: ping\ndata: {}\n\n");
        assert!(SseFrame::done().is_done());
    }
}
