//! Incremental decoder for `text/event-stream` bodies.
//!
//! Bytes arrive in arbitrary chunks from the HTTP body; the decoder buffers
//! partial lines and yields the joined `data:` payload of each message once
//! its terminating blank line has been seen.  `event:`, `id:` and `retry:`
//! fields are accepted and ignored, comment lines (leading `:`) are
//! keep-alives.

use tracing::warn;

/// Upper bound on a buffered, not yet terminated line.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Upper bound on the joined `data:` payload of one message.
const MAX_MESSAGE_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Default)]
pub struct SseDecoder {
    line: Vec<u8>,
    data: Vec<u8>,
    has_data: bool,
    /// The current message outgrew a cap and is dropped at its terminator.
    oversized: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every message completed by it.
    ///
    /// Oversized messages and messages that are not valid UTF-8 are dropped
    /// with a warning.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        for &b in chunk {
            if b == b'\n' {
                let mut line = std::mem::take(&mut self.line);
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                if let Some(msg) = self.process_line(&line) {
                    out.push(msg);
                }
            } else if self.line.len() < MAX_LINE_BYTES {
                self.line.push(b);
            } else {
                self.oversized = true;
            }
        }
        out
    }

    /// Drop any partially received message, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.line.clear();
        self.clear_message();
    }

    fn clear_message(&mut self) {
        self.data.clear();
        self.has_data = false;
        self.oversized = false;
    }

    fn process_line(&mut self, line: &[u8]) -> Option<String> {
        if line.is_empty() {
            return self.finish_message();
        }
        if line[0] == b':' || self.oversized {
            return None;
        }
        let (field, value) = match line.iter().position(|&b| b == b':') {
            Some(idx) => {
                let value = &line[idx + 1..];
                (&line[..idx], value.strip_prefix(b" ").unwrap_or(value))
            }
            None => (line, &[][..]),
        };
        if field != b"data" {
            return None;
        }
        if self.data.len() + value.len() + 1 > MAX_MESSAGE_BYTES {
            self.oversized = true;
            self.data.clear();
            return None;
        }
        if self.has_data {
            self.data.push(b'\n');
        }
        self.data.extend_from_slice(value);
        self.has_data = true;
        None
    }

    fn finish_message(&mut self) -> Option<String> {
        if self.oversized {
            warn!("sse: dropping message larger than {} bytes", MAX_MESSAGE_BYTES);
            self.clear_message();
            return None;
        }
        if !self.has_data {
            return None;
        }
        let data = std::mem::take(&mut self.data);
        self.clear_message();
        match String::from_utf8(data) {
            Ok(msg) => Some(msg),
            Err(e) => {
                warn!("sse: dropping message that is not valid UTF-8: {}", e);
                None
            }
        }
    }
}
