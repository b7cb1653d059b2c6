//! Incremental `text/event-stream` frame decoder.

/// Turns arbitrarily split byte chunks into complete `data:` payloads.
///
/// Bytes are buffered until a newline arrives, so a payload split across
/// reads (even inside a multi-byte character) decodes the same as one
/// delivered whole. Only newline-terminated lines are interpreted; an
/// unterminated tail is carried to the next `push`.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one chunk and returns the payloads of every record it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.buffer.iter().skip(consumed).position(|b| *b == b'\n') {
            let end = consumed + offset;
            let raw = &self.buffer[consumed..end];
            let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
            let line = String::from_utf8_lossy(raw).into_owned();
            consumed = end + 1;

            if let Some(payload) = self.process_line(&line) {
                payloads.push(payload);
            }
        }
        self.buffer.drain(..consumed);
        payloads
    }

    /// Flushes at end of stream. A record whose `data:` lines were complete
    /// but never followed by a blank line is still dispatched; an
    /// unterminated partial line is dropped.
    pub fn finish(&mut self) -> Option<String> {
        if !self.buffer.is_empty() {
            tracing::debug!(bytes = self.buffer.len(), "Discarding unterminated stream tail");
            self.buffer.clear();
        }
        self.dispatch()
    }

    /// Bytes held back waiting for a newline.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.dispatch();
        }
        // Comment, e.g. keepalive
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
        None
    }

    fn dispatch(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        let payload = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(payload)
    }
}

#[cfg(test)]
#[path = "tests/frame_tests.rs"]
mod tests;
