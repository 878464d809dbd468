//! Incremental Server-Sent Events decoding for upstream completion streams.
//!
//! Upstream bodies arrive in arbitrary byte chunks. An event may be split
//! across chunks, and a multi-byte character may be split as well, so bytes
//! are buffered until a blank line closes the event and only then decoded.

/// Payload that closes an OpenAI-style completion stream.
pub const DONE_MARKER: &str = "[DONE]";

/// Largest event the decoder buffers while waiting for its closing blank line.
pub const DEFAULT_MAX_EVENT_BYTES: usize = 1024 * 1024;

pub struct SseDecoder {
    pending: Vec<u8>,
    // Bytes before this offset hold no event separator.
    scanned: usize,
    max_event_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::with_max_event_bytes(DEFAULT_MAX_EVENT_BYTES)
    }

    pub fn with_max_event_bytes(max_event_bytes: usize) -> Self {
        Self {
            pending: Vec::new(),
            scanned: 0,
            max_event_bytes,
        }
    }

    /// Append a chunk, dropping carriage returns so CRLF framing reads as LF.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending
            .extend(chunk.iter().copied().filter(|byte| *byte != b'\r'));
    }

    /// Data of the next complete event. Events without `data:` lines
    /// (comments, keep-alives, bare `event:` lines) are skipped.
    pub fn next_data(&mut self) -> Option<String> {
        loop {
            let Some(offset) = self.pending[self.scanned..]
                .windows(2)
                .position(|window| window == b"\n\n")
            else {
                // A trailing newline may pair with the next chunk
                self.scanned = self.pending.len().saturating_sub(1);
                return None;
            };
            let pos = self.scanned + offset;
            self.scanned = 0;
            let block: Vec<u8> = self.pending.drain(..pos + 2).collect();
            let block = String::from_utf8_lossy(&block[..pos]);
            if let Some(data) = parse_event_data(&block) {
                return Some(data);
            }
        }
    }

    /// Close the buffer at end of input so a final event without its
    /// trailing blank line is still delivered by `next_data`.
    pub fn finish(&mut self) {
        if self.has_remaining() {
            self.pending.extend_from_slice(b"\n\n");
        }
    }

    /// True once the incomplete event still being buffered has outgrown the
    /// size limit. Only meaningful after `next_data` returned `None`.
    pub fn is_oversized(&self) -> bool {
        self.pending.len() > self.max_event_bytes
    }

    pub fn has_remaining(&self) -> bool {
        self.pending
            .iter()
            .any(|byte| !byte.is_ascii_whitespace())
    }
}

/// Joins the `data:` lines of one event with newlines, per the SSE format.
fn parse_event_data(block: &str) -> Option<String> {
    let mut data: Option<String> = None;
    for line in block.lines() {
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);
        match data.as_mut() {
            Some(existing) => {
                existing.push('\n');
                existing.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }
    data
}
