//! Line framing for `data: ` streams.
//!
//! The parser buffers raw bytes rather than decoded text so a multi-byte UTF-8
//! sequence split across two transport reads is reassembled before decoding.

/// Incremental `data: ` line splitter.
///
/// - frames end at `\n` (a trailing `\r` is tolerated)
/// - blank lines, SSE comments (`:`) and non-`data` fields are dropped silently
/// - an incomplete trailing line is kept until more bytes arrive
#[derive(Debug, Default)]
pub struct ChunkParser {
    buf: Vec<u8>,
}

impl ChunkParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and return the payload of every frame they complete.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);

        let mut payloads = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            if let Some(p) = Self::payload(&self.buf[start..end]) {
                payloads.push(p);
            }
            start = end + 1;
        }
        self.buf.drain(..start);
        payloads
    }

    /// Treat whatever is left as a final frame (EOF without trailing newline).
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buf);
        Self::payload(&rest)
    }

    /// Bytes currently held back waiting for a delimiter.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    fn payload(line: &[u8]) -> Option<String> {
        let line = String::from_utf8_lossy(line);
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(':') {
            return None;
        }
        let data = trimmed.strip_prefix("data:")?.trim_start();
        if data.is_empty() {
            return None;
        }
        Some(data.to_string())
    }
}
