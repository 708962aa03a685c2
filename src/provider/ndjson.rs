//! Newline-delimited JSON line splitter.
//!
//! Ollama streams one JSON object per line. Body chunks can end mid-line
//! (and mid UTF-8 sequence), so bytes are buffered until a newline arrives.

/// Incremental NDJSON line parser.
#[derive(Debug, Default)]
pub struct NdjsonParser {
    buffer: Vec<u8>,
}

impl NdjsonParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return every complete, non-blank line.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(line) = Self::decode(&line[..pos]) {
                lines.push(line);
            }
        }

        lines
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode(&rest)
    }

    #[cfg(test)]
    fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    fn decode(bytes: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(bytes);
        let text = text.trim();
        if text.is_empty() {
            None
        } else {
            Some(text.to_string())
        }
    }
}
