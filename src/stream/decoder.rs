//! Incremental line decoder for streamed response bodies.
//!
//! Feed it raw byte chunks (arriving on arbitrary boundaries, including in
//! the middle of a UTF-8 sequence) and it yields complete logical lines in
//! arrival order. A line spanning several chunks is emitted once, by the
//! `feed` call that supplies its newline.

use memchr::memchr_iter;

const COMPACT_THRESHOLD: usize = 8 * 1024;

#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: String,
    read_offset: usize,
    /// Tail bytes of a UTF-8 sequence cut by a chunk boundary.
    utf8_remainder: Vec<u8>,
}

impl LineDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return the lines they completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed raw bytes and append completed lines into a caller-provided buffer.
    pub fn feed_into(&mut self, chunk: &[u8], out: &mut Vec<String>) {
        self.decode_utf8(chunk);

        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = &self.buffer[processed_up_to..line_end];
            out.push(line.strip_suffix('\r').unwrap_or(line).to_string());
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2
                || self.read_offset >= COMPACT_THRESHOLD);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Drain whatever is left at end of stream.
    ///
    /// Returns the trailing unterminated line when it holds anything besides
    /// whitespace. An incomplete UTF-8 tail is decoded lossily.
    pub fn flush(&mut self) -> Option<String> {
        if !self.utf8_remainder.is_empty() {
            let tail = std::mem::take(&mut self.utf8_remainder);
            self.buffer.push_str(&String::from_utf8_lossy(&tail));
        }
        let rest = self.buffer.split_off(self.read_offset);
        self.buffer.clear();
        self.read_offset = 0;
        let rest = rest.strip_suffix('\r').unwrap_or(&rest);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }

    /// Bytes currently held back, waiting for a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset + self.utf8_remainder.len()
    }

    fn decode_utf8(&mut self, chunk: &[u8]) {
        let mut owned;
        let mut bytes = chunk;
        if !self.utf8_remainder.is_empty() {
            owned = std::mem::take(&mut self.utf8_remainder);
            owned.extend_from_slice(chunk);
            bytes = owned.as_slice();
        }

        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    return;
                }
                Err(err) => {
                    let (valid, rest) = bytes.split_at(err.valid_up_to());
                    self.buffer.push_str(&String::from_utf8_lossy(valid));
                    match err.error_len() {
                        // Sequence cut by the chunk boundary: wait for more bytes.
                        None => {
                            self.utf8_remainder.extend_from_slice(rest);
                            return;
                        }
                        Some(invalid_len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            bytes = &rest[invalid_len..];
                        }
                    }
                }
            }
        }
    }
}
