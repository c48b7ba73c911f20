//! Incremental UTF-8 decoding of pipe reads.
//!
//! Invalid byte sequences become U+FFFD instead of failing the
//! execution. A multi-byte sequence cut by a read boundary is held back
//! and completed by the next read rather than replaced.

/// Stateful per-stream decoder.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    pending: Vec<u8>,
    replaced: u64,
}

impl ChunkDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `bytes`, prefixed by any sequence carried from the last call.
    ///
    /// The returned string may be empty when the whole read was an
    /// incomplete sequence.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(bytes);

        let mut out = String::with_capacity(buf.len());
        let mut rest = buf.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(err) => {
                    let (valid, after) = rest.split_at(err.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    if let Some(len) = err.error_len() {
                        out.push(char::REPLACEMENT_CHARACTER);
                        self.replaced += 1;
                        rest = &after[len..];
                    } else {
                        // Truncated sequence at the end of the read.
                        self.pending = after.to_vec();
                        break;
                    }
                }
            }
        }
        out
    }

    /// Flush a sequence left incomplete at end of stream.
    ///
    /// Returns `None` when nothing was pending.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.pending);
        self.replaced += 1;
        Some(String::from_utf8_lossy(&tail).into_owned())
    }

    /// Number of replacement characters emitted so far.
    #[must_use]
    pub fn replaced(&self) -> u64 {
        self.replaced
    }

    /// Whether a partial sequence is waiting for more bytes.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
