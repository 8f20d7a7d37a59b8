/// Incremental UTF-8 decoder for chunked response bodies.
///
/// A multi-byte character can straddle two network chunks; its leading bytes
/// are held back until the rest arrives. Invalid sequences are replaced with
/// U+FFFD rather than failing the stream.
#[derive(Debug, Default)]
pub struct Utf8ChunkDecoder {
    pending: Vec<u8>,
}

impl Utf8ChunkDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode `chunk`, returning every complete character seen so far.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::with_capacity(self.pending.len());
        let mut rest: &[u8] = &self.pending;

        loop {
            match std::str::from_utf8(rest) {
                Ok(s) => {
                    out.push_str(s);
                    rest = &[];
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(std::str::from_utf8(valid).unwrap_or_default());
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        // Incomplete sequence at the end: wait for more bytes.
                        None => {
                            rest = after;
                            break;
                        }
                    }
                }
            }
        }

        let keep = rest.len();
        let drain_to = self.pending.len() - keep;
        self.pending.drain(..drain_to);
        out
    }

    /// Flush whatever is still held back at end of stream.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }
        let tail = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        tail
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_passes_through() {
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(b"step1\n"), "step1\n");
        assert!(!d.has_pending());
        assert_eq!(d.finish(), "");
    }

    #[test]
    fn split_multibyte_char_is_joined_across_chunks() {
        // "é" = C3 A9, "€" = E2 82 AC
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(&[b'a', 0xC3]), "a");
        assert!(d.has_pending());
        assert_eq!(d.decode(&[0xA9, 0xE2, 0x82]), "é");
        assert_eq!(d.decode(&[0xAC, b'!']), "€!");
        assert_eq!(d.finish(), "");
    }

    #[test]
    fn invalid_bytes_become_replacement_chars() {
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(&[b'o', 0xFF, b'k']), "o\u{FFFD}k");
    }

    #[test]
    fn finish_flushes_truncated_sequence_instead_of_dropping_it() {
        let mut d = Utf8ChunkDecoder::new();
        assert_eq!(d.decode(&[b'x', 0xE2, 0x82]), "x");
        let tail = d.finish();
        assert!(!tail.is_empty());
        assert!(tail.chars().all(|c| c == char::REPLACEMENT_CHARACTER));
        assert!(!d.has_pending());
    }
}
