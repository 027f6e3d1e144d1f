//! Accumulates bytes from a socket and yields `\r?\n`-terminated lines.
//!
//! Grounded on the teacher's `transport.rs` `BufReader` framing, but exposed
//! as a standalone sans-IO buffer so it can be driven by the server
//! connection, the DCC connection, or a unit test without a live socket.

use crate::error::CoreError;

/// Strict vs. lenient line decoding, per §4.1.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decoding {
    /// Fail with [`CoreError::DecodeFailed`] on invalid UTF-8.
    Strict,
    /// Fall back to ISO-8859-1 (which never fails) when UTF-8 decoding fails.
    #[cfg(feature = "lenient-decode")]
    Lenient,
}

/// A growable byte buffer that yields complete lines on demand.
#[derive(Clone, Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    /// Number of buffered bytes (not lines).
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append bytes read from the socket.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pop the next complete line (terminator stripped), if one is buffered.
    /// Leaves any trailing, unterminated fragment in place.
    fn pop_raw_line(&mut self) -> Option<Vec<u8>> {
        let nl = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line_end = nl;
        if line_end > 0 && self.buf[line_end - 1] == b'\r' {
            line_end -= 1;
        }
        let line = self.buf[..line_end].to_vec();
        self.buf.drain(..=nl);
        Some(line)
    }

    /// Drain every complete line currently buffered, decoding strictly.
    pub fn drain_lines_strict(&mut self) -> Vec<Result<String, CoreError>> {
        let mut out = Vec::new();
        while let Some(raw) = self.pop_raw_line() {
            out.push(String::from_utf8(raw).map_err(CoreError::from));
        }
        out
    }

    /// Drain every complete line currently buffered, decoding leniently
    /// (UTF-8, falling back to ISO-8859-1).
    #[cfg(feature = "lenient-decode")]
    pub fn drain_lines_lenient(&mut self) -> Vec<String> {
        let mut out = Vec::new();
        while let Some(raw) = self.pop_raw_line() {
            out.push(decode_lenient(&raw));
        }
        out
    }
}

#[cfg(feature = "lenient-decode")]
fn decode_lenient(raw: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }
    // ISO-8859-1 maps every byte directly onto the Unicode code point of the
    // same ordinal, so this never fails the way a UTF-8 or Windows-1252
    // decode of arbitrary bytes can.
    raw.iter().map(|&b| b as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_crlf_and_bare_lf() {
        let mut lb = LineBuffer::new();
        lb.feed(b"foo\r\nbar\nbaz");
        let lines: Vec<_> = lb
            .drain_lines_strict()
            .into_iter()
            .map(|r| r.unwrap())
            .collect();
        assert_eq!(lines, vec!["foo", "bar"]);
        assert_eq!(lb.len(), 3); // "baz" remains buffered
    }

    #[test]
    fn strict_decode_surfaces_error() {
        let mut lb = LineBuffer::new();
        lb.feed(&[0xff, 0xfe, b'\n']);
        let lines = lb.drain_lines_strict();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].is_err());
    }

    #[cfg(feature = "lenient-decode")]
    #[test]
    fn lenient_decode_falls_back_to_true_latin1() {
        let mut lb = LineBuffer::new();
        // 0x90 is invalid UTF-8 continuation here, and Windows-1252 maps it
        // to U+FFFD rather than U+0090 — this must land on U+0090.
        lb.feed(&[b'a', 0x90, b'\n']);
        let lines = lb.drain_lines_lenient();
        assert_eq!(lines, vec!["a\u{90}".to_string()]);
    }

    proptest::proptest! {
        #[test]
        fn round_trip_preserves_byte_count(lines in proptest::collection::vec("[ -~]{0,16}", 0..8)) {
            let joined: String = lines.iter().map(|l| format!("{l}\n")).collect();
            let bytes = joined.as_bytes();

            // Feed in two arbitrary chunks and compare against feeding whole.
            let mid = bytes.len() / 2;
            let mut chunked = LineBuffer::new();
            chunked.feed(&bytes[..mid]);
            chunked.feed(&bytes[mid..]);
            let chunked_lines: Vec<String> = chunked
                .drain_lines_strict()
                .into_iter()
                .map(|r| r.unwrap())
                .collect();

            let mut whole = LineBuffer::new();
            whole.feed(bytes);
            let whole_lines: Vec<String> = whole
                .drain_lines_strict()
                .into_iter()
                .map(|r| r.unwrap())
                .collect();

            proptest::prop_assert_eq!(&chunked_lines, &whole_lines);

            let emitted_bytes: usize = whole_lines.iter().map(|l| l.len() + 1).sum();
            proptest::prop_assert_eq!(emitted_bytes + whole.len(), bytes.len());
        }
    }
}
