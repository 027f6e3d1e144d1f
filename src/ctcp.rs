//! CTCP (Client-To-Client Protocol) quoting and message splitting.
//!
//! Low-level quoting guards against raw CR/LF/NUL/`\x10` bytes inside a
//! PRIVMSG/NOTICE body; CTCP framing further delimits `\x01TAG[ DATA]\x01`
//! chunks within that body. Tag-value unescaping follows the teacher's
//! `message/tags.rs` escape table verbatim (it is the IRCv3 spec's own
//! table, reused here for CTCP rather than message tags).

pub const CTCP_DELIM: u8 = 0x01;
const LOW_QUOTE: u8 = 0x10;

/// One chunk of a CTCP-split message: plain text, or a parsed `(tag, data)` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CtcpChunk {
    Text(String),
    Tagged { tag: String, data: Option<String> },
}

/// Low-level dequoting: `\x10` followed by a byte is replaced per the table
/// `{'0'->NUL, 'n'->LF, 'r'->CR, '\\'->'\\'}`; any other following byte is
/// kept verbatim (the `\x10` itself is dropped).
pub fn low_level_dequote(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut iter = input.iter().copied();
    while let Some(b) = iter.next() {
        if b == LOW_QUOTE {
            match iter.next() {
                Some(b'0') => out.push(0u8),
                Some(b'n') => out.push(b'\n'),
                Some(b'r') => out.push(b'\r'),
                Some(b'\\') => out.push(b'\\'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(b);
        }
    }
    out
}

/// Low-level quoting: the inverse of [`low_level_dequote`], escaping NUL,
/// LF, CR, and `\x10` itself.
pub fn low_level_quote(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    for &b in input {
        match b {
            0 => {
                out.push(LOW_QUOTE);
                out.push(b'0');
            }
            b'\n' => {
                out.push(LOW_QUOTE);
                out.push(b'n');
            }
            b'\r' => {
                out.push(LOW_QUOTE);
                out.push(b'r');
            }
            LOW_QUOTE => {
                out.push(LOW_QUOTE);
                out.push(b'\\');
            }
            other => out.push(other),
        }
    }
    out
}

/// Split a message body on `0x01` into alternating text/tagged chunks.
///
/// Even-indexed spans are plain text (dropped if empty); odd-indexed spans
/// are split on the first space into `(tag,)` or `(tag, data)`. A trailing
/// lone `0x01` (no matching close) causes the final chunk, delimiter
/// included, to be emitted as text.
pub fn split_ctcp(s: &str) -> Vec<CtcpChunk> {
    let mut out = Vec::new();
    let parts: Vec<&str> = s.split('\u{1}').collect();

    // An odd number of parts means every delimiter was paired; an even
    // number means a trailing lone delimiter opened a chunk that never
    // closed, so its content (with the delimiter) is plain text.
    let unmatched_trailing = parts.len() % 2 == 0 && parts.len() > 1;

    for (i, part) in parts.iter().enumerate() {
        let is_last = i == parts.len() - 1;
        if unmatched_trailing && is_last {
            // Re-attach the delimiter that opened this dangling chunk.
            out.push(CtcpChunk::Text(format!("\u{1}{part}")));
            continue;
        }
        if i % 2 == 0 {
            if !part.is_empty() {
                out.push(CtcpChunk::Text(part.to_string()));
            }
        } else {
            let mut split = part.splitn(2, ' ');
            let tag = split.next().unwrap_or("").to_string();
            let data = split.next().map(|d| d.to_string());
            out.push(CtcpChunk::Tagged { tag, data });
        }
    }
    out
}

/// Wrap `tag [data]` in CTCP delimiters for an outbound PRIVMSG/NOTICE body.
pub fn encode_ctcp(tag: &str, data: Option<&str>) -> String {
    match data {
        Some(d) => format!("\u{1}{tag} {d}\u{1}"),
        None => format!("\u{1}{tag}\u{1}"),
    }
}

/// Unescape an IRCv3 tag (or CTCP low-level tag) value: `\:`->`;`, `\s`->` `,
/// `\n`->LF, `\r`->CR, `\\`->`\`; unknown `\x` becomes `x`.
pub fn unescape_tag_value(value: &str) -> String {
    let mut unescaped = String::with_capacity(value.len());
    let mut iter = value.chars();
    while let Some(c) = iter.next() {
        let r = if c == '\\' {
            match iter.next() {
                Some(':') => ';',
                Some('s') => ' ',
                Some('\\') => '\\',
                Some('r') => '\r',
                Some('n') => '\n',
                Some(other) => other,
                None => break,
            }
        } else {
            c
        };
        unescaped.push(r);
    }
    unescaped
}

/// Escape a tag value for serialization (inverse of [`unescape_tag_value`]).
pub fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}
