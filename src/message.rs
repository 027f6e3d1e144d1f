//! Nick masks, the wire message parser, and the [`Event`] record produced by it.
//!
//! The parser itself is built with `nom` combinators, following the
//! teacher's `message/nom_parser.rs` structure of small parsers (tags,
//! prefix, command, params) composed in sequence.

use nom::{
    bytes::complete::{take_till1, take_while1},
    character::complete::char,
    combinator::opt,
    sequence::preceded,
    IResult,
};

use crate::ctcp::unescape_tag_value;
use crate::error::MessageParseError;
use crate::numerics;

/// A parsed IRCv3 message tag: `key` plus an optional (already unescaped) value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: Option<String>,
}

/// Source of an event: `nick!user@host`, or a bare server name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NickMask {
    raw: String,
    bang: Option<usize>,
    at: Option<usize>,
}

impl NickMask {
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let bang = raw.find('!');
        let at = raw.find('@');
        Self { raw, bang, at }
    }

    /// Substring before `!`, or the whole string if there is no `!`.
    pub fn nick(&self) -> &str {
        match self.bang {
            Some(i) => &self.raw[..i],
            None => &self.raw,
        }
    }

    pub fn user(&self) -> Option<&str> {
        let bang = self.bang?;
        match self.at {
            Some(at) if at > bang => Some(&self.raw[bang + 1..at]),
            _ => Some(&self.raw[bang + 1..]),
        }
    }

    pub fn host(&self) -> Option<&str> {
        let at = self.at?;
        if let Some(bang) = self.bang {
            if at < bang {
                return None;
            }
        }
        Some(&self.raw[at + 1..])
    }

    pub fn userhost(&self) -> Option<String> {
        match (self.user(), self.host()) {
            (Some(u), Some(h)) => Some(format!("{u}@{h}")),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl std::fmt::Display for NickMask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// An immutable event: a lowercase command name (or numeric-mapped symbolic
/// name), optional source, optional target, positional arguments, and tags.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Event {
    pub kind: String,
    pub source: Option<NickMask>,
    pub target: Option<String>,
    pub arguments: Vec<String>,
    pub tags: Vec<Tag>,
}

impl Event {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            source: None,
            target: None,
            arguments: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// The result of splitting one decoded line: tags, prefix, command, and the
/// raw argument vector (trailing argument already un-split from positional
/// ones).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawMessage {
    pub tags: Vec<Tag>,
    pub prefix: Option<String>,
    pub command: String,
    pub args: Vec<String>,
}

fn parse_tags_block(input: &str) -> IResult<&str, &str> {
    preceded(char('@'), take_till1(|c| c == ' '))(input)
}

fn parse_prefix_block(input: &str) -> IResult<&str, &str> {
    preceded(char(':'), take_till1(|c| c == ' '))(input)
}

fn parse_command_token(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric())(input)
}

fn split_one_tag(item: &str) -> Tag {
    match item.split_once('=') {
        Some((k, v)) => Tag {
            key: k.to_string(),
            value: Some(unescape_tag_value(v)),
        },
        None => Tag {
            key: item.to_string(),
            value: None,
        },
    }
}

fn parse_params(input: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut rest = input;
    loop {
        rest = rest.trim_start_matches(' ');
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing.to_string());
            break;
        }
        match rest.find(' ') {
            Some(sp) => {
                params.push(rest[..sp].to_string());
                rest = &rest[sp..];
            }
            None => {
                params.push(rest.to_string());
                break;
            }
        }
    }
    params
}

/// Parse one decoded (no `\r\n`) line into a [`RawMessage`].
pub fn parse_raw(line: &str) -> Result<RawMessage, MessageParseError> {
    if line.is_empty() {
        return Err(MessageParseError::EmptyMessage);
    }

    let mut rest = line;

    let tags = if rest.starts_with('@') {
        let (r, tag_block) =
            parse_tags_block(rest).map_err(|_| MessageParseError::Malformed {
                part: "tags",
                string: rest.to_string(),
            })?;
        rest = r.trim_start_matches(' ');
        tag_block.split(';').map(split_one_tag).collect()
    } else {
        Vec::new()
    };

    let (rest2, prefix): (&str, Option<&str>) =
        opt(parse_prefix_block)(rest).expect("opt() is infallible");
    rest = rest2.trim_start_matches(' ');

    let (rest3, command) =
        parse_command_token(rest).map_err(|_: nom::Err<nom::error::Error<&str>>| {
            MessageParseError::MissingCommand
        })?;

    let args = parse_params(rest3);

    Ok(RawMessage {
        tags,
        prefix: prefix.map(str::to_string),
        command: command.to_string(),
        args,
    })
}

/// Classify a numeric command (via the numeric table) and lowercase an
/// alphabetic one.
pub fn normalize_command(command: &str) -> String {
    if command.chars().all(|c| c.is_ascii_digit()) {
        numerics::symbol_for_code(command).to_string()
    } else {
        command.to_ascii_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nick_mask_full() {
        let m = NickMask::new("bob!b@h");
        assert_eq!(m.nick(), "bob");
        assert_eq!(m.user(), Some("b"));
        assert_eq!(m.host(), Some("h"));
        assert_eq!(m.userhost(), Some("b@h".to_string()));
    }

    #[test]
    fn nick_mask_bare_server() {
        let m = NickMask::new("irc.example.net");
        assert_eq!(m.nick(), "irc.example.net");
        assert_eq!(m.user(), None);
        assert_eq!(m.host(), None);
    }

    #[test]
    fn parse_welcome() {
        let raw = parse_raw(":irc.example.net 001 alice :Welcome").unwrap();
        assert_eq!(raw.prefix.as_deref(), Some("irc.example.net"));
        assert_eq!(raw.command, "001");
        assert_eq!(raw.args, vec!["alice", "Welcome"]);
        assert_eq!(normalize_command(&raw.command), "welcome");
    }

    #[test]
    fn parse_with_tags() {
        let raw = parse_raw("@time=2023-01-01T12:00:00Z;msgid=abc :nick!u@h PRIVMSG #c :hi there").unwrap();
        assert_eq!(raw.tags.len(), 2);
        assert_eq!(raw.tags[0].key, "time");
        assert_eq!(raw.args, vec!["#c", "hi there"]);
    }

    #[test]
    fn parse_no_trailing() {
        let raw = parse_raw("PING server1").unwrap();
        assert_eq!(raw.command, "PING");
        assert_eq!(raw.args, vec!["server1"]);
    }

    #[test]
    fn parse_empty_is_error() {
        assert_eq!(parse_raw(""), Err(MessageParseError::EmptyMessage));
    }

    #[test]
    fn format_parse_inverse_without_tags() {
        let cases = ["PRIVMSG #room :hello world", "NICK alice", "JOIN #room key"];
        for line in cases {
            let raw = parse_raw(line).unwrap();
            let mut tokens = vec![raw.command.clone()];
            let mut args = raw.args.clone();
            if let Some(last) = args.last_mut() {
                if last.contains(' ') {
                    *last = format!(":{last}");
                }
            }
            tokens.extend(args);
            assert_eq!(tokens.join(" "), line);
        }
    }
}
