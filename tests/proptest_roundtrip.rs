//! Property-based tests for the raw line parser, CTCP tag escaping, case
//! folding, and mode-string parsing.
//!
//! Run with: `cargo test --features proptest --test proptest_roundtrip`

use ircore::casefold;
use ircore::ctcp::{escape_tag_value, low_level_dequote, low_level_quote, unescape_tag_value};
use ircore::message::parse_raw;
use ircore::mode::{parse_modes, ModeArgPolicy, Sign, UserPrefixPolicy};
use proptest::prelude::*;

/// Printable, space-free text usable as a middle parameter.
fn middle_param_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9_#&.\\-]{1,20}").expect("valid regex")
}

/// Text usable as a trailing parameter: no CR/LF/NUL (those terminate or
/// corrupt a line before the parser ever sees it).
fn trailing_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[^\r\n\0]{0,200}").expect("valid regex")
}

fn tag_key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z][a-zA-Z0-9\\-/]{0,30}").expect("valid regex")
}

/// Arbitrary tag value text, pre-escaped the way a wire message would carry
/// it: semicolons, spaces, and backslashes must not appear unescaped.
fn raw_tag_value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9._\\-]{0,50}").expect("valid regex")
}

proptest! {
    /// parse_raw must never panic on arbitrary input, regardless of whether
    /// it is accepted or rejected.
    #[test]
    fn parse_raw_never_panics(s in "\\PC{0,200}") {
        let _ = parse_raw(&s);
    }

    /// A command plus a handful of middle params round-trips through the
    /// positional-argument split exactly.
    #[test]
    fn middle_params_round_trip(
        command in "[A-Z]{3,10}",
        params in prop::collection::vec(middle_param_strategy(), 0..5)
    ) {
        let mut line = command.clone();
        for p in &params {
            line.push(' ');
            line.push_str(p);
        }
        let raw = parse_raw(&line).expect("well-formed line should parse");
        prop_assert_eq!(&raw.command, &command);
        prop_assert_eq!(&raw.args, &params);
    }

    /// A trailing parameter (prefixed with `:`) is captured whole, spaces
    /// and all, as the final argument.
    #[test]
    fn trailing_param_captured_whole(
        command in "[A-Z]{3,10}",
        target in middle_param_strategy(),
        text in trailing_text_strategy()
    ) {
        let line = format!("{command} {target} :{text}");
        let raw = parse_raw(&line).expect("well-formed line should parse");
        prop_assert_eq!(raw.args.last().cloned(), Some(text));
    }

    /// Tag value escape/unescape is a true inverse pair.
    #[test]
    fn tag_value_escape_unescape_inverse(value in trailing_text_strategy()) {
        let escaped = escape_tag_value(&value);
        let unescaped = unescape_tag_value(&escaped);
        prop_assert_eq!(unescaped, value);
    }

    /// A tag embedded in a full line survives the parser with its value
    /// correctly unescaped.
    #[test]
    fn tag_in_line_round_trip(key in tag_key_strategy(), value in raw_tag_value_strategy()) {
        let escaped = escape_tag_value(&value);
        let line = format!("@{key}={escaped} PRIVMSG #ch :hi");
        let raw = parse_raw(&line).expect("tagged line should parse");
        prop_assert_eq!(raw.tags.len(), 1);
        prop_assert_eq!(&raw.tags[0].key, &key);
        prop_assert_eq!(raw.tags[0].value.as_deref(), Some(value.as_str()));
    }

    /// Low-level CTCP quoting is a true inverse pair over arbitrary bytes.
    #[test]
    fn ctcp_low_level_quote_inverse(s in "[^\\x01]{0,64}") {
        let quoted = low_level_quote(s.as_bytes());
        let dequoted = low_level_dequote(&quoted);
        prop_assert_eq!(dequoted, s.as_bytes());
    }

    /// RFC 1459 case folding is idempotent: folding twice is the same as
    /// folding once.
    #[test]
    fn fold_is_idempotent(s in "\\PC{0,64}") {
        let once = casefold::fold(&s);
        let twice = casefold::fold(&once);
        prop_assert_eq!(once, twice);
    }

    /// Any string folds equal to itself, and folding never changes length
    /// (every substitution and case change is one-char-for-one-char).
    #[test]
    fn fold_preserves_length_and_self_equality(s in "\\PC{0,64}") {
        let folded = casefold::fold(&s);
        prop_assert_eq!(folded.chars().count(), s.chars().count());
        prop_assert!(casefold::eq(&s, &s));
    }

    /// Parsing a `+o`/`-o` mode string with a nick per letter always yields
    /// one change per letter, each carrying its paired nick as the argument.
    #[test]
    fn user_prefix_modes_pair_with_nicks(
        nicks in prop::collection::vec("[a-zA-Z][a-zA-Z0-9]{0,8}", 1..5)
    ) {
        let letters: String = std::iter::once('+').chain(std::iter::repeat('o').take(nicks.len())).collect();
        let pieces: Vec<&str> = std::iter::once(letters.as_str())
            .chain(nicks.iter().map(String::as_str))
            .collect();
        let changes = parse_modes(&pieces, &UserPrefixPolicy).expect("should parse");
        prop_assert_eq!(changes.len(), nicks.len());
        for (change, nick) in changes.iter().zip(nicks.iter()) {
            prop_assert_eq!(change.sign, Sign::Plus);
            prop_assert_eq!(change.letter, 'o');
            prop_assert_eq!(change.arg.as_deref(), Some(nick.as_str()));
        }
    }
}
