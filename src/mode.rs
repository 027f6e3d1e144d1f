//! Nick and channel mode-string parsing into `(sign, mode, arg)` triples.
//!
//! Generalizes the teacher's `mode/parse.rs` (which dispatches on a typed
//! `ModeType` trait per fixed enum) into a single parser driven at runtime
//! by the connection's [`crate::isupport::ChanModes`] classes, since this
//! spec's channel modes are server-defined rather than a closed set.

use crate::error::ModeParseError;

/// `+` or `-`, or no explicit sign (queries use bare letters sometimes).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

/// One parsed mode change: a sign, a mode letter, and an optional argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModeChange {
    pub sign: Sign,
    pub letter: char,
    pub arg: Option<String>,
}

/// Tells the parser whether a given mode letter takes an argument, and if
/// so, whether it's allowed to be queried (omitted) without one — i.e. a
/// CHANMODES "type A" list mode such as `+b`.
pub trait ModeArgPolicy {
    /// `true` if this letter always consumes the next token as an argument
    /// (on both `+` and `-`), e.g. per-user modes (`o`, `v`, ...) or
    /// CHANMODES type B (`k`).
    fn takes_arg(&self, sign: Sign, letter: char) -> bool;

    /// `true` if this letter may be used without an argument even though
    /// `takes_arg` would otherwise require one (CHANMODES type A list modes
    /// queried with `+b`, `+e`, `+I`).
    fn is_list_query(&self, letter: char) -> bool;
}

/// Parse a mode string like `["+o-v", "nick1", "nick2"]` into ordered triples.
pub fn parse_modes(pieces: &[&str], policy: &dyn ModeArgPolicy) -> Result<Vec<ModeChange>, ModeParseError> {
    let mut out = Vec::new();
    let Some((first, rest)) = pieces.split_first() else {
        return Ok(out);
    };

    let mut args = rest.iter().copied().peekable();
    let mut sign = Sign::Plus;

    for c in first.chars() {
        match c {
            '+' => sign = Sign::Plus,
            '-' => sign = Sign::Minus,
            letter => {
                let needs_arg = policy.takes_arg(sign, letter);
                let arg = if needs_arg {
                    match args.next() {
                        Some(a) => Some(a.to_string()),
                        None if policy.is_list_query(letter) => None,
                        None => return Err(ModeParseError::MissingArgument(letter)),
                    }
                } else {
                    None
                };
                out.push(ModeChange { sign, letter, arg });
            }
        }
    }

    if args.peek().is_some() {
        return Err(ModeParseError::UnusedArguments);
    }

    Ok(out)
}

/// A fixed policy for the well-known per-user channel prefix modes
/// (`o`, `v`, `q`, `h`, `a`), all of which always take an argument and are
/// never list-queried.
pub struct UserPrefixPolicy;

impl ModeArgPolicy for UserPrefixPolicy {
    fn takes_arg(&self, _sign: Sign, letter: char) -> bool {
        matches!(letter, 'o' | 'v' | 'q' | 'h' | 'a')
    }
    fn is_list_query(&self, _letter: char) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestPolicy;
    impl ModeArgPolicy for TestPolicy {
        fn takes_arg(&self, _sign: Sign, letter: char) -> bool {
            matches!(letter, 'o' | 'k' | 'l' | 'b' | 'e' | 'I')
        }
        fn is_list_query(&self, letter: char) -> bool {
            matches!(letter, 'b' | 'e' | 'I')
        }
    }

    #[test]
    fn ban_list_query_no_arg() {
        let modes = parse_modes(&["+b"], &TestPolicy).unwrap();
        assert_eq!(modes[0].arg, None);
    }

    #[test]
    fn ban_with_mask() {
        let modes = parse_modes(&["+b", "*!*@x"], &TestPolicy).unwrap();
        assert_eq!(modes[0].arg.as_deref(), Some("*!*@x"));
    }

    #[test]
    fn key_mode_requires_arg() {
        assert!(parse_modes(&["+k"], &TestPolicy).is_err());
    }

    #[test]
    fn mixed_modes_interleave_signs() {
        let modes = parse_modes(&["+o-v", "alice", "bob"], &UserPrefixPolicy).unwrap();
        assert_eq!(modes.len(), 2);
        assert_eq!(modes[0].sign, Sign::Plus);
        assert_eq!(modes[0].letter, 'o');
        assert_eq!(modes[0].arg.as_deref(), Some("alice"));
        assert_eq!(modes[1].sign, Sign::Minus);
        assert_eq!(modes[1].letter, 'v');
        assert_eq!(modes[1].arg.as_deref(), Some("bob"));
    }

    #[test]
    fn unused_args_rejected() {
        let modes = parse_modes(&["+i", "extra"], &UserPrefixPolicy);
        assert!(modes.is_err());
    }
}
