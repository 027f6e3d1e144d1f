//! ISUPPORT (numeric 005) feature tracking.
//!
//! Structurally grounded on the teacher's `isupport.rs` (`PrefixSpec`,
//! `ChanModes`, `TargMax`, `MaxList` parsing helpers), but owning rather
//! than borrowing its strings, since a [`FeatureSet`] is mutated in place as
//! successive 005 lines arrive over a connection's lifetime.

use crate::casefold::fold;
use std::collections::HashMap;

/// `CHANMODES=A,B,C,D` — the four argument classes for channel modes.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChanModes {
    /// Type A: always takes an argument, may be queried (list modes: bans, ...).
    pub a: Vec<char>,
    /// Type B: always takes an argument (e.g. channel key).
    pub b: Vec<char>,
    /// Type C: takes an argument only when being set.
    pub c: Vec<char>,
    /// Type D: never takes an argument.
    pub d: Vec<char>,
}

impl ChanModes {
    fn parse(s: &str) -> Option<Self> {
        let mut parts = s.splitn(4, ',');
        let a = parts.next()?.chars().collect();
        let b = parts.next()?.chars().collect();
        let c = parts.next()?.chars().collect();
        let d = parts.next().unwrap_or("").chars().collect();
        Some(ChanModes { a, b, c, d })
    }
}

/// `TARGMAX=key:value,...` — max targets per command.
pub type TargMax = HashMap<String, Option<u32>>;

fn parse_targmax(s: &str) -> TargMax {
    let mut map = HashMap::new();
    for item in s.split(',') {
        if let Some((k, v)) = item.split_once(':') {
            map.insert(k.to_string(), v.parse().ok());
        }
    }
    map
}

/// Mutable bag of parsed ISUPPORT directives, built up across one or more
/// numeric 005 lines.
#[derive(Clone, Debug)]
pub struct FeatureSet {
    /// Insertion-ordered prefix -> mode-letter pairs. Order matters: it is
    /// used to strip multiple prefixes from NAMES replies left-to-right.
    prefix: Vec<(char, char)>,
    chanmodes: Option<ChanModes>,
    chantypes: String,
    targmax: TargMax,
    chanlimit: HashMap<String, Option<u32>>,
    maxlist: HashMap<char, u32>,
    raw: HashMap<String, Option<String>>,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            prefix: vec![('@', 'o'), ('+', 'v')],
            chanmodes: None,
            chantypes: "#&+!".to_string(),
            targmax: TargMax::new(),
            chanlimit: HashMap::new(),
            maxlist: HashMap::new(),
            raw: HashMap::new(),
        }
    }
}

impl FeatureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply the argument tokens of a numeric 005 line (everything between
    /// the target nick and the trailing "are supported" string).
    pub fn apply_params(&mut self, params: &[&str]) {
        for &p in params {
            if p.is_empty() || p.contains(' ') {
                // trailing "are supported by this server" text, not a token
                continue;
            }
            let negated = p.starts_with('-');
            let body = p.strip_prefix('-').unwrap_or(p);
            let (key, value) = match body.split_once('=') {
                Some((k, v)) => (k.to_string(), Some(v.to_string())),
                None => (body.to_string(), None),
            };
            let key_upper = key.to_ascii_uppercase();

            if negated {
                self.raw.remove(&key_upper);
                continue;
            }

            match key_upper.as_str() {
                "PREFIX" => {
                    if let Some(v) = &value {
                        if let Some((modes, prefixes)) = parse_prefix_value(v) {
                            self.prefix = prefixes.chars().zip(modes.chars()).collect();
                        }
                    }
                }
                "CHANMODES" => {
                    if let Some(v) = &value {
                        self.chanmodes = ChanModes::parse(v);
                    }
                }
                "CHANTYPES" => {
                    if let Some(v) = &value {
                        self.chantypes = v.clone();
                    }
                }
                "TARGMAX" => {
                    if let Some(v) = &value {
                        self.targmax = parse_targmax(v);
                    }
                }
                "CHANLIMIT" => {
                    if let Some(v) = &value {
                        self.chanlimit = parse_targmax(v);
                    }
                }
                "MAXLIST" => {
                    if let Some(v) = &value {
                        for item in v.split(',') {
                            if let Some((types, max)) = item.split_once(':') {
                                if let Ok(n) = max.parse::<u32>() {
                                    for t in types.chars() {
                                        self.maxlist.insert(t, n);
                                    }
                                }
                            }
                        }
                    }
                }
                _ => {}
            }

            self.raw.insert(key_upper, value);
        }
    }

    /// Insertion-ordered prefix-char -> mode-letter pairs.
    pub fn prefix(&self) -> &[(char, char)] {
        &self.prefix
    }

    /// Map a prefix character (`@`, `+`, ...) to its mode letter.
    pub fn prefix_mode_for(&self, c: char) -> Option<char> {
        self.prefix.iter().find(|(p, _)| *p == c).map(|(_, m)| *m)
    }

    pub fn chanmodes(&self) -> Option<&ChanModes> {
        self.chanmodes.as_ref()
    }

    pub fn chantypes(&self) -> &str {
        &self.chantypes
    }

    pub fn is_channel(&self, name: &str) -> bool {
        name.chars()
            .next()
            .is_some_and(|c| self.chantypes.contains(c))
    }

    pub fn targmax(&self) -> &TargMax {
        &self.targmax
    }

    pub fn get_raw(&self, key: &str) -> Option<Option<&str>> {
        self.raw
            .get(&key.to_ascii_uppercase())
            .map(|v| v.as_deref())
    }

    /// Strip every leading prefix char from `name`, returning the bare nick
    /// and the mode letters it carried, in the order the prefixes occur.
    pub fn strip_prefixes<'a>(&self, name: &'a str) -> (&'a str, Vec<char>) {
        let mut modes = Vec::new();
        let mut rest = name;
        while let Some(c) = rest.chars().next() {
            if let Some(m) = self.prefix_mode_for(c) {
                modes.push(m);
                rest = &rest[c.len_utf8()..];
            } else {
                break;
            }
        }
        (rest, modes)
    }

    /// RFC-1459 case-folded equality, used for channel/nick comparisons.
    pub fn names_eq(a: &str, b: &str) -> bool {
        fold(a) == fold(b)
    }
}

fn parse_prefix_value(v: &str) -> Option<(&str, &str)> {
    let open = v.find('(')?;
    let close = v[open + 1..].find(')')? + open + 1;
    let modes = &v[open + 1..close];
    let prefixes = &v[close + 1..];
    if modes.is_empty() || prefixes.len() != modes.len() {
        return None;
    }
    Some((modes, prefixes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_have_op_and_voice() {
        let fs = FeatureSet::new();
        assert_eq!(fs.prefix(), &[('@', 'o'), ('+', 'v')]);
    }

    #[test]
    fn applies_prefix_preserving_order() {
        let mut fs = FeatureSet::new();
        fs.apply_params(&["alice", "PREFIX=(qaohv)~&@%+", ":are supported"]);
        assert_eq!(
            fs.prefix(),
            &[('~', 'q'), ('&', 'a'), ('@', 'o'), ('%', 'h'), ('+', 'v')]
        );
    }

    #[test]
    fn chanmodes_classes() {
        let mut fs = FeatureSet::new();
        fs.apply_params(&["alice", "CHANMODES=beI,k,l,imnpst"]);
        let cm = fs.chanmodes().unwrap();
        assert_eq!(cm.a, vec!['b', 'e', 'I']);
        assert_eq!(cm.d, vec!['i', 'm', 'n', 'p', 's', 't']);
    }

    #[test]
    fn strip_prefixes_records_modes_in_order() {
        let mut fs = FeatureSet::new();
        fs.apply_params(&["alice", "PREFIX=(ov)@+"]);
        let (nick, modes) = fs.strip_prefixes("@+alice");
        assert_eq!(nick, "alice");
        assert_eq!(modes, vec!['o', 'v']);
    }

    #[test]
    fn channel_test_uses_chantypes() {
        let fs = FeatureSet::new();
        assert!(fs.is_channel("#room"));
        assert!(!fs.is_channel("alice"));
    }
}
