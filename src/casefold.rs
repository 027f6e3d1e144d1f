//! RFC 1459 case folding and a case-folded map.
//!
//! Folding lowercases ASCII `A-Z` and additionally maps `{[, ], \, ^}` to
//! `{{, }, |, ~}`. This direction follows the original `jaraco/irc`
//! (`IRCFoldedCase.translation`), not the teacher's `casemap.rs`, which maps
//! `~` back to `^` (see `DESIGN.md` for the resolved ambiguity).

use std::borrow::Borrow;
use std::collections::HashMap;

/// Lowercase a string per RFC 1459 case folding.
pub fn fold(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '[' => '{',
            ']' => '}',
            '\\' => '|',
            '^' => '~',
            'A'..='Z' => c.to_ascii_lowercase(),
            _ => c,
        })
        .collect()
}

/// Case-insensitive (RFC 1459) equality without allocating.
pub fn eq(a: &str, b: &str) -> bool {
    let mut ai = a.chars().map(fold_char);
    let mut bi = b.chars().map(fold_char);
    loop {
        match (ai.next(), bi.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x == y => continue,
            _ => return false,
        }
    }
}

fn fold_char(c: char) -> char {
    match c {
        '[' => '{',
        ']' => '}',
        '\\' => '|',
        '^' => '~',
        'A'..='Z' => c.to_ascii_lowercase(),
        _ => c,
    }
}

/// A map keyed by RFC 1459 case-folded strings, preserving first-seen
/// display casing for iteration (the teacher's "case-folded dict" redesign
/// direction, generalized into a reusable wrapper type).
#[derive(Clone, Debug, Default)]
pub struct CaseFoldedMap<V> {
    // folded key -> (display key, value)
    inner: HashMap<String, (String, V)>,
}

impl<V> CaseFoldedMap<V> {
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    pub fn insert(&mut self, key: &str, value: V) -> Option<V> {
        let folded = fold(key);
        match self.inner.insert(folded, (key.to_string(), value)) {
            Some((_, old)) => Some(old),
            None => None,
        }
    }

    pub fn get<Q: Borrow<str>>(&self, key: Q) -> Option<&V> {
        self.inner.get(&fold(key.borrow())).map(|(_, v)| v)
    }

    pub fn get_mut<Q: Borrow<str>>(&mut self, key: Q) -> Option<&mut V> {
        self.inner.get_mut(&fold(key.borrow())).map(|(_, v)| v)
    }

    pub fn remove<Q: Borrow<str>>(&mut self, key: Q) -> Option<V> {
        self.inner.remove(&fold(key.borrow())).map(|(_, v)| v)
    }

    pub fn contains_key<Q: Borrow<str>>(&self, key: Q) -> bool {
        self.inner.contains_key(&fold(key.borrow()))
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Rename a key, preserving the value. Returns `false` if `from` is absent.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        let Some((_, value)) = self.inner.remove(&fold(from)) else {
            return false;
        };
        self.inner.insert(fold(to), (to.to_string(), value));
        true
    }

    /// Iterate `(display_key, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.inner.values().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.inner.values().map(|(k, _)| k.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_maps_rfc1459_specials() {
        assert_eq!(fold("Foo^"), "foo~");
        assert_eq!(fold("[This]"), "{this}");
        assert_eq!(fold(r"A\B"), "a|b");
    }

    #[test]
    fn fold_is_idempotent() {
        let once = fold("NICK[^]\\");
        let twice = fold(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn eq_matches_fold() {
        assert!(eq("[this]", "{THIS}"));
        assert!(!eq("foo", "foobar"));
    }

    #[test]
    fn case_folded_map_tracks_display_case() {
        let mut m = CaseFoldedMap::new();
        m.insert("#Room", 1);
        assert!(m.contains_key("#room"));
        assert_eq!(m.get("#ROOM"), Some(&1));
        let (k, _) = m.iter().next().unwrap();
        assert_eq!(k, "#Room");
    }

    #[test]
    fn rename_preserves_membership() {
        let mut m = CaseFoldedMap::new();
        m.insert("alice", vec!["o"]);
        assert!(m.rename("alice", "alice2"));
        assert!(!m.contains_key("alice"));
        assert_eq!(m.get("ALICE2"), Some(&vec!["o"]));
    }

    proptest::proptest! {
        #[test]
        fn fold_idempotent_prop(s in "\\PC{0,32}") {
            let once = fold(&s);
            let twice = fold(&once);
            proptest::prop_assert_eq!(once, twice);
        }
    }
}
