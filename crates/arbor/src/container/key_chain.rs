//! Key-chains and the options that steer container mapping.
//!
//! A key-chain is a `/`-separated path from the root of a container to a node,
//! for example `"y/z"`. Filter entries match a key-chain exactly, as a
//! subtree prefix (`"y"` matches `"y/z"`), or segment-wise with `*` standing
//! in for any single key (`"*/z"` matches `"y/z"`).

pub const SEPARATOR: char = '/';

/// Append `key` to `prefix`.
pub fn join(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}{SEPARATOR}{key}")
    }
}

/// Split a key-chain into its keys, ignoring empty segments.
pub fn split(key_chain: &str) -> Vec<&str> {
    key_chain.split(SEPARATOR).filter(|k| !k.is_empty()).collect()
}

/// A set of key-chain patterns.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyChainFilter {
    patterns: Vec<String>,
}

impl KeyChainFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Whether any pattern matches `key_chain` or one of its ancestors.
    pub fn matches(&self, key_chain: &str) -> bool {
        let keys = split(key_chain);
        self.patterns.iter().any(|pattern| {
            let pattern = split(pattern);
            pattern.len() <= keys.len()
                && pattern
                    .iter()
                    .zip(&keys)
                    .all(|(p, k)| *p == "*" || p == k)
        })
    }
}

/// Controls which leaves [`Container::map`](super::Container::map) and
/// [`Container::multi_map`](super::Container::multi_map) visit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapOptions {
    /// Key-chains to select; `None` selects every leaf.
    pub key_chains: Option<KeyChainFilter>,
    /// Apply to the selected leaves (`true`) or to all the others (`false`).
    pub to_apply: bool,
    /// Drop leaves the function was not applied to, and subtrees left empty.
    pub prune_unapplied: bool,
    /// Descend into lists and tuples, addressing elements as `key/index`.
    pub map_sequences: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self {
            key_chains: None,
            to_apply: true,
            prune_unapplied: false,
            map_sequences: false,
        }
    }
}

impl MapOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key_chains<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_chains = Some(KeyChainFilter::new(patterns));
        self
    }

    pub fn to_apply(mut self, to_apply: bool) -> Self {
        self.to_apply = to_apply;
        self
    }

    pub fn prune_unapplied(mut self, prune: bool) -> Self {
        self.prune_unapplied = prune;
        self
    }

    pub fn map_sequences(mut self, map_sequences: bool) -> Self {
        self.map_sequences = map_sequences;
        self
    }

    /// Whether the function applies at `key_chain`.
    pub fn applies(&self, key_chain: &str) -> bool {
        match &self.key_chains {
            None => true,
            Some(filter) => filter.matches(key_chain) == self.to_apply,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_split() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a/b", "c"), "a/b/c");
        assert_eq!(split("a/b/c"), vec!["a", "b", "c"]);
        assert_eq!(split("/a//b/"), vec!["a", "b"]);
    }

    #[test]
    fn test_filter_matching() {
        let filter = KeyChainFilter::new(["x", "y/z", "*/w"]);
        assert!(filter.matches("x"));
        assert!(filter.matches("x/deep"));
        assert!(filter.matches("y/z"));
        assert!(!filter.matches("y"));
        assert!(!filter.matches("y/q"));
        assert!(filter.matches("a/w"));
        assert!(!filter.matches("w"));
        assert!(!filter.matches("xx"));
    }

    #[test]
    fn test_applies_respects_to_apply() {
        let opts = MapOptions::new().key_chains(["a"]);
        assert!(opts.applies("a"));
        assert!(!opts.applies("b"));

        let inverted = opts.to_apply(false);
        assert!(!inverted.applies("a"));
        assert!(inverted.applies("b"));

        assert!(MapOptions::default().applies("anything"));
    }
}
