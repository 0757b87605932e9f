//! Topic patterns.
//!
//! A pattern is either an exact source id or, when it ends with
//! [`TOPIC_WILDCARD`], a prefix matching every source id that starts with
//! the text before the wildcard. The wildcard is only recognised as the
//! final character.

use std::fmt;

/// Trailing wildcard marker.
pub const TOPIC_WILDCARD: char = '*';

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    Exact(String),
    Prefix(String),
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix(TOPIC_WILDCARD) {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    pub fn matches(&self, source_id: &str) -> bool {
        match self {
            Self::Exact(id) => id == source_id,
            Self::Prefix(prefix) => source_id.starts_with(prefix.as_str()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Prefix(_))
    }
}

impl From<&str> for TopicPattern {
    fn from(pattern: &str) -> Self {
        Self::parse(pattern)
    }
}

impl From<String> for TopicPattern {
    fn from(pattern: String) -> Self {
        Self::parse(&pattern)
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(id) => f.write_str(id),
            Self::Prefix(prefix) => write!(f, "{prefix}{TOPIC_WILDCARD}"),
        }
    }
}

/// Deduplicated, insertion-ordered set of patterns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicSet {
    patterns: Vec<TopicPattern>,
}

impl TopicSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pattern, returning `false` if it was already present.
    pub fn insert(&mut self, pattern: impl Into<TopicPattern>) -> bool {
        let pattern = pattern.into();
        if self.patterns.contains(&pattern) {
            return false;
        }
        self.patterns.push(pattern);
        true
    }

    pub fn matches(&self, source_id: &str) -> bool {
        self.patterns.iter().any(|pattern| pattern.matches(source_id))
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TopicPattern> {
        self.patterns.iter()
    }
}

impl<P: Into<TopicPattern>> FromIterator<P> for TopicSet {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        let mut set = Self::new();
        for pattern in iter {
            set.insert(pattern);
        }
        set
    }
}

impl fmt::Display for TopicSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, pattern) in self.patterns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{pattern}")?;
        }
        Ok(())
    }
}
