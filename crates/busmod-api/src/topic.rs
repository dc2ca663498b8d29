// ── Topic patterns ──
//
// A pattern ending in `*` matches every topic that starts with the text
// before the `*`. Anything else matches only the identical topic. There
// is no mid-pattern or per-segment wildcard.

use std::fmt;

/// Trailing wildcard marker.
pub const WILDCARD: char = '*';

/// Pure matching rule shared by the router and the harness.
///
/// ```
/// use busmod_api::matches;
/// assert!(matches("state/*", "state/d1/e1"));
/// assert!(!matches("state/*", "commands/d1"));
/// assert!(matches("commands/d1", "commands/d1"));
/// ```
pub fn matches(pattern: &str, topic: &str) -> bool {
    match pattern.strip_suffix(WILDCARD) {
        Some(prefix) => topic.starts_with(prefix),
        None => pattern == topic,
    }
}

/// A parsed subscription pattern.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopicPattern {
    /// Matches one topic exactly.
    Exact(String),
    /// Matches any topic with this literal prefix (`*` stripped).
    Prefix(String),
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Self {
        match pattern.strip_suffix(WILDCARD) {
            Some(prefix) => Self::Prefix(prefix.to_owned()),
            None => Self::Exact(pattern.to_owned()),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == topic,
            Self::Prefix(prefix) => topic.starts_with(prefix.as_str()),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Self::Prefix(_))
    }
}

impl fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(exact) => f.write_str(exact),
            Self::Prefix(prefix) => write!(f, "{prefix}{WILDCARD}"),
        }
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

impl From<&String> for TopicPattern {
    fn from(pattern: &String) -> Self {
        Self::parse(pattern)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_matches_prefix() {
        assert!(matches("state/*", "state/d1/e1"));
        assert!(matches("state/*", "state/"));
        assert!(matches("commands/*", "commands/d1"));
        assert!(!matches("state/*", "commands/d1"));
        assert!(!matches("state/*", "state"));
    }

    #[test]
    fn bare_wildcard_matches_everything() {
        assert!(matches("*", ""));
        assert!(matches("*", "anything/at/all"));
    }

    #[test]
    fn exact_pattern_requires_identity() {
        assert!(matches("commands/d1", "commands/d1"));
        assert!(!matches("commands/d1", "commands/d10"));
        assert!(!matches("commands/d1", "commands"));
    }

    #[test]
    fn star_in_the_middle_is_literal() {
        assert!(matches("a*b", "a*b"));
        assert!(!matches("a*b", "axb"));
    }

    #[test]
    fn parsed_pattern_agrees_with_pure_function() {
        let cases = [
            ("state/*", "state/d1/e1"),
            ("state/*", "commands/d1"),
            ("*", "x"),
            ("sys/register", "sys/register"),
            ("sys/register", "sys/register/x"),
        ];
        for (pattern, topic) in cases {
            assert_eq!(
                TopicPattern::parse(pattern).matches(topic),
                matches(pattern, topic),
                "{pattern} vs {topic}"
            );
        }
    }

    #[test]
    fn display_round_trips_source_text() {
        assert_eq!(TopicPattern::parse("state/*").to_string(), "state/*");
        assert_eq!(TopicPattern::parse("sys/register").to_string(), "sys/register");
        assert!(TopicPattern::parse("*").is_wildcard());
    }
}
