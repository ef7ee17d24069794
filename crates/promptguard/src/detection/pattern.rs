//! The email-shaped substring pattern.
//!
//! A single shape is recognised: a local part of `[A-Za-z0-9._%+-]`, an `@`,
//! a dotted domain and a top-level label of at least two letters. Quoted local
//! parts and internationalised domains are not matched, and some invalid
//! addresses are.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{NoExpand, Regex};

/// Regular expression source for an email-shaped substring.
pub const EMAIL_PATTERN: &str = r"[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}";

/// Token substituted for every match in an outgoing body.
pub const DEFAULT_PLACEHOLDER: &str = "[EMAIL_ADDRESS]";

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

/// Compiled email pattern.
#[derive(Debug, Clone, Copy)]
pub struct EmailPattern {
    regex: &'static Regex,
}

impl EmailPattern {
    /// Get the shared compiled pattern.
    ///
    /// # Panics
    ///
    /// Panics if [`EMAIL_PATTERN`] fails to compile, which it does not.
    #[must_use]
    pub fn new() -> Self {
        let regex =
            EMAIL_REGEX.get_or_init(|| Regex::new(EMAIL_PATTERN).expect("Invalid email pattern"));
        Self { regex }
    }

    /// Check if the content contains at least one match.
    #[must_use]
    pub fn matches(&self, content: &str) -> bool {
        self.regex.is_match(content)
    }

    /// Find all matches in the content, in source order.
    pub fn find_all<'a>(&self, content: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        let regex: &'static Regex = self.regex;
        regex.find_iter(content).map(|m| m.as_str())
    }

    /// Replace every match with `placeholder`, taken literally.
    #[must_use]
    pub fn redact<'a>(&self, content: &'a str, placeholder: &str) -> Cow<'a, str> {
        self.regex.replace_all(content, NoExpand(placeholder))
    }
}

impl Default for EmailPattern {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_plain_addresses() {
        let pattern = EmailPattern::new();

        assert!(pattern.matches("alice@example.com"));
        assert!(pattern.matches("write to first.last+tag@mail.example.co.uk today"));
        assert!(pattern.matches("ODD_CASE%X@Host-Name.IO"));
        assert!(!pattern.matches("no address here"));
        assert!(!pattern.matches("user@localhost"));
        assert!(!pattern.matches("user@example.c"));
    }

    #[test]
    fn test_find_all_preserves_case_and_order() {
        let pattern = EmailPattern::new();
        let found: Vec<_> = pattern
            .find_all("cc Bob@Example.com, then alice@example.org")
            .collect();

        assert_eq!(found, vec!["Bob@Example.com", "alice@example.org"]);
    }

    #[test]
    fn test_trailing_dot_not_included() {
        let pattern = EmailPattern::new();
        let found: Vec<_> = pattern.find_all("mail me at a@b.com.").collect();

        assert_eq!(found, vec!["a@b.com"]);
    }

    #[test]
    fn test_quoted_local_part_is_not_matched() {
        // Quoted local parts are unsupported; the closing quote cannot start a match
        let pattern = EmailPattern::new();
        let found: Vec<_> = pattern.find_all(r#""john doe"@example.com"#).collect();

        assert!(found.is_empty());
    }

    #[test]
    fn test_redact_replaces_every_match() {
        let pattern = EmailPattern::new();
        let redacted = pattern.redact("a@b.com and c@d.org", DEFAULT_PLACEHOLDER);

        assert_eq!(redacted, "[EMAIL_ADDRESS] and [EMAIL_ADDRESS]");
    }

    #[test]
    fn test_redact_placeholder_is_literal() {
        let pattern = EmailPattern::new();
        let redacted = pattern.redact("x@y.com", "$0-${1}");

        assert_eq!(redacted, "$0-${1}");
    }

    #[test]
    fn test_redact_without_match_borrows() {
        let pattern = EmailPattern::new();
        let redacted = pattern.redact("nothing to see", DEFAULT_PLACEHOLDER);

        assert!(matches!(redacted, Cow::Borrowed(_)));
    }

    #[test]
    fn test_default_placeholder_does_not_match() {
        assert!(!EmailPattern::new().matches(DEFAULT_PLACEHOLDER));
    }
}
