//! Body scanning and redaction.

use std::borrow::Cow;

use tracing::trace;

use super::pattern::{EmailPattern, DEFAULT_PLACEHOLDER};

/// Result of scanning an outgoing body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// No email-shaped substring was found.
    Clean,

    /// At least one match was found and replaced.
    Redacted {
        /// The body with every match replaced by the placeholder.
        body: String,

        /// The raw matches, in source order, duplicates kept.
        emails: Vec<String>,
    },
}

impl ScanOutcome {
    /// Check if the scan found nothing.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean)
    }
}

/// Scans bodies for email-shaped substrings and redacts them.
#[derive(Debug, Clone)]
pub struct Redactor {
    pattern: EmailPattern,
    placeholder: String,
}

impl Redactor {
    /// Create a redactor using the default placeholder.
    #[must_use]
    pub fn new() -> Self {
        Self::with_placeholder(DEFAULT_PLACEHOLDER)
    }

    /// Create a redactor with a custom placeholder.
    ///
    /// The placeholder should not itself look like an email address, or a
    /// second pass over redacted output would report it again.
    /// [`Config::validate`](crate::Config::validate) enforces this.
    #[must_use]
    pub fn with_placeholder(placeholder: impl Into<String>) -> Self {
        Self {
            pattern: EmailPattern::new(),
            placeholder: placeholder.into(),
        }
    }

    /// The placeholder written in place of each match.
    #[must_use]
    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    /// Scan a body, returning the redacted form and raw matches if any.
    #[must_use]
    pub fn scan(&self, body: &str) -> ScanOutcome {
        let emails: Vec<String> = self.pattern.find_all(body).map(String::from).collect();
        if emails.is_empty() {
            return ScanOutcome::Clean;
        }

        trace!(matches = emails.len(), "Redacting email-shaped substrings");
        let body = match self.pattern.redact(body, &self.placeholder) {
            Cow::Owned(s) => s,
            Cow::Borrowed(s) => s.to_string(),
        };
        ScanOutcome::Redacted { body, emails }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new()
    }
}
