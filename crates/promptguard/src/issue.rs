//! Core issue types for promptguard.
//!
//! An [`Issue`] records one email address seen in one outgoing payload. The
//! snooze registry maps addresses to the instant their snooze lapses.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Length of a dismissal or snooze window: 24 hours in milliseconds.
pub const DISMISS_DURATION_MS: i64 = 24 * 60 * 60 * 1000;

/// Map from email address to snooze expiry (epoch milliseconds).
pub type SnoozeRegistry = BTreeMap<String, i64>;

/// Check whether a dismissal or snooze expiring at `expiry` still holds at `now`.
///
/// An expiry equal to `now` has lapsed. Every lifecycle rule goes through this
/// function so the boundary is treated the same way everywhere.
#[must_use]
pub fn is_in_force(expiry: i64, now: i64) -> bool {
    expiry > now
}

/// Where an issue sits in its lifecycle at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueState {
    /// Awaiting review.
    Active,
    /// Dismissed until the given instant, after which it becomes active again.
    Snoozed {
        /// Expiry in epoch milliseconds.
        until: i64,
    },
    /// Dismissed with no expiry. Terminal.
    Dismissed,
}

impl std::fmt::Display for IssueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Snoozed { .. } => write!(f, "snoozed"),
            Self::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// One detection of one email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    /// Unique identifier, assigned at detection time.
    pub id: String,

    /// The matched substring exactly as it appeared.
    pub email: String,

    /// Detection time in epoch milliseconds.
    pub timestamp: i64,

    /// Whether the issue has been acknowledged or pre-dismissed.
    #[serde(default)]
    pub dismissed: bool,

    /// When a time-boxed dismissal lapses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dismissed_until: Option<i64>,
}

impl Issue {
    /// Create an active issue with a fresh identifier.
    #[must_use]
    pub fn new(email: impl Into<String>, timestamp: i64) -> Self {
        Self {
            id: Self::generate_id(),
            email: email.into(),
            timestamp,
            dismissed: false,
            dismissed_until: None,
        }
    }

    /// Create an issue that is already snoozed until `until`.
    #[must_use]
    pub fn snoozed(email: impl Into<String>, timestamp: i64, until: i64) -> Self {
        let mut issue = Self::new(email, timestamp);
        issue.snooze_until(until);
        issue
    }

    /// Generate an identifier that is never reused.
    #[must_use]
    pub fn generate_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Dismiss the issue until `until`.
    pub fn snooze_until(&mut self, until: i64) {
        self.dismissed = true;
        self.dismissed_until = Some(until);
    }

    /// Dismiss the issue with no expiry.
    pub fn dismiss_permanently(&mut self) {
        self.dismissed = true;
        self.dismissed_until = None;
    }

    /// Return the issue to the active state.
    pub fn reactivate(&mut self) {
        self.dismissed = false;
        self.dismissed_until = None;
    }

    /// Check if the issue carries a dismissal that has lapsed by `now`.
    #[must_use]
    pub fn is_expired(&self, now: i64) -> bool {
        self.dismissed
            && self
                .dismissed_until
                .is_some_and(|until| !is_in_force(until, now))
    }

    /// Check if the issue still needs review.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.dismissed
    }

    /// Classify the issue as stored, without applying expiry.
    #[must_use]
    pub fn state(&self) -> IssueState {
        match (self.dismissed, self.dismissed_until) {
            (false, _) => IssueState::Active,
            (true, Some(until)) => IssueState::Snoozed { until },
            (true, None) => IssueState::Dismissed,
        }
    }
}
