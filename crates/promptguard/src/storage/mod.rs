//! Persistence for issues and the snooze registry.
//!
//! The persisted state is two keys: [`ISSUES_KEY`] holds the ordered issue
//! list and [`DISMISSED_EMAILS_KEY`] the snooze registry. Writes replace whole
//! keys and every key in one [`StateUpdate`] is written atomically.
//!
//! Read-modify-write cycles go through [`StateStore::modify`], which reads the
//! state and writes the computed update as one unit. Another writer on the
//! same database, including one in a different process, cannot slip a write
//! in between.

mod memory;
pub mod migrations;
mod observer;
pub mod schema;
mod sqlite;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::issue::{is_in_force, Issue, SnoozeRegistry};

pub use memory::MemoryStore;
pub use observer::{Observers, Subscription};
pub use sqlite::{SqliteStore, StorageStats};

/// Key holding the issue list.
pub const ISSUES_KEY: &str = "issues";

/// Key holding the snooze registry.
pub const DISMISSED_EMAILS_KEY: &str = "dismissedEmails";

/// The complete persisted state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreState {
    /// Every issue, in detection order.
    #[serde(default)]
    pub issues: Vec<Issue>,
    /// Snoozed addresses and their expiry.
    #[serde(default)]
    pub dismissed_emails: SnoozeRegistry,
}

impl StoreState {
    /// Issues still awaiting review, in store order.
    #[must_use]
    pub fn active_issues(&self) -> Vec<&Issue> {
        self.issues.iter().filter(|i| i.is_active()).collect()
    }

    /// Every issue, newest first.
    #[must_use]
    pub fn history(&self) -> Vec<&Issue> {
        let mut issues: Vec<&Issue> = self.issues.iter().collect();
        issues.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        issues
    }

    /// Active issues grouped by address.
    ///
    /// Groups are ordered by their most recent detection, newest first.
    /// Within a group, issues keep store order.
    #[must_use]
    pub fn active_by_email(&self) -> Vec<(&str, Vec<&Issue>)> {
        let mut order: Vec<&str> = Vec::new();
        let mut groups: HashMap<&str, Vec<&Issue>> = HashMap::new();
        for issue in self.issues.iter().filter(|i| i.is_active()) {
            groups
                .entry(issue.email.as_str())
                .or_insert_with(|| {
                    order.push(issue.email.as_str());
                    Vec::new()
                })
                .push(issue);
        }

        let latest = |issues: &[&Issue]| issues.iter().map(|i| i.timestamp).max();
        let mut grouped: Vec<(&str, Vec<&Issue>)> = order
            .into_iter()
            .filter_map(|email| groups.remove(email).map(|issues| (email, issues)))
            .collect();
        grouped.sort_by(|(_, a), (_, b)| latest(b).cmp(&latest(a)));
        grouped
    }

    /// Look up an issue by identifier.
    #[must_use]
    pub fn find_issue(&self, id: &str) -> Option<&Issue> {
        self.issues.iter().find(|i| i.id == id)
    }

    /// The snooze expiry for `email`, if one is in force at `now`.
    #[must_use]
    pub fn active_snooze(&self, email: &str, now: i64) -> Option<i64> {
        self.dismissed_emails
            .get(email)
            .copied()
            .filter(|&until| is_in_force(until, now))
    }
}

/// A batch write. Keys left as `None` are not touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateUpdate {
    /// Replacement issue list.
    pub issues: Option<Vec<Issue>>,
    /// Replacement snooze registry.
    pub dismissed_emails: Option<SnoozeRegistry>,
}

impl StateUpdate {
    /// An update that replaces only the issue list.
    #[must_use]
    pub fn issues(issues: Vec<Issue>) -> Self {
        Self {
            issues: Some(issues),
            dismissed_emails: None,
        }
    }

    /// An update that replaces both keys.
    #[must_use]
    pub fn full(state: StoreState) -> Self {
        Self {
            issues: Some(state.issues),
            dismissed_emails: Some(state.dismissed_emails),
        }
    }

    /// Check if the update writes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.is_none() && self.dismissed_emails.is_none()
    }

    /// Apply the update to an in-memory state.
    pub fn apply_to(self, state: &mut StoreState) {
        if let Some(issues) = self.issues {
            state.issues = issues;
        }
        if let Some(dismissed_emails) = self.dismissed_emails {
            state.dismissed_emails = dismissed_emails;
        }
    }
}

/// Computes an update from the state current at write time.
///
/// Returning an empty [`StateUpdate`] writes nothing.
pub type Transform = Box<dyn FnOnce(&StoreState) -> StateUpdate + Send>;

/// A key-value store for [`StoreState`].
///
/// Implementations must write all keys of one [`StateUpdate`] atomically and
/// notify subscribers with the complete state after each successful write.
#[async_trait]
pub trait StateStore: Send + Sync + std::fmt::Debug {
    /// Read the complete state. Missing keys read as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying store cannot be read or a stored
    /// value cannot be decoded.
    async fn load(&self) -> Result<StoreState>;

    /// Write the keys present in `update` in one batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails; nothing is written in that case.
    async fn save(&self, update: StateUpdate) -> Result<()>;

    /// Read the state, compute an update with `transform` and write it, as
    /// one unit that excludes every other writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the read or the write fails; nothing is written in
    /// that case.
    async fn modify(&self, transform: Transform) -> Result<()>;

    /// Register a callback invoked with the full state after every write.
    fn subscribe(&self, observer: Box<dyn Fn(&StoreState) + Send + Sync>) -> Subscription;
}
