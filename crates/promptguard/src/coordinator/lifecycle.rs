//! Issue lifecycle rules.
//!
//! Each rule reads a [`StoreState`] and returns the [`StateUpdate`] that moves
//! it forward. Nothing here touches storage, so an update is either written
//! whole by the coordinator or not at all.

use crate::config::SnoozeConfig;
use crate::issue::{is_in_force, Issue, DISMISS_DURATION_MS};
use crate::storage::{StateUpdate, StoreState};

/// Result of recording a batch of detections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    /// The write to perform.
    pub update: StateUpdate,
    /// Issues created active.
    pub active: usize,
    /// Issues created already snoozed.
    pub snoozed: usize,
}

impl Detection {
    /// Check whether the batch produced anything that needs review.
    #[must_use]
    pub fn needs_attention(&self) -> bool {
        self.active > 0
    }
}

/// Result of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// The write to perform, if anything changed.
    pub update: Option<StateUpdate>,
    /// Issues returned to active.
    pub reactivated: usize,
    /// Registry entries removed.
    pub pruned: usize,
}

/// The lifecycle policy: window length and how single dismissals behave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lifecycle {
    window_ms: i64,
    permanent_issue_dismiss: bool,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            window_ms: DISMISS_DURATION_MS,
            permanent_issue_dismiss: false,
        }
    }
}

impl Lifecycle {
    /// Build the policy from snooze settings.
    #[must_use]
    pub fn from_config(config: &SnoozeConfig) -> Self {
        Self {
            window_ms: config.duration_ms(),
            permanent_issue_dismiss: config.permanent_issue_dismiss,
        }
    }

    /// Length of a dismissal window in milliseconds.
    #[must_use]
    pub fn window_ms(&self) -> i64 {
        self.window_ms
    }

    /// Record one issue per email, in order.
    ///
    /// An address with a snooze in force at `timestamp` yields an issue that
    /// is already dismissed until the registry's expiry.
    #[must_use]
    pub fn detect(&self, state: &StoreState, emails: &[String], timestamp: i64) -> Detection {
        let mut issues = state.issues.clone();
        let mut active = 0;
        let mut snoozed = 0;

        for email in emails {
            let issue = match state.active_snooze(email, timestamp) {
                Some(until) => {
                    snoozed += 1;
                    Issue::snoozed(email.as_str(), timestamp, until)
                }
                None => {
                    active += 1;
                    Issue::new(email.as_str(), timestamp)
                }
            };
            issues.push(issue);
        }

        Detection {
            update: StateUpdate::issues(issues),
            active,
            snoozed,
        }
    }

    /// Dismiss a single issue.
    ///
    /// Returns `None` when no issue has that identifier.
    #[must_use]
    pub fn dismiss_issue(
        &self,
        state: &StoreState,
        issue_id: &str,
        now: i64,
    ) -> Option<StateUpdate> {
        state.find_issue(issue_id)?;

        let issues = state
            .issues
            .iter()
            .cloned()
            .map(|mut issue| {
                if issue.id == issue_id {
                    if self.permanent_issue_dismiss {
                        issue.dismiss_permanently();
                    } else {
                        issue.snooze_until(now + self.window_ms);
                    }
                }
                issue
            })
            .collect();
        Some(StateUpdate::issues(issues))
    }

    /// Snooze an address and every issue already recorded for it.
    #[must_use]
    pub fn dismiss_email(&self, state: &StoreState, email: &str, now: i64) -> StateUpdate {
        let until = now + self.window_ms;

        let mut dismissed_emails = state.dismissed_emails.clone();
        dismissed_emails.insert(email.to_string(), until);

        let issues = state
            .issues
            .iter()
            .cloned()
            .map(|mut issue| {
                if issue.email == email {
                    issue.snooze_until(until);
                }
                issue
            })
            .collect();

        StateUpdate {
            issues: Some(issues),
            dismissed_emails: Some(dismissed_emails),
        }
    }

    /// Remove every issue and snooze.
    #[must_use]
    pub fn clear(&self) -> StateUpdate {
        StateUpdate::full(StoreState::default())
    }

    /// Reactivate lapsed issues and drop lapsed registry entries.
    ///
    /// Only keys that changed are written. Running it twice at the same
    /// instant yields no second write.
    #[must_use]
    pub fn reconcile(&self, state: &StoreState, now: i64) -> Reconciliation {
        let mut reactivated = 0;
        let issues: Vec<Issue> = state
            .issues
            .iter()
            .cloned()
            .map(|mut issue| {
                if issue.is_expired(now) {
                    issue.reactivate();
                    reactivated += 1;
                }
                issue
            })
            .collect();

        let mut dismissed_emails = state.dismissed_emails.clone();
        dismissed_emails.retain(|_, &mut until| is_in_force(until, now));
        let pruned = state.dismissed_emails.len() - dismissed_emails.len();

        let update = StateUpdate {
            issues: (reactivated > 0).then_some(issues),
            dismissed_emails: (pruned > 0).then_some(dismissed_emails),
        };

        Reconciliation {
            update: (!update.is_empty()).then_some(update),
            reactivated,
            pruned,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueState;

    const HOUR: i64 = 60 * 60 * 1000;

    fn emails(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    fn apply(state: &mut StoreState, update: StateUpdate) {
        update.apply_to(state);
    }

    #[test]
    fn test_detect_creates_active_issues_in_order() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();

        let detection = lifecycle.detect(&state, &emails(&["a@b.com", "c@d.org", "a@b.com"]), 1000);
        assert_eq!(detection.active, 3);
        assert!(detection.needs_attention());
        assert!(detection.update.dismissed_emails.is_none());
        apply(&mut state, detection.update);

        let found: Vec<&str> = state.issues.iter().map(|i| i.email.as_str()).collect();
        assert_eq!(found, ["a@b.com", "c@d.org", "a@b.com"]);
        assert!(state
            .issues
            .iter()
            .all(|i| i.timestamp == 1000 && i.is_active()));
        assert_ne!(state.issues[0].id, state.issues[2].id);
    }

    #[test]
    fn test_detect_empty_batch() {
        let lifecycle = Lifecycle::default();
        let detection = lifecycle.detect(&StoreState::default(), &[], 1);
        assert!(!detection.needs_attention());
        assert_eq!(detection.update, StateUpdate::issues(Vec::new()));
    }

    #[test]
    fn test_detect_appends_to_existing() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        let update = lifecycle.detect(&state, &emails(&["a@b.com"]), 1).update;
        apply(&mut state, update);
        let update = lifecycle.detect(&state, &emails(&["c@d.com"]), 2).update;
        apply(&mut state, update);

        assert_eq!(state.issues.len(), 2);
        assert_eq!(state.issues[1].email, "c@d.com");
    }

    #[test]
    fn test_detect_snoozed_email_is_pre_dismissed() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        state.dismissed_emails.insert("x@y.com".to_string(), 5000);

        let detection = lifecycle.detect(&state, &emails(&["x@y.com", "z@y.com"]), 3000);
        assert_eq!((detection.active, detection.snoozed), (1, 1));
        apply(&mut state, detection.update);

        assert_eq!(state.issues[0].state(), IssueState::Snoozed { until: 5000 });
        assert_eq!(state.issues[1].state(), IssueState::Active);
    }

    #[test]
    fn test_detect_at_exact_expiry_is_active() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        state.dismissed_emails.insert("x@y.com".to_string(), 5000);

        let detection = lifecycle.detect(&state, &emails(&["x@y.com"]), 5000);
        assert_eq!(detection.active, 1);
    }

    #[test]
    fn test_dismiss_issue_is_time_boxed() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        let update = lifecycle
            .detect(&state, &emails(&["a@b.com", "a@b.com"]), 1)
            .update;
        apply(&mut state, update);
        let id = state.issues[0].id.clone();

        let update = lifecycle.dismiss_issue(&state, &id, 100).unwrap();
        assert!(update.dismissed_emails.is_none());
        apply(&mut state, update);

        assert_eq!(
            state.issues[0].state(),
            IssueState::Snoozed {
                until: 100 + DISMISS_DURATION_MS
            }
        );
        assert!(state.issues[1].is_active());
        assert!(state.dismissed_emails.is_empty());
    }

    #[test]
    fn test_dismiss_issue_permanent() {
        let lifecycle = Lifecycle::from_config(&SnoozeConfig {
            duration_hours: 24,
            permanent_issue_dismiss: true,
        });
        let mut state = StoreState::default();
        let update = lifecycle.detect(&state, &emails(&["a@b.com"]), 1).update;
        apply(&mut state, update);
        let id = state.issues[0].id.clone();

        let update = lifecycle.dismiss_issue(&state, &id, 100).unwrap();
        apply(&mut state, update);
        assert_eq!(state.issues[0].state(), IssueState::Dismissed);

        let later = lifecycle.reconcile(&state, i64::MAX);
        assert!(later.update.is_none());
    }

    #[test]
    fn test_dismiss_unknown_issue() {
        let lifecycle = Lifecycle::default();
        assert!(lifecycle
            .dismiss_issue(&StoreState::default(), "missing", 1)
            .is_none());
    }

    #[test]
    fn test_dismiss_email_is_retroactive() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        let update = lifecycle
            .detect(&state, &emails(&["x@y.com", "X@y.com", "x@y.com"]), 1)
            .update;
        apply(&mut state, update);

        let update = lifecycle.dismiss_email(&state, "x@y.com", 2000);
        apply(&mut state, update);

        let until = 2000 + DISMISS_DURATION_MS;
        assert_eq!(state.dismissed_emails.get("x@y.com"), Some(&until));
        assert_eq!(state.issues[0].dismissed_until, Some(until));
        assert!(state.issues[1].is_active(), "comparison is exact");
        assert_eq!(state.issues[2].dismissed_until, Some(until));
    }

    #[test]
    fn test_dismiss_email_without_issues() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        let update = lifecycle.dismiss_email(&state, "x@y.com", 0);
        apply(&mut state, update);

        assert!(state.issues.is_empty());
        assert_eq!(state.dismissed_emails.len(), 1);
    }

    #[test]
    fn test_custom_window() {
        let lifecycle = Lifecycle::from_config(&SnoozeConfig {
            duration_hours: 2,
            permanent_issue_dismiss: false,
        });
        assert_eq!(lifecycle.window_ms(), 2 * HOUR);

        let update = lifecycle.dismiss_email(&StoreState::default(), "x@y.com", 10);
        assert_eq!(
            update.dismissed_emails.unwrap().get("x@y.com"),
            Some(&(10 + 2 * HOUR))
        );
    }

    #[test]
    fn test_clear() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        let update = lifecycle.detect(&state, &emails(&["a@b.com"]), 1).update;
        apply(&mut state, update);
        let update = lifecycle.dismiss_email(&state, "a@b.com", 1);
        apply(&mut state, update);

        apply(&mut state, lifecycle.clear());
        assert_eq!(state, StoreState::default());
    }

    #[test]
    fn test_reconcile_reactivates_and_prunes() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        state.issues.push(Issue::snoozed("x@y.com", 1, 5000));
        state.issues.push(Issue::snoozed("z@y.com", 1, 9000));
        state.dismissed_emails.insert("x@y.com".to_string(), 5000);
        state.dismissed_emails.insert("z@y.com".to_string(), 9000);

        let result = lifecycle.reconcile(&state, 6000);
        assert_eq!((result.reactivated, result.pruned), (1, 1));
        apply(&mut state, result.update.unwrap());

        assert_eq!(state.issues[0].state(), IssueState::Active);
        assert!(state.issues[1].dismissed);
        assert!(!state.dismissed_emails.contains_key("x@y.com"));
        assert!(state.dismissed_emails.contains_key("z@y.com"));
    }

    #[test]
    fn test_reconcile_boundary_is_expired() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        state.issues.push(Issue::snoozed("x@y.com", 1, 5000));

        assert!(lifecycle.reconcile(&state, 4999).update.is_none());

        let result = lifecycle.reconcile(&state, 5000);
        assert_eq!(result.reactivated, 1);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        state.issues.push(Issue::snoozed("x@y.com", 1, 5000));
        state.dismissed_emails.insert("x@y.com".to_string(), 5000);

        let update = lifecycle.reconcile(&state, 6000).update.unwrap();
        apply(&mut state, update);
        let second = lifecycle.reconcile(&state, 6000);

        assert_eq!(second, Reconciliation::default());
    }

    #[test]
    fn test_reconcile_writes_only_changed_keys() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();
        state.dismissed_emails.insert("x@y.com".to_string(), 10);

        let update = lifecycle.reconcile(&state, 20).update.unwrap();
        assert!(update.issues.is_none());
        assert_eq!(update.dismissed_emails, Some(Default::default()));
    }

    #[test]
    fn test_detect_dismiss_email_round_trip() {
        let lifecycle = Lifecycle::default();
        let mut state = StoreState::default();

        let update = lifecycle.detect(&state, &emails(&["x@y.com"]), 0).update;
        apply(&mut state, update);
        let update = lifecycle.dismiss_email(&state, "x@y.com", 0);
        apply(&mut state, update);
        let update = lifecycle.detect(&state, &emails(&["x@y.com"]), 1000).update;
        apply(&mut state, update);

        assert_eq!(state.issues.len(), 2);
        assert!(state.active_issues().is_empty());

        let update = lifecycle
            .reconcile(&state, DISMISS_DURATION_MS + 1)
            .update
            .unwrap();
        apply(&mut state, update);
        assert_eq!(state.active_issues().len(), 2);
        assert!(state.dismissed_emails.is_empty());
    }
}
