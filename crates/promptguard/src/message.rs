//! Messages exchanged between pipeline stages.
//!
//! - [`DetectionEvent`]: interceptor → relay, same process.
//! - [`ActionMessage`]: relay or UI → coordinator, JSON tagged by `type`.
//! - [`Ack`]: coordinator → caller.

use serde::{Deserialize, Deserializer, Serialize};

/// Raised by the interceptor when an outgoing body contained matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionEvent {
    /// Raw matched substrings, source order, duplicates kept.
    pub emails: Vec<String>,
    /// Capture time in epoch milliseconds.
    pub timestamp: i64,
}

/// An action for the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionMessage {
    /// Record detections.
    ///
    /// Missing or null fields are tolerated: no emails means an empty batch,
    /// no timestamp means "now" at processing time.
    EmailDetected {
        /// Raw matched substrings.
        #[serde(default, deserialize_with = "lenient_emails")]
        emails: Vec<String>,
        /// Capture time in epoch milliseconds.
        #[serde(
            default,
            deserialize_with = "lenient_timestamp",
            skip_serializing_if = "Option::is_none"
        )]
        timestamp: Option<i64>,
    },

    /// Dismiss a single issue.
    #[serde(rename_all = "camelCase")]
    DismissIssue {
        /// Identifier of the issue.
        issue_id: String,
    },

    /// Snooze every issue for one address.
    DismissEmail {
        /// The address, compared exactly.
        email: String,
    },

    /// Remove all issues and snoozes.
    ClearHistory,
}

impl ActionMessage {
    /// The wire name of this action.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::EmailDetected { .. } => "EMAIL_DETECTED",
            Self::DismissIssue { .. } => "DISMISS_ISSUE",
            Self::DismissEmail { .. } => "DISMISS_EMAIL",
            Self::ClearHistory => "CLEAR_HISTORY",
        }
    }
}

impl From<DetectionEvent> for ActionMessage {
    fn from(event: DetectionEvent) -> Self {
        Self::EmailDetected {
            emails: event.emails,
            timestamp: Some(event.timestamp),
        }
    }
}

/// Acknowledgement returned for every action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Whether the action was applied.
    pub success: bool,
    /// Why it was not.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Ack {
    /// A successful acknowledgement.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    /// A failed acknowledgement carrying the error text.
    #[must_use]
    pub fn failed(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

impl<E: std::fmt::Display> From<Result<(), E>> for Ack {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Self::ok(),
            Err(e) => Self::failed(e),
        }
    }
}

fn lenient_emails<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

#[allow(clippy::cast_possible_truncation)]
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| {
        v.as_i64()
            .or_else(|| v.as_f64().filter(|f| f.is_finite()).map(|f| f as i64))
    }))
}
