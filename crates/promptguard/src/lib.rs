//! `promptguard` - Keeps email addresses out of outgoing chat prompts
//!
//! Requests bound for a chat API pass through an [`Interceptor`], which
//! replaces every email-shaped substring with a placeholder and reports what
//! it found. A [`Relay`] carries those reports to the [`Coordinator`], the
//! single writer of the issue store, which tracks each detection through its
//! lifecycle: active, snoozed for a window, or dismissed.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod detection;
pub mod error;
pub mod interceptor;
pub mod issue;
pub mod logging;
pub mod message;
pub mod relay;
pub mod service;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorHandle, SurfacePresenter};
pub use detection::{EmailPattern, Redactor, ScanOutcome};
pub use error::{Error, Result};
pub use interceptor::{
    DetectionSink, Interceptor, OutboundRequest, RequestBody, RequestSender, RequestTarget,
};
pub use issue::{Issue, IssueState, SnoozeRegistry, DISMISS_DURATION_MS};
pub use logging::init_logging;
pub use message::{Ack, ActionMessage, DetectionEvent};
pub use relay::Relay;
pub use service::Pipeline;
pub use storage::{MemoryStore, SqliteStore, StateStore, StateUpdate, StorageStats, StoreState};
