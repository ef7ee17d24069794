//! Email detection and redaction for outgoing payloads.
//!
//! # Example
//!
//! ```
//! use promptguard::detection::{Redactor, ScanOutcome};
//!
//! let redactor = Redactor::new();
//! match redactor.scan("reach me at jane@example.com") {
//!     ScanOutcome::Clean => println!("nothing to redact"),
//!     ScanOutcome::Redacted { body, emails } => {
//!         assert_eq!(body, "reach me at [EMAIL_ADDRESS]");
//!         assert_eq!(emails, vec!["jane@example.com"]);
//!     }
//! }
//! ```

mod pattern;
mod redactor;

pub use pattern::{EmailPattern, DEFAULT_PLACEHOLDER, EMAIL_PATTERN};
pub use redactor::{Redactor, ScanOutcome};
