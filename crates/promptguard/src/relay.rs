//! Forwards detection events from the interceptor to the coordinator.
//!
//! The interceptor needs a synchronous hand-off, the coordinator answers
//! asynchronously. [`Relay`] bridges the two: `emit` queues the event, and a
//! forwarding task sends each one on as an `EMAIL_DETECTED` action and waits
//! for its acknowledgement before taking the next. The relay keeps no state
//! of its own.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::coordinator::CoordinatorHandle;
use crate::error::{Error, Result};
use crate::interceptor::DetectionSink;
use crate::message::{ActionMessage, DetectionEvent};

/// A [`DetectionSink`] that forwards to a coordinator.
#[derive(Debug, Clone)]
pub struct Relay {
    events: mpsc::UnboundedSender<DetectionEvent>,
}

impl Relay {
    /// Start forwarding to `coordinator`.
    ///
    /// The task ends once every clone of the returned relay is dropped and
    /// the queued events are delivered.
    #[must_use]
    pub fn spawn(coordinator: CoordinatorHandle) -> (Self, JoinHandle<()>) {
        let (events, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(forward(rx, coordinator));
        (Self { events }, task)
    }
}

impl DetectionSink for Relay {
    fn emit(&self, event: DetectionEvent) -> Result<()> {
        self.events.send(event).map_err(|_| {
            warn!("Relay is not running; detection dropped");
            Error::transport_closed("relay is not running")
        })
    }
}

async fn forward(mut rx: mpsc::UnboundedReceiver<DetectionEvent>, coordinator: CoordinatorHandle) {
    while let Some(event) = rx.recv().await {
        let count = event.emails.len();
        match coordinator.send(ActionMessage::from(event)).await {
            Ok(ack) if ack.success => debug!(count, "Detection delivered"),
            Ok(ack) => warn!(
                count,
                error = ack.error.as_deref().unwrap_or("unknown"),
                "Coordinator rejected detection"
            ),
            Err(e) => {
                warn!(count, error = %e, "Coordinator unavailable; detection dropped");
            }
        }
    }
    debug!("Relay stopped");
}
