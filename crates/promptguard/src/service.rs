//! Wiring for a running pipeline.
//!
//! [`Pipeline`] starts a coordinator and a relay over one store. [`serve`]
//! reads newline-delimited JSON actions and writes one JSON [`Ack`] line per
//! action, which is how an external UI or browser host drives the
//! coordinator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorHandle};
use crate::error::{Error, Result};
use crate::interceptor::{DetectionSink, OutboundRequest, RequestSender};
use crate::message::{Ack, ActionMessage, DetectionEvent};
use crate::relay::Relay;
use crate::storage::StateStore;

/// A running coordinator and relay.
///
/// Call [`Pipeline::shutdown`] to drain both. Sinks and handles handed out
/// must be dropped first, or shutdown waits for them.
#[derive(Debug)]
pub struct Pipeline {
    handle: CoordinatorHandle,
    relay: Relay,
    coordinator: JoinHandle<()>,
    forwarder: JoinHandle<()>,
}

impl Pipeline {
    /// Start a pipeline over `store` using `config`.
    #[must_use]
    pub fn start(store: Arc<dyn StateStore>, config: &Config) -> Self {
        Self::from_coordinator(
            Coordinator::from_config(store, config),
            config.coordinator.queue_capacity,
        )
    }

    /// Start a pipeline around an already built coordinator.
    #[must_use]
    pub fn from_coordinator(coordinator: Coordinator, queue_capacity: usize) -> Self {
        let (handle, coordinator) = coordinator.spawn(queue_capacity);
        let (relay, forwarder) = Relay::spawn(handle.clone());
        Self {
            handle,
            relay,
            coordinator,
            forwarder,
        }
    }

    /// A handle for sending actions directly.
    #[must_use]
    pub fn handle(&self) -> CoordinatorHandle {
        self.handle.clone()
    }

    /// A sink for an [`Interceptor`](crate::Interceptor).
    #[must_use]
    pub fn sink(&self) -> Arc<dyn DetectionSink> {
        Arc::new(self.relay.clone())
    }

    /// Send one action and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] if the coordinator has stopped.
    pub async fn send(&self, message: ActionMessage) -> Result<Ack> {
        self.handle.send(message).await
    }

    /// Deliver queued detections, then stop the coordinator.
    ///
    /// # Errors
    ///
    /// Returns an error if either task panicked.
    pub async fn shutdown(self) -> Result<()> {
        let Self {
            handle,
            relay,
            coordinator,
            forwarder,
        } = self;

        drop(relay);
        forwarder
            .await
            .map_err(|e| Error::internal(format!("relay task failed: {e}")))?;
        drop(handle);
        coordinator
            .await
            .map_err(|e| Error::internal(format!("coordinator task failed: {e}")))?;
        debug!("Pipeline stopped");
        Ok(())
    }
}

/// Apply newline-delimited JSON actions from `reader`, answering each on
/// `writer`.
///
/// Blank lines are skipped. A line that does not parse gets a failed
/// acknowledgement and processing continues. Returns the number of actions
/// applied once `reader` reaches end of input.
///
/// # Errors
///
/// Returns an error on I/O failure or if the coordinator stops.
pub async fn serve<R, W>(reader: R, mut writer: W, handle: &CoordinatorHandle) -> Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut applied = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let ack = match serde_json::from_str::<ActionMessage>(line) {
            Ok(message) => {
                applied += 1;
                handle.send(message).await?
            }
            Err(e) => {
                warn!(error = %e, "Malformed action");
                Ack::failed(format!("malformed action: {e}"))
            }
        };

        let mut out = serde_json::to_vec(&ack)?;
        out.push(b'\n');
        writer.write_all(&out).await?;
        writer.flush().await?;
    }

    Ok(applied)
}

/// A [`RequestSender`] that hands the request back instead of sending it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DryRunSender;

#[async_trait]
impl RequestSender for DryRunSender {
    type Response = OutboundRequest;

    async fn send(&self, request: OutboundRequest) -> Result<OutboundRequest> {
        Ok(request)
    }
}

/// A [`DetectionSink`] that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl DetectionSink for LogSink {
    fn emit(&self, event: DetectionEvent) -> Result<()> {
        info!(
            count = event.emails.len(),
            "Dry run; detection not recorded"
        );
        Ok(())
    }
}
