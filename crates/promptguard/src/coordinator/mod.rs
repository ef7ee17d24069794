//! The coordinator: sole writer of issue state.
//!
//! A [`Coordinator`] owns the store and applies one [`ActionMessage`] at a
//! time. Once spawned, callers talk to it through a cloneable
//! [`CoordinatorHandle`]; every action is answered with an [`Ack`].
//!
//! Each action is one read-modify-write cycle, run through
//! [`StateStore::modify`] so that it stays a single unit even when another
//! process has the same database open. If the read or the write fails
//! nothing is stored and the caller gets a failed acknowledgement. Showing the
//! review surface is a side effect that may fail without failing the action.

pub mod lifecycle;
pub mod presenter;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::message::{Ack, ActionMessage};
use crate::storage::{StateStore, StateUpdate, StoreState};

pub use lifecycle::{Detection, Lifecycle, Reconciliation};
pub use presenter::{CommandPresenter, CountingPresenter, LogPresenter, SurfacePresenter};

/// Applies lifecycle actions to the store.
#[derive(Debug)]
pub struct Coordinator {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    presenter: Arc<dyn SurfacePresenter>,
    lifecycle: Lifecycle,
    auto_show: bool,
}

impl Coordinator {
    /// Create a coordinator with the default policy, the system clock and a
    /// log-only presenter.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            presenter: Arc::new(LogPresenter),
            lifecycle: Lifecycle::default(),
            auto_show: true,
        }
    }

    /// Create a coordinator configured from `config`.
    #[must_use]
    pub fn from_config(store: Arc<dyn StateStore>, config: &Config) -> Self {
        Self {
            presenter: Arc::from(presenter::from_config(&config.presentation)),
            lifecycle: Lifecycle::from_config(&config.snooze),
            auto_show: config.presentation.auto_show,
            ..Self::new(store)
        }
    }

    /// Use a different clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Use a different presenter.
    #[must_use]
    pub fn with_presenter(mut self, presenter: Arc<dyn SurfacePresenter>) -> Self {
        self.presenter = presenter;
        self
    }

    /// Use a different lifecycle policy.
    #[must_use]
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// The store this coordinator writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Apply an action and acknowledge it.
    pub async fn handle(&mut self, message: ActionMessage) -> Ack {
        let kind = message.kind();
        match self.apply(message).await {
            Ok(()) => {
                debug!(kind, "Action applied");
                Ack::ok()
            }
            Err(e) => {
                error!(kind, error = %e, "Action failed; state left unchanged");
                Ack::failed(e)
            }
        }
    }

    /// Apply an action.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn apply(&mut self, message: ActionMessage) -> Result<()> {
        match message {
            ActionMessage::EmailDetected { emails, timestamp } => {
                self.detect(&emails, timestamp).await.map(drop)
            }
            ActionMessage::DismissIssue { issue_id } => self.dismiss_issue(&issue_id).await,
            ActionMessage::DismissEmail { email } => self.dismiss_email(&email).await,
            ActionMessage::ClearHistory => self.clear().await,
        }
    }

    /// Record a batch of detections.
    ///
    /// A missing timestamp means now. If any new issue is active the review
    /// surface is requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn detect(&mut self, emails: &[String], timestamp: Option<i64>) -> Result<Detection> {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now_ms());
        if emails.is_empty() {
            debug!("Empty detection batch");
            let state = self.store.load().await?;
            return Ok(self.lifecycle.detect(&state, emails, timestamp));
        }

        let lifecycle = self.lifecycle;
        let emails = emails.to_vec();
        let detection = self
            .transact(move |state| {
                let detection = lifecycle.detect(state, &emails, timestamp);
                (detection.update.clone(), detection)
            })
            .await?;
        info!(
            active = detection.active,
            snoozed = detection.snoozed,
            "Recorded detections"
        );

        if detection.needs_attention() && self.auto_show {
            self.present();
        }
        Ok(detection)
    }

    /// Dismiss one issue. Unknown identifiers are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn dismiss_issue(&mut self, issue_id: &str) -> Result<()> {
        let now = self.clock.now_ms();
        let lifecycle = self.lifecycle;
        let id = issue_id.to_string();
        let found = self
            .transact(
                move |state| match lifecycle.dismiss_issue(state, &id, now) {
                    Some(update) => (update, true),
                    None => (StateUpdate::default(), false),
                },
            )
            .await?;

        if found {
            info!(issue_id, "Dismissed issue");
        } else {
            debug!(issue_id, "No issue with that id");
        }
        Ok(())
    }

    /// Snooze an address and every issue recorded for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn dismiss_email(&mut self, email: &str) -> Result<()> {
        let now = self.clock.now_ms();
        let lifecycle = self.lifecycle;
        let address = email.to_string();
        self.transact(move |state| (lifecycle.dismiss_email(state, &address, now), ()))
            .await?;

        debug!(email, "Snoozed address");
        info!(
            until = now + self.lifecycle.window_ms(),
            "Snoozed address and its issues"
        );
        Ok(())
    }

    /// Remove every issue and snooze.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub async fn clear(&mut self) -> Result<()> {
        self.store.save(self.lifecycle.clear()).await?;
        info!("Cleared issue history");
        Ok(())
    }

    /// Reactivate lapsed issues and prune lapsed snoozes.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn reconcile(&mut self) -> Result<Reconciliation> {
        let now = self.clock.now_ms();
        let lifecycle = self.lifecycle;
        let result = self
            .transact(move |state| {
                let result = lifecycle.reconcile(state, now);
                (result.update.clone().unwrap_or_default(), result)
            })
            .await?;

        if result.update.is_some() {
            info!(
                reactivated = result.reactivated,
                pruned = result.pruned,
                "Reconciled expired snoozes"
            );
        }
        Ok(result)
    }

    /// Run `step` inside one store transaction and return what it computed
    /// alongside the update.
    async fn transact<T, F>(&self, step: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&StoreState) -> (StateUpdate, T) + Send + 'static,
    {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        self.store
            .modify(Box::new(move |state: &StoreState| {
                let (update, outcome) = step(state);
                // The receiver is held below until modify returns.
                let _ = outcome_tx.send(outcome);
                update
            }))
            .await?;
        outcome_rx
            .await
            .map_err(|_| Error::internal("store skipped the update step"))
    }

    fn present(&self) {
        if let Err(e) = self.presenter.show() {
            warn!(error = %e, "Could not show review surface");
        }
    }

    /// Run the coordinator on its own task.
    ///
    /// Reconciliation runs first, then queued actions are applied in arrival
    /// order until every handle is dropped.
    #[must_use]
    pub fn spawn(mut self, queue_capacity: usize) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let task = tokio::spawn(async move {
            self.run(rx).await;
        });
        (CoordinatorHandle { tx }, task)
    }

    async fn run(&mut self, mut rx: mpsc::Receiver<Envelope>) {
        if let Err(e) = self.reconcile().await {
            warn!(error = %e, "Startup reconciliation failed");
        }

        while let Some(Envelope { message, reply }) = rx.recv().await {
            let ack = self.handle(message).await;
            if reply.send(ack).is_err() {
                debug!("Caller went away before the acknowledgement");
            }
        }
        debug!("Coordinator queue closed");
    }
}

#[derive(Debug)]
struct Envelope {
    message: ActionMessage,
    reply: oneshot::Sender<Ack>,
}

/// Sends actions to a running coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Envelope>,
}

impl CoordinatorHandle {
    /// Queue an action and wait for its acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportClosed`] if the coordinator has stopped.
    pub async fn send(&self, message: ActionMessage) -> Result<Ack> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Envelope { message, reply })
            .await
            .map_err(|_| Error::transport_closed("coordinator is not running"))?;
        response
            .await
            .map_err(|_| Error::transport_closed("coordinator dropped the action"))
    }

    /// Check whether the coordinator has stopped.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::issue::{Issue, IssueState, DISMISS_DURATION_MS};
    use crate::storage::{MemoryStore, StoreState};

    struct Fixture {
        store: Arc<MemoryStore>,
        clock: ManualClock,
        presenter: Arc<CountingPresenter>,
        coordinator: Coordinator,
    }

    fn fixture_with(state: StoreState, presenter: CountingPresenter) -> Fixture {
        crate::logging::init_test_logging();
        let store = Arc::new(MemoryStore::with_state(state));
        let clock = ManualClock::new(1000);
        let presenter = Arc::new(presenter);
        let coordinator = Coordinator::new(store.clone())
            .with_clock(Arc::new(clock.clone()))
            .with_presenter(presenter.clone());
        Fixture {
            store,
            clock,
            presenter,
            coordinator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(StoreState::default(), CountingPresenter::new())
    }

    fn detected(emails: &[&str], timestamp: Option<i64>) -> ActionMessage {
        ActionMessage::EmailDetected {
            emails: emails.iter().map(ToString::to_string).collect(),
            timestamp,
        }
    }

    #[tokio::test]
    async fn test_detect_records_and_presents() {
        let mut f = fixture();

        let ack = f
            .coordinator
            .handle(detected(&["a@b.com"], Some(500)))
            .await;

        assert_eq!(ack, Ack::ok());
        let state = f.store.snapshot();
        assert_eq!(state.issues.len(), 1);
        assert_eq!(state.issues[0].timestamp, 500);
        assert_eq!(f.presenter.shown(), 1);
    }

    #[tokio::test]
    async fn test_detect_without_timestamp_uses_now() {
        let mut f = fixture();
        f.clock.set(4242);

        f.coordinator.handle(detected(&["a@b.com"], None)).await;
        assert_eq!(f.store.snapshot().issues[0].timestamp, 4242);
    }

    #[tokio::test]
    async fn test_empty_batch_writes_nothing() {
        let mut f = fixture();
        let ack = f.coordinator.handle(detected(&[], None)).await;

        assert!(ack.success);
        assert!(f.store.snapshot().issues.is_empty());
        assert_eq!(f.presenter.shown(), 0);
    }

    #[tokio::test]
    async fn test_snoozed_detection_does_not_present() {
        let mut state = StoreState::default();
        state.dismissed_emails.insert("x@y.com".to_string(), 5000);
        let mut f = fixture_with(state, CountingPresenter::new());

        f.coordinator
            .handle(detected(&["x@y.com"], Some(3000)))
            .await;

        assert_eq!(
            f.store.snapshot().issues[0].state(),
            IssueState::Snoozed { until: 5000 }
        );
        assert_eq!(f.presenter.shown(), 0);
    }

    #[tokio::test]
    async fn test_auto_show_disabled() {
        let mut config = Config::default();
        config.presentation.auto_show = false;
        let store = Arc::new(MemoryStore::new());
        let presenter = Arc::new(CountingPresenter::new());
        let mut coordinator =
            Coordinator::from_config(store.clone(), &config).with_presenter(presenter.clone());

        coordinator.handle(detected(&["a@b.com"], Some(1))).await;

        assert_eq!(store.snapshot().issues.len(), 1);
        assert_eq!(presenter.shown(), 0);
    }

    #[tokio::test]
    async fn test_presentation_failure_is_swallowed() {
        let mut f = fixture_with(StoreState::default(), CountingPresenter::failing());

        let ack = f.coordinator.handle(detected(&["a@b.com"], Some(1))).await;

        assert!(ack.success);
        assert_eq!(f.presenter.shown(), 1);
        assert_eq!(f.store.snapshot().issues.len(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_leaves_state_unchanged() {
        let mut state = StoreState::default();
        state.issues.push(Issue::new("a@b.com", 1));
        let mut f = fixture_with(state.clone(), CountingPresenter::new());
        f.store.set_fail_writes(true);
        let id = state.issues[0].id.clone();

        for message in [
            detected(&["c@d.com"], Some(2)),
            ActionMessage::DismissIssue { issue_id: id },
            ActionMessage::DismissEmail {
                email: "a@b.com".to_string(),
            },
            ActionMessage::ClearHistory,
        ] {
            let ack = f.coordinator.handle(message).await;
            assert!(!ack.success);
            assert!(ack.error.is_some());
        }

        assert_eq!(f.store.snapshot(), state);
        assert_eq!(f.presenter.shown(), 0);
    }

    #[tokio::test]
    async fn test_read_failure_is_reported() {
        let mut f = fixture();
        f.store.set_fail_reads(true);

        let ack = f.coordinator.handle(detected(&["a@b.com"], Some(1))).await;
        assert!(!ack.success);
        assert!(f.coordinator.reconcile().await.is_err());
        assert!(f.store.snapshot().issues.is_empty());
    }

    #[tokio::test]
    async fn test_dismiss_issue_uses_clock() {
        let mut f = fixture();
        f.coordinator.handle(detected(&["a@b.com"], Some(1))).await;
        let id = f.store.snapshot().issues[0].id.clone();

        f.clock.set(2000);
        let ack = f
            .coordinator
            .handle(ActionMessage::DismissIssue { issue_id: id })
            .await;

        assert!(ack.success);
        assert_eq!(
            f.store.snapshot().issues[0].dismissed_until,
            Some(2000 + DISMISS_DURATION_MS)
        );
    }

    #[tokio::test]
    async fn test_dismiss_unknown_issue_succeeds() {
        let mut f = fixture();
        let ack = f
            .coordinator
            .handle(ActionMessage::DismissIssue {
                issue_id: "nope".to_string(),
            })
            .await;
        assert!(ack.success);
    }

    #[tokio::test]
    async fn test_reconcile_after_window() {
        let mut f = fixture();
        f.coordinator.handle(detected(&["x@y.com"], Some(0))).await;
        f.clock.set(0);
        f.coordinator
            .handle(ActionMessage::DismissEmail {
                email: "x@y.com".to_string(),
            })
            .await;

        f.clock.set(DISMISS_DURATION_MS);
        let result = f.coordinator.reconcile().await.unwrap();
        assert_eq!((result.reactivated, result.pruned), (1, 1));

        let again = f.coordinator.reconcile().await.unwrap();
        assert!(again.update.is_none());
    }

    #[tokio::test]
    async fn test_spawned_coordinator_answers_in_order() {
        let f = fixture();
        let store = f.store.clone();
        let (handle, task) = f.coordinator.spawn(4);

        let first = handle.send(detected(&["a@b.com"], Some(1))).await.unwrap();
        let second = handle.send(detected(&["c@d.com"], Some(2))).await.unwrap();
        assert!(first.success && second.success);

        drop(handle);
        task.await.unwrap();

        let emails: Vec<String> = store
            .snapshot()
            .issues
            .into_iter()
            .map(|i| i.email)
            .collect();
        assert_eq!(emails, ["a@b.com", "c@d.com"]);
    }

    #[tokio::test]
    async fn test_concurrent_senders_do_not_lose_writes() {
        let f = fixture();
        let store = f.store.clone();
        let (handle, task) = f.coordinator.spawn(2);

        let mut sends = Vec::new();
        for i in 0..20 {
            let handle = handle.clone();
            sends.push(tokio::spawn(async move {
                let email = format!("user{i}@example.com");
                handle.send(detected(&[email.as_str()], Some(i))).await
            }));
        }
        for send in sends {
            assert!(send.await.unwrap().unwrap().success);
        }

        drop(handle);
        task.await.unwrap();
        assert_eq!(store.snapshot().issues.len(), 20);
    }

    #[tokio::test]
    async fn test_spawn_reconciles_first() {
        let mut state = StoreState::default();
        state.issues.push(Issue::snoozed("x@y.com", 1, 500));
        let f = fixture_with(state, CountingPresenter::new());
        let store = f.store.clone();

        let (handle, task) = f.coordinator.spawn(1);
        drop(handle);
        task.await.unwrap();

        assert!(store.snapshot().issues[0].is_active());
    }

    #[tokio::test]
    async fn test_send_after_stop_is_transport_closed() {
        let f = fixture();
        let (handle, task) = f.coordinator.spawn(1);
        task.abort();
        let _ = task.await;

        let err = handle.send(ActionMessage::ClearHistory).await.unwrap_err();
        assert!(err.is_transport_closed());
        assert!(handle.is_closed());
    }
}
