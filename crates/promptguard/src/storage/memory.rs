//! In-memory state store.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::debug;

use super::{Observers, StateStore, StateUpdate, StoreState, Subscription, Transform};
use crate::error::{Error, Result};

/// A [`StateStore`] held in process memory.
///
/// Reads and writes can be made to fail on demand, which is how the
/// coordinator's no-partial-write guarantee is exercised in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
    observers: Observers,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `state`.
    #[must_use]
    pub fn with_state(state: StoreState) -> Self {
        Self {
            state: Mutex::new(state),
            ..Self::default()
        }
    }

    /// Make subsequent reads fail (or succeed again).
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent writes fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// A copy of the current state, bypassing failure injection.
    #[must_use]
    pub fn snapshot(&self) -> StoreState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn commit(&self, reads: bool, transform: Transform) -> Result<()> {
        let snapshot = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            if reads && self.fail_reads.load(Ordering::SeqCst) {
                return Err(Error::Io(io::Error::other("simulated read failure")));
            }
            let update = transform(&*state);
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::Io(io::Error::other("simulated write failure")));
            }
            if update.is_empty() {
                return Ok(());
            }
            update.apply_to(&mut state);
            state.clone()
        };
        debug!(issues = snapshot.issues.len(), "State saved to memory");
        self.observers.notify(&snapshot);
        Ok(())
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self) -> Result<StoreState> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Io(io::Error::other("simulated read failure")));
        }
        Ok(self.snapshot())
    }

    async fn save(&self, update: StateUpdate) -> Result<()> {
        self.commit(false, Box::new(move |_: &StoreState| update))
    }

    async fn modify(&self, transform: Transform) -> Result<()> {
        self.commit(true, transform)
    }

    fn subscribe(&self, observer: Box<dyn Fn(&StoreState) + Send + Sync>) -> Subscription {
        self.observers.subscribe(observer)
    }
}
