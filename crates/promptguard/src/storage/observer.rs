//! Change subscriptions on the store.
//!
//! Observers are called after every successful write with the complete new
//! state. Delivery is independent of whichever action caused the write.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::trace;

use super::StoreState;

type Callback = Arc<dyn Fn(&StoreState) + Send + Sync>;

#[derive(Default)]
struct ObserverTable {
    next_id: u64,
    entries: Vec<(u64, Callback)>,
}

/// The set of callbacks registered on a store.
#[derive(Clone, Default)]
pub struct Observers {
    table: Arc<Mutex<ObserverTable>>,
}

impl Observers {
    /// Create an empty observer set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StoreState) + Send + Sync + 'static,
    {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let id = table.next_id;
        table.next_id += 1;
        table.entries.push((id, Arc::new(callback)));
        trace!(observer = id, "Observer subscribed");

        Subscription {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Call every registered callback with `state`.
    ///
    /// Callbacks run outside the table lock, so they may unsubscribe.
    pub fn notify(&self, state: &StoreState) {
        let callbacks: Vec<Callback> = {
            let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.entries.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in callbacks {
            callback(state);
        }
    }

    /// Number of registered callbacks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Check if nothing is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("count", &self.len())
            .finish()
    }
}

/// Handle returned by a subscription.
///
/// Dropping the handle leaves the callback registered; call
/// [`Subscription::unsubscribe`] to remove it.
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    table: Weak<Mutex<ObserverTable>>,
}

impl Subscription {
    /// Remove the callback. A no-op if the store is gone.
    pub fn unsubscribe(self) {
        if let Some(table) = self.table.upgrade() {
            let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
            table.entries.retain(|(id, _)| *id != self.id);
            trace!(observer = self.id, "Observer unsubscribed");
        }
    }
}
