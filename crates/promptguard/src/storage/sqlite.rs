//! `SQLite`-backed state store.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::schema::{SELECT_STATE, UPSERT_STATE};
use super::{
    migrations, Observers, StateStore, StateUpdate, StoreState, Subscription, Transform,
    DISMISSED_EMAILS_KEY, ISSUES_KEY,
};
use crate::error::{Error, Result};
use crate::issue::{Issue, SnoozeRegistry};

/// How long a writer waits for another connection's lock, in milliseconds.
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Persistent store for issues and the snooze registry.
///
/// Each key is one row holding its JSON encoding. Every write runs in a
/// `BEGIN IMMEDIATE` transaction that also reads the current state, so
/// several stores opened on one file (in one process or many) serialize
/// their read-modify-write cycles instead of overwriting each other.
///
/// Database calls run on the blocking thread pool.
#[derive(Debug)]
pub struct SqliteStore {
    /// Path to the database file.
    path: PathBuf,
    /// Database connection.
    conn: Arc<Mutex<Connection>>,
    observers: Observers,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    ///
    /// Creates the parent directories and database file if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or schema initialization fails.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening database at {}", path.display());
        let conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;

        conn.execute_batch(&format!(
            "PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA busy_timeout={BUSY_TIMEOUT_MS};"
        ))?;
        migrations::initialize_schema(&conn)?;

        info!("Database opened successfully at {}", path.display());
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
            observers: Observers::new(),
        })
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;

        migrations::initialize_schema(&conn)?;

        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Arc::new(Mutex::new(conn)),
            observers: Observers::new(),
        })
    }

    /// Get the path to the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` against the connection on the blocking thread pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut conn)
        })
        .await
        .map_err(|e| Error::internal(format!("database task failed: {e}")))?
    }

    fn read_state(conn: &Connection) -> Result<StoreState> {
        let issues: Vec<Issue> = Self::read_key(conn, ISSUES_KEY)?.unwrap_or_default();
        let dismissed_emails: SnoozeRegistry =
            Self::read_key(conn, DISMISSED_EMAILS_KEY)?.unwrap_or_default();
        Ok(StoreState {
            issues,
            dismissed_emails,
        })
    }

    fn read_key<T: DeserializeOwned>(conn: &Connection, key: &'static str) -> Result<Option<T>> {
        let raw: Option<String> = conn
            .query_row(SELECT_STATE, [key], |row| row.get(0))
            .optional()?;
        raw.map(|value| {
            serde_json::from_str(&value).map_err(|e| Error::corrupt_state(key, e.to_string()))
        })
        .transpose()
    }

    fn write_keys(conn: &Connection, update: &StateUpdate) -> Result<()> {
        if let Some(issues) = &update.issues {
            conn.execute(UPSERT_STATE, (ISSUES_KEY, serde_json::to_string(issues)?))?;
        }
        if let Some(dismissed_emails) = &update.dismissed_emails {
            conn.execute(
                UPSERT_STATE,
                (
                    DISMISSED_EMAILS_KEY,
                    serde_json::to_string(dismissed_emails)?,
                ),
            )?;
        }
        Ok(())
    }

    /// Read, transform and write under one immediate transaction.
    ///
    /// Returns the state after the write, or `None` if the update was empty.
    /// The snapshot is built before commit, so an `Err` always means nothing
    /// was written.
    fn commit(conn: &mut Connection, transform: Transform) -> Result<Option<StoreState>> {
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut state = Self::read_state(&tx)?;
        let update = transform(&state);
        if update.is_empty() {
            return Ok(None);
        }

        Self::write_keys(&tx, &update)?;
        update.apply_to(&mut state);
        tx.commit()?;
        Ok(Some(state))
    }

    /// Get storage statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the state cannot be read.
    pub fn stats(&self) -> Result<StorageStats> {
        let state = Self::read_state(&self.lock())?;

        let db_size_bytes = if self.path.to_string_lossy() == ":memory:" {
            0
        } else {
            std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0)
        };

        Ok(StorageStats {
            total_issues: state.issues.len(),
            active_issues: state.issues.iter().filter(|i| i.is_active()).count(),
            snoozed_emails: state.dismissed_emails.len(),
            oldest_issue: state.issues.iter().map(|i| i.timestamp).min(),
            newest_issue: state.issues.iter().map(|i| i.timestamp).max(),
            db_size_bytes,
        })
    }
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load(&self) -> Result<StoreState> {
        self.with_conn(|conn| Self::read_state(conn)).await
    }

    async fn save(&self, update: StateUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.modify(Box::new(move |_: &StoreState| update)).await
    }

    async fn modify(&self, transform: Transform) -> Result<()> {
        let Some(snapshot) = self
            .with_conn(move |conn| Self::commit(conn, transform))
            .await?
        else {
            return Ok(());
        };
        debug!(
            issues = snapshot.issues.len(),
            snoozed = snapshot.dismissed_emails.len(),
            "State saved"
        );
        self.observers.notify(&snapshot);
        Ok(())
    }

    fn subscribe(&self, observer: Box<dyn Fn(&StoreState) + Send + Sync>) -> Subscription {
        self.observers.subscribe(observer)
    }
}

/// Statistics about the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageStats {
    /// Total number of issues.
    pub total_issues: usize,
    /// Issues not dismissed.
    pub active_issues: usize,
    /// Entries in the snooze registry, including lapsed ones not yet pruned.
    pub snoozed_emails: usize,
    /// Timestamp of the oldest issue.
    pub oldest_issue: Option<i64>,
    /// Timestamp of the newest issue.
    pub newest_issue: Option<i64>,
    /// Size of the database file in bytes.
    pub db_size_bytes: u64,
}
