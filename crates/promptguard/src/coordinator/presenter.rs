//! Requests to bring the review surface to the user's attention.
//!
//! Presentation is best-effort. The environment may not allow it, so callers
//! log failures and carry on.

use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::process::Command;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use crate::config::PresentationConfig;
use crate::error::{Error, Result};

/// Something that can ask for the review surface to be shown.
pub trait SurfacePresenter: Send + Sync + fmt::Debug {
    /// Request that the surface be shown.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Presentation`] if the request could not be made.
    fn show(&self) -> Result<()>;
}

/// Writes a log line pointing the user at the issue list.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPresenter;

impl SurfacePresenter for LogPresenter {
    fn show(&self) -> Result<()> {
        info!("New email detections need review; run `promptguard issues --active`");
        Ok(())
    }
}

/// Launches an external program, such as a desktop notifier.
///
/// `show` returns once the program has started. A background task waits for
/// it to exit, so finished programs are reaped and their failures logged.
/// Must be called from within a tokio runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPresenter {
    program: String,
    args: Vec<String>,
}

impl CommandPresenter {
    /// Create a presenter for `program` with `args`.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl SurfacePresenter for CommandPresenter {
    fn show(&self) -> Result<()> {
        let runtime = Handle::try_current()
            .map_err(|e| Error::presentation(format!("{}: {e}", self.program)))?;

        debug!(program = %self.program, "Launching presenter");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| Error::presentation(format!("{}: {e}", self.program)))?;

        let program = self.program.clone();
        runtime.spawn(async move {
            match child.wait().await {
                Ok(status) if status.success() => debug!(%program, "Presenter exited"),
                Ok(status) => warn!(%program, %status, "Presenter exited with failure"),
                Err(e) => warn!(%program, error = %e, "Could not wait for presenter"),
            }
        });
        Ok(())
    }
}

/// Build the presenter described by the configuration.
#[must_use]
pub fn from_config(config: &PresentationConfig) -> Box<dyn SurfacePresenter> {
    match config.command.split_first() {
        Some((program, args)) => Box::new(CommandPresenter::new(program.clone(), args.to_vec())),
        None => Box::new(LogPresenter),
    }
}

/// Counts show requests. Optionally fails every one.
#[derive(Debug, Default)]
pub struct CountingPresenter {
    shown: AtomicUsize,
    fail: bool,
}

impl CountingPresenter {
    /// A presenter that always succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A presenter whose every request fails.
    #[must_use]
    pub fn failing() -> Self {
        Self {
            shown: AtomicUsize::new(0),
            fail: true,
        }
    }

    /// Number of requests made so far, including failed ones.
    #[must_use]
    pub fn shown(&self) -> usize {
        self.shown.load(Ordering::SeqCst)
    }
}

impl SurfacePresenter for CountingPresenter {
    fn show(&self) -> Result<()> {
        self.shown.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::presentation("surface not available"));
        }
        Ok(())
    }
}
