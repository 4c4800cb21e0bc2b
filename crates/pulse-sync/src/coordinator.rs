use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, info_span, warn, Instrument};

use pulse_settings::OverlapMode;

use crate::engine::{PassReport, SyncEngine};
use crate::error::SyncError;

/// Result of asking the coordinator for a pass.
#[derive(Debug)]
pub enum SyncOutcome {
    /// This request ran a pass to the end.
    Completed(PassReport),
    /// This request ran a pass and it aborted.
    Failed(SyncError),
    /// A pass was running; one follow-up pass will run after it.
    Coalesced,
    /// A pass was running and the request was dropped.
    Skipped,
}

impl SyncOutcome {
    /// Whether the caller's data is (or will be) handled: a clean pass, or a
    /// request folded into the follow-up pass.
    pub fn is_success(&self) -> bool {
        match self {
            Self::Completed(report) => report.is_clean(),
            Self::Coalesced => true,
            Self::Failed(_) | Self::Skipped => false,
        }
    }
}

#[derive(Default)]
struct PassState {
    running: bool,
    pending: bool,
}

/// Resets the state if the pass task unwinds or is torn down with the runtime.
struct PassGuard<'a> {
    state: &'a Mutex<PassState>,
    armed: bool,
}

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.state.lock();
            state.running = false;
            state.pending = false;
        }
    }
}

/// Serializes passes: at most one runs at a time.
///
/// In [`OverlapMode::Coalesce`] any number of requests that arrive while a
/// pass runs collapse into a single pending flag, and exactly one more pass
/// runs when the current one ends.
///
/// Passes run on a task owned by the coordinator. A caller that stops
/// waiting (timeout, `select!`) does not cancel the pass it started, nor the
/// follow-up it owes to coalesced requests.
pub struct SyncCoordinator {
    engine: SyncEngine,
    mode: OverlapMode,
    state: Mutex<PassState>,
    passes: AtomicU64,
}

impl SyncCoordinator {
    pub fn new(engine: SyncEngine, mode: OverlapMode) -> Self {
        Self {
            engine,
            mode,
            state: Mutex::new(PassState::default()),
            passes: AtomicU64::new(0),
        }
    }

    /// Number of passes started so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Run a pass now, or fold this request into the one already running.
    ///
    /// Returns the outcome of this caller's own pass; results of coalesced
    /// follow-up passes are only logged.
    pub async fn request(self: &Arc<Self>) -> SyncOutcome {
        {
            let mut state = self.state.lock();
            if state.running {
                return match self.mode {
                    OverlapMode::Coalesce => {
                        state.pending = true;
                        debug!("pass running, request coalesced");
                        SyncOutcome::Coalesced
                    }
                    OverlapMode::Skip => {
                        debug!("pass running, request skipped");
                        SyncOutcome::Skipped
                    }
                };
            }
            state.running = true;
        }

        let coordinator = Arc::clone(self);
        let driver = tokio::spawn(async move { coordinator.drive().await });
        match driver.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => {
                debug!(error = %e, "pass task cancelled");
                SyncOutcome::Skipped
            }
        }
    }

    /// Body of the pass task: the claimed pass, then follow-ups until no
    /// request is pending. `running` must already be set.
    async fn drive(&self) -> SyncOutcome {
        let mut guard = PassGuard {
            state: &self.state,
            armed: true,
        };

        let outcome = self.run_one().await;

        loop {
            {
                let mut state = self.state.lock();
                if !state.pending {
                    state.running = false;
                    guard.armed = false;
                    break;
                }
                state.pending = false;
            }
            debug!("running coalesced follow-up pass");
            let _ = self.run_one().await;
        }

        outcome
    }

    async fn run_one(&self) -> SyncOutcome {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        let span = info_span!("sync_pass", pass);
        match self.engine.run_pass().instrument(span.clone()).await {
            Ok(report) => {
                let _enter = span.enter();
                info!(
                    streams = report.streams_synced,
                    points = report.points_sent,
                    duplicates = report.duplicates_skipped,
                    failed_streams = report.failures.len(),
                    "sync pass finished"
                );
                SyncOutcome::Completed(report)
            }
            Err(e) => {
                let _enter = span.enter();
                match &e {
                    SyncError::Remote { .. } => {
                        warn!(error_kind = e.error_kind(), error = %e, "sync pass aborted, retrying next time")
                    }
                    SyncError::Config(_) | SyncError::Store(_) => {
                        error!(error_kind = e.error_kind(), error = %e, "sync pass failed")
                    }
                }
                SyncOutcome::Failed(e)
            }
        }
    }
}
