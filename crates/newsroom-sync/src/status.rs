use std::sync::Mutex;

use chrono::Utc;
use newsroom_core::{FetchState, FetchStatus};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Fields to merge into the live status. `None` leaves a field untouched.
#[derive(Debug, Clone, Default)]
pub struct StatusUpdate {
    pub state: Option<FetchState>,
    pub message: Option<String>,
    pub total: Option<usize>,
    pub processed: Option<usize>,
}

impl StatusUpdate {
    pub fn state(state: FetchState, message: impl Into<String>) -> Self {
        Self {
            state: Some(state),
            message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Process-wide snapshot of the current run. Only the latest state is kept.
#[derive(Debug, Default)]
pub struct StatusRegister {
    inner: Mutex<FetchStatus>,
}

impl StatusRegister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> FetchStatus {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Replace everything with a fresh `starting` status for `run_id`.
    pub fn reset(&self, run_id: Uuid, message: impl Into<String>) {
        let mut status = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *status = FetchStatus {
            run_id: Some(run_id),
            state: FetchState::Starting,
            message: message.into(),
            total: 0,
            processed: 0,
            started_at: Some(Utc::now()),
            finished_at: None,
        };
    }

    /// Apply `update` atomically. An update whose state change would move the
    /// run backwards is dropped whole; `processed` never shrinks and never
    /// overruns `total`. Terminal states stamp `finished_at`.
    pub fn merge(&self, update: StatusUpdate) {
        let mut status = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(next) = update.state {
            if !status.state.can_advance_to(next) {
                debug!(from = %status.state, to = %next, "ignoring out-of-order status update");
                return;
            }
            status.state = next;
            if next.is_terminal() {
                status.finished_at = Some(Utc::now());
            }
        }
        if let Some(message) = update.message {
            status.message = message;
        }
        if let Some(total) = update.total {
            status.total = total;
        }
        if let Some(processed) = update.processed {
            status.processed = processed.min(status.total).max(status.processed);
        }
    }
}

/// Cooperative stop flag for the live run. Each run gets a fresh token.
#[derive(Debug, Default)]
pub struct CancelSignal {
    token: Mutex<CancellationToken>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears any earlier request and hands out the token for a new run.
    pub fn reset(&self) -> CancellationToken {
        let mut token = self.token.lock().unwrap_or_else(|p| p.into_inner());
        *token = CancellationToken::new();
        token.clone()
    }

    pub fn request(&self) {
        self.token.lock().unwrap_or_else(|p| p.into_inner()).cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.token
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .is_cancelled()
    }
}
