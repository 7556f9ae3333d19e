use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use newsroom_core::{FetchState, FetchStatus};
use newsroom_storage::LastRunStore;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{info, warn};

use crate::pipeline::{FetchOutcome, FetchPipeline, RunTicket};
use crate::status::{CancelSignal, StatusRegister};

/// Result of asking for a manual run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Started,
    /// A run is already live; its status is left alone.
    AlreadyRunning,
}

/// Owns the pipeline, its observers, and the persisted last-success time.
/// At most one run is live at a time.
pub struct FetchService {
    pipeline: FetchPipeline,
    last_run: LastRunStore,
    last_success: Mutex<Option<DateTime<Utc>>>,
    run_lock: Arc<AsyncMutex<()>>,
    min_interval: Duration,
}

impl FetchService {
    /// Reads the persisted last-success time; an unreadable file counts as never.
    pub async fn load(pipeline: FetchPipeline, last_run: LastRunStore, min_interval: Duration) -> Self {
        let last_success = match last_run.load().await {
            Ok(at) => at,
            Err(err) => {
                warn!(path = %last_run.path().display(), error = %format!("{err:#}"), "could not read last fetch time");
                None
            }
        };
        Self {
            pipeline,
            last_run,
            last_success: Mutex::new(last_success),
            run_lock: Arc::new(AsyncMutex::new(())),
            min_interval,
        }
    }

    pub fn status(&self) -> FetchStatus {
        self.pipeline.status().snapshot()
    }

    pub fn status_register(&self) -> Arc<StatusRegister> {
        Arc::clone(self.pipeline.status())
    }

    pub fn cancel_signal(&self) -> Arc<CancelSignal> {
        Arc::clone(self.pipeline.cancel_signal())
    }

    pub fn request_cancel(&self) {
        info!("fetch stop requested");
        self.pipeline.cancel_signal().request();
    }

    pub fn last_fetch_time(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Manual run in the background. Skips the interval check.
    ///
    /// At most one run is live at a time: a trigger that arrives mid-run is
    /// answered with `AlreadyRunning` and leaves the live run's status alone.
    /// Once the run finishes, the next trigger resets the status as usual.
    pub fn trigger(self: &Arc<Self>) -> TriggerOutcome {
        let Ok(guard) = Arc::clone(&self.run_lock).try_lock_owned() else {
            info!("fetch already running; ignoring trigger");
            return TriggerOutcome::AlreadyRunning;
        };
        let ticket = self.pipeline.prepare();
        let service = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = service.run_locked(guard, ticket).await {
                warn!(error = %format!("{err:#}"), "manual fetch failed");
            }
        });
        TriggerOutcome::Started
    }

    /// Manual run in the foreground.
    pub async fn run_now(&self) -> Result<FetchOutcome> {
        let guard = Arc::clone(&self.run_lock).lock_owned().await;
        let ticket = self.pipeline.prepare();
        self.run_locked(guard, ticket).await
    }

    /// Scheduler entry point: runs only when the minimum interval has passed
    /// since the last success. Returns `None` when skipped.
    pub async fn run_if_due(&self) -> Option<FetchOutcome> {
        if !self.is_due(Utc::now()) {
            info!("last fetch is recent; skipping scheduled run");
            return None;
        }
        let Ok(guard) = Arc::clone(&self.run_lock).try_lock_owned() else {
            info!("fetch already running; skipping scheduled run");
            return None;
        };
        info!("auto-fetch starting");
        let ticket = self.pipeline.prepare();
        match self.run_locked(guard, ticket).await {
            Ok(outcome) => {
                info!(state = %outcome.state, "auto-fetch finished");
                Some(outcome)
            }
            Err(err) => {
                warn!(error = %format!("{err:#}"), "scheduled fetch failed");
                None
            }
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        match self.last_fetch_time() {
            None => true,
            Some(last) => (now - last).to_std().map_or(false, |age| age >= self.min_interval),
        }
    }

    pub fn shutdown(&self) {
        self.request_cancel();
    }

    async fn run_locked(&self, _guard: OwnedMutexGuard<()>, ticket: RunTicket) -> Result<FetchOutcome> {
        let outcome = self.pipeline.run_prepared(ticket).await?;
        if outcome.state == FetchState::Done {
            self.record_success(Utc::now()).await;
        }
        Ok(outcome)
    }

    async fn record_success(&self, at: DateTime<Utc>) {
        *self.last_success.lock().unwrap_or_else(|p| p.into_inner()) = Some(at);
        if let Err(err) = self.last_run.save(at).await {
            warn!(path = %self.last_run.path().display(), error = %format!("{err:#}"), "could not write last fetch time");
        }
    }
}

impl std::fmt::Debug for FetchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchService")
            .field("last_run", &self.last_run)
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}
