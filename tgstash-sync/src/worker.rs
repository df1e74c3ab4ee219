//! Sync worker: login lifecycle, mode selection and reconnect supervision.
//!
//! ```text
//! LoggingIn ──► Syncing(polling | live) ──► Reconnecting ──► Syncing(…)
//!      └──────────────┴───── cancellation ─────┴──────────► Stopped
//! ```
//!
//! While syncing, wake sources (the polling timer, the push event stream and
//! the connection watch) are producers feeding one job queue. The worker is
//! its only consumer and finishes a job before taking the next, so passes,
//! events and cursor writes never overlap.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::dispatcher::LiveDispatcher;
use crate::errors::{RemoteError, SyncError};
use crate::fetcher::HistoryFetcher;
use crate::media::Materializer;
use crate::registry::{ChatRegistry, RefreshError};
use crate::remote::{Account, EventStream, Remote, RemoteEvent};
use crate::retry::{Backoff, RetryContext, RetryPolicy};
use crate::settings::{Settings, SettingsCredentials, SyncMode};

/// How often the connection watch asks the remote whether it is still up.
pub const CONNECTION_CHECK_INTERVAL: Duration = Duration::from_secs(1);

const JOB_QUEUE_DEPTH: usize = 64;

// ─── State ────────────────────────────────────────────────────────────────────

/// Observable state of the worker.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum State {
    LoggingIn,
    Syncing(SyncMode),
    Reconnecting(SyncMode),
    Stopped,
}

enum Job {
    Resync,
    Event(RemoteEvent),
    Disconnected,
}

enum Next {
    Reconnect,
    Stop,
}

// ─── SyncWorker ───────────────────────────────────────────────────────────────

/// The single background task mirroring one account.
pub struct SyncWorker {
    remote:     Arc<dyn Remote>,
    settings:   Settings,
    registry:   ChatRegistry,
    fetcher:    HistoryFetcher,
    dispatcher: LiveDispatcher,
    retry:      Arc<dyn RetryPolicy>,
    cancel:     CancellationToken,
    state:      watch::Sender<State>,
}

impl SyncWorker {
    pub fn new(
        remote:        Arc<dyn Remote>,
        settings:      Settings,
        registry:      ChatRegistry,
        download_root: impl Into<PathBuf>,
        cancel:        CancellationToken,
    ) -> Self {
        let materializer = Materializer::new(remote.clone(), download_root);
        let fetcher = HistoryFetcher::new(remote.clone(), materializer.clone());
        let dispatcher = LiveDispatcher::new(remote.clone(), registry.clone(), materializer);
        let (state, _) = watch::channel(State::LoggingIn);
        Self {
            remote,
            settings,
            registry,
            fetcher,
            dispatcher,
            retry: Arc::new(Backoff::default()),
            cancel,
            state,
        }
    }

    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.retry = policy;
        self
    }

    pub fn page_size(mut self, size: i32) -> Self {
        self.fetcher = self.fetcher.page_size(size);
        self
    }

    /// Subscribe to state transitions.
    pub fn watch_state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// Run until cancelled.
    ///
    /// Returns an error only when a login or reconnect attempt fails in a way
    /// the retry policy gives up on.
    pub async fn run(self) -> Result<(), SyncError> {
        tracing::info!("[tgstash] Starting sync worker …");
        let result = self.drive().await;
        self.enter(State::Stopped);
        match result {
            Ok(()) | Err(SyncError::Cancelled) => {
                tracing::info!("[tgstash] Sync worker stopped");
                Ok(())
            }
            Err(e) => {
                tracing::error!("[tgstash] Sync worker failed: {e}");
                Err(e)
            }
        }
    }

    async fn drive(&self) -> Result<(), SyncError> {
        self.enter(State::LoggingIn);
        tracing::info!("[tgstash] Performing login. Fill in the login settings if this hangs.");
        let account = self.login().await?;
        tracing::info!("[tgstash] Logged in as {} (id {})", account.display(), account.user_id);

        let mode = self.settings.mode();
        let mut reconnect = self.initial_pass(&account).await?;
        loop {
            if reconnect {
                self.enter(State::Reconnecting(mode));
                tracing::info!("[tgstash] Disconnected … performing reconnect");
                self.reconnect().await?;
                reconnect = self.initial_pass(&account).await?;
                continue;
            }

            self.enter(State::Syncing(mode));
            match self.sync(&account, mode).await {
                Next::Reconnect => reconnect = true,
                Next::Stop => return Ok(()),
            }
        }
    }

    fn enter(&self, state: State) {
        tracing::debug!("[tgstash] State → {state:?}");
        self.state.send_replace(state);
    }

    // ── Login / reconnect ──────────────────────────────────────────────────

    async fn login(&self) -> Result<Account, SyncError> {
        let credentials = SettingsCredentials::new(self.settings.clone(), self.cancel.clone());
        self.with_retry("login", || self.remote.login(&credentials)).await
    }

    async fn reconnect(&self) -> Result<(), SyncError> {
        self.with_retry("reconnect", || self.remote.reconnect()).await
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T, SyncError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, RemoteError>>,
    {
        let mut fail_count = 0u32;
        let mut slept_so_far = Duration::ZERO;
        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                result = attempt() => result,
            };
            let error = match result {
                Ok(value) => return Ok(value),
                Err(RemoteError::Cancelled) => return Err(SyncError::Cancelled),
                Err(e) => e,
            };

            fail_count += 1;
            let ctx = RetryContext {
                fail_count: NonZeroU32::new(fail_count).unwrap_or(NonZeroU32::MIN),
                slept_so_far,
                error: &error,
            };
            match self.retry.should_retry(&ctx) {
                ControlFlow::Continue(delay) => {
                    tracing::warn!("[tgstash] {what} failed ({error}), retrying in {delay:?}");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    slept_so_far += delay;
                }
                ControlFlow::Break(()) => return Err(error.into()),
            }
        }
    }

    // ── Passes ─────────────────────────────────────────────────────────────

    /// One full pass after login or reconnect. `Ok(true)` asks for a reconnect.
    async fn initial_pass(&self, account: &Account) -> Result<bool, SyncError> {
        match self.full_pass(account).await {
            Ok(()) => Ok(false),
            Err(SyncError::Cancelled) => Err(SyncError::Cancelled),
            Err(e) if e.is_disconnect() => Ok(true),
            Err(e) => {
                tracing::error!("[tgstash] Sync pass failed: {e}");
                Ok(false)
            }
        }
    }

    /// Refresh the chat list, then fetch every enabled chat.
    pub async fn full_pass(&self, account: &Account) -> Result<(), SyncError> {
        match self.registry.refresh(self.remote.as_ref(), account).await {
            Ok(summary) => tracing::debug!("[tgstash] Chat list refreshed: {summary:?}"),
            Err(RefreshError::Remote(e)) if e.is_disconnect() || matches!(e, RemoteError::Cancelled) => {
                return Err(e.into());
            }
            Err(e) => tracing::warn!("[tgstash] Chat refresh failed, using stored chats: {e}"),
        }
        let report = self.fetcher.run(&self.registry, &self.cancel).await?;
        tracing::info!(
            "[tgstash] Pass done: {} chat(s), {} skipped, {} failed",
            report.chats.len(), report.skipped, report.failed
        );
        Ok(())
    }

    // ── Syncing ────────────────────────────────────────────────────────────

    async fn sync(&self, account: &Account, mode: SyncMode) -> Next {
        let session = self.cancel.child_token();
        let _stop_producers = session.clone().drop_guard();
        let (tx, mut rx) = mpsc::channel(JOB_QUEUE_DEPTH);

        match mode {
            SyncMode::Polling { interval } => {
                tracing::info!("[tgstash] Polling every {interval:?}");
                tokio::spawn(run_timer(interval, tx.clone(), session.clone()));
            }
            SyncMode::Live => match self.remote.subscribe().await {
                Ok(events) => {
                    tracing::info!("[tgstash] Listening for live updates");
                    tokio::spawn(forward_events(events, tx.clone(), session.clone()));
                }
                Err(e) => {
                    tracing::warn!("[tgstash] Subscribing to updates failed: {e}");
                    return Next::Reconnect;
                }
            },
        }
        tokio::spawn(watch_connection(self.remote.clone(), tx, session));

        loop {
            let job = tokio::select! {
                _ = self.cancel.cancelled() => return Next::Stop,
                job = rx.recv() => job,
            };
            let result = match job {
                Some(Job::Resync) => {
                    tracing::info!("[tgstash] Performing timed update");
                    self.full_pass(account).await
                }
                Some(Job::Event(event)) => self.dispatcher.dispatch(event, account).await.map(|_| ()),
                Some(Job::Disconnected) | None => return Next::Reconnect,
            };
            match result {
                Ok(()) => {}
                Err(SyncError::Cancelled) => return Next::Stop,
                Err(e) if e.is_disconnect() => return Next::Reconnect,
                Err(e) => tracing::error!("[tgstash] {e}"),
            }
        }
    }
}

// ─── Producers ────────────────────────────────────────────────────────────────

async fn run_timer(period: Duration, tx: mpsc::Sender<Job>, stop: CancellationToken) {
    let mut timer = tokio::time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = timer.tick() => {}
        }
        // A pending resync already covers this tick.
        if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(Job::Resync) {
            return;
        }
    }
}

async fn forward_events(mut events: EventStream, tx: mpsc::Sender<Job>, stop: CancellationToken) {
    loop {
        let event = tokio::select! {
            _ = stop.cancelled() => return,
            event = events.next() => event,
        };
        let job = match event {
            Some(event) => Job::Event(event),
            None => Job::Disconnected,
        };
        let closed = matches!(job, Job::Disconnected);
        if tx.send(job).await.is_err() || closed {
            return;
        }
    }
}

async fn watch_connection(remote: Arc<dyn Remote>, tx: mpsc::Sender<Job>, stop: CancellationToken) {
    let mut check = tokio::time::interval(CONNECTION_CHECK_INTERVAL);
    check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = check.tick() => {}
        }
        if !remote.is_connected() {
            let _ = tx.send(Job::Disconnected).await;
            return;
        }
    }
}
