//! Unread-count polling and notification feed.
//!
//! [`NotificationPoller`] owns at most one background task per process. The
//! task re-fetches the unread count on a fixed interval while the session
//! holds tokens, and exits on cancellation or when the session ends.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hamro_core::notification::{badge_label, Notification, UnreadCount};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::ClientResult;
use crate::http::AuthorizingClient;

/// How long [`NotificationPoller::stop`] waits for the task before aborting it.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Latest known notification state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationSnapshot {
    pub unread_count: u64,
    pub feed: Vec<Notification>,
}

impl NotificationSnapshot {
    pub fn badge_label(&self) -> Option<String> {
        badge_label(self.unread_count)
    }
}

#[derive(Serialize)]
struct FeedQuery {
    limit: u32,
}

struct PollTask {
    generation: u64,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct PollerInner {
    api: AuthorizingClient,
    interval: Duration,
    feed_limit: u32,
    snapshot_tx: watch::Sender<NotificationSnapshot>,
    task: Mutex<Option<PollTask>>,
    generations: AtomicU64,
}

#[derive(Clone)]
pub struct NotificationPoller {
    inner: Arc<PollerInner>,
}

/// Handle to a running poll task.
#[derive(Clone)]
pub struct PollerHandle {
    poller: NotificationPoller,
    generation: u64,
    cancel: CancellationToken,
}

impl PollerHandle {
    /// Identifies the task; handles from repeated `start` calls on a running
    /// poller share it.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Same as [`NotificationPoller::stop`].
    pub async fn stop(&self) {
        self.poller.stop().await;
    }
}

impl NotificationPoller {
    pub fn new(api: AuthorizingClient) -> Self {
        let config = api.session().config();
        let interval = config.poll_interval;
        let feed_limit = config.feed_limit;
        let (snapshot_tx, _) = watch::channel(NotificationSnapshot::default());

        Self {
            inner: Arc::new(PollerInner {
                api,
                interval,
                feed_limit,
                snapshot_tx,
                task: Mutex::new(None),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn snapshot(&self) -> NotificationSnapshot {
        self.inner.snapshot_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<NotificationSnapshot> {
        self.inner.snapshot_tx.subscribe()
    }

    pub fn badge_label(&self) -> Option<String> {
        self.inner.snapshot_tx.borrow().badge_label()
    }

    // ---- lifecycle ----

    /// Start polling. A poller that is already running keeps its task and
    /// returns a handle to it.
    pub async fn start(&self) -> PollerHandle {
        let mut task = self.inner.task.lock().await;

        if let Some(running) = task.as_ref() {
            if !running.handle.is_finished() && !running.cancel.is_cancelled() {
                return self.handle_for(running);
            }
        }

        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(self.clone().run(cancel.clone()));
        tracing::info!(
            generation,
            interval_secs = self.inner.interval.as_secs_f64(),
            "Notification poller started",
        );

        let started = PollTask {
            generation,
            cancel,
            handle,
        };
        let poller_handle = self.handle_for(&started);
        *task = Some(started);
        poller_handle
    }

    /// Cancel the poll task and wait for it to exit. No backend call is made
    /// by the task after this returns. Calling it when stopped is a no-op.
    pub async fn stop(&self) {
        let Some(task) = self.inner.task.lock().await.take() else {
            return;
        };

        task.cancel.cancel();
        let abort = task.handle.abort_handle();
        if tokio::time::timeout(STOP_TIMEOUT, task.handle).await.is_err() {
            tracing::warn!(generation = task.generation, "Poll task did not stop in time; aborting");
            abort.abort();
        }
        tracing::info!(generation = task.generation, "Notification poller stopped");
    }

    fn handle_for(&self, task: &PollTask) -> PollerHandle {
        PollerHandle {
            poller: self.clone(),
            generation: task.generation,
            cancel: task.cancel.clone(),
        }
    }

    async fn run(self, cancel: CancellationToken) {
        let session = self.inner.api.session().clone();
        let mut session_rx = session.subscribe();
        let mut interval = tokio::time::interval(self.inner.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = session_rx.changed() => {
                    if changed.is_err() || !session_rx.borrow().has_tokens() {
                        tracing::info!("Session ended; notification poller exiting");
                        cancel.cancel();
                        break;
                    }
                }
                _ = interval.tick() => {
                    if cancel.is_cancelled() || !session.is_authenticated() {
                        continue;
                    }
                    if let Err(e) = self.refresh_count().await {
                        tracing::warn!(error = %e, "Unread count poll failed");
                    }
                }
            }
        }
    }

    // ---- fetches ----

    /// Fetch the unread count and publish it.
    pub async fn refresh_count(&self) -> ClientResult<u64> {
        let UnreadCount { count } = self
            .inner
            .api
            .get_json("/notifications/unread-count")
            .await?;
        self.inner.snapshot_tx.send_modify(|s| s.unread_count = count);
        Ok(count)
    }

    /// Fetch the feed (bounded by the configured limit) and publish it.
    pub async fn refresh_feed(&self) -> ClientResult<Vec<Notification>> {
        let feed: Vec<Notification> = self
            .inner
            .api
            .get_json_with_query(
                "/notifications",
                &FeedQuery {
                    limit: self.inner.feed_limit,
                },
            )
            .await?;
        self.inner.snapshot_tx.send_modify(|s| s.feed = feed.clone());
        Ok(feed)
    }

    /// Fetch feed and count for a newly opened feed view.
    pub async fn open_feed(&self) -> ClientResult<NotificationSnapshot> {
        self.refresh_feed().await?;
        self.refresh_count().await?;
        Ok(self.snapshot())
    }

    // ---- mutations ----

    /// Mark one notification read. An unknown id counts as already read.
    pub async fn mark_read(&self, notification_id: &str) -> ClientResult<()> {
        let result = self
            .inner
            .api
            .put_empty(&format!("/notifications/{notification_id}/read"))
            .await;
        ignore_not_found(result)?;
        self.refetch_after_mutation().await;
        Ok(())
    }

    pub async fn mark_all_read(&self) -> ClientResult<()> {
        self.inner
            .api
            .put_empty("/notifications/mark-all-read")
            .await?;
        self.refetch_after_mutation().await;
        Ok(())
    }

    /// Delete one notification. An unknown id counts as already deleted.
    pub async fn delete(&self, notification_id: &str) -> ClientResult<()> {
        let result = self
            .inner
            .api
            .delete(&format!("/notifications/{notification_id}"))
            .await;
        ignore_not_found(result)?;
        self.refetch_after_mutation().await;
        Ok(())
    }

    async fn refetch_after_mutation(&self) {
        if let Err(e) = self.refresh_count().await {
            tracing::warn!(error = %e, "Unread count refetch failed");
        }
        if let Err(e) = self.refresh_feed().await {
            tracing::warn!(error = %e, "Notification feed refetch failed");
        }
    }
}

fn ignore_not_found(result: ClientResult<()>) -> ClientResult<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        other => other,
    }
}
