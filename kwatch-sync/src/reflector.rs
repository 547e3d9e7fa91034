//! The reflector: keeps a [`Store`] equal to the remote collection and
//! emits one [`ChangeEvent`] per observed difference.
//!
//! Each phase of the state machine is its own method returning the next
//! [`SyncState`]; [`Reflector::run`] just loops over them until `Stopped`.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use kwatch_core::{ChangeEvent, ObjectRecord, Store, VersionToken};

use crate::backoff::{Backoff, BackoffPolicy};
use crate::error::{SourceError, SyncError};
use crate::queue::DeltaProducer;
use crate::source::{Query, RemoteSource, WatchFrame};

// ---------------------------------------------------------------------------
// 1. Configuration and observable state
// ---------------------------------------------------------------------------

fn default_fail_fast() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectorConfig {
    /// Periodic full re-list while healthy. Zero disables it.
    #[serde(default)]
    pub resync_secs: u64,

    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Treat any failure of the very first list as fatal.
    #[serde(default = "default_fail_fast")]
    pub fail_fast: bool,
}

impl Default for ReflectorConfig {
    fn default() -> Self {
        Self {
            resync_secs: 0,
            backoff: BackoffPolicy::default(),
            fail_fast: default_fail_fast(),
        }
    }
}

impl ReflectorConfig {
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_secs > 0).then(|| Duration::from_secs(self.resync_secs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    Idle,
    Listing,
    Watching,
    Resyncing,
    Stopped,
}

/// Point-in-time view published on every state change and every list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReflectorStatus {
    pub state: SyncState,
    pub resume_token: VersionToken,
    pub objects: usize,
    pub lists: u64,
    pub last_list_at: Option<DateTime<Utc>>,
}

impl Default for ReflectorStatus {
    fn default() -> Self {
        Self {
            state: SyncState::Idle,
            resume_token: VersionToken::default(),
            objects: 0,
            lists: 0,
            last_list_at: None,
        }
    }
}

/// Counters returned by [`Reflector::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReflectorStats {
    /// Successful lists, resyncs included.
    pub lists: u64,
    pub resyncs: u64,
    pub watches_opened: u64,
    pub watch_failures: u64,
    pub expirations: u64,
    pub events_emitted: u64,
}

// ---------------------------------------------------------------------------
// 2. Reflector
// ---------------------------------------------------------------------------

pub struct Reflector {
    source: Arc<dyn RemoteSource>,
    query: Query,
    store: Store,
    queue: DeltaProducer,
    config: ReflectorConfig,
    cancel: CancellationToken,
    status: watch::Sender<ReflectorStatus>,

    state: SyncState,
    token: VersionToken,
    backoff: Backoff,
    resume_failures: u32,
    listed_once: bool,
    last_list_at: Option<DateTime<Utc>>,
    next_resync: Option<Instant>,
    stats: ReflectorStats,
}

impl Reflector {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        query: Query,
        store: Store,
        queue: DeltaProducer,
        config: ReflectorConfig,
        cancel: CancellationToken,
    ) -> Self {
        let (status, _) = watch::channel(ReflectorStatus::default());
        let backoff = Backoff::new(config.backoff);
        Self {
            source,
            query,
            store,
            queue,
            config,
            cancel,
            status,
            state: SyncState::Idle,
            token: VersionToken::default(),
            backoff,
            resume_failures: 0,
            listed_once: false,
            last_list_at: None,
            next_resync: None,
            stats: ReflectorStats::default(),
        }
    }

    /// Subscribe to status updates.
    pub fn status(&self) -> watch::Receiver<ReflectorStatus> {
        self.status.subscribe()
    }

    pub fn state(&self) -> SyncState {
        self.state
    }

    /// Drive the state machine until cancelled or a fatal error.
    ///
    /// The queue is closed on every exit path, after all events accepted so
    /// far have been pushed.
    pub async fn run(mut self) -> Result<ReflectorStats, SyncError> {
        info!(collection = %self.query, "reflector starting");
        self.transition(SyncState::Listing);

        let outcome = loop {
            let next = match self.state {
                SyncState::Idle | SyncState::Listing => self.list(false).await,
                SyncState::Resyncing => self.list(true).await,
                SyncState::Watching => self.watch().await,
                SyncState::Stopped => break Ok(()),
            };
            match next {
                Ok(state) => self.transition(state),
                Err(err) => break Err(err),
            }
        };

        self.queue.close();
        self.transition(SyncState::Stopped);
        match outcome {
            Ok(()) => {
                info!(
                    lists = self.stats.lists,
                    watches = self.stats.watches_opened,
                    events = self.stats.events_emitted,
                    "reflector stopped"
                );
                Ok(self.stats)
            }
            Err(err) => Err(err),
        }
    }

    // -----------------------------------------------------------------------
    // 2a. Listing / Resyncing
    // -----------------------------------------------------------------------

    async fn list(&mut self, resync: bool) -> Result<SyncState, SyncError> {
        let listed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(SyncState::Stopped),
            listed = self.source.list(&self.query) => listed,
        };

        let page = match listed {
            Ok(page) => page,
            Err(err) if !self.listed_once && (self.config.fail_fast || err.is_fatal()) => {
                return Err(SyncError::Startup {
                    collection: self.query.to_string(),
                    source: err,
                });
            }
            Err(err) if resync => {
                warn!(error = %err, "resync failed; continuing to watch");
                self.schedule_resync();
                return Ok(SyncState::Watching);
            }
            Err(err) => {
                let delay = self.backoff.next_delay();
                warn!(
                    error = %err,
                    attempt = self.backoff.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "list failed; retrying"
                );
                return Ok(if self.pause(delay).await {
                    SyncState::Listing
                } else {
                    SyncState::Stopped
                });
            }
        };

        let count = page.objects.len();
        self.rebuild(page.objects).await?;
        self.token = page.resume_token;
        self.listed_once = true;
        self.resume_failures = 0;
        self.backoff.reset();
        self.stats.lists += 1;
        if resync {
            self.stats.resyncs += 1;
        }
        self.last_list_at = Some(Utc::now());
        self.schedule_resync();
        info!(objects = count, token = %self.token, resync, "collection listed");
        Ok(SyncState::Watching)
    }

    /// Diff a full listing against the store and emit the differences.
    async fn rebuild(&mut self, objects: Vec<ObjectRecord>) -> Result<(), SyncError> {
        let mut seen = HashSet::with_capacity(objects.len());
        for record in objects {
            let key = record.key().clone();
            seen.insert(key.clone());
            match self.store.upsert(key, record.clone()) {
                None => self.emit(ChangeEvent::Added(record)).await?,
                Some(prior) if prior == record => {}
                Some(prior) => {
                    check_recency(&prior, &record);
                    self.emit(ChangeEvent::Modified { old: prior, new: record }).await?;
                }
            }
        }

        for key in self.store.keys() {
            if seen.contains(&key) {
                continue;
            }
            if let Some(gone) = self.store.remove(&key) {
                debug!(key = %key, "object vanished between lists");
                self.emit(ChangeEvent::Deleted(gone)).await?;
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // 2b. Watching
    // -----------------------------------------------------------------------

    async fn watch(&mut self) -> Result<SyncState, SyncError> {
        let opened = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Ok(SyncState::Stopped),
            opened = self.source.watch(&self.query, &self.token) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => {
                self.stats.watches_opened += 1;
                debug!(token = %self.token, "watch opened");
                stream
            }
            Err(err) if err.is_expired() => return Ok(self.expired(&err)),
            Err(err) => return self.watch_failed(err).await,
        };

        let mut delivered = false;
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(SyncState::Stopped),
                _ = resync_due(self.next_resync) => {
                    debug!("periodic resync due");
                    return Ok(SyncState::Resyncing);
                }
                frame = stream.next() => frame,
            };

            match frame {
                Some(Ok(frame)) => {
                    if !delivered {
                        delivered = true;
                        self.resume_failures = 0;
                        self.backoff.reset();
                    }
                    self.apply(frame).await?;
                }
                Some(Err(err)) if err.is_expired() => return Ok(self.expired(&err)),
                Some(Err(err)) => return self.watch_failed(err).await,
                None => {
                    debug!(token = %self.token, "watch stream ended");
                    return self
                        .watch_failed(SourceError::Transport("watch stream closed".into()))
                        .await;
                }
            }
        }
    }

    async fn apply(&mut self, frame: WatchFrame) -> Result<(), SyncError> {
        match frame {
            WatchFrame::Bookmark(token) => {
                self.advance(&token);
            }
            WatchFrame::Added(record) => {
                self.advance(record.version());
                match self.store.upsert(record.key().clone(), record.clone()) {
                    None => self.emit(ChangeEvent::Added(record)).await?,
                    Some(prior) if prior == record => {
                        debug!(key = %record.key(), "duplicate add ignored");
                    }
                    Some(prior) => {
                        check_recency(&prior, &record);
                        self.emit(ChangeEvent::Modified { old: prior, new: record }).await?;
                    }
                }
            }
            WatchFrame::Modified(record) => {
                self.advance(record.version());
                match self.store.upsert(record.key().clone(), record.clone()) {
                    Some(prior) => {
                        check_recency(&prior, &record);
                        self.emit(ChangeEvent::Modified { old: prior, new: record }).await?;
                    }
                    None => {
                        warn!(key = %record.key(), "update for unknown object; emitting add");
                        self.emit(ChangeEvent::Added(record)).await?;
                    }
                }
            }
            WatchFrame::Deleted(record) => {
                self.advance(record.version());
                if self.store.remove(record.key()).is_none() {
                    warn!(key = %record.key(), "delete for unknown object");
                }
                self.emit(ChangeEvent::Deleted(record)).await?;
            }
        }
        Ok(())
    }

    fn expired(&mut self, err: &SourceError) -> SyncState {
        self.stats.expirations += 1;
        info!(error = %err, "resume token expired; relisting");
        SyncState::Listing
    }

    async fn watch_failed(&mut self, err: SourceError) -> Result<SyncState, SyncError> {
        self.stats.watch_failures += 1;
        self.resume_failures += 1;

        if self.resume_failures >= self.config.backoff.max_resume_attempts {
            warn!(
                error = %err,
                attempts = self.resume_failures,
                token = %self.token,
                "watch keeps failing; relisting"
            );
            self.resume_failures = 0;
            return Ok(SyncState::Listing);
        }

        let delay = self.backoff.next_delay();
        warn!(
            error = %err,
            attempt = self.resume_failures,
            delay_ms = delay.as_millis() as u64,
            "watch interrupted; resuming"
        );
        Ok(if self.pause(delay).await {
            SyncState::Watching
        } else {
            SyncState::Stopped
        })
    }

    // -----------------------------------------------------------------------
    // 2c. Helpers
    // -----------------------------------------------------------------------

    async fn emit(&mut self, event: ChangeEvent) -> Result<(), SyncError> {
        self.queue
            .push(event)
            .await
            .map_err(|_| SyncError::QueueClosed)?;
        self.stats.events_emitted += 1;
        Ok(())
    }

    fn advance(&mut self, token: &VersionToken) {
        if !token.is_empty() {
            self.token = token.clone();
        }
    }

    /// Sleep for `delay`; `false` if cancelled first.
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn schedule_resync(&mut self) {
        self.next_resync = self
            .config
            .resync_interval()
            .map(|interval| Instant::now() + interval);
    }

    fn transition(&mut self, next: SyncState) {
        if next != self.state {
            debug!(from = ?self.state, to = ?next, "reflector state change");
        }
        self.state = next;
        self.status.send_replace(ReflectorStatus {
            state: self.state,
            resume_token: self.token.clone(),
            objects: self.store.len(),
            lists: self.stats.lists,
            last_list_at: self.last_list_at,
        });
    }
}

async fn resync_due(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn check_recency(prior: &ObjectRecord, next: &ObjectRecord) {
    if next.version().is_older_than(prior.version()) {
        warn!(
            key = %next.key(),
            held = %prior.version(),
            incoming = %next.version(),
            "incoming version is older than the stored one"
        );
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
