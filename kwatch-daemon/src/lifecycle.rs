//! Lifecycle controller: wires source, reflector, queue and dispatcher
//! together, and tears them down in order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use kwatch_core::Store;
use kwatch_renderer::PathExpression;
use kwatch_sync::{
    delta_queue, Reflector, ReflectorStats, ReflectorStatus, RemoteSource, SyncError, SyncState,
};

use crate::dispatcher::{dispatch, Dispatched};
use crate::error::DaemonError;
use crate::settings::WatchSettings;

// ---------------------------------------------------------------------------
// 1. Handle and report
// ---------------------------------------------------------------------------

/// A running watch: one reflector task and one dispatcher task.
pub struct WatchHandle<W> {
    store: Store,
    status: watch::Receiver<ReflectorStatus>,
    cancel: CancellationToken,
    grace: Duration,
    reflector: JoinHandle<Result<ReflectorStats, SyncError>>,
    dispatcher: JoinHandle<Result<Dispatched<W>, DaemonError>>,
}

/// Summary of a completed shutdown.
#[derive(Debug)]
pub struct ShutdownReport<W> {
    /// `None` when the reflector had to be aborted.
    pub stats: Option<ReflectorStats>,
    /// Zero when the dispatcher was aborted.
    pub lines_written: u64,
    /// `None` when the dispatcher was aborted after the grace period.
    pub sink: Option<W>,
    pub drained: bool,
}

#[derive(Debug, Serialize)]
struct ShutdownSummary<'a> {
    stats: Option<&'a ReflectorStats>,
    lines_written: u64,
    drained: bool,
}

impl<W> ShutdownReport<W> {
    pub fn summary_json(&self) -> String {
        serde_json::to_string(&ShutdownSummary {
            stats: self.stats.as_ref(),
            lines_written: self.lines_written,
            drained: self.drained,
        })
        .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// 2. Start / stop
// ---------------------------------------------------------------------------

/// Spawn the reflector and dispatcher. Must be called inside a runtime.
pub fn start<W>(
    source: Arc<dyn RemoteSource>,
    settings: &WatchSettings,
    expression: PathExpression,
    sink: W,
) -> WatchHandle<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let store = Store::new();
    let cancel = CancellationToken::new();
    let (producer, consumer) = delta_queue(settings.queue_capacity, settings.coalesce_policy());

    let reflector = Reflector::new(
        source,
        settings.query(),
        store.clone(),
        producer,
        settings.reflector_config(),
        cancel.clone(),
    );
    let status = reflector.status();

    info!(
        resource = %settings.resource,
        namespace = %settings.namespace,
        jsonpath = %expression,
        "starting watch"
    );
    let reflector = tokio::spawn(reflector.run());
    let dispatcher = tokio::spawn(dispatch(consumer, expression, sink));

    WatchHandle {
        store,
        status,
        cancel,
        grace: settings.grace_period(),
        reflector,
        dispatcher,
    }
}

impl<W> WatchHandle<W>
where
    W: Send + 'static,
{
    /// Read-only view of the mirrored collection.
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn status(&self) -> watch::Receiver<ReflectorStatus> {
        self.status.clone()
    }

    /// Resolves once the reflector has stopped on its own.
    pub async fn reflector_exited(&self) {
        let mut status = self.status.clone();
        // A dropped sender also means the reflector is gone.
        let _ = status.wait_for(|s| s.state == SyncState::Stopped).await;
    }

    /// Cancel the reflector, let it flush, then give the dispatcher until
    /// the end of the grace period to drain.
    pub async fn stop(self) -> Result<ShutdownReport<W>, DaemonError> {
        let WatchHandle {
            cancel,
            grace,
            mut reflector,
            mut dispatcher,
            ..
        } = self;

        cancel.cancel();
        let deadline = Instant::now() + grace;

        let reflected = match timeout_at(deadline, &mut reflector).await {
            Ok(joined) => Some(joined_task("reflector", joined)?),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "reflector did not stop in time; aborting");
                reflector.abort();
                None
            }
        };

        // The queue is closed by now, so the dispatcher only has to drain.
        let drained = match timeout_at(deadline, &mut dispatcher).await {
            Ok(joined) => Some(joined_task("dispatcher", joined)??),
            Err(_) => {
                warn!(grace_ms = grace.as_millis() as u64, "output did not drain in time; aborting");
                dispatcher.abort();
                None
            }
        };

        let stats = reflected.transpose()?;
        let report = match drained {
            Some(Dispatched { sink, lines }) => ShutdownReport {
                stats,
                lines_written: lines,
                sink: Some(sink),
                drained: true,
            },
            None => ShutdownReport {
                stats,
                lines_written: 0,
                sink: None,
                drained: false,
            },
        };

        info!(summary = %report.summary_json(), "watch stopped");
        Ok(report)
    }
}

fn joined_task<T>(task: &'static str, result: Result<T, JoinError>) -> Result<T, DaemonError> {
    result.map_err(|err| DaemonError::Join {
        task,
        message: err.to_string(),
    })
}

// ---------------------------------------------------------------------------
// 3. Waiting for shutdown
// ---------------------------------------------------------------------------

/// Run until `shutdown` resolves or the reflector exits on its own, then stop.
pub async fn run_until<W, F>(handle: WatchHandle<W>, shutdown: F) -> Result<ShutdownReport<W>, DaemonError>
where
    W: Send + 'static,
    F: Future<Output = ()>,
{
    tokio::select! {
        _ = shutdown => {}
        _ = handle.reflector_exited() => warn!("reflector exited; shutting down"),
    }
    handle.stop().await
}

/// Run until SIGINT, SIGTERM or SIGHUP, or until the reflector exits.
pub async fn wait_for_shutdown<W>(handle: WatchHandle<W>) -> Result<ShutdownReport<W>, DaemonError>
where
    W: Send + 'static,
{
    run_until(handle, async {
        let signal = termination_signal().await;
        info!(signal, "received signal, shutting down");
    })
    .await
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let (mut interrupt, mut terminate, mut hangup) = match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
        signal(SignalKind::hangup()),
    ) {
        (Ok(i), Ok(t), Ok(h)) => (i, t, h),
        _ => {
            warn!("could not install signal handlers; falling back to ctrl-c");
            let _ = tokio::signal::ctrl_c().await;
            return "SIGINT";
        }
    };
    tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = hangup.recv() => "SIGHUP",
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
