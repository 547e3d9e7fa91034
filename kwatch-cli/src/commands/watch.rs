//! `kwatch watch`: mirror a collection and print one line per change.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Args;

use kwatch_core::ResourceKind;
use kwatch_daemon::{init_tracing, start_blocking, LogFormat, WatchSettings};
use kwatch_renderer::{PathExpression, WHOLE_OBJECT};
use kwatch_sync::queue::DEFAULT_CAPACITY;
use kwatch_sync::BackoffPolicy;

use crate::kubeconfig;
use crate::transport::HttpSource;

/// Arguments for `kwatch watch`.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Resource to watch (services, pods, nodes, namespaces, configmaps, endpoints).
    #[arg(long)]
    pub resource: ResourceKind,

    /// Namespace to watch; all namespaces when omitted.
    #[arg(short = 'n', long, default_value = "")]
    pub namespace: String,

    /// JSONPath template applied to every object.
    #[arg(long, default_value = WHOLE_OBJECT)]
    pub jsonpath: String,

    /// Full re-list interval in seconds; 0 disables it.
    #[arg(long, default_value_t = 0)]
    pub resync: u64,

    #[arg(long)]
    pub field_selector: Option<String>,

    #[arg(long)]
    pub label_selector: Option<String>,

    /// Pending events before the reflector waits for output to catch up.
    #[arg(long, default_value_t = DEFAULT_CAPACITY)]
    pub queue_capacity: usize,

    /// Merge same-object updates once this many events are pending.
    #[arg(long)]
    pub coalesce_above: Option<usize>,

    /// How long shutdown waits for pending output.
    #[arg(long, default_value_t = 1000)]
    pub grace_period_ms: u64,

    /// Server-side watch timeout in seconds.
    #[arg(long, default_value_t = 300)]
    pub watch_timeout: u64,

    /// Kubeconfig path [default: ~/.kube/config, then in-cluster config].
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,

    /// API server URL, e.g. http://127.0.0.1:8001 behind `kubectl proxy`.
    #[arg(long)]
    pub server: Option<String>,

    /// Bearer token; overrides the kubeconfig user.
    #[arg(long)]
    pub token: Option<String>,

    /// Log format on stderr: text or json.
    #[arg(long, default_value = "text")]
    pub log_format: LogFormat,
}

impl WatchArgs {
    pub fn run(self) -> Result<()> {
        init_tracing(self.log_format);

        PathExpression::compile(&self.jsonpath).context("invalid --jsonpath")?;
        let connection = kubeconfig::resolve(
            self.server.as_deref(),
            self.token.clone(),
            self.kubeconfig.as_deref(),
        )
        .context("could not determine how to reach the API server")?;
        tracing::info!(server = %connection.server, "connecting");

        let source = Arc::new(HttpSource::new(connection, self.watch_timeout));
        let report = start_blocking(source, self.settings()).context("watch failed")?;
        tracing::debug!(summary = %report.summary_json(), "exiting");
        Ok(())
    }

    fn settings(&self) -> WatchSettings {
        WatchSettings {
            namespace: self.namespace.clone(),
            jsonpath: self.jsonpath.clone(),
            field_selector: self.field_selector.clone(),
            label_selector: self.label_selector.clone(),
            resync_secs: self.resync,
            queue_capacity: self.queue_capacity,
            coalesce_above: self.coalesce_above,
            grace_period_ms: self.grace_period_ms,
            backoff: BackoffPolicy::default(),
            ..WatchSettings::new(self.resource)
        }
    }
}
