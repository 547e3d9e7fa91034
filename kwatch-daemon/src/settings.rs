//! Watch settings: everything the lifecycle controller needs, as plain
//! values with serde defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use kwatch_core::{ResourceKind, Scope};
use kwatch_renderer::WHOLE_OBJECT;
use kwatch_sync::queue::DEFAULT_CAPACITY;
use kwatch_sync::{BackoffPolicy, CoalescePolicy, Query, ReflectorConfig};

fn default_jsonpath() -> String {
    WHOLE_OBJECT.to_string()
}

fn default_queue_capacity() -> usize {
    DEFAULT_CAPACITY
}

fn default_grace_period_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchSettings {
    pub resource: ResourceKind,

    /// Empty means every namespace.
    #[serde(default)]
    pub namespace: String,

    #[serde(default = "default_jsonpath")]
    pub jsonpath: String,

    #[serde(default)]
    pub field_selector: Option<String>,

    #[serde(default)]
    pub label_selector: Option<String>,

    /// Periodic resync in seconds; 0 disables it.
    #[serde(default)]
    pub resync_secs: u64,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Start merging same-key updates once this many events are pending.
    #[serde(default)]
    pub coalesce_above: Option<usize>,

    /// How long shutdown waits for pending output to drain.
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl WatchSettings {
    pub fn new(resource: ResourceKind) -> Self {
        Self {
            resource,
            namespace: String::new(),
            jsonpath: default_jsonpath(),
            field_selector: None,
            label_selector: None,
            resync_secs: 0,
            queue_capacity: default_queue_capacity(),
            coalesce_above: None,
            grace_period_ms: default_grace_period_ms(),
            backoff: BackoffPolicy::default(),
        }
    }

    pub fn query(&self) -> Query {
        if !self.namespace.is_empty() && self.resource.scope() == Scope::Cluster {
            warn!(
                resource = %self.resource,
                namespace = %self.namespace,
                "namespace ignored for cluster-scoped resource"
            );
        }
        let mut query = Query::new(self.resource).in_namespace(self.namespace.clone());
        if let Some(selector) = &self.field_selector {
            query = query.with_field_selector(selector.clone());
        }
        if let Some(selector) = &self.label_selector {
            query = query.with_label_selector(selector.clone());
        }
        query
    }

    pub fn reflector_config(&self) -> ReflectorConfig {
        ReflectorConfig {
            resync_secs: self.resync_secs,
            backoff: self.backoff,
            ..ReflectorConfig::default()
        }
    }

    pub fn coalesce_policy(&self) -> CoalescePolicy {
        CoalescePolicy::from_bound(self.coalesce_above)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}
