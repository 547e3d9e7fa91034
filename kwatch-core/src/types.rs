//! Domain types for the watched collection.
//!
//! Records keep the remote payload as an opaque [`serde_json::Value`]; only
//! `metadata.namespace`, `metadata.name` and `metadata.resourceVersion` are
//! read here, to key the record and to track recency. Every other field is
//! left to the path formatter.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Identity of an object within a collection: `(namespace, name)`.
///
/// Cluster-scoped objects carry an empty namespace. Ordering is
/// lexicographic by namespace, then name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key for a cluster-scoped object.
    pub fn cluster(name: impl Into<String>) -> Self {
        Self::new(String::new(), name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            self.name.fmt(f)
        } else {
            write!(f, "{}/{}", self.namespace, self.name)
        }
    }
}

/// Opaque version marker issued by the remote source.
///
/// Used to resume a watch and to detect staleness. Tokens are only
/// comparable for recency, see [`VersionToken::compare_recency`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct VersionToken(pub String);

impl VersionToken {
    /// Validate a token received from the remote source.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        if raw.is_empty() || raw.chars().any(char::is_whitespace) {
            return Err(CoreError::MalformedToken {
                token: raw.to_owned(),
            });
        }
        Ok(Self(raw.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Recency order between two tokens.
    ///
    /// Decimal tokens compare numerically; anything else is incomparable
    /// and yields `None`.
    pub fn compare_recency(&self, other: &VersionToken) -> Option<Ordering> {
        let a = self.0.parse::<u128>().ok()?;
        let b = other.0.parse::<u128>().ok()?;
        Some(a.cmp(&b))
    }

    /// `true` only when `self` is known to be older than `other`.
    pub fn is_older_than(&self, other: &VersionToken) -> bool {
        self.compare_recency(other) == Some(Ordering::Less)
    }
}

impl fmt::Display for VersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for VersionToken {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for VersionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Last known state of one remote object.
///
/// Equality is structural over the full payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct ObjectRecord {
    key: ObjectKey,
    version: VersionToken,
    value: Value,
}

impl ObjectRecord {
    /// Build a record from a raw remote payload.
    ///
    /// Fails when the payload is not a mapping or has no `metadata.name`.
    /// A missing `metadata.resourceVersion` yields an empty token.
    pub fn from_value(value: Value) -> Result<Self, CoreError> {
        let Value::Object(map) = &value else {
            return Err(CoreError::NotAnObject {
                found: json_type_name(&value),
            });
        };
        let metadata = map.get("metadata");
        let text = |field: &str| {
            metadata
                .and_then(|m| m.get(field))
                .and_then(Value::as_str)
                .map(str::to_owned)
        };

        let name = text("name").ok_or(CoreError::MissingField {
            field: "metadata.name",
        })?;
        let namespace = text("namespace").unwrap_or_default();
        let version = VersionToken(text("resourceVersion").unwrap_or_default());

        Ok(Self {
            key: ObjectKey { namespace, name },
            version,
            value,
        })
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn version(&self) -> &VersionToken {
        &self.version
    }

    /// The whole payload.
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Top-level field lookup.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.value.get(name)
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

impl PartialEq for ObjectRecord {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl Eq for ObjectRecord {}

impl TryFrom<Value> for ObjectRecord {
    type Error = CoreError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl From<ObjectRecord> for Value {
    fn from(record: ObjectRecord) -> Self {
        record.value
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

// ---------------------------------------------------------------------------
// Change events
// ---------------------------------------------------------------------------

/// One observed change to one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Added(ObjectRecord),
    Modified { old: ObjectRecord, new: ObjectRecord },
    Deleted(ObjectRecord),
}

impl ChangeEvent {
    pub fn key(&self) -> &ObjectKey {
        self.current().key()
    }

    /// The newest record carried by the event.
    pub fn current(&self) -> &ObjectRecord {
        match self {
            ChangeEvent::Added(record) | ChangeEvent::Deleted(record) => record,
            ChangeEvent::Modified { new, .. } => new,
        }
    }

    /// Output verb used by the line convention.
    pub fn verb(&self) -> &'static str {
        match self {
            ChangeEvent::Added(_) => "add",
            ChangeEvent::Modified { .. } => "update",
            ChangeEvent::Deleted(_) => "delete",
        }
    }
}

// ---------------------------------------------------------------------------
// Resource kinds
// ---------------------------------------------------------------------------

/// Whether objects of a kind live inside a namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Namespaced,
    Cluster,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Namespaced => write!(f, "namespaced"),
            Scope::Cluster => write!(f, "cluster"),
        }
    }
}

/// Allow-list of watchable collections (core `v1` group).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "String")]
pub enum ResourceKind {
    Services,
    Pods,
    Nodes,
    Namespaces,
    ConfigMaps,
    Endpoints,
}

impl ResourceKind {
    /// All kinds in a stable order.
    pub fn all() -> &'static [ResourceKind] {
        &[
            ResourceKind::Services,
            ResourceKind::Pods,
            ResourceKind::Nodes,
            ResourceKind::Namespaces,
            ResourceKind::ConfigMaps,
            ResourceKind::Endpoints,
        ]
    }

    /// Plural resource name as used in API paths.
    pub fn plural(&self) -> &'static str {
        match self {
            ResourceKind::Services => "services",
            ResourceKind::Pods => "pods",
            ResourceKind::Nodes => "nodes",
            ResourceKind::Namespaces => "namespaces",
            ResourceKind::ConfigMaps => "configmaps",
            ResourceKind::Endpoints => "endpoints",
        }
    }

    /// Singular `kind` carried by objects of this collection.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ResourceKind::Services => "Service",
            ResourceKind::Pods => "Pod",
            ResourceKind::Nodes => "Node",
            ResourceKind::Namespaces => "Namespace",
            ResourceKind::ConfigMaps => "ConfigMap",
            ResourceKind::Endpoints => "Endpoints",
        }
    }

    pub fn scope(&self) -> Scope {
        match self {
            ResourceKind::Nodes | ResourceKind::Namespaces => Scope::Cluster,
            _ => Scope::Namespaced,
        }
    }

    pub fn api_version(&self) -> &'static str {
        "v1"
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

impl FromStr for ResourceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        ResourceKind::all()
            .iter()
            .copied()
            .find(|kind| kind.plural() == wanted)
            .ok_or_else(|| CoreError::UnsupportedKind {
                kind: s.to_owned(),
                supported: ResourceKind::all()
                    .iter()
                    .map(ResourceKind::plural)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

impl TryFrom<String> for ResourceKind {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_display() {
        assert_eq!(ObjectKey::new("default", "web").to_string(), "default/web");
        assert_eq!(ObjectKey::cluster("node-1").to_string(), "node-1");
    }

    #[test]
    fn key_ordering_is_namespace_then_name() {
        let mut keys = vec![
            ObjectKey::new("b", "a"),
            ObjectKey::new("a", "z"),
            ObjectKey::new("a", "b"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                ObjectKey::new("a", "b"),
                ObjectKey::new("a", "z"),
                ObjectKey::new("b", "a"),
            ]
        );
    }

    #[test]
    fn record_extracts_key_and_version() {
        let record = ObjectRecord::from_value(json!({
            "metadata": {"namespace": "default", "name": "a", "resourceVersion": "7"},
            "spec": {"replicas": 2}
        }))
        .expect("record");
        assert_eq!(record.key(), &ObjectKey::new("default", "a"));
        assert_eq!(record.version().as_str(), "7");
        assert_eq!(record.field("spec"), Some(&json!({"replicas": 2})));
        assert_eq!(record.field("status"), None);
    }

    #[test]
    fn record_without_name_is_rejected() {
        let err = ObjectRecord::from_value(json!({"metadata": {}})).unwrap_err();
        assert!(matches!(err, CoreError::MissingField { field: "metadata.name" }));

        let err = ObjectRecord::from_value(json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("a sequence"));
    }

    #[test]
    fn record_serde_is_transparent() {
        let raw = json!({"metadata": {"name": "n1"}, "x": [1, 2]});
        let record: ObjectRecord = serde_json::from_value(raw.clone()).expect("deserialize");
        assert_eq!(serde_json::to_value(&record).expect("serialize"), raw);
    }

    #[test]
    fn version_recency() {
        let v9 = VersionToken::from("9");
        let v10 = VersionToken::from("10");
        assert_eq!(v9.compare_recency(&v10), Some(Ordering::Less));
        assert!(v9.is_older_than(&v10));
        assert!(!v10.is_older_than(&v9));
        assert_eq!(VersionToken::from("abc").compare_recency(&v10), None);
    }

    #[test]
    fn version_parse_rejects_malformed() {
        assert!(VersionToken::parse("").is_err());
        assert!(VersionToken::parse("12 3").is_err());
        assert_eq!(VersionToken::parse("123").expect("token").as_str(), "123");
    }

    #[test]
    fn resource_kind_parse() {
        assert_eq!("pods".parse::<ResourceKind>().unwrap(), ResourceKind::Pods);
        assert_eq!("Services".parse::<ResourceKind>().unwrap(), ResourceKind::Services);
        let err = "deployments".parse::<ResourceKind>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("deployments"), "got: {msg}");
        assert!(msg.contains("services, pods, nodes"), "got: {msg}");
    }

    #[test]
    fn resource_kind_scope() {
        assert_eq!(ResourceKind::Nodes.scope(), Scope::Cluster);
        assert_eq!(ResourceKind::Pods.scope(), Scope::Namespaced);
    }

    #[test]
    fn resource_kind_names() {
        assert_eq!(ResourceKind::Services.kind_name(), "Service");
        assert_eq!(ResourceKind::ConfigMaps.kind_name(), "ConfigMap");
        assert_eq!(ResourceKind::Endpoints.kind_name(), "Endpoints");
    }

    #[test]
    fn event_helpers() {
        let v1 = ObjectRecord::from_value(json!({"metadata": {"name": "a", "resourceVersion": "1"}}))
            .unwrap();
        let v2 = ObjectRecord::from_value(json!({"metadata": {"name": "a", "resourceVersion": "2"}}))
            .unwrap();
        let ev = ChangeEvent::Modified { old: v1, new: v2.clone() };
        assert_eq!(ev.verb(), "update");
        assert_eq!(ev.current(), &v2);
        assert_eq!(ev.key(), &ObjectKey::cluster("a"));
    }
}
