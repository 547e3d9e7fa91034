//! The remote side of the mirror: what gets listed and watched.

use std::fmt;

use async_trait::async_trait;
use tokio::sync::mpsc;

use kwatch_core::{ObjectRecord, ResourceKind, Scope, VersionToken};

use crate::error::SourceError;

/// Which collection to mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub kind: ResourceKind,
    /// `None` means every namespace. Ignored for cluster-scoped kinds.
    pub namespace: Option<String>,
    pub field_selector: Option<String>,
    pub label_selector: Option<String>,
}

impl Query {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            namespace: None,
            field_selector: None,
            label_selector: None,
        }
    }

    /// Restrict to one namespace. An empty string means all namespaces.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self
    }

    pub fn with_field_selector(mut self, selector: impl Into<String>) -> Self {
        self.field_selector = Some(selector.into());
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }

    /// The namespace that actually applies, given the kind's scope.
    pub fn effective_namespace(&self) -> Option<&str> {
        match self.kind.scope() {
            Scope::Cluster => None,
            Scope::Namespaced => self.namespace.as_deref(),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.kind.scope(), self.effective_namespace()) {
            (Scope::Cluster, _) => write!(f, "{}", self.kind),
            (Scope::Namespaced, Some(ns)) => write!(f, "{} in namespace {ns}", self.kind),
            (Scope::Namespaced, None) => write!(f, "{} in all namespaces", self.kind),
        }
    }
}

/// A complete listing plus the token to resume watching from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListPage {
    pub objects: Vec<ObjectRecord>,
    pub resume_token: VersionToken,
}

impl ListPage {
    pub fn new(objects: Vec<ObjectRecord>, resume_token: impl Into<VersionToken>) -> Self {
        Self {
            objects,
            resume_token: resume_token.into(),
        }
    }
}

/// One item of a watch stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchFrame {
    Added(ObjectRecord),
    Modified(ObjectRecord),
    /// Carries the last known state of the removed object.
    Deleted(ObjectRecord),
    /// Progress marker: no object changed, but the token moved.
    Bookmark(VersionToken),
}

impl WatchFrame {
    pub fn version(&self) -> &VersionToken {
        match self {
            WatchFrame::Added(r) | WatchFrame::Modified(r) | WatchFrame::Deleted(r) => r.version(),
            WatchFrame::Bookmark(token) => token,
        }
    }
}

/// Receiving end of an open watch. Ends with `None` when the remote closes
/// the stream; errors are delivered in-band.
#[derive(Debug)]
pub struct WatchStream {
    rx: mpsc::Receiver<Result<WatchFrame, SourceError>>,
}

impl WatchStream {
    pub fn new(rx: mpsc::Receiver<Result<WatchFrame, SourceError>>) -> Self {
        Self { rx }
    }

    /// Convenience constructor returning the sending half alongside.
    pub fn channel(buffer: usize) -> (mpsc::Sender<Result<WatchFrame, SourceError>>, Self) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (tx, Self::new(rx))
    }

    pub async fn next(&mut self) -> Option<Result<WatchFrame, SourceError>> {
        self.rx.recv().await
    }
}

/// A remote collection that can be listed and watched.
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Full listing of the collection.
    async fn list(&self, query: &Query) -> Result<ListPage, SourceError>;

    /// Open a change stream starting after `from`.
    async fn watch(&self, query: &Query, from: &VersionToken) -> Result<WatchStream, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_reflects_scope() {
        assert_eq!(
            Query::new(ResourceKind::Pods).in_namespace("default").to_string(),
            "pods in namespace default"
        );
        assert_eq!(Query::new(ResourceKind::Services).to_string(), "services in all namespaces");
        assert_eq!(
            Query::new(ResourceKind::Nodes).in_namespace("default").to_string(),
            "nodes"
        );
    }

    #[test]
    fn empty_namespace_means_all() {
        let query = Query::new(ResourceKind::Pods).in_namespace("");
        assert_eq!(query.effective_namespace(), None);
    }

    #[tokio::test]
    async fn stream_ends_when_sender_drops() {
        let (tx, mut stream) = WatchStream::channel(4);
        tx.send(Ok(WatchFrame::Bookmark("7".into()))).await.expect("send");
        drop(tx);
        assert_eq!(stream.next().await, Some(Ok(WatchFrame::Bookmark("7".into()))));
        assert_eq!(stream.next().await, None);
    }
}
