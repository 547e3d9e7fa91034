//! HTTP [`RemoteSource`] over the Kubernetes REST API.
//!
//! `ureq` is blocking, so every request runs on tokio's blocking pool. A
//! watch keeps one blocking task reading newline-delimited JSON events and
//! feeding them into the [`WatchStream`] channel.
//!
//! The API server omits `kind` and `apiVersion` on list items but sends them
//! on watch objects. Both paths stamp them from the watched [`ResourceKind`]
//! so a relisted object compares equal to the same object seen on the watch.

use std::io::{BufRead, BufReader, Read};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};

use kwatch_core::{ObjectRecord, ResourceKind, Scope, VersionToken};
use kwatch_sync::{ListPage, Query, RemoteSource, SourceError, WatchFrame, WatchStream};

use crate::kubeconfig::Connection;

const PAGE_SIZE: &str = "500";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const WATCH_BUFFER: usize = 64;

#[derive(Clone)]
pub struct HttpSource {
    agent: ureq::Agent,
    connection: Connection,
    watch_timeout_secs: u64,
}

impl HttpSource {
    pub fn new(connection: Connection, watch_timeout_secs: u64) -> Self {
        // Reads must outlive the server-side watch timeout.
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(Duration::from_secs(watch_timeout_secs + 30))
            .build();
        Self {
            agent,
            connection,
            watch_timeout_secs,
        }
    }

    fn collection_url(&self, query: &Query) -> String {
        collection_url(&self.connection.server, query)
    }

    fn request(&self, query: &Query) -> ureq::Request {
        let mut request = self.agent.get(&self.collection_url(query));
        if let Some(token) = &self.connection.token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        if let Some(selector) = &query.field_selector {
            request = request.query("fieldSelector", selector);
        }
        if let Some(selector) = &query.label_selector {
            request = request.query("labelSelector", selector);
        }
        request
    }

    fn list_blocking(&self, query: &Query) -> Result<ListPage, SourceError> {
        let mut objects = Vec::new();
        let mut cont: Option<String> = None;
        loop {
            let mut request = self.request(query).query("limit", PAGE_SIZE);
            if let Some(token) = &cont {
                request = request.query("continue", token);
            }
            let response = request
                .call()
                .map_err(|err| map_ureq_error(err, &VersionToken::default()))?;
            let list: ListResponse = response
                .into_json()
                .map_err(|err| SourceError::Decode(err.to_string()))?;

            for item in list.items {
                objects.push(decode_object(item, query.kind)?);
            }
            match list.metadata.cont.filter(|c| !c.is_empty()) {
                Some(next) => cont = Some(next),
                None => {
                    let token = VersionToken::parse(&list.metadata.resource_version)?;
                    debug!(objects = objects.len(), token = %token, "list complete");
                    return Ok(ListPage {
                        objects,
                        resume_token: token,
                    });
                }
            }
        }
    }

    fn open_watch_blocking(
        &self,
        query: &Query,
        from: &VersionToken,
    ) -> Result<Box<dyn Read + Send + Sync>, SourceError> {
        let timeout = self.watch_timeout_secs.to_string();
        let response = self
            .request(query)
            .query("watch", "1")
            .query("resourceVersion", from.as_str())
            .query("allowWatchBookmarks", "true")
            .query("timeoutSeconds", &timeout)
            .call()
            .map_err(|err| map_ureq_error(err, from))?;
        Ok(response.into_reader())
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn list(&self, query: &Query) -> Result<ListPage, SourceError> {
        let source = self.clone();
        let query = query.clone();
        tokio::task::spawn_blocking(move || source.list_blocking(&query))
            .await
            .map_err(|err| SourceError::Transport(format!("list task failed: {err}")))?
    }

    async fn watch(&self, query: &Query, from: &VersionToken) -> Result<WatchStream, SourceError> {
        let source = self.clone();
        let query = query.clone();
        let from = from.clone();
        let kind = query.kind;
        let reader = {
            let from = from.clone();
            tokio::task::spawn_blocking(move || source.open_watch_blocking(&query, &from))
                .await
                .map_err(|err| SourceError::Transport(format!("watch task failed: {err}")))??
        };

        let (tx, stream) = WatchStream::channel(WATCH_BUFFER);
        tokio::task::spawn_blocking(move || {
            for line in BufReader::new(reader).lines() {
                let frame = match line {
                    Ok(line) if line.trim().is_empty() => continue,
                    Ok(line) => decode_event(&line, kind, &from),
                    Err(err) => Err(SourceError::Transport(err.to_string())),
                };
                let failed = frame.is_err();
                // The reflector dropped the stream: stop reading.
                if tx.blocking_send(frame).is_err() || failed {
                    return;
                }
            }
            trace!("watch stream closed by server");
        });
        Ok(stream)
    }
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    metadata: ListMeta,
    #[serde(default)]
    items: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct ListMeta {
    #[serde(rename = "resourceVersion", default)]
    resource_version: String,
    #[serde(rename = "continue", default)]
    cont: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    object: Value,
}

#[derive(Debug, Default, Deserialize)]
struct Status {
    #[serde(default)]
    code: u16,
    #[serde(default)]
    message: String,
}

pub(crate) fn collection_url(server: &str, query: &Query) -> String {
    let base = format!("{server}/api/{}", query.kind.api_version());
    match (query.kind.scope(), query.effective_namespace()) {
        (Scope::Namespaced, Some(ns)) => format!("{base}/namespaces/{ns}/{}", query.kind.plural()),
        _ => format!("{base}/{}", query.kind.plural()),
    }
}

/// Build a record with `kind` and `apiVersion` set from the watched kind.
pub(crate) fn decode_object(
    mut object: Value,
    kind: ResourceKind,
) -> Result<ObjectRecord, SourceError> {
    if let Value::Object(map) = &mut object {
        map.insert("kind".into(), Value::from(kind.kind_name()));
        map.insert("apiVersion".into(), Value::from(kind.api_version()));
    }
    Ok(ObjectRecord::from_value(object)?)
}

/// Decode one watch event line.
pub(crate) fn decode_event(
    line: &str,
    kind: ResourceKind,
    from: &VersionToken,
) -> Result<WatchFrame, SourceError> {
    let event: RawEvent =
        serde_json::from_str(line).map_err(|err| SourceError::Decode(err.to_string()))?;
    match event.kind.as_str() {
        "ADDED" => Ok(WatchFrame::Added(decode_object(event.object, kind)?)),
        "MODIFIED" => Ok(WatchFrame::Modified(decode_object(event.object, kind)?)),
        "DELETED" => Ok(WatchFrame::Deleted(decode_object(event.object, kind)?)),
        "BOOKMARK" => {
            let token = event
                .object
                .pointer("/metadata/resourceVersion")
                .and_then(Value::as_str)
                .unwrap_or_default();
            Ok(WatchFrame::Bookmark(VersionToken::from(token)))
        }
        "ERROR" => {
            let status: Status = serde_json::from_value(event.object).unwrap_or_default();
            Err(status_error(status.code, status.message, from))
        }
        other => Err(SourceError::Decode(format!("unknown watch event type '{other}'"))),
    }
}

fn status_error(code: u16, message: String, from: &VersionToken) -> SourceError {
    match code {
        401 => SourceError::Unauthorized(message),
        403 => SourceError::Forbidden(message),
        404 => SourceError::NotFound(message),
        410 => SourceError::Expired {
            token: from.clone(),
        },
        408 | 504 => SourceError::Timeout(message),
        code => SourceError::Status { code, message },
    }
}

fn map_ureq_error(err: ureq::Error, from: &VersionToken) -> SourceError {
    match err {
        ureq::Error::Status(code, response) => {
            let body = response.into_string().unwrap_or_default();
            let message = serde_json::from_str::<Status>(&body)
                .ok()
                .map(|status| status.message)
                .filter(|message| !message.is_empty())
                .unwrap_or(body);
            status_error(code, message, from)
        }
        ureq::Error::Transport(transport) => SourceError::Transport(transport.to_string()),
    }
}
