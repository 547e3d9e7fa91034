//! In-memory [`RemoteSource`] driven by a script of list results and watch
//! sessions. Used by tests and for offline runs.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;

use kwatch_core::{ObjectRecord, VersionToken};

use crate::error::SourceError;
use crate::source::{ListPage, Query, RemoteSource, WatchFrame, WatchStream};

type FrameSender = mpsc::Sender<Result<WatchFrame, SourceError>>;

/// One scripted outcome of a `watch` call.
#[derive(Debug, Clone)]
pub enum WatchScript {
    /// Opening the stream fails.
    Fail(SourceError),
    /// The stream delivers `frames`, then ends unless `hold_open`.
    Session {
        frames: Vec<Result<WatchFrame, SourceError>>,
        hold_open: bool,
    },
}

#[derive(Default)]
struct Script {
    lists: VecDeque<Result<ListPage, SourceError>>,
    last_list: Option<ListPage>,
    watches: VecDeque<WatchScript>,
    list_calls: usize,
    watch_tokens: Vec<VersionToken>,
    held: Vec<FrameSender>,
}

/// Replays scripted results in order.
///
/// When the list script runs out, the last successful page is served again.
/// When the watch script runs out, `watch` returns a stream that stays open
/// and silent.
#[derive(Default)]
pub struct ScriptedSource {
    script: Mutex<Script>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push_list(&self, result: Result<ListPage, SourceError>) -> &Self {
        self.script().lists.push_back(result);
        self
    }

    pub fn push_page(&self, objects: Vec<ObjectRecord>, token: &str) -> &Self {
        self.push_list(Ok(ListPage::new(objects, token)))
    }

    pub fn push_watch(&self, script: WatchScript) -> &Self {
        self.script().watches.push_back(script);
        self
    }

    /// A session that delivers `frames` and then ends.
    pub fn push_session(&self, frames: Vec<WatchFrame>) -> &Self {
        self.push_watch(WatchScript::Session {
            frames: frames.into_iter().map(Ok).collect(),
            hold_open: false,
        })
    }

    /// A session that delivers `frames` and then stays open.
    pub fn push_open_session(&self, frames: Vec<WatchFrame>) -> &Self {
        self.push_watch(WatchScript::Session {
            frames: frames.into_iter().map(Ok).collect(),
            hold_open: true,
        })
    }

    pub fn push_watch_error(&self, err: SourceError) -> &Self {
        self.push_watch(WatchScript::Fail(err))
    }

    pub fn list_calls(&self) -> usize {
        self.script().list_calls
    }

    /// Tokens passed to every `watch` call, in order.
    pub fn watch_tokens(&self) -> Vec<VersionToken> {
        self.script().watch_tokens.clone()
    }
}

#[async_trait]
impl RemoteSource for ScriptedSource {
    async fn list(&self, _query: &Query) -> Result<ListPage, SourceError> {
        let mut script = self.script();
        script.list_calls += 1;
        match script.lists.pop_front() {
            Some(Ok(page)) => {
                script.last_list = Some(page.clone());
                Ok(page)
            }
            Some(Err(err)) => Err(err),
            None => script
                .last_list
                .clone()
                .ok_or_else(|| SourceError::Transport("no scripted list result".into())),
        }
    }

    async fn watch(&self, _query: &Query, from: &VersionToken) -> Result<WatchStream, SourceError> {
        let mut script = self.script();
        script.watch_tokens.push(from.clone());
        match script.watches.pop_front() {
            Some(WatchScript::Fail(err)) => Err(err),
            Some(WatchScript::Session { frames, hold_open }) => {
                let (tx, stream) = WatchStream::channel(frames.len());
                for frame in frames {
                    // Capacity covers every frame.
                    let _ = tx.try_send(frame);
                }
                if hold_open {
                    script.held.push(tx);
                }
                Ok(stream)
            }
            None => {
                let (tx, stream) = WatchStream::channel(1);
                script.held.push(tx);
                Ok(stream)
            }
        }
    }
}
