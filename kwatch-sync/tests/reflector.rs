//! Reflector behaviour against a scripted remote.
//!
//! All tests run on a paused clock: backoff and resync delays elapse
//! instantly once every task is idle.

use std::sync::Arc;
use std::time::Duration;

use kwatch_core::{ChangeEvent, ObjectKey, ObjectRecord, ResourceKind, Store, VersionToken};
use kwatch_sync::{
    delta_queue, BackoffPolicy, CoalescePolicy, Popped, Query, Reflector, ReflectorConfig,
    ReflectorStats, ScriptedSource, SourceError, SyncError, SyncState, WatchFrame, WatchScript,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn svc(name: &str, rv: u64, port: u64) -> ObjectRecord {
    ObjectRecord::from_value(json!({
        "metadata": {"namespace": "default", "name": name, "resourceVersion": rv.to_string()},
        "spec": {"ports": [{"port": port}]}
    }))
    .expect("record")
}

fn query() -> Query {
    Query::new(ResourceKind::Services).in_namespace("default")
}

fn lenient() -> ReflectorConfig {
    ReflectorConfig {
        fail_fast: false,
        ..ReflectorConfig::default()
    }
}

struct Outcome {
    events: Vec<ChangeEvent>,
    result: Result<ReflectorStats, SyncError>,
    store: Store,
}

impl Outcome {
    fn stats(&self) -> &ReflectorStats {
        self.result.as_ref().expect("reflector failed")
    }

    fn lines(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|e| match e {
                ChangeEvent::Added(r) => format!("add {}@{}", r.key(), r.version()),
                ChangeEvent::Modified { old, new } => {
                    format!("update {}@{} to {}", old.key(), old.version(), new.version())
                }
                ChangeEvent::Deleted(r) => format!("delete {}@{}", r.key(), r.version()),
            })
            .collect()
    }
}

/// Run a reflector for `settle` of virtual time, cancel it, then drain the
/// queue.
async fn run_for(source: Arc<ScriptedSource>, config: ReflectorConfig, settle: Duration) -> Outcome {
    let (producer, mut consumer) = delta_queue(1024, CoalescePolicy::Never);
    let store = Store::new();
    let cancel = CancellationToken::new();
    let reflector = Reflector::new(source, query(), store.clone(), producer, config, cancel.clone());
    let handle = tokio::spawn(reflector.run());

    tokio::time::sleep(settle).await;
    cancel.cancel();
    let result = handle.await.expect("join");

    let mut events = Vec::new();
    while let Popped::Event(event) = consumer.pop().await {
        events.push(event);
    }
    Outcome { events, result, store }
}

async fn run(source: Arc<ScriptedSource>, config: ReflectorConfig) -> Outcome {
    run_for(source, config, Duration::from_secs(120)).await
}

// ---------------------------------------------------------------------------
// Listing and watching
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn initial_list_emits_adds_in_list_order() {
    let source = Arc::new(ScriptedSource::new());
    source.push_page(vec![svc("b", 2, 80), svc("a", 1, 80)], "5");

    let out = run(source.clone(), ReflectorConfig::default()).await;

    assert_eq!(out.lines(), vec!["add default/b@2", "add default/a@1"]);
    assert_eq!(out.store.len(), 2);
    assert_eq!(out.stats().lists, 1);
    assert_eq!(source.watch_tokens(), vec![VersionToken::from("5")]);
}

#[tokio::test(start_paused = true)]
async fn add_update_delete_end_to_end() {
    let source = Arc::new(ScriptedSource::new());
    source.push_page(Vec::new(), "1").push_open_session(vec![
        WatchFrame::Added(svc("x", 2, 80)),
        WatchFrame::Modified(svc("x", 3, 8080)),
        WatchFrame::Deleted(svc("x", 4, 8080)),
    ]);

    let out = run(source, ReflectorConfig::default()).await;

    assert_eq!(
        out.lines(),
        vec!["add default/x@2", "update default/x@2 to 3", "delete default/x@4"]
    );
    assert!(out.store.is_empty());
    assert_eq!(out.stats().events_emitted, 3);
}

#[tokio::test(start_paused = true)]
async fn store_matches_replay_of_emitted_events() {
    let source = Arc::new(ScriptedSource::new());
    source
        .push_page(vec![svc("a", 1, 80), svc("b", 2, 80)], "2")
        .push_open_session(vec![
            WatchFrame::Modified(svc("a", 3, 81)),
            WatchFrame::Added(svc("c", 4, 80)),
            WatchFrame::Deleted(svc("b", 5, 80)),
            WatchFrame::Modified(svc("c", 6, 82)),
        ]);

    let out = run(source, ReflectorConfig::default()).await;

    assert_eq!(out.store.snapshot(), Store::replay(&out.events).snapshot());
}

#[tokio::test(start_paused = true)]
async fn ordering_is_identical_across_runs() {
    let script = || {
        let source = Arc::new(ScriptedSource::new());
        source
            .push_page(vec![svc("m", 1, 80), svc("n", 2, 80)], "2")
            .push_session(vec![
                WatchFrame::Modified(svc("n", 3, 81)),
                WatchFrame::Added(svc("o", 4, 80)),
            ])
            .push_watch_error(SourceError::Expired { token: "4".into() })
            .push_page(vec![svc("m", 1, 80), svc("o", 5, 90)], "5");
        source
    };

    let first = run(script(), ReflectorConfig::default()).await.lines();
    for _ in 0..4 {
        assert_eq!(run(script(), ReflectorConfig::default()).await.lines(), first);
    }
    assert_eq!(
        first,
        vec![
            "add default/m@1",
            "add default/n@2",
            "update default/n@2 to 3",
            "add default/o@4",
            "update default/o@4 to 5",
            "delete default/n@3",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn bookmark_advances_resume_token_without_events() {
    let source = Arc::new(ScriptedSource::new());
    source
        .push_page(Vec::new(), "1")
        .push_session(vec![WatchFrame::Bookmark("50".into())]);

    let out = run(source.clone(), ReflectorConfig::default()).await;

    assert!(out.events.is_empty());
    assert_eq!(
        source.watch_tokens()[..2],
        [VersionToken::from("1"), VersionToken::from("50")]
    );
}

#[tokio::test(start_paused = true)]
async fn frames_repair_inconsistent_history() {
    let source = Arc::new(ScriptedSource::new());
    source.push_page(vec![svc("a", 1, 80)], "1").push_open_session(vec![
        // Unknown key: treated as an add.
        WatchFrame::Modified(svc("ghost", 2, 80)),
        // Absent key: still reported.
        WatchFrame::Deleted(svc("phantom", 3, 80)),
        // Identical re-add: nothing.
        WatchFrame::Added(svc("a", 1, 80)),
        // Differing re-add: an update.
        WatchFrame::Added(svc("a", 4, 443)),
    ]);

    let out = run(source, ReflectorConfig::default()).await;

    assert_eq!(
        out.lines(),
        vec![
            "add default/a@1",
            "add default/ghost@2",
            "delete default/phantom@3",
            "update default/a@1 to 4",
        ]
    );
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn expired_token_relists_and_synthesizes_deletes() {
    let source = Arc::new(ScriptedSource::new());
    source
        .push_page(vec![svc("a", 1, 80), svc("b", 2, 80), svc("c", 3, 80)], "3")
        .push_watch_error(SourceError::Expired { token: "3".into() })
        .push_page(vec![svc("b", 2, 80)], "9");

    let out = run(source.clone(), ReflectorConfig::default()).await;

    assert_eq!(
        out.lines()[3..],
        ["delete default/a@1", "delete default/c@3"]
    );
    assert_eq!(out.store.keys(), vec![ObjectKey::new("default", "b")]);
    assert_eq!(out.stats().expirations, 1);
    assert_eq!(source.list_calls(), 2);
    assert_eq!(source.watch_tokens().last(), Some(&VersionToken::from("9")));
}

#[tokio::test(start_paused = true)]
async fn expiry_mid_stream_relists() {
    let source = Arc::new(ScriptedSource::new());
    source
        .push_page(vec![svc("a", 1, 80)], "1")
        .push_watch(WatchScript::Session {
            frames: vec![
                Ok(WatchFrame::Added(svc("b", 2, 80))),
                Err(SourceError::Expired { token: "2".into() }),
            ],
            hold_open: false,
        })
        .push_page(vec![svc("a", 1, 80), svc("b", 2, 80)], "7");

    let out = run(source.clone(), ReflectorConfig::default()).await;

    // The relist finds nothing new.
    assert_eq!(out.lines(), vec!["add default/a@1", "add default/b@2"]);
    assert_eq!(source.list_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_resume_from_same_token() {
    let source = Arc::new(ScriptedSource::new());
    source
        .push_page(vec![svc("a", 1, 80)], "1")
        .push_watch_error(SourceError::Transport("connection reset".into()))
        .push_watch_error(SourceError::Timeout("no response".into()))
        .push_watch_error(SourceError::Status {
            code: 500,
            message: "internal".into(),
        })
        .push_open_session(vec![WatchFrame::Modified(svc("a", 2, 81))]);

    let out = run(source.clone(), ReflectorConfig::default()).await;

    let stats = out.stats();
    assert_eq!(stats.watches_opened, 1);
    assert_eq!(stats.watch_failures, 3);
    assert_eq!(stats.lists, 1, "no relist for transient failures");
    assert_eq!(out.lines(), vec!["add default/a@1", "update default/a@1 to 2"]);
    assert!(source
        .watch_tokens()
        .iter()
        .take(4)
        .all(|t| t.as_str() == "1"));
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_grow_between_attempts() {
    let source = Arc::new(ScriptedSource::new());
    source.push_page(Vec::new(), "1");
    for _ in 0..3 {
        source.push_watch_error(SourceError::Transport("down".into()));
    }

    // Attempts at 0, 200ms and 600ms; the next one would be due at 1400ms.
    let out = run_for(source.clone(), ReflectorConfig::default(), Duration::from_millis(700)).await;
    assert_eq!(out.stats().watch_failures, 3);
    assert_eq!(source.watch_tokens().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn repeated_resume_failures_fall_back_to_listing() {
    let source = Arc::new(ScriptedSource::new());
    source.push_page(vec![svc("a", 1, 80)], "1");
    for _ in 0..5 {
        source.push_watch_error(SourceError::Transport("down".into()));
    }

    let out = run(source.clone(), ReflectorConfig::default()).await;

    assert_eq!(source.list_calls(), 2);
    assert_eq!(out.stats().watch_failures, 5);
    // Identical relist emits nothing new.
    assert_eq!(out.lines(), vec!["add default/a@1"]);
}

#[tokio::test(start_paused = true)]
async fn clean_stream_end_counts_as_failure() {
    let source = Arc::new(ScriptedSource::new());
    source
        .push_page(Vec::new(), "1")
        .push_session(Vec::new())
        .push_session(Vec::new());

    let out = run(source.clone(), ReflectorConfig::default()).await;

    assert_eq!(out.stats().watches_opened, 3);
    assert_eq!(out.stats().watch_failures, 2);
}

#[tokio::test(start_paused = true)]
async fn startup_list_failure_is_fatal() {
    let source = Arc::new(ScriptedSource::new());
    source.push_list(Err(SourceError::Transport("connection refused".into())));

    let out = run(source.clone(), ReflectorConfig::default()).await;

    assert!(matches!(
        out.result,
        Err(SyncError::Startup {
            source: SourceError::Transport(_),
            ..
        })
    ));
    assert!(out.events.is_empty());
    assert_eq!(source.watch_tokens().len(), 0);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_is_fatal_even_when_lenient() {
    let source = Arc::new(ScriptedSource::new());
    source.push_list(Err(SourceError::Unauthorized("bad token".into())));

    let out = run(source, lenient()).await;

    let err = out.result.expect_err("must fail");
    assert!(err.to_string().contains("services in namespace default"), "{err}");
}

#[tokio::test(start_paused = true)]
async fn malformed_list_token_is_fatal_even_when_lenient() {
    let source = Arc::new(ScriptedSource::new());
    source.push_list(Err(VersionToken::parse("").expect_err("empty token").into()));

    let out = run(source.clone(), lenient()).await;

    assert!(matches!(
        out.result,
        Err(SyncError::Startup {
            source: SourceError::MalformedToken(_),
            ..
        })
    ));
    assert_eq!(source.list_calls(), 1);
    assert!(source.watch_tokens().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lenient_startup_retries_list() {
    let source = Arc::new(ScriptedSource::new());
    source
        .push_list(Err(SourceError::Transport("refused".into())))
        .push_list(Err(SourceError::Timeout("slow".into())))
        .push_page(vec![svc("a", 1, 80)], "1");

    let out = run(source.clone(), lenient()).await;

    assert_eq!(source.list_calls(), 3);
    assert_eq!(out.lines(), vec!["add default/a@1"]);
}

// ---------------------------------------------------------------------------
// Resync
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn resync_of_unchanged_collection_is_silent() {
    let source = Arc::new(ScriptedSource::new());
    source.push_page(vec![svc("a", 1, 80), svc("b", 2, 80)], "2");

    let config = ReflectorConfig {
        resync_secs: 10,
        ..ReflectorConfig::default()
    };
    let out = run_for(source.clone(), config, Duration::from_secs(35)).await;

    assert_eq!(out.stats().resyncs, 3);
    assert_eq!(source.list_calls(), 4);
    assert_eq!(out.events.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn resync_heals_missed_changes() {
    let source = Arc::new(ScriptedSource::new());
    source
        .push_page(vec![svc("a", 1, 80), svc("b", 2, 80)], "2")
        .push_page(vec![svc("a", 7, 8080), svc("c", 8, 80)], "8");

    let config = ReflectorConfig {
        resync_secs: 10,
        ..ReflectorConfig::default()
    };
    let out = run_for(source, config, Duration::from_secs(15)).await;

    assert_eq!(
        out.lines()[2..],
        [
            "update default/a@1 to 7",
            "add default/c@8",
            "delete default/b@2",
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_resync_keeps_watching() {
    let source = Arc::new(ScriptedSource::new());
    source
        .push_page(vec![svc("a", 1, 80)], "1")
        .push_list(Err(SourceError::Transport("flaky".into())));

    let config = ReflectorConfig {
        resync_secs: 10,
        ..ReflectorConfig::default()
    };
    let out = run_for(source.clone(), config, Duration::from_secs(15)).await;

    assert!(out.result.is_ok());
    assert_eq!(out.stats().resyncs, 0);
    assert_eq!(source.watch_tokens().len(), 2);
}

// ---------------------------------------------------------------------------
// Shutdown and status
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn cancel_during_backoff_stops_promptly() {
    let source = Arc::new(ScriptedSource::new());
    let policy = BackoffPolicy {
        base_delay_ms: 60_000,
        max_delay_ms: 60_000,
        max_resume_attempts: 5,
    };
    source
        .push_page(Vec::new(), "1")
        .push_watch_error(SourceError::Transport("down".into()));

    let config = ReflectorConfig {
        backoff: policy,
        ..ReflectorConfig::default()
    };
    let started = tokio::time::Instant::now();
    let out = run_for(source.clone(), config, Duration::from_secs(1)).await;

    assert!(out.result.is_ok());
    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(source.watch_tokens().len(), 1, "no call after cancellation");
}

#[tokio::test(start_paused = true)]
async fn status_tracks_state_and_token() {
    let source = Arc::new(ScriptedSource::new());
    source.push_page(vec![svc("a", 1, 80)], "42");

    let (producer, mut consumer) = delta_queue(16, CoalescePolicy::Never);
    let cancel = CancellationToken::new();
    let reflector = Reflector::new(
        source,
        query(),
        Store::new(),
        producer,
        ReflectorConfig::default(),
        cancel.clone(),
    );
    let mut status = reflector.status();
    let handle = tokio::spawn(reflector.run());

    let watching = status
        .wait_for(|s| s.state == SyncState::Watching)
        .await
        .expect("status")
        .clone();
    assert_eq!(watching.resume_token.as_str(), "42");
    assert_eq!(watching.objects, 1);
    assert_eq!(watching.lists, 1);
    assert!(watching.last_list_at.is_some());

    cancel.cancel();
    handle.await.expect("join").expect("run");
    assert_eq!(status.borrow().state, SyncState::Stopped);
    assert!(matches!(consumer.pop().await, Popped::Event(_)));
    assert_eq!(consumer.pop().await, Popped::Closed);
}

#[tokio::test(start_paused = true)]
async fn closed_queue_stops_reflector() {
    let source = Arc::new(ScriptedSource::new());
    source.push_page(vec![svc("a", 1, 80)], "1");

    let (producer, consumer) = delta_queue(4, CoalescePolicy::Never);
    drop(consumer);
    let reflector = Reflector::new(
        source,
        query(),
        Store::new(),
        producer,
        ReflectorConfig::default(),
        CancellationToken::new(),
    );

    assert!(matches!(reflector.run().await, Err(SyncError::QueueClosed)));
}
