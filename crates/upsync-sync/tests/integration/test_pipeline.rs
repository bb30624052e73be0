//! Worker pool behavior exercised directly through UploadPipeline

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use upsync_core::domain::{HeaderResolver, RelPath};
use upsync_core::ports::TransferError;
use upsync_sync::pipeline::{PipelineContext, UploadPipeline};
use upsync_sync::retry::{RejectReason, RetryPolicy};
use upsync_sync::SyncError;

use crate::common::{self, recoverable, RecordingStore};

fn context(store: Arc<RecordingStore>, ws: &common::Workspace, workers: usize) -> PipelineContext {
    PipelineContext {
        store,
        resolver: Arc::new(HeaderResolver::default()),
        source_root: ws.source.clone(),
        bucket: "test-bucket".into(),
        workers,
        retry: RetryPolicy::new(5, Duration::from_millis(2)),
        max_pending_retries: 64,
        dry_run: false,
        cancel: CancellationToken::new(),
    }
}

fn paths(names: &[String]) -> Vec<RelPath> {
    names.iter().map(|n| n.parse().unwrap()).collect()
}

#[tokio::test]
async fn test_every_path_uploaded_exactly_once() {
    let names: Vec<String> = (0..40).map(|i| format!("dir{}/file{i:02}.txt", i % 3)).collect();
    let contents: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "content")).collect();
    let ws = common::workspace(&contents);
    let store = RecordingStore::new();

    let report = UploadPipeline::new(context(store.clone(), &ws, 4))
        .run(paths(&names))
        .await
        .unwrap();

    assert_eq!(store.calls().len(), 40);
    assert_eq!(store.keys().len(), 40);
    assert_eq!(report.succeeded.len(), 40);
    assert!(report.failures.is_empty());
    assert!(report.abandoned.is_empty());
    assert!(!report.cancelled);
}

#[tokio::test]
async fn test_retries_interleave_with_other_work() {
    let ws = common::workspace(&[("slow.txt", "s"), ("a.txt", "a"), ("b.txt", "b")]);
    let store = RecordingStore::new();
    store.fail_times("slow.txt", 3, recoverable);
    let mut ctx = context(store.clone(), &ws, 1);
    ctx.retry = RetryPolicy::new(5, Duration::from_millis(20));

    let report = UploadPipeline::new(ctx)
        .run(paths(&["slow.txt".into(), "a.txt".into(), "b.txt".into()]))
        .await
        .unwrap();

    // With one worker the others go through while slow.txt waits on its timer.
    let order: Vec<String> = store.calls().into_iter().map(|c| c.key).collect();
    assert_eq!(&order[..3], &["slow.txt", "a.txt", "b.txt"]);
    assert_eq!(store.calls_for("slow.txt").len(), 4);
    assert_eq!(report.succeeded.len(), 3);
    assert_eq!(report.retries.len(), 3);
    let attempts: Vec<u32> = report.retries.iter().map(|r| r.attempt).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_full_retry_queue_rejects_with_overflow() {
    let ws = common::workspace(&[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")]);
    let store = RecordingStore::new();
    for key in ["a.txt", "b.txt", "c.txt"] {
        store.fail_always(key, recoverable);
    }
    let mut ctx = context(store.clone(), &ws, 3);
    ctx.max_pending_retries = 0;

    let report = UploadPipeline::new(ctx)
        .run(paths(&["a.txt".into(), "b.txt".into(), "c.txt".into()]))
        .await
        .unwrap();

    assert_eq!(store.calls().len(), 3);
    assert_eq!(report.failures.len(), 3);
    assert!(report
        .failures
        .iter()
        .all(|f| f.reason == RejectReason::Overflow && f.attempts == 1));
    assert!(report.retries.is_empty());
}

#[tokio::test]
async fn test_missing_local_file_is_rejected_not_retried() {
    let ws = common::workspace(&[("present.txt", "here")]);
    let store = RecordingStore::new();

    let report = UploadPipeline::new(context(store.clone(), &ws, 2))
        .run(paths(&["present.txt".into(), "gone.txt".into()]))
        .await
        .unwrap();

    assert_eq!(store.keys(), vec!["present.txt"]);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.path.as_str(), "gone.txt");
    assert_eq!(failure.code, "LOCAL_IO");
    assert_eq!(failure.reason, RejectReason::Fatal);
}

#[tokio::test]
async fn test_throttle_hint_extends_backoff() {
    let ws = common::workspace(&[("t.txt", "t")]);
    let store = RecordingStore::new();
    store.fail_times("t.txt", 1, || TransferError::Throttled {
        retry_after: Some(Duration::from_millis(50)),
    });

    let report = UploadPipeline::new(context(store.clone(), &ws, 1))
        .run(paths(&["t.txt".into()]))
        .await
        .unwrap();

    assert_eq!(report.retries[0].delay, Duration::from_millis(50));
    let calls = store.calls_for("t.txt");
    assert!(calls[1].at - calls[0].at >= Duration::from_millis(50));
}

#[tokio::test]
async fn test_empty_input_makes_no_calls() {
    let ws = common::workspace(&[("a.txt", "a")]);
    let store = RecordingStore::new();

    let report = UploadPipeline::new(context(store.clone(), &ws, 4))
        .run(Vec::new())
        .await
        .unwrap();

    assert!(store.calls().is_empty());
    assert!(report.succeeded.is_empty());
    assert!(report.failures.is_empty());
}

#[tokio::test]
async fn test_worker_panic_fails_the_run_instead_of_hanging() {
    let names: Vec<String> = std::iter::once("boom.txt".to_string())
        .chain((0..5).map(|i| format!("ok{i}.txt")))
        .collect();
    let contents: Vec<(&str, &str)> = names.iter().map(|n| (n.as_str(), "x")).collect();
    let ws = common::workspace(&contents);
    let store = RecordingStore::new();
    store.panic_on("boom.txt");

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        UploadPipeline::new(context(store.clone(), &ws, 3)).run(paths(&names)),
    )
    .await
    .expect("pipeline hung after a worker panicked");

    match result {
        Err(SyncError::TaskFailed(message)) => assert!(message.contains("panic")),
        other => panic!("expected TaskFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn test_single_worker_panic_fails_the_run() {
    let ws = common::workspace(&[("boom.txt", "b"), ("ok.txt", "o")]);
    let store = RecordingStore::new();
    store.panic_on("boom.txt");

    let result = tokio::time::timeout(
        Duration::from_secs(3),
        UploadPipeline::new(context(store.clone(), &ws, 1))
            .run(paths(&["boom.txt".into(), "ok.txt".into()])),
    )
    .await
    .expect("pipeline hung after a worker panicked");

    assert!(matches!(result, Err(SyncError::TaskFailed(_))));
}

#[tokio::test]
async fn test_cancel_during_backoff_abandons_waiting_item() {
    let ws = common::workspace(&[("wait.txt", "w"), ("ok.txt", "o")]);
    let store = RecordingStore::new();
    store.fail_always("wait.txt", recoverable);
    let mut ctx = context(store.clone(), &ws, 2);
    ctx.retry = RetryPolicy::new(10, Duration::from_secs(30));
    let cancel = ctx.cancel.clone();

    let run = tokio::spawn(async move {
        UploadPipeline::new(ctx)
            .run(paths(&["wait.txt".into(), "ok.txt".into()]))
            .await
    });
    while store.calls().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();

    let report = tokio::time::timeout(Duration::from_secs(5), run)
        .await
        .expect("pipeline did not stop after cancellation")
        .unwrap()
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.succeeded, paths(&["ok.txt".into()]));
    assert_eq!(report.abandoned, paths(&["wait.txt".into()]));
    assert!(report.failures.is_empty());
}
