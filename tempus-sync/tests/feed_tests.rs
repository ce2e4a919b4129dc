use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempus_model::RawDocument;
use tempus_sync::mock::MockFeed;
use tempus_sync::{Change, ChangeBatch, ChangeFeed, ChangeType, FeedHandle, FeedMessage};
use tempus_types::CollectionId;
use tokio::sync::mpsc;

fn pricing() -> CollectionId {
    CollectionId::from("pricing")
}

fn counting_handle() -> (FeedHandle, Arc<AtomicUsize>) {
    let count = Arc::new(AtomicUsize::new(0));
    let seen = count.clone();
    let handle = FeedHandle::new(move || {
        seen.fetch_add(1, Ordering::SeqCst);
    });
    (handle, count)
}

// ── FeedHandle ───────────────────────────────────────────────────

#[test]
fn cancel_runs_action_once() {
    let (handle, count) = counting_handle();
    handle.cancel();
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn drop_cancels() {
    let (handle, count) = counting_handle();
    drop(handle);
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[test]
fn noop_handle_debug() {
    let handle = FeedHandle::noop();
    assert_eq!(format!("{handle:?}"), "FeedHandle { active: false }");
    handle.cancel();
}

// ── ChangeBatch ──────────────────────────────────────────────────

#[test]
fn batch_constructors() {
    let live = ChangeBatch::new(vec![Change::added(RawDocument::new("a", json!({})))]);
    assert!(!live.initial_snapshot);
    assert_eq!(live.len(), 1);

    let snapshot = ChangeBatch::snapshot(vec![]);
    assert!(snapshot.initial_snapshot);
    assert!(snapshot.is_empty());
}

#[test]
fn batch_deserializes_from_feed_json() {
    let batch: ChangeBatch = serde_json::from_value(json!({
        "changes": [
            { "change_type": "added", "document": { "id": "a1", "fields": { "plan": "x" } } },
            { "change_type": "removed", "document": { "id": "a0" } }
        ]
    }))
    .unwrap();

    assert!(!batch.initial_snapshot);
    assert_eq!(batch.changes[0].change_type, ChangeType::Added);
    assert_eq!(batch.changes[0].document.get("plan"), Some(&json!("x")));
    assert_eq!(batch.changes[1].change_type, ChangeType::Removed);
    assert!(batch.changes[1].document.fields.is_empty());
}

// ── MockFeed ─────────────────────────────────────────────────────

#[tokio::test]
async fn mock_delivers_into_sink() {
    let feed = MockFeed::new();
    let (tx, mut rx) = mpsc::channel(4);
    let _handle = feed.subscribe(&pricing(), tx).await.unwrap();

    assert!(feed.is_subscribed(&pricing()));
    assert!(feed.push(&pricing(), ChangeBatch::snapshot(vec![])));
    assert!(matches!(rx.recv().await, Some(FeedMessage::Batch(b)) if b.initial_snapshot));

    assert!(feed.fail(&pricing(), "boom").await);
    assert!(matches!(rx.recv().await, Some(FeedMessage::Error(ref c)) if c == "boom"));
}

#[tokio::test]
async fn mock_push_fails_when_queue_full() {
    let feed = MockFeed::new();
    let (tx, _rx) = mpsc::channel(1);
    let _handle = feed.subscribe(&pricing(), tx).await.unwrap();

    assert!(feed.push(&pricing(), ChangeBatch::new(vec![])));
    assert!(!feed.push(&pricing(), ChangeBatch::new(vec![])));
}

#[tokio::test]
async fn stale_handle_does_not_drop_newer_sink() {
    let feed = MockFeed::new();
    let (tx1, _rx1) = mpsc::channel(4);
    let (tx2, mut rx2) = mpsc::channel(4);

    let first = feed.subscribe(&pricing(), tx1).await.unwrap();
    let _second = feed.subscribe(&pricing(), tx2).await.unwrap();
    first.cancel();

    assert!(feed.push(&pricing(), ChangeBatch::new(vec![])));
    assert!(rx2.recv().await.is_some());
    assert_eq!(feed.subscribe_calls(&pricing()), 2);
}

#[tokio::test]
async fn mock_close_ends_stream() {
    let feed = MockFeed::new();
    let (tx, mut rx) = mpsc::channel(4);
    let _handle = feed.subscribe(&pricing(), tx).await.unwrap();

    feed.close(&pricing());

    assert!(rx.recv().await.is_none());
    assert!(!feed.push(&pricing(), ChangeBatch::new(vec![])));
}

#[tokio::test]
async fn refused_subscription() {
    let feed = MockFeed::new();
    feed.refuse(&pricing());
    let (tx, _rx) = mpsc::channel(4);

    assert!(feed.subscribe(&pricing(), tx).await.is_err());
    assert!(!feed.is_subscribed(&pricing()));
}

#[test]
fn change_constructors_set_type() {
    let doc = RawDocument::new("a", json!({}));
    assert_eq!(Change::added(doc.clone()).change_type, ChangeType::Added);
    assert_eq!(Change::modified(doc.clone()).change_type, ChangeType::Modified);
    assert_eq!(Change::removed(doc).change_type, ChangeType::Removed);
}
