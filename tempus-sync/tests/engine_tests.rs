use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempus_model::{BusinessKey, Catalog, CollectionConfig, RawDocument, SortField};
use tempus_store::{LocalStore, Predicate};
use tempus_sync::mock::MockFeed;
use tempus_sync::{
    Change, ChangeBatch, ChangeFeed, FeedHandle, FeedMessage, FeedSender, ListenerState,
    RejectionKind, SyncConfig, SyncEngine, SyncError, SyncEvent, SyncResult,
};
use tempus_types::{CollectionId, DocumentId, StoreName, Timestamp};
use tokio::sync::broadcast;
use tokio::time::timeout;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn pricing() -> CollectionId {
    CollectionId::from("pricing")
}

fn price() -> StoreName {
    StoreName::from("price")
}

fn catalog() -> Arc<Catalog> {
    Arc::new(
        Catalog::new()
            .with_collection("pricing", CollectionConfig::new(["plan"]))
            .with_collection("plans", CollectionConfig::new(["code"]).with_default_store("plan"))
            .with_sort("price", vec![SortField::asc("plan")]),
    )
}

fn make_engine() -> (SyncEngine, MockFeed) {
    init_tracing();
    let feed = MockFeed::new();
    let engine = SyncEngine::new(catalog(), Arc::new(feed.clone()), SyncConfig::default());
    (engine, feed)
}

fn added(id: &str, plan: &str, from: i64) -> Change {
    Change::added(RawDocument::new(
        id,
        json!({ "storeName": "price", "plan": plan, "effectiveFrom": from }),
    ))
}

fn removed(id: &str) -> Change {
    Change::removed(RawDocument::new(id, json!({})))
}

fn ids(docs: &[tempus_model::Document]) -> Vec<&str> {
    docs.iter().map(|d| d.id.as_str()).collect()
}

fn ms(v: i64) -> Timestamp {
    Timestamp::from_millis(v)
}

async fn ready(engine: &SyncEngine, collection: &CollectionId) {
    timeout(Duration::from_secs(5), engine.ready(collection))
        .await
        .expect("collection never became ready");
}

/// Waits for the next event matching `pred`.
async fn wait_for_event(
    events: &mut broadcast::Receiver<SyncEvent>,
    pred: impl Fn(&SyncEvent) -> bool,
) -> SyncEvent {
    timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event never arrived")
}

async fn next_batch(events: &mut broadcast::Receiver<SyncEvent>) -> SyncEvent {
    wait_for_event(events, |e| matches!(e, SyncEvent::BatchApplied { .. })).await
}

/// Runs scenario A through the engine: a1 then a2 for the same plan.
async fn load_scenario_a(engine: &SyncEngine, feed: &MockFeed) {
    engine.subscribe(&pricing(), &[price()]).await.unwrap();
    assert!(feed.push(&pricing(), ChangeBatch::snapshot(vec![added("a1", "planX", 100)])));
    ready(engine, &pricing()).await;

    let mut events = engine.events();
    assert!(feed.push(&pricing(), ChangeBatch::new(vec![added("a2", "planX", 200)])));
    next_batch(&mut events).await;
}

// ── Subscribe & ready ────────────────────────────────────────────

#[tokio::test]
async fn snapshot_makes_collection_ready() {
    let (engine, feed) = make_engine();
    engine.subscribe(&pricing(), &[price()]).await.unwrap();
    assert!(!engine.is_ready(&pricing()));
    assert_eq!(engine.listener_state(&pricing()), ListenerState::Subscribing);

    feed.push(
        &pricing(),
        ChangeBatch::snapshot(vec![added("a1", "planX", 100), added("b1", "planY", 100)]),
    );
    ready(&engine, &pricing()).await;

    assert!(engine.is_ready(&pricing()));
    assert_eq!(engine.listener_state(&pricing()), ListenerState::Syncing { ready: true });
    assert_eq!(ids(&engine.resolve(&price(), None, Some(ms(150)))), vec!["a1", "b1"]);
}

#[tokio::test]
async fn empty_snapshot_is_ready() {
    let (engine, feed) = make_engine();
    engine.subscribe(&pricing(), &[]).await.unwrap();

    feed.push(&pricing(), ChangeBatch::snapshot(vec![]));
    ready(&engine, &pricing()).await;

    assert!(engine.resolve(&price(), None, None).is_empty());
}

#[tokio::test]
async fn live_batches_before_snapshot_do_not_signal_ready() {
    let (engine, feed) = make_engine();
    let mut events = engine.events();
    engine.subscribe(&pricing(), &[]).await.unwrap();

    feed.push(&pricing(), ChangeBatch::new(vec![added("a1", "planX", 100)]));
    next_batch(&mut events).await;

    assert!(!engine.is_ready(&pricing()));
    assert_eq!(engine.listener_state(&pricing()), ListenerState::Syncing { ready: false });
    assert_eq!(engine.list(&price()).len(), 1);
}

#[tokio::test]
async fn ready_resolves_immediately_once_ready() {
    let (engine, feed) = make_engine();
    engine.subscribe(&pricing(), &[]).await.unwrap();
    feed.push(&pricing(), ChangeBatch::snapshot(vec![]));
    ready(&engine, &pricing()).await;

    timeout(Duration::from_millis(100), engine.ready(&pricing()))
        .await
        .expect("second ready call should not block");
}

#[tokio::test]
async fn ready_never_resolves_without_subscription() {
    let (engine, _feed) = make_engine();
    let waited = timeout(Duration::from_millis(50), engine.ready(&pricing())).await;
    assert!(waited.is_err());
}

#[tokio::test]
async fn subscribe_unknown_collection_fails() {
    let (engine, feed) = make_engine();
    let err = engine.subscribe(&CollectionId::from("nope"), &[]).await.unwrap_err();

    assert!(matches!(err, SyncError::UnknownCollection(ref c) if c.as_str() == "nope"));
    assert_eq!(feed.subscribe_calls(&CollectionId::from("nope")), 0);
}

#[tokio::test]
async fn default_store_used_when_document_names_none() {
    let (engine, feed) = make_engine();
    let plans = CollectionId::from("plans");
    engine.subscribe(&plans, &[]).await.unwrap();

    feed.push(
        &plans,
        ChangeBatch::snapshot(vec![Change::added(RawDocument::new(
            "p1",
            json!({ "code": "gold", "effectiveFrom": 0 }),
        ))]),
    );
    ready(&engine, &plans).await;

    assert_eq!(ids(&engine.list(&StoreName::from("plan"))), vec!["p1"]);
}

// ── Scenarios ────────────────────────────────────────────────────

#[tokio::test]
async fn supersede_through_engine() {
    let (engine, feed) = make_engine();
    load_scenario_a(&engine, &feed).await;

    let a1 = engine.store().get(&price(), &DocumentId::from("a1")).unwrap();
    assert_eq!(a1.effective_to, Some(ms(200)));

    let by_key = Predicate::key(BusinessKey::single("planX"));
    assert_eq!(ids(&engine.resolve(&price(), Some(&by_key), Some(ms(150)))), vec!["a1"]);
    assert_eq!(ids(&engine.resolve(&price(), Some(&by_key), Some(ms(250)))), vec!["a2"]);
}

#[tokio::test]
async fn removal_does_not_reopen_previous_version() {
    let (engine, feed) = make_engine();
    load_scenario_a(&engine, &feed).await;

    let mut events = engine.events();
    feed.push(&pricing(), ChangeBatch::new(vec![removed("a2")]));
    next_batch(&mut events).await;

    let docs = engine.list(&price());
    assert_eq!(ids(&docs), vec!["a1"]);
    assert_eq!(docs[0].effective_to, Some(ms(200)));
    assert!(engine.resolve(&price(), None, Some(ms(250))).is_empty());
}

#[tokio::test]
async fn removal_with_store_hint_and_unknown_id() {
    let (engine, feed) = make_engine();
    load_scenario_a(&engine, &feed).await;

    let mut events = engine.events();
    let hinted = Change::removed(RawDocument::new("a1", json!({ "storeName": "price" })));
    feed.push(&pricing(), ChangeBatch::new(vec![hinted, removed("ghost")]));
    let event = next_batch(&mut events).await;

    assert!(matches!(event, SyncEvent::BatchApplied { applied: 2, rejected: 0, .. }));
    assert_eq!(ids(&engine.list(&price())), vec!["a2"]);
}

#[tokio::test]
async fn unsubscribe_stops_applying_batches() {
    let (engine, feed) = make_engine();
    load_scenario_a(&engine, &feed).await;
    let before = engine.list(&price());

    assert!(engine.unsubscribe(&pricing()).await);
    let pushed = feed.push(&pricing(), ChangeBatch::new(vec![added("a3", "planX", 300)]));
    tokio::task::yield_now().await;

    assert!(!pushed);
    assert!(!feed.is_subscribed(&pricing()));
    assert_eq!(engine.list(&price()), before);
    assert_eq!(engine.listener_state(&pricing()), ListenerState::Unsubscribed);
}

/// A feed that hands its sinks to the test and ignores cancellation, so
/// batches can be injected after the engine has let go.
#[derive(Default)]
struct LeakyFeed {
    sinks: Mutex<Vec<FeedSender>>,
}

#[async_trait]
impl ChangeFeed for LeakyFeed {
    async fn subscribe(
        &self,
        _collection: &CollectionId,
        sink: FeedSender,
    ) -> SyncResult<FeedHandle> {
        self.sinks.lock().unwrap().push(sink);
        Ok(FeedHandle::noop())
    }
}

#[tokio::test]
async fn batch_sent_after_unsubscribe_is_never_applied() {
    init_tracing();
    let feed = Arc::new(LeakyFeed::default());
    let engine = SyncEngine::new(catalog(), feed.clone(), SyncConfig::default());
    engine.subscribe(&pricing(), &[]).await.unwrap();
    let sink = feed.sinks.lock().unwrap()[0].clone();

    sink.send(FeedMessage::Batch(ChangeBatch::snapshot(vec![added("a1", "planX", 100)])))
        .await
        .unwrap();
    ready(&engine, &pricing()).await;

    engine.unsubscribe(&pricing()).await;
    let late = sink
        .send(FeedMessage::Batch(ChangeBatch::new(vec![added("a2", "planX", 200)])))
        .await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(late.is_err());
    assert_eq!(ids(&engine.list(&price())), vec!["a1"]);
    assert!(engine.list(&price())[0].is_open());
}

// ── Resubscribe ──────────────────────────────────────────────────

#[tokio::test]
async fn resubscribe_replaces_registration() {
    let (engine, feed) = make_engine();
    load_scenario_a(&engine, &feed).await;

    let second = engine.subscribe(&pricing(), &[price()]).await.unwrap();
    assert_eq!(feed.subscribe_calls(&pricing()), 2);
    assert_eq!(engine.subscribed_collections(), vec![pricing()]);
    assert_eq!(engine.status(&pricing()).subscription_id, Some(second));
    assert!(!engine.is_ready(&pricing()));

    feed.push(
        &pricing(),
        ChangeBatch::snapshot(vec![added("a1", "planX", 100), added("a2", "planX", 200)]),
    );
    ready(&engine, &pricing()).await;

    let docs = engine.list(&price());
    assert_eq!(docs.len(), 2);
    let a1 = docs.iter().find(|d| d.id.as_str() == "a1").unwrap();
    assert_eq!(a1.effective_to, Some(ms(200)));
}

#[tokio::test]
async fn unsubscribe_without_subscription_returns_false() {
    let (engine, _feed) = make_engine();
    assert!(!engine.unsubscribe(&pricing()).await);
}

#[tokio::test]
async fn unsubscribe_and_truncate_clears_fed_stores() {
    let (engine, feed) = make_engine();
    load_scenario_a(&engine, &feed).await;
    engine.store().insert(
        &StoreName::from("unrelated"),
        tempus_model::Document {
            id: DocumentId::from("u1"),
            store_name: StoreName::from("unrelated"),
            key: BusinessKey::single("u"),
            effective_from: ms(0),
            effective_to: None,
            data: json!({}),
        },
    )
    .unwrap();

    assert!(engine.unsubscribe_and_truncate(&pricing()).await);

    assert!(engine.list(&price()).is_empty());
    assert_eq!(engine.list(&StoreName::from("unrelated")).len(), 1);
    assert!(!engine.is_ready(&pricing()));
}

#[tokio::test]
async fn unsubscribe_all_stops_every_listener() {
    let (engine, feed) = make_engine();
    engine.subscribe(&pricing(), &[]).await.unwrap();
    engine.subscribe(&CollectionId::from("plans"), &[]).await.unwrap();

    engine.unsubscribe_all().await;

    assert!(engine.subscribed_collections().is_empty());
    assert!(!feed.is_subscribed(&pricing()));
    assert!(!feed.is_subscribed(&CollectionId::from("plans")));
}

// ── Transport errors ─────────────────────────────────────────────

#[tokio::test]
async fn transport_error_tears_down_registration() {
    let (engine, feed) = make_engine();
    load_scenario_a(&engine, &feed).await;
    let mut events = engine.events();

    feed.fail(&pricing(), "connection reset").await;
    let event =
        wait_for_event(&mut events, |e| matches!(e, SyncEvent::TransportError { .. })).await;

    assert_eq!(
        event,
        SyncEvent::TransportError {
            collection: pricing(),
            cause: "connection reset".into(),
        }
    );
    let status = engine.status(&pricing());
    assert_eq!(status.state, ListenerState::Unsubscribed);
    assert_eq!(status.last_error.as_deref(), Some("connection reset"));
    assert!(engine.subscribed_collections().is_empty());
    assert!(!feed.is_subscribed(&pricing()));
    assert_eq!(feed.subscribe_calls(&pricing()), 1);
    assert_eq!(engine.list(&price()).len(), 2);
}

#[tokio::test]
async fn closed_feed_is_a_transport_error() {
    let (engine, feed) = make_engine();
    let mut events = engine.events();
    engine.subscribe(&pricing(), &[]).await.unwrap();

    feed.close(&pricing());
    wait_for_event(&mut events, |e| matches!(e, SyncEvent::TransportError { .. })).await;

    assert!(engine.subscribed_collections().is_empty());
    assert_eq!(engine.listener_state(&pricing()), ListenerState::Unsubscribed);
}

#[tokio::test]
async fn refused_subscription_reports_transport_error() {
    let (engine, feed) = make_engine();
    feed.refuse(&pricing());

    let err = engine.subscribe(&pricing(), &[]).await.unwrap_err();

    assert!(matches!(err, SyncError::Transport { .. }));
    assert!(engine.subscribed_collections().is_empty());
    assert!(err.to_string().contains("subscription refused"));
    assert_eq!(engine.status(&pricing()).last_error.as_deref(), Some("subscription refused"));
    assert_eq!(feed.subscribe_calls(&pricing()), 1);
}

// ── Malformed documents ──────────────────────────────────────────

#[tokio::test]
async fn malformed_document_is_skipped() {
    let (engine, feed) = make_engine();
    let mut events = engine.events();
    engine.subscribe(&pricing(), &[price()]).await.unwrap();

    let no_key = Change::added(RawDocument::new(
        "bad",
        json!({ "storeName": "price", "effectiveFrom": 100 }),
    ));
    feed.push(
        &pricing(),
        ChangeBatch::snapshot(vec![added("a1", "planX", 100), no_key, added("b1", "planY", 100)]),
    );
    ready(&engine, &pricing()).await;

    let rejected =
        wait_for_event(&mut events, |e| matches!(e, SyncEvent::DocumentRejected { .. })).await;
    assert!(matches!(
        rejected,
        SyncEvent::DocumentRejected { ref document_id, kind: RejectionKind::MalformedDocument, .. }
            if document_id.as_str() == "bad"
    ));
    assert_eq!(ids(&engine.list(&price())), vec!["a1", "b1"]);

    let status = engine.status(&pricing());
    assert_eq!(status.documents_applied, 2);
    assert_eq!(status.documents_rejected, 1);
    assert_eq!(status.batches_applied, 1);
}

#[tokio::test]
async fn document_for_undeclared_store_is_rejected() {
    let (engine, feed) = make_engine();
    let mut events = engine.events();
    engine.subscribe(&pricing(), &[price()]).await.unwrap();

    let foreign = Change::added(RawDocument::new(
        "f1",
        json!({ "storeName": "elsewhere", "plan": "planX", "effectiveFrom": 100 }),
    ));
    feed.push(&pricing(), ChangeBatch::snapshot(vec![foreign]));

    let event = next_batch(&mut events).await;
    assert!(matches!(event, SyncEvent::BatchApplied { applied: 0, rejected: 1, .. }));
    assert!(engine.list(&StoreName::from("elsewhere")).is_empty());
    assert!(engine.is_ready(&pricing()));
}

#[tokio::test]
async fn removal_naming_another_collections_store_is_rejected() {
    let (engine, feed) = make_engine();
    let plans = CollectionId::from("plans");
    let plan = StoreName::from("plan");
    engine.subscribe(&plans, &[plan.clone()]).await.unwrap();
    feed.push(
        &plans,
        ChangeBatch::snapshot(vec![Change::added(RawDocument::new(
            "x",
            json!({ "code": "gold", "effectiveFrom": 0 }),
        ))]),
    );
    ready(&engine, &plans).await;

    let mut events = engine.events();
    engine.subscribe(&pricing(), &[price()]).await.unwrap();
    let reach_over = Change::removed(RawDocument::new("x", json!({ "storeName": "plan" })));
    feed.push(&pricing(), ChangeBatch::snapshot(vec![reach_over]));

    let rejected = wait_for_event(&mut events, |e| {
        matches!(e, SyncEvent::DocumentRejected { .. })
    })
    .await;
    assert!(matches!(
        rejected,
        SyncEvent::DocumentRejected { kind: RejectionKind::MalformedDocument, .. }
    ));
    assert_eq!(ids(&engine.list(&plan)), vec!["x"]);
}

#[tokio::test]
async fn document_moved_to_another_store_leaves_old_store() {
    let (engine, feed) = make_engine();
    let plans = CollectionId::from("plans");
    engine.subscribe(&plans, &[]).await.unwrap();
    feed.push(
        &plans,
        ChangeBatch::snapshot(vec![Change::added(RawDocument::new(
            "p1",
            json!({ "storeName": "plan", "code": "gold", "effectiveFrom": 0 }),
        ))]),
    );
    ready(&engine, &plans).await;

    let mut events = engine.events();
    let moved = Change::modified(RawDocument::new(
        "p1",
        json!({ "storeName": "archive", "code": "gold", "effectiveFrom": 0 }),
    ));
    feed.push(&plans, ChangeBatch::new(vec![moved]));
    next_batch(&mut events).await;

    assert!(engine.list(&StoreName::from("plan")).is_empty());
    assert_eq!(ids(&engine.list(&StoreName::from("archive"))), vec!["p1"]);
    assert!(engine.resolve(&StoreName::from("plan"), None, Some(ms(10))).is_empty());
}

// ── Events & repair ──────────────────────────────────────────────

#[tokio::test]
async fn lifecycle_events_in_order() {
    let (engine, feed) = make_engine();
    let mut events = engine.events();

    let sub_id = engine.subscribe(&pricing(), &[]).await.unwrap();
    feed.push(&pricing(), ChangeBatch::snapshot(vec![added("a1", "planX", 100)]));
    ready(&engine, &pricing()).await;
    engine.unsubscribe(&pricing()).await;

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            SyncEvent::Subscribed {
                collection: pricing(),
                subscription_id: sub_id,
            },
            SyncEvent::BatchApplied {
                collection: pricing(),
                applied: 1,
                rejected: 0,
                initial_snapshot: true,
            },
            SyncEvent::Ready { collection: pricing() },
            SyncEvent::Unsubscribed { collection: pricing() },
        ]
    );
}

#[tokio::test]
async fn repair_closes_duplicate_open_versions() {
    let (engine, feed) = make_engine();
    engine.subscribe(&pricing(), &[]).await.unwrap();
    feed.push(&pricing(), ChangeBatch::snapshot(vec![]));
    ready(&engine, &pricing()).await;

    for (id, from) in [("x1", 100), ("x2", 200)] {
        engine
            .store()
            .insert(
                &price(),
                tempus_model::Document {
                    id: DocumentId::from(id),
                    store_name: price(),
                    key: BusinessKey::single("planX"),
                    effective_from: ms(from),
                    effective_to: None,
                    data: json!({ "plan": "planX" }),
                },
            )
            .unwrap();
    }

    let mut events = engine.events();
    feed.push(&pricing(), ChangeBatch::new(vec![added("x3", "planX", 300)]));
    let rejected =
        wait_for_event(&mut events, |e| matches!(e, SyncEvent::DocumentRejected { .. })).await;
    assert!(matches!(
        rejected,
        SyncEvent::DocumentRejected { kind: RejectionKind::MultipleOpenVersions, .. }
    ));
    let event = next_batch(&mut events).await;
    assert!(matches!(event, SyncEvent::BatchApplied { applied: 0, rejected: 1, .. }));

    let closed = engine.repair(&price(), &BusinessKey::single("planX"));
    assert_eq!(closed, vec![DocumentId::from("x1")]);

    feed.push(&pricing(), ChangeBatch::new(vec![added("x3", "planX", 300)]));
    next_batch(&mut events).await;
    assert_eq!(ids(&engine.resolve(&price(), None, Some(ms(350)))), vec!["x3"]);
}

#[tokio::test]
async fn engine_over_preloaded_store() {
    init_tracing();
    let store = Arc::new(LocalStore::new());
    store
        .insert(
            &price(),
            tempus_model::Document {
                id: DocumentId::from("a1"),
                store_name: price(),
                key: BusinessKey::single("planX"),
                effective_from: ms(100),
                effective_to: None,
                data: json!({ "plan": "planX" }),
            },
        )
        .unwrap();
    let feed = MockFeed::new();
    let engine =
        SyncEngine::with_store(catalog(), Arc::new(feed.clone()), store, SyncConfig::default());

    engine.subscribe(&pricing(), &[]).await.unwrap();
    feed.push(&pricing(), ChangeBatch::snapshot(vec![added("a2", "planX", 200)]));
    ready(&engine, &pricing()).await;

    let a1 = engine.store().get(&price(), &DocumentId::from("a1")).unwrap();
    assert_eq!(a1.effective_to, Some(ms(200)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn collections_sync_concurrently() {
    let (engine, feed) = make_engine();
    let plans = CollectionId::from("plans");
    engine.subscribe(&pricing(), &[]).await.unwrap();
    engine.subscribe(&plans, &[]).await.unwrap();

    let price_batch: Vec<Change> = (0..50)
        .map(|i| added(&format!("p{i:02}"), &format!("plan{i}"), 0))
        .collect();
    let plan_batch: Vec<Change> = (0..50)
        .map(|i| {
            Change::added(RawDocument::new(
                format!("q{i:02}"),
                json!({ "code": format!("c{i}"), "effectiveFrom": 0 }),
            ))
        })
        .collect();
    feed.push(&pricing(), ChangeBatch::snapshot(price_batch));
    feed.push(&plans, ChangeBatch::snapshot(plan_batch));

    ready(&engine, &pricing()).await;
    ready(&engine, &plans).await;

    assert_eq!(engine.list(&price()).len(), 50);
    assert_eq!(engine.list(&StoreName::from("plan")).len(), 50);
}
