//! End-to-end live query behavior against the in-memory backend.

use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use stratus_protocol::ChangeEvent;
use stratus_query::{MockDataSource, ResultError};
use stratus_realtime::{RealtimeError, SnapshotError, SubscriptionHandle};
use stratus_testkit::prelude::*;

const QUIET: Duration = Duration::from_millis(50);

async fn wait_until(check: impl Fn() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

fn seeded_backend() -> Arc<MemoryBackend> {
    let backend = Arc::new(MemoryBackend::new());
    backend.seed(
        "posts",
        [
            post(1, "published", 10),
            post(2, "draft", 20),
            post(3, "published", 30),
        ],
    );
    backend
}

fn fast_config() -> RealtimeConfig {
    RealtimeConfig::new().with_reconnect(ReconnectConfig::immediate())
}

async fn connected_client(backend: &Arc<MemoryBackend>, config: RealtimeConfig) -> RealtimeClient {
    let client = RealtimeClient::new(backend.clone(), config).unwrap();
    client.connect(backend.clone()).unwrap();
    wait_until(|| client.connection_state() == ConnectionState::Connected).await;
    client
}

fn published_newest_first() -> QueryBuilder {
    QueryBuilder::from("posts")
        .eq("status", "published")
        .order("created_at", false)
}

#[tokio::test]
async fn published_posts_follow_changes() {
    let backend = seeded_backend();
    let client = connected_client(&backend, fast_config()).await;

    let mut recorder = SnapshotRecorder::new();
    let _handle = client
        .subscribe(published_newest_first().limit(10), recorder.listener())
        .unwrap();

    let first = recorder.next().await;
    assert!(first.loading);
    assert!(first.data.is_none());

    let seeded = recorder.settled().await;
    assert_eq!(int_ids(seeded.rows()), vec![3, 1]);

    backend.insert("posts", post(4, "published", 40));
    let s = recorder.next().await;
    assert_eq!(int_ids(s.rows()), vec![4, 3, 1]);

    backend.update("posts", 2, json!({"status": "published"}));
    let s = recorder.next().await;
    assert_eq!(int_ids(s.rows()), vec![4, 2, 3, 1]);

    backend.update("posts", 3, json!({"status": "draft"}));
    let s = recorder.next().await;
    assert_eq!(int_ids(s.rows()), vec![4, 2, 1]);

    backend.delete("posts", 4);
    let s = recorder.next().await;
    assert_eq!(int_ids(s.rows()), vec![2, 1]);
    assert_eq!(s.sequence, 4);

    // Drafts never touch the result.
    backend.insert("posts", post(9, "draft", 90));
    assert!(recorder.is_quiet(QUIET).await);
}

#[tokio::test]
async fn single_row_query_reports_not_found() {
    let backend = seeded_backend();
    let client = connected_client(&backend, fast_config()).await;

    let mut recorder = SnapshotRecorder::new();
    let _handle = client
        .subscribe(QueryBuilder::from("posts").eq("id", 1).single(), recorder.listener())
        .unwrap();

    let s = recorder.settled().await;
    assert_eq!(s.single().unwrap().get("title"), Some(&"post 1".into()));

    backend.delete("posts", 1);
    let s = recorder.next().await;
    assert!(s.data.is_none());
    assert_eq!(s.error, Some(SnapshotError::Result(ResultError::NotFound)));

    backend.insert("posts", post(1, "draft", 11));
    let s = recorder.next().await;
    assert!(s.error.is_none());
    assert_eq!(s.single().unwrap().get("status"), Some(&"draft".into()));
}

#[tokio::test]
async fn equal_predicates_share_one_live_query() {
    let backend = seeded_backend();
    let client = connected_client(&backend, fast_config()).await;

    let mut a = SnapshotRecorder::new();
    let mut b = SnapshotRecorder::new();
    let first = client
        .subscribe(
            QueryBuilder::from("posts").eq("status", "published").gt("created_at", 0),
            a.listener(),
        )
        .unwrap();
    let second = client
        .subscribe(
            QueryBuilder::from("posts").gt("created_at", 0).eq("status", "published"),
            b.listener(),
        )
        .unwrap();

    assert_eq!(first.key(), second.key());
    assert_eq!(client.stats().active_queries, 1);
    assert_eq!(client.stats().subscriptions, 2);
    a.settled().await;
    b.settled().await;
    assert_eq!(backend.fetch_count(), 1);

    client.unsubscribe(first).unwrap();
    assert_eq!(client.stats().active_queries, 1);

    backend.insert("posts", post(5, "published", 50));
    let s = b.next().await;
    assert_eq!(s.rows().len(), 3);
    assert!(a.is_quiet(QUIET).await);

    let infos = client.active_queries();
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].subscribers, 1);
    assert_eq!(infos[0].phase, Phase::Live);
}

#[tokio::test]
async fn limited_window_evicts_last_row() {
    let backend = seeded_backend();
    let client = connected_client(&backend, fast_config()).await;

    let mut recorder = SnapshotRecorder::new();
    let _handle = client
        .subscribe(published_newest_first().limit(2), recorder.listener())
        .unwrap();
    assert_eq!(int_ids(recorder.settled().await.rows()), vec![3, 1]);

    backend.insert("posts", post(4, "published", 40));
    assert_eq!(int_ids(recorder.next().await.rows()), vec![4, 3]);

    // Older than everything in a full window.
    backend.insert("posts", post(5, "published", 1));
    assert!(recorder.is_quiet(QUIET).await);
}

#[tokio::test]
async fn duplicate_and_stale_events_are_ignored() {
    let backend = seeded_backend();
    let client = RealtimeClient::new(backend.clone(), RealtimeConfig::default()).unwrap();
    client.on_connected();

    let mut recorder = SnapshotRecorder::new();
    let _handle = client
        .subscribe(published_newest_first(), recorder.listener())
        .unwrap();
    recorder.settled().await;

    let event = ChangeEvent::inserted("posts", row(post(7, "published", 70)), 1, 0);
    assert_eq!(client.apply(event.clone()).unwrap(), 1);
    assert_eq!(int_ids(recorder.next().await.rows()), vec![7, 3, 1]);

    client.apply(event).unwrap();
    assert!(recorder.is_quiet(QUIET).await);

    client.on_disconnected();
    recorder.wait_for(|s| s.stale).await;
    client.on_connected();
    let s = recorder.settled().await;
    assert_eq!(s.epoch, 1);
    assert!(!s.stale);

    // Stamped with the epoch before the reconnect.
    let late = ChangeEvent::deleted("posts", 3, 99, 0);
    client.apply(late).unwrap();
    assert!(recorder.is_quiet(QUIET).await);
}

#[tokio::test]
async fn reconnect_reconciles_missed_changes() {
    let backend = seeded_backend();
    let client = connected_client(&backend, fast_config()).await;

    let mut recorder = SnapshotRecorder::new();
    let _handle = client
        .subscribe(published_newest_first(), recorder.listener())
        .unwrap();
    recorder.settled().await;

    backend.drop_connections();
    // No session is open, so these never reach the client as events.
    backend.insert("posts", post(5, "published", 50));
    backend.delete("posts", 1);

    let stale = recorder.wait_for(|s| s.stale).await;
    assert_eq!(int_ids(stale.rows()), vec![3, 1]);

    let s = recorder
        .wait_for(|s| !s.stale && s.phase == Phase::Live && s.epoch == 1)
        .await;
    assert_eq!(int_ids(s.rows()), vec![5, 3]);
    assert_eq!(client.epoch(), 1);
    assert_eq!(backend.connect_count(), 2);

    backend.insert("posts", post(6, "published", 60));
    let s = recorder.next().await;
    assert_eq!(int_ids(s.rows()), vec![6, 5, 3]);
}

#[tokio::test]
async fn events_during_seeding_are_replayed_over_baseline() {
    let source = Arc::new(MockDataSource::new());
    source.hold();
    let client = RealtimeClient::new(source.clone(), RealtimeConfig::default()).unwrap();
    client.on_connected();

    let mut recorder = SnapshotRecorder::new();
    let handle = client
        .subscribe(published_newest_first(), recorder.listener())
        .unwrap();
    assert!(recorder.next().await.loading);

    // One event the baseline already reflects, one it does not.
    client
        .apply(ChangeEvent::inserted("posts", row(post(3, "published", 30)), 5, 0))
        .unwrap();
    client.apply(ChangeEvent::deleted("posts", 1, 6, 0)).unwrap();
    assert!(recorder.is_quiet(QUIET).await);
    assert_eq!(handle.snapshot().unwrap().phase, Phase::Seeding);

    source.push_response(
        FetchResponse::new(vec![
            row(post(1, "published", 10)),
            row(post(3, "published", 30)),
        ])
        .with_sequence(5),
    );
    source.release();

    let s = recorder.next().await;
    assert!(!s.loading);
    assert_eq!(int_ids(s.rows()), vec![3]);
    assert_eq!(s.sequence, 6);
}

#[tokio::test]
async fn unsubscribe_during_seeding_cancels_delivery() {
    let source = Arc::new(MockDataSource::new());
    source.hold();
    let client = RealtimeClient::new(source.clone(), RealtimeConfig::default()).unwrap();

    let mut recorder = SnapshotRecorder::new();
    let handle = client
        .subscribe(published_newest_first(), recorder.listener())
        .unwrap();
    assert!(recorder.next().await.loading);
    wait_until(|| source.fetch_count() == 1).await;

    handle.unsubscribe();
    assert_eq!(client.stats().active_queries, 0);

    source.push_response(FetchResponse::new(vec![row(post(1, "published", 10))]));
    source.release();
    assert!(recorder.is_quiet(QUIET).await);
    assert_eq!(recorder.count(), 1);

    // A new subscription starts from scratch.
    let mut again = SnapshotRecorder::new();
    let _handle = client
        .subscribe(published_newest_first(), again.listener())
        .unwrap();
    again.settled().await;
    assert_eq!(source.fetch_count(), 2);
}

#[tokio::test]
async fn listener_may_unsubscribe_itself() {
    let backend = seeded_backend();
    let client = connected_client(&backend, fast_config()).await;

    let mut survivor = SnapshotRecorder::new();
    let _kept = client
        .subscribe(published_newest_first(), survivor.listener())
        .unwrap();
    survivor.settled().await;

    let slot: Arc<Mutex<Option<SubscriptionHandle>>> = Arc::new(Mutex::new(None));
    let calls = Arc::new(AtomicUsize::new(0));
    let handle = {
        let slot = Arc::clone(&slot);
        let calls = Arc::clone(&calls);
        client
            .subscribe(published_newest_first(), move |s| {
                calls.fetch_add(1, Ordering::SeqCst);
                if s.rows().len() >= 3 {
                    let own = slot.lock().take();
                    drop(own);
                }
            })
            .unwrap()
    };
    *slot.lock() = Some(handle);
    assert_eq!(client.stats().subscriptions, 2);

    backend.insert("posts", post(4, "published", 40));
    survivor.next().await;
    wait_until(|| client.stats().subscriptions == 1).await;
    let seen = calls.load(Ordering::SeqCst);

    backend.insert("posts", post(5, "published", 50));
    assert_eq!(survivor.next().await.rows().len(), 4);
    assert_eq!(calls.load(Ordering::SeqCst), seen);
    assert_eq!(client.stats().active_queries, 1);
}

#[tokio::test]
async fn failed_connects_degrade_snapshots() {
    let backend = seeded_backend();
    backend.fail_next_connects(3);
    let config = RealtimeConfig::new().with_reconnect(
        ReconnectConfig::new()
            .with_initial_delay(Duration::from_millis(5))
            .with_jitter(false),
    );
    let client = RealtimeClient::new(backend.clone(), config).unwrap();

    let mut recorder = SnapshotRecorder::new();
    let handle = client
        .subscribe(published_newest_first(), recorder.listener())
        .unwrap();
    client.connect(backend.clone()).unwrap();

    let degraded = recorder
        .wait_for(|s| s.error == Some(SnapshotError::Disconnected))
        .await;
    assert!(degraded.stale);

    let healthy = recorder.wait_for(|s| s.is_healthy()).await;
    assert_eq!(int_ids(healthy.rows()), vec![3, 1]);
    wait_until(|| client.connection_state() == ConnectionState::Connected).await;
    assert!(handle.snapshot().unwrap().is_healthy());
    assert_eq!(client.epoch(), 0);
}

#[tokio::test]
async fn gap_in_window_triggers_backfill() {
    let backend = seeded_backend();
    backend.seed("posts", [post(6, "published", 5)]);
    let client = connected_client(&backend, fast_config().with_backfill_on_gap(true)).await;

    let mut recorder = SnapshotRecorder::new();
    let _handle = client
        .subscribe(published_newest_first().limit(2), recorder.listener())
        .unwrap();
    assert_eq!(int_ids(recorder.settled().await.rows()), vec![3, 1]);

    backend.delete("posts", 3);
    let s = recorder
        .wait_for(|s| s.phase == Phase::Live && s.rows().len() == 2)
        .await;
    assert_eq!(int_ids(s.rows()), vec![1, 6]);
    assert_eq!(backend.fetch_count(), 2);
}

#[tokio::test]
async fn window_stays_short_without_backfill() {
    let backend = seeded_backend();
    backend.seed("posts", [post(6, "published", 5)]);
    let client = connected_client(&backend, fast_config()).await;

    let mut recorder = SnapshotRecorder::new();
    let handle = client
        .subscribe(published_newest_first().limit(2), recorder.listener())
        .unwrap();
    recorder.settled().await;

    backend.delete("posts", 3);
    assert_eq!(int_ids(recorder.next().await.rows()), vec![1]);

    client.refresh(&handle).unwrap();
    let s = recorder.settled().await;
    assert_eq!(int_ids(s.rows()), vec![1, 6]);
}

#[tokio::test]
async fn selection_hides_filter_and_order_columns() {
    let backend = seeded_backend();
    let client = connected_client(&backend, fast_config()).await;

    let mut recorder = SnapshotRecorder::new();
    let _handle = client
        .subscribe(
            QueryBuilder::from("posts")
                .select("id, title")
                .eq("status", "published")
                .order("created_at", false),
            recorder.listener(),
        )
        .unwrap();

    let s = recorder.settled().await;
    assert_eq!(int_ids(s.rows()), vec![3, 1]);
    for row in s.rows() {
        assert!(row.get("title").is_some());
        assert!(row.get("status").is_none());
        assert!(row.get("created_at").is_none());
    }

    backend.insert("posts", post(4, "published", 40));
    assert_eq!(int_ids(recorder.next().await.rows()), vec![4, 3, 1]);

    backend.update("posts", 3, json!({"status": "draft"}));
    let s = recorder.next().await;
    assert_eq!(int_ids(s.rows()), vec![4, 1]);
    assert!(s.rows().iter().all(|r| r.get("status").is_none()));
}

#[tokio::test]
async fn page_follows_rows_inserted_ahead_of_it() {
    let backend = seeded_backend();
    backend.seed("posts", [post(4, "published", 40), post(5, "published", 50)]);
    let client = connected_client(&backend, fast_config().with_backfill_on_gap(true)).await;

    let mut recorder = SnapshotRecorder::new();
    let _handle = client
        .subscribe(
            QueryBuilder::from("posts")
                .eq("status", "published")
                .order("created_at", true)
                .range(1, 2),
            recorder.listener(),
        )
        .unwrap();
    assert_eq!(int_ids(recorder.settled().await.rows()), vec![3, 4]);

    backend.insert("posts", post(9, "published", 5));
    let s = recorder
        .wait_for(|s| s.phase == Phase::Live && !s.stale && int_ids(s.rows()) == vec![1, 3])
        .await;
    assert!(s.error.is_none());
    assert_eq!(backend.fetch_count(), 2);
}

#[tokio::test]
async fn stale_page_waits_for_refresh_without_backfill() {
    let backend = seeded_backend();
    backend.seed("posts", [post(4, "published", 40)]);
    let client = connected_client(&backend, fast_config()).await;

    let mut recorder = SnapshotRecorder::new();
    let handle = client
        .subscribe(
            QueryBuilder::from("posts")
                .eq("status", "published")
                .order("created_at", true)
                .page(1, 2),
            recorder.listener(),
        )
        .unwrap();
    assert_eq!(int_ids(recorder.settled().await.rows()), vec![4]);

    backend.insert("posts", post(9, "published", 5));
    let s = recorder.next().await;
    assert!(s.stale);
    assert_eq!(int_ids(s.rows()), vec![4]);

    client.refresh(&handle).unwrap();
    let s = recorder.wait_for(|s| s.phase == Phase::Live && !s.stale).await;
    assert_eq!(int_ids(s.rows()), vec![3, 4]);
}

#[tokio::test]
async fn count_mode_gets_its_own_live_query() {
    let backend = seeded_backend();
    let client = connected_client(&backend, fast_config()).await;

    let mut plain = SnapshotRecorder::new();
    let mut counted = SnapshotRecorder::new();
    let first = client
        .subscribe(published_newest_first(), plain.listener())
        .unwrap();
    let second = client
        .subscribe(published_newest_first().count(CountMode::Exact), counted.listener())
        .unwrap();

    assert_ne!(first.key(), second.key());
    assert_eq!(client.stats().active_queries, 2);
    assert_eq!(plain.settled().await.count, None);
    assert_eq!(counted.settled().await.count, Some(2));
}

#[tokio::test]
async fn refresh_picks_up_silent_changes() {
    let backend = seeded_backend();
    let client = RealtimeClient::new(backend.clone(), RealtimeConfig::default()).unwrap();

    let mut recorder = SnapshotRecorder::new();
    let handle = client
        .subscribe(published_newest_first(), recorder.listener())
        .unwrap();
    recorder.settled().await;

    backend.seed("posts", [post(8, "published", 80)]);
    client.refresh(&handle).unwrap();
    let s = recorder.wait_for(|s| s.rows().len() == 3).await;
    assert_eq!(int_ids(s.rows()), vec![8, 3, 1]);

    let stray = client.subscribe(published_newest_first(), |_| {}).unwrap();
    let id = stray.id();
    client.unsubscribe(stray).unwrap();
    let other = RealtimeClient::new(backend.clone(), RealtimeConfig::default()).unwrap();
    assert_eq!(
        other.refresh(&handle),
        Err(RealtimeError::UnknownSubscription(handle.id()))
    );
    assert!(id > handle.id());
}

#[tokio::test]
async fn fetch_errors_are_retried() {
    let backend = seeded_backend();
    backend.fail_next_fetch(FetchError::transport_retryable("connection reset"));
    let client = RealtimeClient::new(backend.clone(), fast_config()).unwrap();

    let mut recorder = SnapshotRecorder::new();
    let _handle = client
        .subscribe(published_newest_first(), recorder.listener())
        .unwrap();

    let failed = recorder.wait_for(|s| s.error.is_some()).await;
    assert!(failed.loading);
    assert!(matches!(failed.error, Some(SnapshotError::Fetch(_))));

    let s = recorder.settled().await;
    assert!(s.is_healthy());
    assert_eq!(backend.fetch_count(), 2);
}

#[tokio::test]
async fn fatal_fetch_error_is_terminal_until_refresh() {
    let backend = seeded_backend();
    backend.fail_next_fetch(FetchError::Unauthorized("token expired".into()));
    let client = RealtimeClient::new(backend.clone(), fast_config()).unwrap();

    let mut recorder = SnapshotRecorder::new();
    let handle = client
        .subscribe(published_newest_first(), recorder.listener())
        .unwrap();
    let failed = recorder.wait_for(|s| s.error.is_some()).await;
    assert!(failed.loading);
    assert!(recorder.is_quiet(QUIET).await);
    assert_eq!(backend.fetch_count(), 1);

    client.refresh(&handle).unwrap();
    assert!(recorder.settled().await.is_healthy());
}

#[tokio::test]
async fn one_shot_execute() {
    let backend = seeded_backend();
    let client = RealtimeClient::new(backend.clone(), RealtimeConfig::default()).unwrap();

    let envelope = client
        .execute(published_newest_first().count(CountMode::Exact))
        .await;
    assert!(envelope.is_ok());
    assert_eq!(envelope.count, Some(2));
    assert_eq!(int_ids(envelope.data.as_ref().unwrap().rows()), vec![3, 1]);

    let envelope = client
        .execute(QueryBuilder::from("posts").eq("status", "archived").single())
        .await;
    assert!(envelope.data.is_none());
    assert!(envelope.error.is_some());
}

#[tokio::test]
async fn close_stops_the_channel() {
    let backend = seeded_backend();
    let client = connected_client(&backend, fast_config()).await;
    assert_eq!(backend.open_sessions(), 1);

    client.close();
    wait_until(|| backend.open_sessions() == 0).await;
    assert_eq!(client.connect(backend.clone()), Err(RealtimeError::ClientClosed));
}

#[tokio::test]
async fn dropping_the_client_stops_the_channel() {
    let backend = seeded_backend();
    let client = connected_client(&backend, fast_config()).await;
    let handle = client.subscribe(published_newest_first(), |_| {}).unwrap();

    drop(client);
    wait_until(|| backend.open_sessions() == 0).await;
    assert!(handle.snapshot().is_none());
}
