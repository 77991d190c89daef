//! Live results converge to a fresh query of the final table.

use proptest::prelude::*;
use std::time::Duration;
use stratus_codec::Row;
use stratus_testkit::prelude::*;

/// What a fresh one-shot query returns now.
async fn expected(backend: &MemoryBackend, builder: &QueryBuilder) -> Vec<Row> {
    let query = builder.clone().build().unwrap();
    backend.fetch(&query).await.unwrap().rows
}

async fn converge(ops: Vec<PostOperation>, builder: QueryBuilder, backfill: bool) -> (Vec<Row>, Vec<Row>) {
    let backend = Arc::new(MemoryBackend::new());
    for id in 0..4 {
        backend.seed("posts", [post(id, "published", id * 10)]);
    }

    let config = RealtimeConfig::new()
        .with_reconnect(ReconnectConfig::immediate())
        .with_backfill_on_gap(backfill);
    let client = RealtimeClient::new(backend.clone(), config).unwrap();
    client.connect(backend.clone()).unwrap();

    let mut recorder = SnapshotRecorder::new();
    let handle = client.subscribe(builder.clone(), recorder.listener()).unwrap();
    recorder.settled().await;
    for _ in 0..200 {
        if backend.open_sessions() == 1 && client.connection_state() == ConnectionState::Connected {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    for op in &ops {
        op.apply(&backend);
    }

    let want = expected(&backend, &builder).await;
    let mut got = Vec::new();
    for _ in 0..400 {
        let snapshot = handle.snapshot().unwrap();
        got = snapshot.rows().to_vec();
        let current = snapshot.phase == Phase::Live && !snapshot.stale;
        if current && snapshot.sequence == backend.sequence() && got == want {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    (got, want)
}

fn run(ops: Vec<PostOperation>, builder: QueryBuilder, backfill: bool) -> (Vec<Row>, Vec<Row>) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(converge(ops, builder, backfill))
}

proptest! {
    #![proptest_config(PropTestConfig::quick().to_proptest_config())]

    #[test]
    fn live_result_matches_fresh_query(
        ops in post_operations_strategy(8, 1, 30),
        builder in posts_query_strategy(),
    ) {
        let (got, want) = run(ops, builder, true);
        prop_assert_eq!(got, want);
    }

    #[test]
    fn unlimited_queries_converge_without_backfill(
        ops in post_operations_strategy(8, 1, 30),
        status in status_strategy(),
    ) {
        let builder = QueryBuilder::from("posts").eq("status", status).order("created_at", true);
        let (got, want) = run(ops, builder, false);
        prop_assert_eq!(got, want);
    }
}
