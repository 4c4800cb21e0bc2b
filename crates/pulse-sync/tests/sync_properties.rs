//! End-to-end sync behavior against a scripted remote.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use pulse_core::errors::RemoteError;
use pulse_core::keys;
use pulse_core::types::DataPoint;
use pulse_remote::{InsertOutcome, MockConnector, MockRemote};
use pulse_settings::{OverlapMode, PulseSettings};
use pulse_store::{Database, EventQueue, KvStore, StoreError};
use pulse_sync::{Cache, SyncConfig, SyncOutcome};

struct Harness {
    cache: Cache,
    remote: Arc<MockRemote>,
}

impl Harness {
    fn new() -> Self {
        Self::with_db(Database::in_memory().unwrap(), Arc::new(MockRemote::new()))
    }

    fn with_db(db: Database, remote: Arc<MockRemote>) -> Self {
        let cache = Cache::with_database(
            db,
            Arc::new(MockConnector::new(remote.clone())),
            SyncConfig::default(),
            OverlapMode::Coalesce,
        );
        cache.set_credentials("alice/phone", "s3cret").unwrap();
        Self { cache, remote }
    }

    fn kv(&self) -> KvStore {
        KvStore::new(self.cache.database().clone())
    }

    fn queue(&self) -> EventQueue {
        EventQueue::new(self.cache.database().clone())
    }

    fn sent_timestamps(&self, stream: &str) -> Vec<Vec<f64>> {
        self.remote
            .batches_for(stream)
            .iter()
            .map(|batch| batch.iter().map(|p| p.t).collect())
            .collect()
    }
}

fn batch_json(points: &[DataPoint]) -> serde_json::Value {
    serde_json::to_value(points).unwrap()
}

#[tokio::test]
async fn round_trip_orders_batch_and_empties_queue() {
    let h = Harness::new();
    h.cache.ensure_stream("x", "{}").unwrap();
    h.cache.insert_at("x", 1.0, "a").unwrap();
    h.cache.insert_at("x", 2.0, "b").unwrap();
    h.cache.insert_at("x", 1.5, "c").unwrap();

    assert!(h.cache.run_sync_now().await);

    let batches = h.remote.batches_for("x");
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batch_json(&batches[0]),
        json!([{"t": 1.0, "d": "a"}, {"t": 1.5, "d": "c"}, {"t": 2.0, "d": "b"}])
    );
    assert_eq!(h.kv().checkpoint("x").unwrap(), Some(2.0));
    assert_eq!(h.cache.size().unwrap(), 0);
}

#[tokio::test]
async fn partial_duplicate_sends_only_newer_points() {
    let h = Harness::new();
    h.cache.ensure_stream("x", "{}").unwrap();
    h.remote.add_existing("x");
    h.kv().set(&keys::checkpoint_key("x"), "1.5").unwrap();
    h.cache.insert_at("x", 1.0, "a").unwrap();
    h.cache.insert_at("x", 2.0, "b").unwrap();

    assert!(h.cache.run_sync_now().await);

    let batches = h.remote.batches_for("x");
    assert_eq!(batches.len(), 1);
    assert_eq!(batch_json(&batches[0]), json!([{"t": 2.0, "d": "b"}]));
    assert_eq!(h.kv().checkpoint("x").unwrap(), Some(2.0));
    assert!(h.remote.created().is_empty());
}

#[tokio::test]
async fn nothing_at_or_below_checkpoint_is_ever_resent() {
    let h = Harness::new();
    h.cache.ensure_stream("x", "{}").unwrap();

    for round in 0..4 {
        let base = f64::from(round) * 10.0;
        h.cache.insert_at("x", base + 1.0, "new").unwrap();
        h.cache.insert_at("x", base + 2.0, "new").unwrap();
        // Late arrival below the previous checkpoint
        if round > 0 {
            h.cache.insert_at("x", base - 15.0, "late").unwrap();
        }
        assert!(h.cache.run_sync_now().await);
    }

    let mut checkpoint = f64::NEG_INFINITY;
    for batch in h.sent_timestamps("x") {
        for t in &batch {
            assert!(*t > checkpoint, "resent {t} at or below checkpoint {checkpoint}");
        }
        checkpoint = batch.iter().copied().fold(checkpoint, f64::max);
    }
    assert_eq!(h.kv().checkpoint("x").unwrap(), Some(32.0));
    assert_eq!(h.cache.size().unwrap(), 0);
}

#[tokio::test]
async fn checkpoint_never_decreases() {
    let h = Harness::new();
    h.cache.ensure_stream("x", "{}").unwrap();
    let mut seen = Vec::new();

    for t in [5.0, 3.0, 9.0, 1.0, 9.0, 12.5] {
        h.cache.insert_at("x", t, "v").unwrap();
        h.cache.run_sync_now().await;
        seen.push(h.kv().checkpoint("x").unwrap().unwrap_or(f64::NEG_INFINITY));
    }

    assert!(seen.windows(2).all(|w| w[0] <= w[1]), "{seen:?}");
    assert_eq!(seen.last().copied(), Some(12.5));
}

#[tokio::test]
async fn equal_timestamps_are_sent_once() {
    let h = Harness::new();
    h.cache.ensure_stream("x", "{}").unwrap();
    h.cache.insert_at("x", 1.0, "first").unwrap();
    h.cache.insert_at("x", 1.0, "second").unwrap();

    assert!(h.cache.run_sync_now().await);
    assert_eq!(batch_json(&h.remote.batches_for("x")[0]), json!([{"t": 1.0, "d": "first"}]));
    assert_eq!(h.cache.size().unwrap(), 0);
}

#[tokio::test]
async fn non_finite_timestamp_never_reaches_the_wire() {
    let h = Harness::new();
    h.cache.ensure_stream("x", "{}").unwrap();
    assert!(matches!(
        h.cache.insert_at("x", f64::INFINITY, "bad"),
        Err(StoreError::InvalidTimestamp(_))
    ));
    assert!(h.cache.insert_at("x", f64::NAN, "bad").is_err());
    assert!(h.cache.run_sync_now().await);

    h.cache.insert_at("x", 1.7e9, "real").unwrap();
    assert!(h.cache.run_sync_now().await);

    let batches = h.remote.batches_for("x");
    assert_eq!(batches.len(), 1);
    assert_eq!(batch_json(&batches[0]), json!([{"t": 1.7e9, "d": "real"}]));
    assert_eq!(h.kv().checkpoint("x").unwrap(), Some(1.7e9));
    assert_eq!(h.cache.size().unwrap(), 0);
}

#[tokio::test]
async fn ping_failure_touches_nothing() {
    let h = Harness::new();
    h.cache.ensure_stream("x", "{}").unwrap();
    h.cache.insert_at("x", 1.0, "a").unwrap();
    h.remote
        .set_ping_error(Some(RemoteError::Network("connection refused".into())));

    assert!(!h.cache.run_sync_now().await);

    assert!(h.remote.created().is_empty());
    assert!(h.remote.batches().is_empty());
    assert_eq!(h.kv().checkpoint("x").unwrap(), None);
    assert_eq!(h.cache.size().unwrap(), 1);
    assert_eq!(h.cache.get_key(keys::LAST_SYNC).unwrap(), "");
}

#[tokio::test]
async fn lost_response_resends_same_batch_first() {
    let h = Harness::new();
    h.cache.ensure_stream("x", "{}").unwrap();
    h.cache.insert_at("x", 1.0, "a").unwrap();
    h.cache.insert_at("x", 2.0, "b").unwrap();
    h.remote.script_insert(
        "x",
        InsertOutcome::AcceptThenFail(RemoteError::Timeout(Duration::from_secs(120))),
    );

    assert!(!h.cache.run_sync_now().await);
    assert_eq!(h.kv().checkpoint("x").unwrap(), None);
    assert_eq!(h.cache.size().unwrap(), 2);

    h.cache.insert_at("x", 3.0, "c").unwrap();
    assert!(h.cache.run_sync_now().await);

    let sent = h.sent_timestamps("x");
    assert_eq!(sent[0], vec![1.0, 2.0]);
    // The retry carries the same points first, newer points only after them
    assert_eq!(sent[1], vec![1.0, 2.0, 3.0]);
    assert_eq!(h.kv().checkpoint("x").unwrap(), Some(3.0));
}

#[tokio::test]
async fn crash_before_commit_recovers_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let remote = Arc::new(MockRemote::new());

    {
        let h = Harness::with_db(Database::open(&path).unwrap(), remote.clone());
        h.cache.ensure_stream("x", "{}").unwrap();
        h.cache.insert_at("x", 1.0, "a").unwrap();
        remote.script_insert(
            "x",
            InsertOutcome::AcceptThenFail(RemoteError::Network("connection reset".into())),
        );
        assert!(!h.cache.run_sync_now().await);
    }

    let h = Harness::with_db(Database::open(&path).unwrap(), remote.clone());
    assert_eq!(h.cache.size().unwrap(), 1);
    assert!(h.cache.run_sync_now().await);
    assert_eq!(h.sent_timestamps("x"), vec![vec![1.0], vec![1.0]]);
    assert_eq!(h.cache.size().unwrap(), 0);
}

#[tokio::test]
async fn empty_registry_succeeds_after_ping() {
    let h = Harness::new();
    assert!(h.cache.run_sync_now().await);
    assert_eq!(h.remote.pings(), 1);
    assert!(!h.cache.get_key(keys::LAST_SYNC).unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_requests_run_at_most_one_follow_up() {
    tokio::time::pause();
    let h = Arc::new(Harness::new());
    h.cache.ensure_stream("x", "{}").unwrap();
    h.cache.insert_at("x", 1.0, "a").unwrap();
    h.remote.set_delay(Some(Duration::from_millis(50)));

    let requests = (0..8).map(|_| {
        let h = h.clone();
        tokio::spawn(async move { h.cache.sync_now().await })
    });
    let outcomes: Vec<SyncOutcome> = futures::future::join_all(requests)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .collect();

    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, SyncOutcome::Completed(_)))
        .count();
    assert_eq!(completed, 1);
    assert!(outcomes.iter().all(SyncOutcome::is_success));
    assert!(h.cache.coordinator().passes() <= 2);
    assert_eq!(h.remote.max_in_flight(), 1);
    assert_eq!(h.remote.batches_for("x").len(), 1);
}

#[tokio::test]
async fn producers_keep_writing_during_a_pass() {
    tokio::time::pause();
    let h = Arc::new(Harness::new());
    h.cache.ensure_stream("x", "{}").unwrap();
    h.cache.insert_at("x", 1.0, "a").unwrap();
    h.remote.add_existing("x");
    h.remote.set_delay(Some(Duration::from_millis(100)));

    let pass = tokio::spawn({
        let h = h.clone();
        async move { h.cache.run_sync_now().await }
    });
    // Ping and existence check are done, the batch upload is in flight
    tokio::time::sleep(Duration::from_millis(250)).await;
    // Newer than anything the running pass drained
    h.cache.insert_at("x", 100.0, "late").unwrap();

    assert!(pass.await.unwrap());
    let remaining = h.queue().drain("x").unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].timestamp, 100.0);
}

#[tokio::test]
async fn open_uses_settings_database_path() {
    let dir = tempfile::tempdir().unwrap();
    let settings = PulseSettings {
        database_path: dir.path().join("nested").join("cache.db"),
        ..PulseSettings::default()
    };
    let remote = Arc::new(MockRemote::new());
    let cache = Cache::open(&settings, Arc::new(MockConnector::new(remote))).unwrap();

    assert!(settings.database_path.exists());
    assert_eq!(cache.get_key(keys::SERVER).unwrap(), keys::DEFAULT_SERVER);
    assert_eq!(cache.get_key(keys::SYNC_ENABLED).unwrap(), "0");
}
