use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use pulse_core::errors::{ConfigError, RemoteError};
use pulse_core::remote::{RemoteClient, RemoteConnector};
use pulse_core::security::Credentials;
use pulse_core::types::DataPoint;

/// Scripted result of one `insert_batch` call.
#[derive(Clone, Debug)]
pub enum InsertOutcome {
    /// Record the batch and report success.
    Accept,
    /// Report failure without recording anything.
    Reject(RemoteError),
    /// Record the batch as applied but report failure, like a response lost
    /// after the remote committed.
    AcceptThenFail(RemoteError),
}

#[derive(Default)]
struct MockState {
    ping_error: Option<RemoteError>,
    existing: HashSet<String>,
    create_failures: HashMap<String, RemoteError>,
    insert_script: HashMap<String, VecDeque<InsertOutcome>>,
    created: Vec<(String, String)>,
    batches: Vec<(String, Vec<DataPoint>)>,
    pings: usize,
}

/// In-memory remote for deterministic tests without a server.
///
/// Streams become "existing" once created. Unscripted inserts are accepted.
#[derive(Default)]
pub struct MockRemote {
    state: Mutex<MockState>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `ping` fail with `error` (or succeed again with `None`).
    pub fn set_ping_error(&self, error: Option<RemoteError>) {
        self.state.lock().ping_error = error;
    }

    pub fn add_existing(&self, stream: &str) {
        self.state.lock().existing.insert(stream.to_string());
    }

    pub fn fail_create(&self, stream: &str, error: RemoteError) {
        self.state
            .lock()
            .create_failures
            .insert(stream.to_string(), error);
    }

    /// Queue an outcome for the next unscripted `insert_batch` on `stream`.
    pub fn script_insert(&self, stream: &str, outcome: InsertOutcome) {
        self.state
            .lock()
            .insert_script
            .entry(stream.to_string())
            .or_default()
            .push_back(outcome);
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *self.delay.lock() = delay;
    }

    pub fn pings(&self) -> usize {
        self.state.lock().pings
    }

    pub fn created(&self) -> Vec<(String, String)> {
        self.state.lock().created.clone()
    }

    /// Every batch the remote applied, in arrival order.
    pub fn batches(&self) -> Vec<(String, Vec<DataPoint>)> {
        self.state.lock().batches.clone()
    }

    pub fn batches_for(&self, stream: &str) -> Vec<Vec<DataPoint>> {
        self.state
            .lock()
            .batches
            .iter()
            .filter(|(s, _)| s == stream)
            .map(|(_, points)| points.clone())
            .collect()
    }

    /// Highest number of calls observed running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        InFlight(&self.in_flight)
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RemoteClient for MockRemote {
    async fn ping(&self) -> Result<(), RemoteError> {
        let _guard = self.enter().await;
        let mut state = self.state.lock();
        state.pings += 1;
        match &state.ping_error {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn stream_exists(&self, stream: &str) -> Result<bool, RemoteError> {
        let _guard = self.enter().await;
        Ok(self.state.lock().existing.contains(stream))
    }

    async fn create_stream(&self, stream: &str, schema: &str) -> Result<(), RemoteError> {
        let _guard = self.enter().await;
        let mut state = self.state.lock();
        if let Some(e) = state.create_failures.get(stream) {
            return Err(e.clone());
        }
        state.existing.insert(stream.to_string());
        state.created.push((stream.to_string(), schema.to_string()));
        Ok(())
    }

    async fn insert_batch(&self, stream: &str, points: &[DataPoint]) -> Result<(), RemoteError> {
        let _guard = self.enter().await;
        let mut state = self.state.lock();
        let outcome = state
            .insert_script
            .get_mut(stream)
            .and_then(|script| script.pop_front())
            .unwrap_or(InsertOutcome::Accept);
        match outcome {
            InsertOutcome::Accept => {
                state.batches.push((stream.to_string(), points.to_vec()));
                Ok(())
            }
            InsertOutcome::Reject(e) => Err(e),
            InsertOutcome::AcceptThenFail(e) => {
                state.batches.push((stream.to_string(), points.to_vec()));
                Err(e)
            }
        }
    }
}

/// Hands out one shared [`MockRemote`] and remembers who asked for it.
pub struct MockConnector {
    remote: Arc<MockRemote>,
    connects: AtomicUsize,
    last_identity: Mutex<Option<String>>,
}

impl MockConnector {
    pub fn new(remote: Arc<MockRemote>) -> Self {
        Self {
            remote,
            connects: AtomicUsize::new(0),
            last_identity: Mutex::new(None),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_identity(&self) -> Option<String> {
        self.last_identity.lock().clone()
    }
}

impl RemoteConnector for MockConnector {
    fn connect(&self, credentials: &Credentials) -> Result<Arc<dyn RemoteClient>, ConfigError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_identity.lock() = Some(credentials.identity.to_string());
        Ok(self.remote.clone())
    }
}
