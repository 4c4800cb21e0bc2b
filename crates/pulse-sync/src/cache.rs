use std::sync::Arc;

use tracing::{info, instrument};

use pulse_core::keys;
use pulse_core::remote::RemoteConnector;
use pulse_core::types::{millis_to_seconds, StreamDescriptor};
use pulse_settings::{OverlapMode, PulseSettings};
use pulse_store::{Database, EventQueue, KvStore, StoreError, StreamRegistry};

use crate::coordinator::{SyncCoordinator, SyncOutcome};
use crate::engine::{SyncConfig, SyncEngine};
use crate::scheduler::Scheduler;

/// The cache service: producer API on one side, sync control on the other.
///
/// Producers may call [`insert`](Self::insert) and
/// [`ensure_stream`](Self::ensure_stream) from any thread while a pass runs.
pub struct Cache {
    db: Database,
    kv: KvStore,
    streams: StreamRegistry,
    queue: EventQueue,
    coordinator: Arc<SyncCoordinator>,
    scheduler: Scheduler,
}

impl Cache {
    /// Open the cache database named in `settings`.
    pub fn open(
        settings: &PulseSettings,
        connector: Arc<dyn RemoteConnector>,
    ) -> Result<Self, StoreError> {
        let db = Database::open(&settings.database_path)?;
        Ok(Self::with_database(
            db,
            connector,
            SyncConfig::from(&settings.sync),
            settings.sync.overlap,
        ))
    }

    pub fn with_database(
        db: Database,
        connector: Arc<dyn RemoteConnector>,
        config: SyncConfig,
        overlap: OverlapMode,
    ) -> Self {
        let kv = KvStore::new(db.clone());
        let engine = SyncEngine::new(db.clone(), connector, config);
        let coordinator = Arc::new(SyncCoordinator::new(engine, overlap));
        Self {
            streams: StreamRegistry::new(db.clone()),
            queue: EventQueue::new(db.clone()),
            scheduler: Scheduler::new(coordinator.clone(), kv.clone()),
            kv,
            coordinator,
            db,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    // Producer API

    /// Register a stream, replacing its schema if it exists.
    pub fn ensure_stream(&self, name: &str, schema: &str) -> Result<(), StoreError> {
        self.streams.ensure(name, schema)
    }

    pub fn streams(&self) -> Result<Vec<StreamDescriptor>, StoreError> {
        self.streams.list()
    }

    /// Queue a point with a millisecond timestamp.
    pub fn insert(&self, stream: &str, timestamp_ms: i64, payload: &str) -> Result<i64, StoreError> {
        self.queue
            .append(stream, millis_to_seconds(timestamp_ms), payload)
    }

    /// Queue a point with a timestamp in (fractional) seconds. NaN and
    /// infinite timestamps are refused with [`StoreError::InvalidTimestamp`].
    pub fn insert_at(&self, stream: &str, timestamp: f64, payload: &str) -> Result<i64, StoreError> {
        self.queue.append(stream, timestamp, payload)
    }

    /// Points waiting for upload, across all streams.
    pub fn size(&self) -> Result<usize, StoreError> {
        self.queue.size()
    }

    pub fn get_key(&self, key: &str) -> Result<String, StoreError> {
        self.kv.get(key)
    }

    pub fn set_key(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.kv.set(key, value)
    }

    /// Store the device identity and API key used by the next pass. The
    /// identity is validated when a pass reads it.
    #[instrument(skip(self, api_key))]
    pub fn set_credentials(&self, device_identity: &str, api_key: &str) -> Result<(), StoreError> {
        self.kv.set(keys::DEVICE_IDENTITY, device_identity)?;
        self.kv.set(keys::API_KEY, api_key)
    }

    /// Drop every queued point. Streams, settings and checkpoints stay.
    pub fn clear(&self) -> Result<usize, StoreError> {
        let cleared = self.queue.clear()?;
        info!(cleared, "queue cleared");
        Ok(cleared)
    }

    // Sync API

    /// Run a pass now (or fold into the running one). `true` when the pass
    /// ran clean or the request was coalesced.
    pub async fn run_sync_now(&self) -> bool {
        self.sync_now().await.is_success()
    }

    /// Like [`run_sync_now`](Self::run_sync_now), with the full outcome.
    pub async fn sync_now(&self) -> SyncOutcome {
        self.coordinator.request().await
    }

    /// Must be called within a Tokio runtime.
    pub fn enable_scheduled_sync(&self, period_ms: i64) -> Result<bool, StoreError> {
        self.scheduler.enable(period_ms)
    }

    pub fn disable_scheduled_sync(&self) -> Result<(), StoreError> {
        self.scheduler.disable()
    }

    /// Restart a persisted schedule. Must be called within a Tokio runtime.
    pub fn resume_scheduled_sync(&self) -> Result<bool, StoreError> {
        self.scheduler.resume()
    }

    pub fn is_sync_scheduled(&self) -> bool {
        self.scheduler.is_scheduled()
    }

    pub fn coordinator(&self) -> &SyncCoordinator {
        &self.coordinator
    }
}
