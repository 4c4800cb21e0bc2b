use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use pulse_core::errors::RemoteError;
use pulse_core::keys;
use pulse_core::remote::{RemoteClient, RemoteConnector};
use pulse_core::security::{ApiKey, Credentials, DeviceIdentity};
use pulse_core::types::{DataPoint, QueuedEvent, StreamDescriptor};
use pulse_settings::{StreamFailurePolicy, SyncSettings};
use pulse_store::{Database, EventQueue, KvStore, StreamRegistry};

use crate::error::SyncError;

/// Engine knobs that come from process settings.
#[derive(Clone, Copy, Debug)]
pub struct SyncConfig {
    pub failure_policy: StreamFailurePolicy,
    /// Upper bound for each remote call, on top of the client's own timeouts.
    pub call_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::from(&SyncSettings::default())
    }
}

impl From<&SyncSettings> for SyncConfig {
    fn from(settings: &SyncSettings) -> Self {
        Self {
            failure_policy: settings.failure_policy,
            call_timeout: Duration::from_millis(settings.call_timeout_ms),
        }
    }
}

/// A stream left behind by an isolated failure.
#[derive(Clone, Debug)]
pub struct StreamFailure {
    pub stream: String,
    pub error: RemoteError,
}

/// What one pass did.
#[derive(Clone, Debug, Default)]
pub struct PassReport {
    /// Streams whose new points were committed remotely.
    pub streams_synced: usize,
    pub points_sent: usize,
    pub duplicates_skipped: usize,
    /// Only populated under [`StreamFailurePolicy::Isolate`].
    pub failures: Vec<StreamFailure>,
}

impl PassReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[derive(Debug, Default, PartialEq)]
struct StreamSync {
    sent: usize,
    skipped: usize,
}

/// Points that still need uploading, in queue order, plus the count of
/// dropped duplicates.
///
/// The high-water mark starts at `checkpoint` and moves with every kept
/// point, so a timestamp is sent at most once even when the queue holds it
/// several times. The first queued copy wins. Non-finite timestamps are
/// never kept and never move the mark.
pub fn select_new(events: &[QueuedEvent], checkpoint: f64) -> (Vec<DataPoint>, usize) {
    let mut high_water = checkpoint;
    let mut kept = Vec::with_capacity(events.len());
    let mut skipped = 0;
    for event in events {
        if !event.timestamp.is_finite() {
            warn!(stream = %event.stream, id = event.id, "dropping point with non-finite timestamp");
            skipped += 1;
        } else if event.timestamp > high_water {
            high_water = event.timestamp;
            kept.push(DataPoint::from(event));
        } else {
            debug!(
                stream = %event.stream,
                timestamp = event.timestamp,
                checkpoint = high_water,
                "skipping duplicate point"
            );
            skipped += 1;
        }
    }
    (kept, skipped)
}

/// One reconciliation pass over every registered stream.
///
/// The engine does not guard against overlapping passes itself; run it
/// through a [`SyncCoordinator`](crate::SyncCoordinator).
pub struct SyncEngine {
    kv: KvStore,
    streams: StreamRegistry,
    queue: EventQueue,
    connector: Arc<dyn RemoteConnector>,
    config: SyncConfig,
}

impl SyncEngine {
    pub fn new(db: Database, connector: Arc<dyn RemoteConnector>, config: SyncConfig) -> Self {
        Self {
            kv: KvStore::new(db.clone()),
            streams: StreamRegistry::new(db.clone()),
            queue: EventQueue::new(db),
            connector,
            config,
        }
    }

    pub fn config(&self) -> SyncConfig {
        self.config
    }

    /// Credentials as currently stored. Read fresh for every pass.
    fn credentials(&self) -> Result<Credentials, SyncError> {
        let server = self.kv.get(keys::SERVER)?;
        let identity = DeviceIdentity::parse(&self.kv.get(keys::DEVICE_IDENTITY)?)?;
        let api_key = ApiKey::new(self.kv.get(keys::API_KEY)?);
        Ok(Credentials {
            server,
            identity,
            api_key,
        })
    }

    async fn call<T, F>(&self, fut: F) -> Result<T, RemoteError>
    where
        F: Future<Output = Result<T, RemoteError>>,
    {
        match tokio::time::timeout(self.config.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(self.config.call_timeout)),
        }
    }

    /// Run one pass. Returns `Err` when the pass aborted; under
    /// [`StreamFailurePolicy::Isolate`] per-stream remote failures land in
    /// the report instead.
    #[instrument(skip(self), fields(policy = ?self.config.failure_policy))]
    pub async fn run_pass(&self) -> Result<PassReport, SyncError> {
        let credentials = self.credentials()?;
        let client = self.connector.connect(&credentials)?;
        debug!(identity = %credentials.identity, server = %credentials.server, "connected");

        self.call(client.ping())
            .await
            .map_err(|source| SyncError::Remote {
                stream: None,
                source,
            })?;

        let streams = self.streams.list()?;
        let mut report = PassReport::default();
        if streams.is_empty() {
            info!("no streams to sync");
        }

        for descriptor in &streams {
            let span = info_span!("sync_stream", stream = %descriptor.name);
            match self
                .sync_stream(client.as_ref(), descriptor)
                .instrument(span)
                .await
            {
                Ok(synced) => {
                    if synced.sent > 0 {
                        report.streams_synced += 1;
                    }
                    report.points_sent += synced.sent;
                    report.duplicates_skipped += synced.skipped;
                }
                Err(SyncError::Remote {
                    stream: Some(stream),
                    source,
                }) if self.config.failure_policy == StreamFailurePolicy::Isolate => {
                    warn!(
                        stream = %stream,
                        error_kind = source.error_kind(),
                        error = %source,
                        "stream sync failed, continuing with next stream"
                    );
                    report.failures.push(StreamFailure {
                        stream,
                        error: source,
                    });
                }
                Err(e) => return Err(e),
            }
        }

        if report.is_clean() {
            self.kv.set(keys::LAST_SYNC, &Utc::now().to_rfc3339())?;
        }
        Ok(report)
    }

    async fn sync_stream(
        &self,
        client: &dyn RemoteClient,
        descriptor: &StreamDescriptor,
    ) -> Result<StreamSync, SyncError> {
        let name = descriptor.name.as_str();

        let exists = self
            .call(client.stream_exists(name))
            .await
            .map_err(SyncError::remote(name))?;
        if !exists {
            info!("creating remote stream");
            self.call(client.create_stream(name, &descriptor.schema))
                .await
                .map_err(SyncError::remote(name))?;
        }

        let discarded = self.queue.discard_non_finite(name)?;
        if discarded > 0 {
            warn!(discarded, "discarded queued points with non-finite timestamps");
        }
        let events = self.queue.drain(name)?;
        let checkpoint = self.kv.checkpoint(name)?.unwrap_or(f64::NEG_INFINITY);
        let (points, skipped) = select_new(&events, checkpoint);

        let Some(new_checkpoint) = points.last().map(|p| p.t) else {
            if skipped > 0 {
                // Everything left is already committed remotely
                let swept = self.queue.delete_up_to(name, checkpoint)?;
                debug!(swept, checkpoint, "swept committed duplicates");
            }
            return Ok(StreamSync { sent: 0, skipped });
        };

        self.call(client.insert_batch(name, &points))
            .await
            .map_err(SyncError::remote(name))?;

        let deleted = self.queue.delete_up_to(name, new_checkpoint)?;
        self.kv.advance_checkpoint(name, new_checkpoint)?;
        info!(
            points = points.len(),
            skipped,
            deleted,
            checkpoint = new_checkpoint,
            "stream synced"
        );

        Ok(StreamSync {
            sent: points.len(),
            skipped,
        })
    }
}
