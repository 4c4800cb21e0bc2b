use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use pulse_core::keys;
use pulse_store::{KvStore, StoreError};

use crate::coordinator::SyncCoordinator;

struct ScheduledTask {
    cancel: CancellationToken,
    period: Arc<Mutex<Duration>>,
    _handle: JoinHandle<()>,
}

/// Background timer that requests a pass every `sync_period` milliseconds.
///
/// `sync_enabled` and `sync_period` are persisted in the KV store; this type
/// only decides when passes run. `sync_period` is read again after every
/// scheduled pass, so a changed value applies from the next wait on.
/// Stopping never interrupts a pass already in flight, it only prevents the
/// next one.
pub struct Scheduler {
    coordinator: Arc<SyncCoordinator>,
    kv: KvStore,
    task: Mutex<Option<ScheduledTask>>,
}

impl Scheduler {
    pub fn new(coordinator: Arc<SyncCoordinator>, kv: KvStore) -> Self {
        Self {
            coordinator,
            kv,
            task: Mutex::new(None),
        }
    }

    /// Persist and start a schedule. Any previous schedule is stopped first.
    /// Returns whether a timer is now running; a period `<= 0` is stored but
    /// never fires.
    ///
    /// Must be called within a Tokio runtime.
    pub fn enable(&self, period_ms: i64) -> Result<bool, StoreError> {
        self.stop();
        self.kv.set(keys::SYNC_ENABLED, "1")?;
        self.kv.set(keys::SYNC_PERIOD, &period_ms.to_string())?;
        Ok(self.start(period_ms))
    }

    /// Stop the timer and persist `sync_enabled = 0`.
    pub fn disable(&self) -> Result<(), StoreError> {
        self.stop();
        self.kv.set(keys::SYNC_ENABLED, "0")
    }

    /// Restart the persisted schedule, if one is enabled. Used at startup.
    pub fn resume(&self) -> Result<bool, StoreError> {
        if self.kv.get_i64_or(keys::SYNC_ENABLED, 0)? <= 0 {
            debug!("scheduled sync disabled");
            return Ok(false);
        }
        let period_ms = self
            .kv
            .get_i64_or(keys::SYNC_PERIOD, keys::DEFAULT_SYNC_PERIOD_MS)?;
        self.stop();
        Ok(self.start(period_ms))
    }

    pub fn is_scheduled(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Period of the running timer.
    pub fn period(&self) -> Option<Duration> {
        self.task.lock().as_ref().map(|t| *t.period.lock())
    }

    fn start(&self, period_ms: i64) -> bool {
        let Some(period) = positive_period(period_ms) else {
            warn!(period_ms, "sync period must be positive, not scheduling");
            return false;
        };

        let cancel = CancellationToken::new();
        let period = Arc::new(Mutex::new(period));
        let handle = tokio::spawn(run_schedule(
            self.coordinator.clone(),
            self.kv.clone(),
            period.clone(),
            cancel.clone(),
        ));
        info!(period_ms, "scheduled sync enabled");
        *self.task.lock() = Some(ScheduledTask {
            cancel,
            period,
            _handle: handle,
        });
        true
    }

    fn stop(&self) {
        if let Some(task) = self.task.lock().take() {
            task.cancel.cancel();
            info!("scheduled sync stopped");
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

fn positive_period(period_ms: i64) -> Option<Duration> {
    u64::try_from(period_ms)
        .ok()
        .filter(|ms| *ms > 0)
        .map(Duration::from_millis)
}

/// Wait one period, request a pass, re-read `sync_period`, repeat. The first
/// pass comes one full period after start. An unusable stored period keeps
/// the current one.
async fn run_schedule(
    coordinator: Arc<SyncCoordinator>,
    kv: KvStore,
    period: Arc<Mutex<Duration>>,
    cancel: CancellationToken,
) {
    loop {
        let wait = *period.lock();
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("schedule cancelled");
                return;
            }
            () = time::sleep(wait) => {}
        }

        let outcome = coordinator.request().await;
        debug!(success = outcome.is_success(), "scheduled sync request done");

        match kv.get_i64_or(keys::SYNC_PERIOD, keys::DEFAULT_SYNC_PERIOD_MS) {
            Ok(period_ms) => match positive_period(period_ms) {
                Some(next) if next != wait => {
                    info!(period_ms, "sync period changed");
                    *period.lock() = next;
                }
                Some(_) => {}
                None => warn!(period_ms, "ignoring non-positive sync period"),
            },
            Err(e) => warn!(error = %e, "failed to read sync period, keeping current"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_remote::{MockConnector, MockRemote};
    use pulse_settings::OverlapMode;
    use pulse_store::Database;

    use crate::engine::{SyncConfig, SyncEngine};

    fn scheduler() -> (Scheduler, Arc<SyncCoordinator>, KvStore) {
        let db = Database::in_memory().unwrap();
        let kv = KvStore::new(db.clone());
        kv.set(keys::DEVICE_IDENTITY, "alice/phone").unwrap();
        let remote = Arc::new(MockRemote::new());
        let engine = SyncEngine::new(
            db,
            Arc::new(MockConnector::new(remote)),
            SyncConfig::default(),
        );
        let coordinator = Arc::new(SyncCoordinator::new(engine, OverlapMode::Coalesce));
        (Scheduler::new(coordinator.clone(), kv.clone()), coordinator, kv)
    }

    #[tokio::test]
    async fn enable_persists_and_fires_each_period() {
        tokio::time::pause();
        let (scheduler, coordinator, kv) = scheduler();

        assert!(scheduler.enable(1_000).unwrap());
        assert_eq!(kv.get(keys::SYNC_ENABLED).unwrap(), "1");
        assert_eq!(kv.get(keys::SYNC_PERIOD).unwrap(), "1000");

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(coordinator.passes(), 0);

        time::sleep(Duration::from_millis(2_600)).await;
        assert_eq!(coordinator.passes(), 3);
    }

    #[tokio::test]
    async fn disable_stops_future_passes() {
        tokio::time::pause();
        let (scheduler, coordinator, kv) = scheduler();
        scheduler.enable(1_000).unwrap();
        time::sleep(Duration::from_millis(1_500)).await;
        assert_eq!(coordinator.passes(), 1);

        scheduler.disable().unwrap();
        assert!(!scheduler.is_scheduled());
        assert_eq!(kv.get(keys::SYNC_ENABLED).unwrap(), "0");

        time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(coordinator.passes(), 1);
    }

    #[tokio::test]
    async fn re_enable_replaces_schedule() {
        tokio::time::pause();
        let (scheduler, coordinator, _kv) = scheduler();
        scheduler.enable(1_000).unwrap();
        scheduler.enable(10_000).unwrap();
        assert_eq!(scheduler.period(), Some(Duration::from_secs(10)));

        time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(coordinator.passes(), 0);
    }

    #[tokio::test]
    async fn stored_period_change_applies_after_next_pass() {
        tokio::time::pause();
        let (scheduler, coordinator, kv) = scheduler();
        scheduler.enable(1_000).unwrap();

        kv.set(keys::SYNC_PERIOD, "5000").unwrap();
        time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(coordinator.passes(), 1);
        assert_eq!(scheduler.period(), Some(Duration::from_secs(5)));

        time::sleep(Duration::from_millis(3_000)).await;
        assert_eq!(coordinator.passes(), 1);
        time::sleep(Duration::from_millis(2_000)).await;
        assert_eq!(coordinator.passes(), 2);

        // A non-positive period keeps the current one
        kv.set(keys::SYNC_PERIOD, "0").unwrap();
        time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(coordinator.passes(), 3);
        assert_eq!(scheduler.period(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn non_positive_period_does_not_schedule() {
        let (scheduler, _coordinator, kv) = scheduler();
        assert!(!scheduler.enable(0).unwrap());
        assert!(!scheduler.enable(-5).unwrap());
        assert!(!scheduler.is_scheduled());
        assert_eq!(kv.get(keys::SYNC_PERIOD).unwrap(), "-5");
    }

    #[tokio::test]
    async fn resume_follows_persisted_state() {
        let (scheduler, _coordinator, kv) = scheduler();
        assert!(!scheduler.resume().unwrap());

        kv.set(keys::SYNC_ENABLED, "1").unwrap();
        kv.set(keys::SYNC_PERIOD, "60000").unwrap();
        assert!(scheduler.resume().unwrap());
        assert_eq!(scheduler.period(), Some(Duration::from_secs(60)));
    }
}
