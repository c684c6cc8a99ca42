//! Sync reconciler: drains the scan log to the remote store and pulls
//! attendee updates for the active event.

use crate::config::ScannerConfig;
use crate::database::{ScanLogEntry, TicketStore, UpsertReport};
use crate::remote::{RemoteError, RemoteTicketStore};
use crate::{CheckinError, Result};
use chrono::Utc;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Loop cadence and remote call bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub push_interval: Duration,
    pub pull_interval: Duration,
    pub remote_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            push_interval: Duration::from_secs(30),
            pull_interval: Duration::from_secs(10),
            remote_timeout: Duration::from_secs(8),
        }
    }
}

impl From<&ScannerConfig> for SyncSettings {
    fn from(config: &ScannerConfig) -> Self {
        Self {
            push_interval: config.push_interval(),
            pull_interval: config.pull_interval(),
            remote_timeout: config.remote_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub pushed: u64,
    /// Entries left unsynced for the next cycle.
    pub failed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullReport {
    /// `None` when no event is active and nothing was pulled.
    pub event_id: Option<String>,
    pub fetched: u64,
    pub applied: UpsertReport,
}

/// Moves data between the local store and the remote ticket system.
///
/// The reconciler is the only writer of the scan log's `synced` flag.
pub struct SyncReconciler {
    store: TicketStore,
    remote: Arc<dyn RemoteTicketStore>,
    settings: SyncSettings,
}

impl SyncReconciler {
    pub fn new(
        store: TicketStore,
        remote: Arc<dyn RemoteTicketStore>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            settings,
        }
    }

    async fn bounded<T, F>(&self, call: F) -> std::result::Result<T, RemoteError>
    where
        F: Future<Output = std::result::Result<T, RemoteError>>,
    {
        timeout(self.settings.remote_timeout, call)
            .await
            .unwrap_or_else(|_| {
                Err(RemoteError::Unavailable(format!(
                    "timed out after {:?}",
                    self.settings.remote_timeout
                )))
            })
    }

    async fn push_entry(&self, entry: &ScanLogEntry) -> std::result::Result<(), RemoteError> {
        self.bounded(async {
            self.remote
                .record_scan(&entry.code, &entry.scanner_id, entry.scanned_at)
                .await?;
            self.remote.set_checked_in(&entry.code, entry.scanned_at).await
        })
        .await
    }

    /// Push every unsynced scan, oldest first.
    ///
    /// A failed entry stays unsynced and the cycle moves on to the next one.
    pub async fn push_once(&self) -> Result<PushReport> {
        let pending = self.store.unsynced_scans()?;
        let mut report = PushReport::default();

        for entry in &pending {
            match self.push_entry(entry).await {
                Ok(()) => {
                    self.store.mark_synced(entry.scan_id)?;
                    report.pushed += 1;
                    debug!("Pushed scan {} ({})", entry.scan_id, entry.code);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!("Scan {} ({}) left for next cycle: {}", entry.scan_id, entry.code, e);
                }
            }
        }

        if report.pushed > 0 {
            let now = Utc::now();
            self.store.update_sync_metadata(|meta| meta.last_push_at = Some(now))?;
        }
        Ok(report)
    }

    /// Pull the active event's attendees. Does nothing while no event is active.
    pub async fn pull_once(&self) -> Result<PullReport> {
        match self.store.sync_metadata()?.active_event_id {
            Some(event_id) => self.pull_event(&event_id).await,
            None => Ok(PullReport::default()),
        }
    }

    /// Fetch one event's attendees and merge them last-write-wins.
    pub async fn pull_event(&self, event_id: &str) -> Result<PullReport> {
        let records = self.bounded(self.remote.fetch_attendees(event_id)).await?;
        let applied = self.store.upsert_attendees(&records)?;

        let now = Utc::now();
        self.store.update_sync_metadata(|meta| meta.last_pull_at = Some(now))?;

        Ok(PullReport {
            event_id: Some(event_id.to_string()),
            fetched: records.len() as u64,
            applied,
        })
    }

    /// Cache an event and its attendees, and make it the active event.
    pub async fn preload(&self, event_id: &str) -> Result<PullReport> {
        match self.bounded(self.remote.fetch_event(event_id)).await? {
            Some(event) => {
                self.store.upsert_events(std::slice::from_ref(&event))?;
                info!("Cached event {} ({})", event.id, event.name);
            }
            None => {
                return Err(CheckinError::EventNotFound(event_id.to_string()));
            }
        }

        let report = self.pull_event(event_id).await?;
        self.store.set_active_event(Some(event_id))?;
        info!(
            "Preloaded {} attendees for event {} ({} new, {} updated)",
            report.fetched, event_id, report.applied.inserted, report.applied.updated
        );
        Ok(report)
    }

    /// One push cycle followed by one pull cycle.
    pub async fn sync_now(&self) -> Result<(PushReport, PullReport)> {
        let pushed = self.push_once().await?;
        let pulled = self.pull_once().await?;
        Ok((pushed, pulled))
    }

    async fn push_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.settings.push_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => match self.push_once().await {
                    Ok(report) if report.pushed > 0 || report.failed > 0 => {
                        info!("Push cycle: {} pushed, {} deferred", report.pushed, report.failed);
                    }
                    Ok(_) => {}
                    Err(e) => error!("Push cycle error: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("Push loop stopped");
    }

    async fn pull_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.settings.pull_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => match self.pull_once().await {
                    Ok(PullReport { event_id: Some(event_id), applied, .. }) => {
                        if applied.inserted + applied.updated > 0 {
                            info!(
                                "Pulled event {}: {} new, {} updated",
                                event_id, applied.inserted, applied.updated
                            );
                        }
                    }
                    Ok(_) => {}
                    Err(e) => error!("Pull cycle error: {}", e),
                },
                _ = shutdown.changed() => break,
            }
        }
        debug!("Pull loop stopped");
    }

    /// Run both loops until `shutdown` changes or its sender is dropped.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        tokio::join!(self.push_loop(shutdown.clone()), self.pull_loop(shutdown));
    }

    /// Run the loops on a background task.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{Attendee, Event, VerificationStatus};
    use crate::remote::mock::{MockMode, MockRemote};
    use chrono::{DateTime, TimeZone};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    fn attendee(code: &str, updated_at: DateTime<Utc>) -> Attendee {
        Attendee {
            id: format!("id-{}", code),
            event_id: "EVENT-1".to_string(),
            code: code.to_string(),
            name: String::new(),
            email: String::new(),
            ticket_type: None,
            checked_in: false,
            checked_in_at: None,
            updated_at,
            verification_status: VerificationStatus::Pending,
            event: None,
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            push_interval: Duration::from_millis(50),
            pull_interval: Duration::from_millis(50),
            remote_timeout: Duration::from_millis(100),
        }
    }

    fn store_with_scans(n: i64) -> TicketStore {
        let store = TicketStore::in_memory().unwrap();
        let records: Vec<Attendee> = (0..n).map(|i| attendee(&format!("C{}", i), at(0))).collect();
        store.upsert_attendees(&records).unwrap();
        for i in 0..n {
            store.record_check_in(&format!("C{}", i), "scanner_001", at(10 + i)).unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_push_with_healthy_remote_drains_log() {
        let store = store_with_scans(3);
        let remote = Arc::new(MockRemote::online().with_attendees(vec![attendee("C0", at(0))]));
        let reconciler = SyncReconciler::new(store.clone(), remote.clone(), settings());

        let report = reconciler.push_once().await.unwrap();
        assert_eq!(report, PushReport { pushed: 3, failed: 0 });
        assert!(store.unsynced_scans().unwrap().is_empty());
        assert!(store.sync_metadata().unwrap().last_push_at.is_some());

        let codes: Vec<String> = remote.scans().into_iter().map(|s| s.code).collect();
        assert_eq!(codes, vec!["C0", "C1", "C2"]);
        assert_eq!(remote.attendee("C0").unwrap().checked_in_at, Some(at(10)));
    }

    #[tokio::test]
    async fn test_push_with_failing_remote_loses_nothing() {
        let store = store_with_scans(4);
        let remote = Arc::new(MockRemote::new(MockMode::Failing));
        let reconciler = SyncReconciler::new(store.clone(), remote.clone(), settings());

        let report = reconciler.push_once().await.unwrap();
        assert_eq!(report, PushReport { pushed: 0, failed: 4 });
        assert_eq!(store.unsynced_scans().unwrap().len(), 4);
        assert_eq!(store.scan_count().unwrap(), 4);

        // Recovery delivers each entry exactly once
        remote.set_mode(MockMode::Online);
        reconciler.push_once().await.unwrap();
        reconciler.push_once().await.unwrap();
        assert!(store.unsynced_scans().unwrap().is_empty());
        assert_eq!(remote.scans().len(), 4);
    }

    #[tokio::test]
    async fn test_push_isolates_failing_entry() {
        let store = store_with_scans(3);
        let remote = Arc::new(MockRemote::online());
        remote.fail_writes_for("C1");
        let reconciler = SyncReconciler::new(store.clone(), remote.clone(), settings());

        let report = reconciler.push_once().await.unwrap();
        assert_eq!(report, PushReport { pushed: 2, failed: 1 });
        let left: Vec<String> = store
            .unsynced_scans()
            .unwrap()
            .into_iter()
            .map(|s| s.code)
            .collect();
        assert_eq!(left, vec!["C1"]);
    }

    #[tokio::test]
    async fn test_push_times_out_on_hanging_remote() {
        let store = store_with_scans(2);
        let remote = Arc::new(MockRemote::new(MockMode::Hanging));
        let reconciler = SyncReconciler::new(store.clone(), remote, settings());

        let report = reconciler.push_once().await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(store.unsynced_scans().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_pull_without_active_event_is_noop() {
        let store = TicketStore::in_memory().unwrap();
        let remote = Arc::new(MockRemote::online().with_attendees(vec![attendee("C0", at(0))]));
        let reconciler = SyncReconciler::new(store.clone(), remote, settings());

        let report = reconciler.pull_once().await.unwrap();
        assert!(report.event_id.is_none());
        assert!(!store.exists("C0").unwrap());
    }

    #[tokio::test]
    async fn test_pull_merges_active_event() {
        let store = TicketStore::in_memory().unwrap();
        store.set_active_event(Some("EVENT-1")).unwrap();
        let mut other = attendee("D0", at(0));
        other.event_id = "EVENT-2".to_string();
        let records = vec![attendee("C0", at(0)), attendee("C1", at(0)), other];
        let remote = Arc::new(MockRemote::online().with_attendees(records));
        let reconciler = SyncReconciler::new(store.clone(), remote, settings());

        let report = reconciler.pull_once().await.unwrap();
        assert_eq!(report.event_id.as_deref(), Some("EVENT-1"));
        assert_eq!(report.fetched, 2);
        assert_eq!(report.applied.inserted, 2);
        assert!(store.exists("C1").unwrap());
        assert!(!store.exists("D0").unwrap());

        let again = reconciler.pull_once().await.unwrap();
        assert_eq!(again.applied.kept_local, 2);
    }

    #[tokio::test]
    async fn test_pull_error_surfaces_without_touching_store() {
        let store = TicketStore::in_memory().unwrap();
        store.set_active_event(Some("EVENT-1")).unwrap();
        let remote = Arc::new(MockRemote::new(MockMode::Unreachable));
        let reconciler = SyncReconciler::new(store.clone(), remote, settings());

        let err = reconciler.pull_once().await.unwrap_err();
        assert!(matches!(err, CheckinError::Remote(ref e) if e.is_unavailable()));
        assert!(store.sync_metadata().unwrap().last_pull_at.is_none());
    }

    #[tokio::test]
    async fn test_preload_caches_event_and_activates_it() {
        let store = TicketStore::in_memory().unwrap();
        let remote = Arc::new(
            MockRemote::online()
                .with_attendees(vec![attendee("C0", at(0))])
                .with_event(Event {
                    id: "EVENT-1".to_string(),
                    name: "Launch Party".to_string(),
                    event_date: Some("2024-05-01".to_string()),
                    venue: Some("Hall A".to_string()),
                    organizer_id: None,
                    updated_at: None,
                }),
        );
        let reconciler = SyncReconciler::new(store.clone(), remote, settings());

        let report = reconciler.preload("EVENT-1").await.unwrap();
        assert_eq!(report.fetched, 1);
        assert_eq!(store.get_event("EVENT-1").unwrap().unwrap().name, "Launch Party");
        assert_eq!(store.sync_metadata().unwrap().active_event_id.as_deref(), Some("EVENT-1"));

        assert!(reconciler.preload("EVENT-404").await.is_err());
        assert_eq!(store.sync_metadata().unwrap().active_event_id.as_deref(), Some("EVENT-1"));
    }

    #[tokio::test]
    async fn test_loops_run_until_shutdown() {
        let store = store_with_scans(2);
        store.set_active_event(Some("EVENT-1")).unwrap();
        let remote = Arc::new(MockRemote::online().with_attendees(vec![attendee("NEW", at(0))]));
        let reconciler = Arc::new(SyncReconciler::new(store.clone(), remote, settings()));

        let (tx, rx) = watch::channel(false);
        let handle = reconciler.spawn(rx);

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("loops must stop on shutdown")
            .unwrap();

        assert!(store.unsynced_scans().unwrap().is_empty());
        assert!(store.exists("NEW").unwrap());
    }

    #[tokio::test]
    async fn test_loops_survive_failing_cycles() {
        let store = store_with_scans(1);
        store.set_active_event(Some("EVENT-1")).unwrap();
        let remote = Arc::new(MockRemote::new(MockMode::Failing));
        let reconciler = Arc::new(SyncReconciler::new(store.clone(), remote.clone(), settings()));

        let (tx, rx) = watch::channel(false);
        let handle = reconciler.spawn(rx);

        tokio::time::sleep(Duration::from_millis(150)).await;
        remote.set_mode(MockMode::Online);
        tokio::time::sleep(Duration::from_millis(200)).await;
        drop(tx);
        handle.await.unwrap();

        assert!(store.unsynced_scans().unwrap().is_empty());
    }
}
