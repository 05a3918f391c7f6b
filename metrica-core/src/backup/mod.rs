//! Backup and restore of the metric store to a JSON file.
//!
//! The `BackupManager` keeps an in-memory snapshot mirror of the store and
//! writes it to disk either after every write (sync mode, store interval of
//! zero) or on a fixed interval (periodic mode). On startup the file can be
//! replayed into the store.
//!
//! # File format
//!
//! A pretty-printed JSON array of metric records, one per `(name, kind)`:
//!
//! ```text
//! [
//!    {
//!       "id": "PollCount",
//!       "type": "counter",
//!       "delta": 5
//!    }
//! ]
//! ```

use crate::error::{MetricaError, Result};
use crate::scheduler::ticker;
use crate::store::MetricStore;
use crate::types::{parse_counter, Metric, MetricKind};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, error, info, instrument, warn};

/// Indent used for backup files.
const BACKUP_INDENT: &[u8] = b"   ";

/// Snapshots a metric store to a file and restores it.
pub struct BackupManager {
    store: Arc<dyn MetricStore>,

    /// Zero means sync mode.
    store_interval: Duration,

    /// Backup file location.
    path: PathBuf,

    /// Snapshot mirror; the lock also serializes file writes.
    snapshot: Mutex<Vec<Metric>>,
}

impl BackupManager {
    pub fn new(store: Arc<dyn MetricStore>, store_interval: Duration, path: impl Into<PathBuf>) -> Self {
        Self { store, store_interval, path: path.into(), snapshot: Mutex::new(Vec::new()) }
    }

    /// Whether every write is flushed immediately.
    pub fn is_sync_mode(&self) -> bool {
        self.store_interval.is_zero()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn store_interval(&self) -> Duration {
        self.store_interval
    }

    /// Copy of the current snapshot mirror.
    pub async fn snapshot(&self) -> Vec<Metric> {
        self.snapshot.lock().await.clone()
    }

    /// Record one metric in the snapshot mirror.
    ///
    /// Replaces the record with the same name and kind, or appends a new one.
    pub async fn save_to_struct(&self, kind: MetricKind, name: &str, value: &str) -> Result<()> {
        let metric = parse_record(kind, name, value)?;
        upsert(&mut *self.snapshot.lock().await, metric);
        Ok(())
    }

    /// Write the snapshot to the backup file, logging any failure.
    pub async fn save_to_file(&self) {
        let snapshot = self.snapshot.lock().await;
        self.write_logged(&snapshot).await;
    }

    /// Write the snapshot to the backup file, fully replacing its contents.
    pub async fn try_save_to_file(&self) -> Result<()> {
        let snapshot = self.snapshot.lock().await;
        self.write_file(&snapshot).await
    }

    async fn write_logged(&self, snapshot: &[Metric]) {
        if let Err(e) = self.write_file(snapshot).await {
            error!(path = %self.path.display(), error = %e, "Failed to write backup file");
            metrics::counter!("metrica_backup_failures_total").increment(1);
        }
    }

    /// Callers hold the snapshot lock, which serializes file writes.
    #[instrument(skip_all, fields(path = %self.path.display()))]
    async fn write_file(&self, snapshot: &[Metric]) -> Result<()> {
        let mut data = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(BACKUP_INDENT);
        let mut serializer = serde_json::Serializer::with_formatter(&mut data, formatter);
        snapshot
            .serialize(&mut serializer)
            .map_err(|e| MetricaError::Serialization(e.to_string()))?;

        tokio::fs::write(&self.path, &data)
            .await
            .map_err(|e| MetricaError::Io { path: self.path.clone(), source: e })?;

        metrics::counter!("metrica_backup_saves_total").increment(1);
        debug!(records = snapshot.len(), "Backup saved");
        Ok(())
    }

    /// Replay the backup file into the store.
    ///
    /// Gauges are overwritten and counters are brought to the saved total,
    /// so restoring into a store that already holds the data (a durable
    /// backend across restarts) changes nothing. A missing file is not an
    /// error. The mirror keeps only the records that were applied. Returns
    /// how many distinct metrics were restored.
    #[instrument(skip(self), fields(path = %self.path.display()))]
    pub async fn restore(&self) -> Result<usize> {
        info!("Restoring metrics from backup");

        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No backup file, starting empty");
                return Ok(0);
            }
            Err(e) => return Err(MetricaError::Io { path: self.path.clone(), source: e }),
        };

        let records: Vec<Metric> = serde_json::from_slice(&data).map_err(|e| {
            error!(error = %e, "Backup file is not a valid metric array");
            MetricaError::Serialization(e.to_string())
        })?;

        let mut applied = Vec::new();
        for record in records {
            let result = match (record.kind, record.value, record.delta) {
                (MetricKind::Gauge, Some(value), _) => self.store.update_gauge(&record.id, value).await,
                (MetricKind::Counter, _, Some(total)) => self.set_counter(&record.id, total).await,
                _ => {
                    warn!(name = %record.id, kind = %record.kind, "Backup record has no value, skipping");
                    continue;
                }
            };
            match result {
                Ok(()) => upsert(&mut applied, record),
                Err(e) => error!(name = %record.id, error = %e, "Failed to restore metric"),
            }
        }

        let restored = applied.len();
        *self.snapshot.lock().await = applied;
        info!(restored, "Restore complete");
        Ok(restored)
    }

    /// Increment a counter by whatever brings it to `total`.
    async fn set_counter(&self, name: &str, total: i64) -> Result<()> {
        let current = match self.store.get_metric(MetricKind::Counter, name).await {
            Ok(value) => Some(parse_counter(&value)?),
            Err(MetricaError::NotFound { .. }) => None,
            Err(e) => return Err(e),
        };
        let delta = total
            .checked_sub(current.unwrap_or(0))
            .ok_or_else(|| MetricaError::OutOfRange(format!("counter {} cannot reach {}", name, total)))?;
        if delta == 0 && current.is_some() {
            return Ok(());
        }
        self.store.update_counter(name, delta).await
    }

    /// One periodic cycle: read the full store, refresh the mirror, write the file.
    #[instrument(skip(self))]
    pub async fn snapshot_store(&self) -> Result<()> {
        let mut snapshot = self.snapshot.lock().await;
        let all = self.store.get_all_metrics().await?;
        for (kind, name, value) in all.iter() {
            if name.is_empty() || value.is_empty() {
                continue;
            }
            match parse_record(kind, name, value) {
                Ok(metric) => upsert(&mut snapshot, metric),
                Err(e) => warn!(name, error = %e, "Skipping metric in backup"),
            }
        }
        self.write_logged(&snapshot).await;
        Ok(())
    }

    /// Sync-mode hook for write paths.
    ///
    /// Reads the metric's current value from the store, records it and
    /// flushes the file. The mirror lock is held throughout, so a later
    /// flush never carries an older value than an earlier one. No-op in
    /// periodic mode.
    pub async fn record_write(&self, kind: MetricKind, name: &str) -> Result<()> {
        if !self.is_sync_mode() {
            return Ok(());
        }
        let mut snapshot = self.snapshot.lock().await;
        let value = self.store.get_metric(kind, name).await?;
        upsert(&mut snapshot, parse_record(kind, name, &value)?);
        self.write_logged(&snapshot).await;
        Ok(())
    }

    /// Periodic driver; returns when the shutdown signal fires.
    ///
    /// Does nothing in sync mode.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        if self.is_sync_mode() {
            return;
        }
        info!(interval_secs = self.store_interval.as_secs(), "Starting periodic backup");

        let mut ticker = ticker(self.store_interval);
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Stopping periodic backup");
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.snapshot_store().await {
                        error!(error = %e, "Periodic backup failed");
                    }
                }
            }
        }
    }
}

fn parse_record(kind: MetricKind, name: &str, value: &str) -> Result<Metric> {
    Metric::parse(kind, name, value).inspect_err(|e| {
        error!(kind = %kind, name, error = %e, "Cannot parse metric for backup");
    })
}

/// Replace the record with the same name and kind, or append.
fn upsert(snapshot: &mut Vec<Metric>, metric: Metric) {
    match snapshot.iter_mut().find(|m| m.id == metric.id && m.kind == metric.kind) {
        Some(existing) => *existing = metric,
        None => snapshot.push(metric),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn manager(store: Arc<dyn MetricStore>, dir: &TempDir, interval: Duration) -> BackupManager {
        BackupManager::new(store, interval, dir.path().join("metrics-db.json"))
    }

    fn as_set(snapshot: &crate::types::MetricsSnapshot) -> BTreeSet<(MetricKind, String, String)> {
        snapshot.iter().map(|(k, n, v)| (k, n.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_sync_mode_detection() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        assert!(manager(store.clone(), &dir, Duration::ZERO).is_sync_mode());
        assert!(!manager(store, &dir, Duration::from_secs(300)).is_sync_mode());
    }

    #[tokio::test]
    async fn test_save_to_struct_updates_in_place() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store, &dir, Duration::ZERO);

        backup.save_to_struct(MetricKind::Gauge, "Alloc", "1.5").await.unwrap();
        backup.save_to_struct(MetricKind::Counter, "PollCount", "1").await.unwrap();
        backup.save_to_struct(MetricKind::Gauge, "Alloc", "2.5").await.unwrap();
        backup.save_to_struct(MetricKind::Counter, "Alloc", "7").await.unwrap();

        let snapshot = backup.snapshot().await;
        assert_eq!(
            snapshot,
            vec![
                Metric::gauge("Alloc", 2.5),
                Metric::counter("PollCount", 1),
                Metric::counter("Alloc", 7),
            ]
        );
    }

    #[tokio::test]
    async fn test_save_to_struct_rejects_malformed_value() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store, &dir, Duration::ZERO);

        let err = backup.save_to_struct(MetricKind::Counter, "PollCount", "1.5").await.unwrap_err();
        assert!(matches!(err, MetricaError::Parse { .. }));
        assert!(backup.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_file_format() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store, &dir, Duration::ZERO);

        backup.save_to_struct(MetricKind::Counter, "PollCount", "5").await.unwrap();
        backup.save_to_struct(MetricKind::Gauge, "Alloc", "42").await.unwrap();
        backup.try_save_to_file().await.unwrap();

        let written = std::fs::read_to_string(backup.path()).unwrap();
        let expected = "[\n   {\n      \"id\": \"PollCount\",\n      \"type\": \"counter\",\n      \"delta\": 5\n   },\n   {\n      \"id\": \"Alloc\",\n      \"type\": \"gauge\",\n      \"value\": 42.0\n   }\n]";
        assert_eq!(written, expected);
    }

    #[tokio::test]
    async fn test_save_overwrites_previous_contents() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store, &dir, Duration::ZERO);
        std::fs::write(backup.path(), "x".repeat(4096)).unwrap();

        backup.try_save_to_file().await.unwrap();
        assert_eq!(std::fs::read_to_string(backup.path()).unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_backup_round_trip() {
        let original: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        original.update_gauge("Alloc", 100.5).await.unwrap();
        original.update_gauge("Alloc", 42.0).await.unwrap();
        original.update_gauge("RandomValue", 0.123456789).await.unwrap();
        for _ in 0..5 {
            original.update_counter("PollCount", 1).await.unwrap();
        }
        original.update_counter("Alloc", 3).await.unwrap();

        let dir = TempDir::new().unwrap();
        let backup = manager(original.clone(), &dir, Duration::from_secs(300));
        backup.snapshot_store().await.unwrap();

        let fresh: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let restorer = manager(fresh.clone(), &dir, Duration::from_secs(300));
        assert_eq!(restorer.restore().await.unwrap(), 4);

        let expected = original.get_all_metrics().await.unwrap();
        let actual = fresh.get_all_metrics().await.unwrap();
        assert_eq!(as_set(&actual), as_set(&expected));
        assert_eq!(restorer.snapshot().await.len(), 4);
    }

    #[tokio::test]
    async fn test_restore_into_populated_store_sets_totals() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        store.update_counter("PollCount", 5).await.unwrap();
        store.update_gauge("Alloc", 42.0).await.unwrap();
        let dir = TempDir::new().unwrap();
        manager(store.clone(), &dir, Duration::from_secs(300)).snapshot_store().await.unwrap();

        // Restart against a store that kept its data.
        for _ in 0..2 {
            let restorer = manager(store.clone(), &dir, Duration::from_secs(300));
            assert_eq!(restorer.restore().await.unwrap(), 2);
            assert_eq!(store.get_metric(MetricKind::Counter, "PollCount").await.unwrap(), "5");
            assert_eq!(store.get_metric(MetricKind::Gauge, "Alloc").await.unwrap(), "42");
        }

        // Totals that drifted past the file are brought back to it.
        store.update_counter("PollCount", 7).await.unwrap();
        manager(store.clone(), &dir, Duration::from_secs(300)).restore().await.unwrap();
        assert_eq!(store.get_metric(MetricKind::Counter, "PollCount").await.unwrap(), "5");
    }

    #[tokio::test]
    async fn test_restore_creates_zero_counters() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store.clone(), &dir, Duration::ZERO);
        std::fs::write(backup.path(), r#"[{"id":"idle","type":"counter","delta":0}]"#).unwrap();

        assert_eq!(backup.restore().await.unwrap(), 1);
        assert_eq!(store.get_metric(MetricKind::Counter, "idle").await.unwrap(), "0");
    }

    #[tokio::test]
    async fn test_restore_mirror_holds_only_applied_records() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store.clone(), &dir, Duration::ZERO);
        std::fs::write(
            backup.path(),
            r#"[
                {"id":"b","type":"counter","delta":3},
                {"id":"x","type":"gauge","value":null},
                {"id":"y","type":"counter","value":1.5},
                {"id":"a","type":"gauge","value":1},
                {"id":"b","type":"counter","delta":7}
            ]"#,
        )
        .unwrap();

        assert_eq!(backup.restore().await.unwrap(), 2);
        assert_eq!(backup.snapshot().await, vec![Metric::counter("b", 7), Metric::gauge("a", 1.0)]);
        assert_eq!(store.get_metric(MetricKind::Counter, "b").await.unwrap(), "7");
        assert!(store.get_metric(MetricKind::Gauge, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_non_finite_gauge_never_reaches_backup() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store.clone(), &dir, Duration::ZERO);

        for value in ["NaN", "inf", "-inf"] {
            let err = backup.save_to_struct(MetricKind::Gauge, "x", value).await.unwrap_err();
            assert!(matches!(err, MetricaError::Parse { .. }));
        }
        assert!(store.update_gauge("y", f64::INFINITY).await.is_err());
        store.update_gauge("z", 0.5).await.unwrap();
        backup.snapshot_store().await.unwrap();

        let fresh: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        assert_eq!(manager(fresh, &dir, Duration::ZERO).restore().await.unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sync_writes_keep_latest_total() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = Arc::new(manager(store.clone(), &dir, Duration::ZERO));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let (store, backup) = (store.clone(), backup.clone());
            handles.push(tokio::spawn(async move {
                for _ in 0..10 {
                    store.update_counter("b", 1).await.unwrap();
                    backup.record_write(MetricKind::Counter, "b").await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(backup.snapshot().await, vec![Metric::counter("b", 160)]);
        let written: Vec<Metric> =
            serde_json::from_str(&std::fs::read_to_string(backup.path()).unwrap()).unwrap();
        assert_eq!(written, vec![Metric::counter("b", 160)]);
    }

    #[tokio::test]
    async fn test_restore_missing_file_is_empty() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store.clone(), &dir, Duration::ZERO);

        assert_eq!(backup.restore().await.unwrap(), 0);
        assert!(store.get_all_metrics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_restore_corrupt_file_fails() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store.clone(), &dir, Duration::ZERO);
        std::fs::write(backup.path(), "{not json").unwrap();

        assert!(matches!(backup.restore().await, Err(MetricaError::Serialization(_))));
        assert!(store.get_all_metrics().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_record_write_in_sync_mode_uses_current_value() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store.clone(), &dir, Duration::ZERO);

        store.update_counter("PollCount", 2).await.unwrap();
        backup.record_write(MetricKind::Counter, "PollCount").await.unwrap();
        store.update_counter("PollCount", 3).await.unwrap();
        backup.record_write(MetricKind::Counter, "PollCount").await.unwrap();

        let written: Vec<Metric> =
            serde_json::from_str(&std::fs::read_to_string(backup.path()).unwrap()).unwrap();
        assert_eq!(written, vec![Metric::counter("PollCount", 5)]);
    }

    #[tokio::test]
    async fn test_record_write_in_periodic_mode_is_noop() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        let dir = TempDir::new().unwrap();
        let backup = manager(store.clone(), &dir, Duration::from_secs(300));

        store.update_gauge("Alloc", 1.0).await.unwrap();
        backup.record_write(MetricKind::Gauge, "Alloc").await.unwrap();

        assert!(!backup.path().exists());
        assert!(backup.snapshot().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_driver_writes_and_stops() {
        let store: Arc<dyn MetricStore> = Arc::new(MemoryStore::new());
        store.update_gauge("Alloc", 9.0).await.unwrap();
        let dir = TempDir::new().unwrap();
        let backup = Arc::new(manager(store, &dir, Duration::from_secs(2)));

        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(backup.clone().run(rx));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(backup.snapshot().await, vec![Metric::gauge("Alloc", 9.0)]);

        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
