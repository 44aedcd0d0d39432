use crate::config::StoreConfig;
use crate::error::Result;
use crate::infra::snapshot_archive::SnapshotArchive;
use crate::metrics::QualityMetrics;
use crate::snapshot::{RunId, Snapshot};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Bounded, TTL-aware store of the most recent snapshots.
///
/// Snapshots are published as `Arc`s under a write lock only once they are
/// complete (and archived, when an archive is configured), so readers either
/// see a whole snapshot or none. Oldest runs are evicted first once capacity
/// is exceeded; expired runs are hidden from readers immediately and removed
/// by `evict_expired`.
pub struct SnapshotStore {
    entries: RwLock<BTreeMap<RunId, Arc<Snapshot>>>,
    capacity: usize,
    ttl: Duration,
    archive: Option<SnapshotArchive>,
}

impl SnapshotStore {
    pub fn in_memory(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            capacity: capacity.max(1),
            ttl,
            archive: None,
        }
    }

    /// Store configured from `[store]`, reloading archived snapshots when an
    /// archive directory is set.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        let mut store = Self::in_memory(config.capacity, config.ttl());
        if let Some(dir) = &config.archive_dir {
            let archive = SnapshotArchive::open(dir)?;
            let loaded = archive.load_all()?;
            info!("loaded {} archived snapshots from {}", loaded.len(), dir);
            {
                let mut entries = store.write();
                for snapshot in loaded {
                    entries.insert(snapshot.run_id.clone(), Arc::new(snapshot));
                }
            }
            store.archive = Some(archive);
            let evicted = store.enforce_capacity();
            store.forget(&evicted);
        }
        Ok(store)
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<RunId, Arc<Snapshot>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<RunId, Arc<Snapshot>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn is_expired(&self, snapshot: &Snapshot, now: DateTime<Utc>) -> bool {
        now - snapshot.created_at > self.ttl
    }

    /// Publish a complete snapshot. Returns the ids evicted to stay within
    /// capacity.
    pub fn put(&self, snapshot: Snapshot) -> Result<Vec<RunId>> {
        if let Some(archive) = &self.archive {
            archive.write(&snapshot)?;
        }
        let run_id = snapshot.run_id.clone();
        self.write().insert(run_id.clone(), Arc::new(snapshot));
        debug!("published snapshot {}", run_id);

        let evicted = self.enforce_capacity();
        self.forget(&evicted);
        Ok(evicted)
    }

    fn enforce_capacity(&self) -> Vec<RunId> {
        let mut entries = self.write();
        let mut evicted = Vec::new();
        while entries.len() > self.capacity {
            match entries.pop_first() {
                Some((run_id, _)) => evicted.push(run_id),
                None => break,
            }
        }
        evicted
    }

    /// Drop archived copies of evicted runs.
    fn forget(&self, evicted: &[RunId]) {
        if evicted.is_empty() {
            return;
        }
        QualityMetrics::snapshots_evicted(evicted.len());
        if let Some(archive) = &self.archive {
            for run_id in evicted {
                if let Err(e) = archive.remove(run_id) {
                    warn!("failed to remove archived snapshot {}: {}", run_id, e);
                }
            }
        }
        info!("evicted {} snapshot(s)", evicted.len());
    }

    pub fn get(&self, run_id: &RunId) -> Option<Arc<Snapshot>> {
        self.get_at(run_id, Utc::now())
    }

    pub fn get_at(&self, run_id: &RunId, now: DateTime<Utc>) -> Option<Arc<Snapshot>> {
        self.read()
            .get(run_id)
            .filter(|s| !self.is_expired(s, now))
            .cloned()
    }

    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.latest_at(Utc::now())
    }

    pub fn latest_at(&self, now: DateTime<Utc>) -> Option<Arc<Snapshot>> {
        self.read()
            .values()
            .rev()
            .find(|s| !self.is_expired(s, now))
            .cloned()
    }

    pub fn evict_expired(&self) -> Vec<RunId> {
        self.evict_expired_at(Utc::now())
    }

    pub fn evict_expired_at(&self, now: DateTime<Utc>) -> Vec<RunId> {
        let evicted: Vec<RunId> = {
            let mut entries = self.write();
            let expired: Vec<RunId> = entries
                .values()
                .filter(|s| self.is_expired(s, now))
                .map(|s| s.run_id.clone())
                .collect();
            for run_id in &expired {
                entries.remove(run_id);
            }
            expired
        };
        self.forget(&evicted);
        evicted
    }

    /// Ids currently held, oldest first.
    pub fn run_ids(&self) -> Vec<RunId> {
        self.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WeightConfig;
    use crate::pipeline::collector::SourceManifest;
    use crate::pipeline::imputer::ImputationLog;
    use crate::pipeline::report::QualityReport;
    use crate::pipeline::schema::DeclaredSchema;
    use crate::pipeline::scorer::SnapshotScores;
    use crate::snapshot::{RunIdGenerator, RunParameters, RunStatus};
    use crate::types::TimeRange;
    use chrono::{NaiveDate, TimeZone};

    fn snapshot(ids: &RunIdGenerator, created_at: DateTime<Utc>) -> Snapshot {
        let day = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        Snapshot {
            run_id: ids.next(created_at),
            created_at,
            parameters: RunParameters::new(
                TimeRange::new(day, day).unwrap(),
                vec!["a".to_string()],
                WeightConfig {
                    completeness: 1.0,
                    consistency: 0.0,
                    freshness: 0.0,
                },
            ),
            status: RunStatus::Succeeded,
            manifest: SourceManifest::default(),
            schema: DeclaredSchema::default(),
            records: Vec::new(),
            report: QualityReport::default(),
            imputation_log: ImputationLog::default(),
            indicators: Vec::new(),
            scores: SnapshotScores::default(),
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn evicts_oldest_beyond_capacity() {
        let ids = RunIdGenerator::default();
        let store = SnapshotStore::in_memory(2, Duration::hours(1000));
        let first = snapshot(&ids, t0());
        let first_id = first.run_id.clone();
        store.put(first).unwrap();
        store.put(snapshot(&ids, t0() + Duration::minutes(1))).unwrap();
        let third = snapshot(&ids, t0() + Duration::minutes(2));
        let third_id = third.run_id.clone();
        let evicted = store.put(third).unwrap();
        assert_eq!(evicted, vec![first_id.clone()]);
        assert_eq!(store.len(), 2);
        assert!(store.get_at(&first_id, t0()).is_none());
        assert_eq!(store.latest_at(t0()).unwrap().run_id, third_id);
    }

    #[test]
    fn expired_snapshots_are_hidden_then_evicted() {
        let ids = RunIdGenerator::default();
        let store = SnapshotStore::in_memory(10, Duration::hours(24));
        let old = snapshot(&ids, t0());
        let old_id = old.run_id.clone();
        store.put(old).unwrap();
        let fresh = snapshot(&ids, t0() + Duration::hours(20));
        let fresh_id = fresh.run_id.clone();
        store.put(fresh).unwrap();

        let later = t0() + Duration::hours(30);
        assert!(store.get_at(&old_id, later).is_none());
        assert_eq!(store.latest_at(later).unwrap().run_id, fresh_id);
        assert_eq!(store.len(), 2);

        assert_eq!(store.evict_expired_at(later), vec![old_id]);
        assert_eq!(store.run_ids(), vec![fresh_id]);
    }

    #[test]
    fn readers_see_whole_snapshots_during_writes() {
        let ids = Arc::new(RunIdGenerator::default());
        let store = Arc::new(SnapshotStore::in_memory(3, Duration::hours(1000)));
        let writer = {
            let store = Arc::clone(&store);
            let ids = Arc::clone(&ids);
            std::thread::spawn(move || {
                for i in 0..50 {
                    store.put(snapshot(&ids, t0() + Duration::seconds(i))).unwrap();
                }
            })
        };
        for _ in 0..200 {
            if let Some(latest) = store.latest_at(t0()) {
                assert_eq!(latest.parameters.source_order, vec!["a".to_string()]);
                assert!(store.len() <= 4);
            }
        }
        writer.join().unwrap();
        assert_eq!(store.len(), 3);
    }
}
