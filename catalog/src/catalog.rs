use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{info, warn};

use famface_cluster::ClusterId;

use crate::error::CatalogError;
use crate::mutate::{CleanupReport, MergeOutcome, SplitOutcome};
use crate::persist::{MemoryStore, SnapshotStore};
use crate::snapshot::Snapshot;
use crate::types::{FamilyEntry, FamilyUpdate};

/// Default time a mutation waits for the commit lease.
pub const DEFAULT_COMMIT_WAIT: Duration = Duration::from_secs(5);

/// The identity metadata store.
///
/// Readers take an `Arc<Snapshot>` and never block writers. Writers
/// serialize on a commit lease: each mutation clones the current snapshot,
/// edits the clone, validates it, persists it and only then publishes it.
/// Any failure leaves the previous snapshot current in memory and on disk.
pub struct Catalog {
    store: Box<dyn SnapshotStore>,
    current: RwLock<Arc<Snapshot>>,
    lease: Mutex<()>,
    commit_wait: Duration,
}

impl Catalog {
    /// Opens a catalog over `store`, loading and validating its last
    /// committed snapshot.
    pub fn open(
        store: impl SnapshotStore + 'static,
        commit_wait: Duration,
    ) -> Result<Self, CatalogError> {
        let snapshot = store.load()?;
        info!(
            generation = snapshot.generation,
            faces = snapshot.faces.len(),
            photos = snapshot.photos.len(),
            clusters = snapshot.clusters.len(),
            "catalog opened"
        );
        Ok(Self {
            store: Box::new(store),
            current: RwLock::new(Arc::new(snapshot)),
            lease: Mutex::new(()),
            commit_wait,
        })
    }

    /// An empty catalog backed by a [`MemoryStore`].
    pub fn in_memory() -> Self {
        Self {
            store: Box::new(MemoryStore::new()),
            current: RwLock::new(Arc::new(Snapshot::default())),
            lease: Mutex::new(()),
            commit_wait: DEFAULT_COMMIT_WAIT,
        }
    }

    /// The current committed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    fn lease(&self) -> Result<MutexGuard<'_, ()>, CatalogError> {
        self.lease.try_lock_for(self.commit_wait).ok_or(CatalogError::Busy)
    }

    /// Validates, persists and publishes `draft` as the successor of
    /// generation `base`. Caller holds the lease.
    fn install(
        &self,
        op: &'static str,
        mut draft: Snapshot,
        base: u64,
    ) -> Result<u64, CatalogError> {
        draft.generation = base + 1;
        let violations = draft.validate();
        if !violations.is_empty() {
            warn!(
                op,
                count = violations.len(),
                first = %violations[0],
                "rejected inconsistent snapshot"
            );
            return Err(CatalogError::Consistency(violations));
        }
        if let Err(e) = self.store.commit(&draft) {
            warn!(op, error = %e, "snapshot commit failed");
            if matches!(e, CatalogError::Conflict { .. }) {
                self.reload();
            }
            return Err(e);
        }
        let generation = draft.generation;
        *self.current.write() = Arc::new(draft);
        info!(op, generation, "committed snapshot");
        Ok(generation)
    }

    /// Replaces the in-memory snapshot with the store's latest commit.
    fn reload(&self) {
        match self.store.load() {
            Ok(latest) => {
                info!(generation = latest.generation, "reloaded snapshot from store");
                *self.current.write() = Arc::new(latest);
            }
            Err(e) => warn!(error = %e, "reload after conflict failed"),
        }
    }

    /// Runs `f` on a draft and commits the draft when `f` reports a change.
    fn mutate<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&mut Snapshot) -> Result<(T, bool), CatalogError>,
    ) -> Result<T, CatalogError> {
        let _lease = self.lease()?;
        let base = self.snapshot();
        let mut draft = (*base).clone();
        let (out, changed) = f(&mut draft)?;
        if changed {
            self.install(op, draft, base.generation)?;
        }
        Ok(out)
    }

    /// Commits a pipeline run built on generation `expected`. Fails with
    /// [`CatalogError::Conflict`] if another commit landed in between.
    pub fn commit_run(&self, expected: u64, draft: Snapshot) -> Result<u64, CatalogError> {
        let _lease = self.lease()?;
        let found = self.generation();
        if found != expected {
            warn!(expected, found, "run raced with another commit");
            return Err(CatalogError::Conflict { expected, found });
        }
        self.install("run", draft, found)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub fn assign_face_name(&self, face: &str, name: &str) -> Result<(), CatalogError> {
        self.mutate("assign_face_name", |d| d.assign_face_name(face, name).map(|o| (o, true)))
    }

    pub fn clear_face_name(&self, face: &str) -> Result<(), CatalogError> {
        self.mutate("clear_face_name", |d| d.clear_face_name(face).map(|o| (o, true)))
    }

    pub fn reset_face_name(&self, face: &str) -> Result<(), CatalogError> {
        self.mutate("reset_face_name", |d| d.reset_face_name(face).map(|o| (o, true)))
    }

    /// Returns faces relabeled.
    pub fn set_cluster_name(&self, cluster: ClusterId, name: &str) -> Result<usize, CatalogError> {
        self.mutate("set_cluster_name", |d| d.set_cluster_name(cluster, name).map(|n| (n, true)))
    }

    pub fn remove_cluster_name(&self, cluster: ClusterId) -> Result<usize, CatalogError> {
        self.mutate("remove_cluster_name", |d| d.remove_cluster_name(cluster).map(|n| (n, true)))
    }

    pub fn merge_clusters(
        &self,
        source: ClusterId,
        target: ClusterId,
    ) -> Result<MergeOutcome, CatalogError> {
        self.mutate("merge_clusters", |d| d.merge_clusters(source, target).map(|o| (o, true)))
    }

    pub fn split_face(&self, face: &str) -> Result<SplitOutcome, CatalogError> {
        self.mutate("split_face", |d| d.split_face(face).map(|o| (o, true)))
    }

    /// Returns faces changed; commits nothing when the labels are current.
    pub fn apply_name_map(&self) -> Result<usize, CatalogError> {
        self.mutate("apply_name_map", |d| {
            let n = d.apply_name_map();
            Ok((n, n > 0))
        })
    }

    pub fn set_photo_date(
        &self,
        file: &str,
        date: Option<NaiveDate>,
    ) -> Result<usize, CatalogError> {
        self.mutate("set_photo_date", |d| d.set_photo_date(file, date).map(|n| (n, true)))
    }

    pub fn upsert_family_entry(
        &self,
        person: &str,
        update: FamilyUpdate,
    ) -> Result<FamilyEntry, CatalogError> {
        self.mutate("upsert_family_entry", |d| {
            d.upsert_family_entry(person, update).map(|e| (e, true))
        })
    }

    pub fn delete_family_entry(&self, person: &str) -> Result<FamilyEntry, CatalogError> {
        self.mutate("delete_family_entry", |d| d.delete_family_entry(person).map(|e| (e, true)))
    }

    pub fn dismiss_orphan(&self, name: &str) -> Result<usize, CatalogError> {
        self.mutate("dismiss_orphan", |d| d.dismiss_orphan(name).map(|n| (n, true)))
    }

    /// Removes records whose photo file no longer `exists`.
    pub fn cleanup(&self, exists: impl Fn(&str) -> bool) -> Result<CleanupReport, CatalogError> {
        self.mutate("cleanup", |d| {
            let report = d.cleanup(exists);
            let changed = !report.is_noop();
            Ok((report, changed))
        })
    }
}
