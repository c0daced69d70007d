//! Durable storage for committed snapshots.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs2::FileExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use famface_cluster::ClusterId;

use crate::error::{CatalogError, Violation};
use crate::snapshot::Snapshot;
use crate::types::{Cluster, EmbeddingStore, Face, FamilyEntry, OrphanedName, Photo};

/// Persists committed snapshots.
///
/// Implementations must be safe for concurrent use. A commit either lands
/// completely or leaves the previously committed snapshot loadable.
pub trait SnapshotStore: Send + Sync {
    /// Loads the last committed snapshot; an empty store yields an empty
    /// snapshot at generation 0.
    fn load(&self) -> Result<Snapshot, CatalogError>;

    /// Durably replaces the committed snapshot.
    fn commit(&self, snapshot: &Snapshot) -> Result<(), CatalogError>;
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory [`SnapshotStore`] implementation.
/// Data is lost on restart. Suitable for testing or ephemeral use.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Option<Snapshot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of the last committed generation, 0 if none.
    pub fn generation(&self) -> u64 {
        self.inner.lock().as_ref().map_or(0, |s| s.generation)
    }
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Snapshot, CatalogError> {
        Ok(self.inner.lock().clone().unwrap_or_default())
    }

    fn commit(&self, snapshot: &Snapshot) -> Result<(), CatalogError> {
        *self.inner.lock() = Some(snapshot.clone());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DirStore
// ---------------------------------------------------------------------------

const CURRENT: &str = "CURRENT";
const LOCK: &str = "LOCK";
const METADATA: &str = "metadata.json";
const NAME_MAP: &str = "name_map.json";
const FAMILY_TREE: &str = "family_tree.json";
const EMBEDDINGS: &str = "embeddings.msgpack";
const GEN_PREFIX: &str = "gen-";
const TMP_SUFFIX: &str = ".tmp";

/// `metadata.json` document.
#[derive(Debug, Default, Serialize, Deserialize)]
struct MetadataDoc {
    generation: u64,
    #[serde(default)]
    photos: Vec<Photo>,
    #[serde(default)]
    faces: Vec<Face>,
    #[serde(default)]
    clusters: Vec<Cluster>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    orphaned_names: Vec<OrphanedName>,
}

/// Directory-backed [`SnapshotStore`].
///
/// Layout:
///
/// ```text
/// <root>/CURRENT                      names the live generation directory
/// <root>/gen-000042/metadata.json     photos, faces, clusters
/// <root>/gen-000042/name_map.json     {"cluster_3": "Alice"}
/// <root>/gen-000042/family_tree.json
/// <root>/gen-000042/embeddings.msgpack
/// ```
///
/// A generation is written to a temporary directory, synced and renamed
/// into place before `CURRENT` is replaced the same way. Older generations
/// beyond `keep` are pruned afterwards.
///
/// Commits hold an exclusive lock on `<root>/LOCK`, so several processes may
/// share one data directory. A commit whose parent generation is no longer
/// the one named by `CURRENT` fails with [`CatalogError::Conflict`].
pub struct DirStore {
    root: PathBuf,
    keep: usize,
    write_lock: Mutex<()>,
}

impl DirStore {
    pub fn open(root: impl Into<PathBuf>, keep: usize) -> Result<Self, CatalogError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            keep: keep.max(1),
            write_lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn gen_dir_name(generation: u64) -> String {
        format!("{GEN_PREFIX}{generation:06}")
    }

    fn parse_gen(name: &str) -> Option<u64> {
        name.strip_prefix(GEN_PREFIX)?.parse().ok()
    }

    /// Generation named by `CURRENT`, if any.
    pub fn current_generation(&self) -> Result<Option<u64>, CatalogError> {
        let path = self.root.join(CURRENT);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::parse_gen(text.trim())
            .map(Some)
            .ok_or_else(|| {
                CatalogError::Storage(format!("malformed CURRENT file: {:?}", text.trim()))
            })
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CatalogError> {
        let bytes = fs::read(path)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CatalogError::Serialization(format!("{}: {e}", path.display())))
    }

    fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> Result<(), CatalogError> {
        let mut file = fs::File::create(dir.join(name))?;
        file.write_all(bytes)?;
        file.sync_all()?;
        Ok(())
    }

    fn sync_dir(dir: &Path) {
        // Not every platform can fsync a directory.
        if let Err(e) = fs::File::open(dir).and_then(|d| d.sync_all()) {
            debug!(dir = %dir.display(), error = %e, "directory sync skipped");
        }
    }

    fn json<T: Serialize>(value: &T) -> Result<Vec<u8>, CatalogError> {
        serde_json::to_vec_pretty(value).map_err(|e| CatalogError::Serialization(e.to_string()))
    }

    fn write_generation(&self, dir: &Path, snapshot: &Snapshot) -> Result<(), CatalogError> {
        let metadata = MetadataDoc {
            generation: snapshot.generation,
            photos: snapshot.photos.values().cloned().collect(),
            faces: snapshot.faces.values().cloned().collect(),
            clusters: snapshot.clusters.values().cloned().collect(),
            orphaned_names: snapshot.orphaned.clone(),
        };
        let name_map: BTreeMap<String, &String> =
            snapshot.name_map.iter().map(|(id, n)| (id.key(), n)).collect();
        let embeddings = rmp_serde::to_vec_named(snapshot.embeddings.as_ref())
            .map_err(|e| CatalogError::Serialization(e.to_string()))?;

        fs::create_dir_all(dir)?;
        Self::write_file(dir, METADATA, &Self::json(&metadata)?)?;
        Self::write_file(dir, NAME_MAP, &Self::json(&name_map)?)?;
        Self::write_file(dir, FAMILY_TREE, &Self::json(&snapshot.family)?)?;
        Self::write_file(dir, EMBEDDINGS, &embeddings)?;
        Self::sync_dir(dir);
        Ok(())
    }

    fn read_generation(&self, generation: u64) -> Result<Snapshot, CatalogError> {
        let dir = self.root.join(Self::gen_dir_name(generation));
        let metadata: MetadataDoc = Self::read_json(&dir.join(METADATA))?;
        let name_map: BTreeMap<String, String> = Self::read_json(&dir.join(NAME_MAP))?;
        let family: BTreeMap<String, FamilyEntry> = Self::read_json(&dir.join(FAMILY_TREE))?;
        let embeddings: EmbeddingStore = rmp_serde::from_slice(&fs::read(dir.join(EMBEDDINGS))?)
            .map_err(|e| CatalogError::Serialization(format!("{EMBEDDINGS}: {e}")))?;

        if metadata.generation != generation {
            return Err(CatalogError::Storage(format!(
                "{} holds generation {}",
                dir.display(),
                metadata.generation
            )));
        }

        let mut violations = Vec::new();
        let mut snap = Snapshot {
            generation,
            family,
            orphaned: metadata.orphaned_names,
            embeddings: Arc::new(embeddings),
            ..Default::default()
        };
        for photo in metadata.photos {
            let file = photo.file.clone();
            if snap.photos.insert(file.clone(), photo).is_some() {
                violations.push(Violation::Duplicate {
                    kind: "photo",
                    id: file,
                });
            }
        }
        for face in metadata.faces {
            let id = face.id.clone();
            if snap.faces.insert(id.clone(), face).is_some() {
                violations.push(Violation::Duplicate {
                    kind: "face",
                    id: id.to_string(),
                });
            }
        }
        for cluster in metadata.clusters {
            let id = cluster.id;
            if snap.clusters.insert(id, cluster).is_some() {
                violations.push(Violation::Duplicate {
                    kind: "cluster",
                    id: id.to_string(),
                });
            }
        }
        for (key, name) in name_map {
            let id: ClusterId = key.parse().map_err(|_| {
                CatalogError::Serialization(format!("{NAME_MAP}: bad cluster key {key:?}"))
            })?;
            snap.name_map.insert(id, name);
        }

        violations.extend(snap.validate());
        if !violations.is_empty() {
            return Err(CatalogError::Consistency(violations));
        }
        Ok(snap)
    }

    /// Blocks until this process holds the data dir lock. Released when the
    /// returned file is dropped.
    fn lock(&self) -> Result<File, CatalogError> {
        let path = self.root.join(LOCK);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| CatalogError::Storage(format!("open {}: {e}", path.display())))?;
        file.lock_exclusive()
            .map_err(|e| CatalogError::Storage(format!("lock {}: {e}", path.display())))?;
        Ok(file)
    }

    fn replace_current(&self, generation: u64) -> Result<(), CatalogError> {
        let tmp = format!("{CURRENT}{TMP_SUFFIX}");
        Self::write_file(&self.root, &tmp, Self::gen_dir_name(generation).as_bytes())?;
        fs::rename(self.root.join(&tmp), self.root.join(CURRENT))?;
        Self::sync_dir(&self.root);
        Ok(())
    }

    /// Removes generations older than the newest `keep` and leftover
    /// temporary directories. Failures are logged, never returned.
    fn prune(&self, current: u64) {
        let entries = match fs::read_dir(&self.root) {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "cannot list data dir for pruning");
                return;
            }
        };
        let mut gens = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(GEN_PREFIX) && name.ends_with(TMP_SUFFIX) {
                let _ = fs::remove_dir_all(entry.path());
            } else if let Some(g) = Self::parse_gen(&name) {
                gens.push(g);
            }
        }
        gens.sort_unstable_by(|a, b| b.cmp(a));
        for g in gens.into_iter().filter(|&g| g != current).skip(self.keep.saturating_sub(1)) {
            let dir = self.root.join(Self::gen_dir_name(g));
            match fs::remove_dir_all(&dir) {
                Ok(()) => debug!(generation = g, "pruned generation"),
                Err(e) => warn!(generation = g, error = %e, "failed to prune generation"),
            }
        }
    }
}

impl SnapshotStore for DirStore {
    fn load(&self) -> Result<Snapshot, CatalogError> {
        match self.current_generation()? {
            None => Ok(Snapshot::default()),
            Some(g) => self.read_generation(g),
        }
    }

    fn commit(&self, snapshot: &Snapshot) -> Result<(), CatalogError> {
        let _guard = self.write_lock.lock();
        let _lock = self.lock()?;

        let generation = snapshot.generation;
        let expected = generation.saturating_sub(1);
        let found = self.current_generation()?.unwrap_or(0);
        if found != expected {
            warn!(expected, found, "data dir advanced by another writer");
            return Err(CatalogError::Conflict { expected, found });
        }

        let name = Self::gen_dir_name(generation);
        let tmp = self.root.join(format!("{name}{TMP_SUFFIX}"));
        let dir = self.root.join(&name);

        if tmp.exists() {
            warn!(path = %tmp.display(), "removing stale temp generation");
            fs::remove_dir_all(&tmp)?;
        }
        if let Err(e) = self.write_generation(&tmp, snapshot) {
            warn!(path = %tmp.display(), error = %e, "generation write failed, cleaning up");
            let _ = fs::remove_dir_all(&tmp);
            return Err(e);
        }
        if dir.exists() {
            // Renamed into place but never named by CURRENT.
            let aside = self.root.join(format!("{name}.unreferenced{TMP_SUFFIX}"));
            warn!(path = %dir.display(), "moving aside unreferenced generation");
            if aside.exists() {
                fs::remove_dir_all(&aside)?;
            }
            fs::rename(&dir, &aside)?;
        }
        fs::rename(&tmp, &dir)?;
        Self::sync_dir(&self.root);
        self.replace_current(generation)?;
        debug!(generation, dir = %dir.display(), "committed generation");

        self.prune(generation);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fixtures::{build, name};
    use crate::types::FamilyUpdate;

    fn sample(generation: u64) -> Snapshot {
        let mut s = build(
            &[("a.jpg", Some("2020-02-02"), &["a_face0", "a_face1"]), ("b.jpg", None, &[])],
            &[(0, &["a_face0"]), (4, &["a_face1"])],
        );
        name(&mut s, 4, "Alice");
        s.upsert_family_entry(
            "Alice",
            FamilyUpdate {
                parents: Some(vec!["Eve".into()]),
                ..Default::default()
            },
        )
        .unwrap();
        s.orphaned.push(OrphanedName {
            cluster: ClusterId(9),
            name: "Gone".into(),
        });
        s.generation = generation;
        s
    }

    fn same(a: &Snapshot, b: &Snapshot) {
        assert_eq!(a.generation, b.generation);
        assert_eq!(a.faces, b.faces);
        assert_eq!(a.photos, b.photos);
        assert_eq!(a.clusters, b.clusters);
        assert_eq!(a.name_map, b.name_map);
        assert_eq!(a.family, b.family);
        assert_eq!(a.orphaned, b.orphaned);
        assert_eq!(a.embeddings, b.embeddings);
    }

    #[test]
    fn memory_store_round_trip() {
        let store = MemoryStore::new();
        assert_eq!(store.load().unwrap().generation, 0);
        store.commit(&sample(3)).unwrap();
        assert_eq!(store.generation(), 3);
        same(&store.load().unwrap(), &sample(3));
    }

    #[test]
    fn empty_dir_loads_empty_snapshot() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path(), 2).unwrap();
        let snap = store.load().unwrap();
        assert_eq!(snap.generation, 0);
        assert_eq!(snap.faces().count(), 0);
    }

    #[test]
    fn dir_store_commit_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path(), 2).unwrap();
        store.commit(&sample(1)).unwrap();
        assert_eq!(store.current_generation().unwrap(), Some(1));

        let reopened = DirStore::open(tmp.path(), 2).unwrap();
        same(&reopened.load().unwrap(), &sample(1));

        let names = fs::read_to_string(tmp.path().join("gen-000001").join(NAME_MAP)).unwrap();
        assert!(names.contains(r#""cluster_4": "Alice""#));
    }

    #[test]
    fn old_generations_are_pruned() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path(), 2).unwrap();
        for g in 1..=4 {
            store.commit(&sample(g)).unwrap();
        }
        assert!(!tmp.path().join("gen-000001").exists());
        assert!(!tmp.path().join("gen-000002").exists());
        assert!(tmp.path().join("gen-000003").exists());
        assert!(tmp.path().join("gen-000004").exists());
        assert_eq!(store.load().unwrap().generation, 4);
    }

    #[test]
    fn interrupted_write_keeps_previous_generation() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path(), 2).unwrap();
        store.commit(&sample(1)).unwrap();

        // A half-written generation that never reached CURRENT.
        let partial = tmp.path().join("gen-000002.tmp");
        fs::create_dir_all(&partial).unwrap();
        fs::write(partial.join(METADATA), b"{ truncated").unwrap();

        let snap = DirStore::open(tmp.path(), 2).unwrap().load().unwrap();
        assert_eq!(snap.generation, 1);

        store.commit(&sample(2)).unwrap();
        assert!(!partial.exists());
        assert_eq!(store.load().unwrap().generation, 2);
    }

    #[test]
    fn second_writer_on_same_dir_conflicts() {
        let tmp = tempfile::tempdir().unwrap();
        let a = DirStore::open(tmp.path(), 2).unwrap();
        let b = DirStore::open(tmp.path(), 2).unwrap();
        a.commit(&sample(1)).unwrap();

        let mut other = sample(1);
        other.family.clear();
        let err = b.commit(&other).unwrap_err();
        assert!(matches!(err, CatalogError::Conflict { expected: 0, found: 1 }));
        assert!(err.is_retryable());
        same(&b.load().unwrap(), &sample(1));

        b.commit(&sample(2)).unwrap();
        assert!(matches!(
            a.commit(&sample(2)),
            Err(CatalogError::Conflict { expected: 1, found: 2 })
        ));
        assert!(tmp.path().join(LOCK).exists());
    }

    #[test]
    fn unreferenced_generation_dir_is_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path(), 2).unwrap();
        store.commit(&sample(1)).unwrap();

        // Renamed into place, then the process died before CURRENT moved.
        let stray = tmp.path().join("gen-000002");
        fs::create_dir_all(&stray).unwrap();
        fs::write(stray.join(METADATA), b"{ truncated").unwrap();

        store.commit(&sample(2)).unwrap();
        same(&store.load().unwrap(), &sample(2));
        assert!(!tmp.path().join("gen-000002.unreferenced.tmp").exists());
    }

    #[test]
    fn inconsistent_documents_are_rejected_on_load() {
        let tmp = tempfile::tempdir().unwrap();
        let store = DirStore::open(tmp.path(), 2).unwrap();
        store.commit(&sample(1)).unwrap();

        let path = tmp.path().join("gen-000001").join(NAME_MAP);
        fs::write(&path, br#"{"cluster_4": "Alice", "cluster_77": "Ghost"}"#).unwrap();
        match store.load() {
            Err(CatalogError::Consistency(v)) => {
                assert_eq!(v, vec![Violation::DanglingName(ClusterId(77))]);
            }
            other => panic!("expected consistency error, got {other:?}"),
        }
    }

    #[test]
    fn malformed_current_is_a_storage_error() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join(CURRENT), b"nonsense").unwrap();
        let store = DirStore::open(tmp.path(), 2).unwrap();
        assert!(matches!(store.load(), Err(CatalogError::Storage(_))));
    }
}
