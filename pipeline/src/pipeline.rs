use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use famface_catalog::{
    BoundingBox, Catalog, CleanupReport, FaceId, OrphanedName, Reclustered, Snapshot,
};
use famface_cluster::{ClusterId, Clusterer, StabilizeConfig};

use crate::cancel::CancelToken;
use crate::error::PipelineError;
use crate::source::{FaceDetector, FaceEmbedder, PhotoSource};

/// Clustering and reconciliation settings for runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub clustering: famface_cluster::Config,
    #[serde(default)]
    pub stabilize: StabilizeConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Ingest new photos and embed faces that have no vector yet.
    #[default]
    Incremental,
    /// Like incremental; with `reembed` every face is embedded again.
    Full,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub mode: RunMode,
    /// Re-embed every face. Only honored in [`RunMode::Full`].
    #[serde(default)]
    pub reembed: bool,
}

impl RunOptions {
    pub fn incremental() -> Self {
        Self::default()
    }

    pub fn full(reembed: bool) -> Self {
        Self {
            mode: RunMode::Full,
            reembed,
        }
    }
}

/// One photo or face the oracles or the catalog rejected. The run goes on
/// without it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    pub photo: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceId>,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub mode: RunMode,
    pub photos_scanned: usize,
    pub photos_added: usize,
    pub faces_added: usize,
    pub embedded: usize,
    pub failures: Vec<ItemFailure>,
    pub clusters: usize,
    pub noise: usize,
    pub kept: usize,
    pub created: usize,
    pub retired: Vec<ClusterId>,
    pub orphaned: Vec<OrphanedName>,
    pub relabeled: usize,
    pub generation: u64,
}

impl RunReport {
    fn absorb(&mut self, r: Reclustered) {
        self.clusters = r.clusters;
        self.noise = r.noise;
        self.kept = r.kept;
        self.created = r.created;
        self.retired = r.retired;
        self.orphaned = r.orphaned;
        self.relabeled = r.relabeled;
    }
}

/// Brings the catalog up to date with the photo source.
///
/// A run works on a private draft of the current snapshot: ingest new
/// photos, embed faces, re-cluster everything, reconcile with existing
/// cluster ids and commit. Readers see the old snapshot until the commit.
pub struct Pipeline {
    catalog: Arc<Catalog>,
    source: Arc<dyn PhotoSource>,
    detector: Arc<dyn FaceDetector>,
    embedder: Arc<dyn FaceEmbedder>,
    clusterer: Clusterer,
    stabilize: StabilizeConfig,
}

impl Pipeline {
    pub fn new(
        catalog: Arc<Catalog>,
        source: Arc<dyn PhotoSource>,
        detector: Arc<dyn FaceDetector>,
        embedder: Arc<dyn FaceEmbedder>,
        cfg: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        Ok(Self {
            catalog,
            source,
            detector,
            embedder,
            clusterer: Clusterer::new(cfg.clustering)?,
            stabilize: cfg.stabilize,
        })
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Runs once. On error nothing is committed.
    pub fn run(&self, opts: &RunOptions, cancel: &CancelToken) -> Result<RunReport, PipelineError> {
        let base = self.catalog.snapshot();
        let generation = base.generation();
        let mut draft = (*base).clone();
        drop(base);

        let mut report = RunReport {
            mode: opts.mode,
            ..Default::default()
        };
        info!(mode = ?opts.mode, reembed = opts.reembed, generation, "run started");

        self.ingest(&mut draft, &mut report, cancel)?;
        self.embed(&mut draft, opts, &mut report, cancel)?;

        let reclustered = draft.recluster(&self.clusterer, &self.stabilize)?;
        report.absorb(reclustered);
        report.generation = self.catalog.commit_run(generation, draft)?;

        info!(
            generation = report.generation,
            photos_added = report.photos_added,
            faces_added = report.faces_added,
            embedded = report.embedded,
            failures = report.failures.len(),
            clusters = report.clusters,
            orphaned = report.orphaned.len(),
            "run committed"
        );
        Ok(report)
    }

    /// Drops photos that disappeared from the source, with their faces.
    pub fn cleanup(&self) -> Result<CleanupReport, PipelineError> {
        let report = self.catalog.cleanup(|file| self.source.exists(file))?;
        info!(
            photos = report.photos_removed.len(),
            faces = report.faces_removed,
            clusters = report.clusters_removed.len(),
            "cleanup finished"
        );
        Ok(report)
    }

    fn check(cancel: &CancelToken, phase: &'static str) -> Result<(), PipelineError> {
        if cancel.is_cancelled() {
            warn!(phase, "run cancelled, nothing committed");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    fn ingest(
        &self,
        draft: &mut Snapshot,
        report: &mut RunReport,
        cancel: &CancelToken,
    ) -> Result<(), PipelineError> {
        let files = self.source.list().map_err(PipelineError::Source)?;
        report.photos_scanned = files.len();

        for file in files {
            if draft.has_photo(&file) {
                continue;
            }
            Self::check(cancel, "ingest")?;

            let detection = match self.detector.detect(&self.source.path(&file)) {
                Ok(d) => d,
                Err(e) => {
                    warn!(photo = %file, error = %e, "detection failed");
                    report.failures.push(ItemFailure {
                        photo: file,
                        face: None,
                        error: e.to_string(),
                    });
                    continue;
                }
            };
            match draft.add_photo(&file, detection.date, &detection.faces) {
                Ok(ids) => {
                    debug!(photo = %file, faces = ids.len(), "photo ingested");
                    report.photos_added += 1;
                    report.faces_added += ids.len();
                }
                Err(e) => {
                    warn!(photo = %file, error = %e, "photo rejected");
                    report.failures.push(ItemFailure {
                        photo: file,
                        face: None,
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn embed(
        &self,
        draft: &mut Snapshot,
        opts: &RunOptions,
        report: &mut RunReport,
        cancel: &CancelToken,
    ) -> Result<(), PipelineError> {
        if opts.reembed {
            if opts.mode == RunMode::Full {
                draft.drop_embeddings();
            } else {
                debug!("reembed ignored in incremental mode");
            }
        }

        let mut by_photo: BTreeMap<String, Vec<(FaceId, BoundingBox)>> = BTreeMap::new();
        for face in draft.pending_embeddings() {
            by_photo
                .entry(face.photo.clone())
                .or_default()
                .push((face.id.clone(), face.bbox));
        }

        for (photo, faces) in by_photo {
            Self::check(cancel, "embed")?;
            let path = self.source.path(&photo);
            for (id, bbox) in faces {
                let stored = self
                    .embedder
                    .embed(&path, &bbox)
                    .map_err(|e| e.to_string())
                    .and_then(|v| draft.record_embedding(&id, v).map_err(|e| e.to_string()));
                match stored {
                    Ok(_) => report.embedded += 1,
                    Err(error) => {
                        warn!(photo = %photo, face = %id, error = %error, "embedding failed");
                        draft.mark_embed_failed(&id)?;
                        report.failures.push(ItemFailure {
                            photo: photo.clone(),
                            face: Some(id),
                            error,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use famface_catalog::{CatalogError, FaceLabel};

    use super::*;
    use crate::error::OracleError;
    use crate::source::Detection;

    fn file_of(path: &Path) -> String {
        path.file_name().unwrap().to_string_lossy().into_owned()
    }

    #[derive(Default)]
    struct MemorySource {
        files: Mutex<BTreeSet<String>>,
    }

    impl PhotoSource for MemorySource {
        fn list(&self) -> std::io::Result<Vec<String>> {
            Ok(self.files.lock().iter().cloned().collect())
        }

        fn path(&self, file: &str) -> PathBuf {
            PathBuf::from("/photos").join(file)
        }

        fn exists(&self, file: &str) -> bool {
            self.files.lock().contains(file)
        }
    }

    #[derive(Default)]
    struct FakeDetector {
        faces: Mutex<BTreeMap<String, usize>>,
    }

    impl FaceDetector for FakeDetector {
        fn detect(&self, photo: &Path) -> Result<Detection, OracleError> {
            let n = self
                .faces
                .lock()
                .get(&file_of(photo))
                .copied()
                .ok_or_else(|| OracleError::Failed("unreadable image".into()))?;
            Ok(Detection {
                // The box's left edge carries the detection index.
                faces: (0..n)
                    .map(|i| BoundingBox {
                        left: i as u32,
                        ..Default::default()
                    })
                    .collect(),
                date: None,
            })
        }
    }

    type Hook = Box<dyn Fn() + Send + Sync>;

    #[derive(Default)]
    struct FakeEmbedder {
        vectors: Mutex<BTreeMap<(String, u32), Vec<f32>>>,
        calls: AtomicUsize,
        hook: Mutex<Option<Hook>>,
    }

    impl FaceEmbedder for FakeEmbedder {
        fn embed(&self, photo: &Path, face: &BoundingBox) -> Result<Vec<f32>, OracleError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(hook) = self.hook.lock().as_ref() {
                hook();
            }
            self.vectors
                .lock()
                .get(&(file_of(photo), face.left))
                .cloned()
                .ok_or_else(|| OracleError::Failed("no face found in crop".into()))
        }
    }

    struct Fixture {
        catalog: Arc<Catalog>,
        source: Arc<MemorySource>,
        detector: Arc<FakeDetector>,
        embedder: Arc<FakeEmbedder>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                catalog: Arc::new(Catalog::in_memory()),
                source: Arc::default(),
                detector: Arc::default(),
                embedder: Arc::default(),
            }
        }

        /// Adds a photo whose faces embed to `vectors`.
        fn photo(&self, file: &str, vectors: &[&[f32]]) {
            self.source.files.lock().insert(file.to_string());
            self.detector.faces.lock().insert(file.to_string(), vectors.len());
            let mut emb = self.embedder.vectors.lock();
            for (i, v) in vectors.iter().enumerate() {
                emb.insert((file.to_string(), i as u32), v.to_vec());
            }
        }

        fn pipeline(&self) -> Pipeline {
            Pipeline::new(
                self.catalog.clone(),
                self.source.clone(),
                self.detector.clone(),
                self.embedder.clone(),
                PipelineConfig::default(),
            )
            .unwrap()
        }

        fn run(&self, opts: RunOptions) -> Result<RunReport, PipelineError> {
            self.pipeline().run(&opts, &CancelToken::new())
        }

        fn cluster_of(&self, face: &str) -> Option<ClusterId> {
            self.catalog.snapshot().face(face).and_then(|f| f.cluster)
        }
    }

    fn five_faces() -> Fixture {
        let fx = Fixture::new();
        fx.photo("f1.jpg", &[&[0.0, 0.0, 0.0]]);
        fx.photo("f2.jpg", &[&[0.1, 0.0, 0.0]]);
        fx.photo("f3.jpg", &[&[0.0, 0.1, 0.0]]);
        fx.photo("f4.jpg", &[&[3.0, 3.0, 3.0]]);
        fx.photo("f5.jpg", &[&[3.1, 3.0, 3.0]]);
        fx
    }

    #[test]
    fn first_run_clusters_everything() {
        let fx = five_faces();
        let r = fx.run(RunOptions::incremental()).unwrap();
        assert_eq!(r.photos_added, 5);
        assert_eq!(r.faces_added, 5);
        assert_eq!(r.embedded, 5);
        assert_eq!(r.clusters, 2);
        assert_eq!(r.noise, 0);
        assert_eq!(r.generation, 1);
        assert_eq!(fx.cluster_of("f1_face0"), fx.cluster_of("f3_face0"));
        assert_ne!(fx.cluster_of("f1_face0"), fx.cluster_of("f4_face0"));
    }

    #[test]
    fn named_identity_survives_new_photo() {
        let fx = five_faces();
        fx.run(RunOptions::incremental()).unwrap();
        let alice = fx.cluster_of("f1_face0").unwrap();
        fx.catalog.set_cluster_name(alice, "Alice").unwrap();

        fx.photo("f6.jpg", &[&[0.05, 0.05, 0.0]]);
        let r = fx.run(RunOptions::incremental()).unwrap();
        assert_eq!(r.photos_added, 1);
        assert_eq!(r.embedded, 1);
        assert_eq!(r.created, 0);
        assert!(r.orphaned.is_empty());

        let snap = fx.catalog.snapshot();
        let f6 = snap.face("f6_face0").unwrap();
        assert_eq!(f6.cluster, Some(alice));
        assert_eq!(f6.label, FaceLabel::Cluster("Alice".into()));
        assert_eq!(snap.cluster_name(alice), Some("Alice"));
        assert_eq!(fx.embedder.calls.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn manual_merge_survives_rerun() {
        let fx = five_faces();
        fx.run(RunOptions::incremental()).unwrap();
        let a = fx.cluster_of("f1_face0").unwrap();
        let b = fx.cluster_of("f4_face0").unwrap();
        fx.catalog.merge_clusters(b, a).unwrap();

        fx.run(RunOptions::incremental()).unwrap();
        assert_eq!(fx.cluster_of("f4_face0"), Some(a));
        assert_eq!(fx.catalog.snapshot().clusters().clusters.len(), 1);
    }

    #[test]
    fn embed_failure_is_isolated_and_retried() {
        let fx = five_faces();
        fx.photo("bad.jpg", &[]);
        fx.detector.faces.lock().insert("bad.jpg".into(), 1);

        let r = fx.run(RunOptions::incremental()).unwrap();
        assert_eq!(r.embedded, 5);
        assert_eq!(r.failures.len(), 1);
        assert_eq!(r.failures[0].face, Some(FaceId::from("bad_face0")));
        let snap = fx.catalog.snapshot();
        let bad = snap.face("bad_face0").unwrap();
        assert!(bad.embed_failed);
        assert_eq!(bad.cluster, None);

        fx.embedder
            .vectors
            .lock()
            .insert(("bad.jpg".into(), 0), vec![3.05, 3.0, 3.0]);
        let r = fx.run(RunOptions::incremental()).unwrap();
        assert_eq!(r.embedded, 1);
        assert!(r.failures.is_empty());
        assert_eq!(fx.cluster_of("bad_face0"), fx.cluster_of("f4_face0"));
    }

    #[test]
    fn detection_failure_skips_photo() {
        let fx = five_faces();
        fx.source.files.lock().insert("broken.jpg".into());
        let r = fx.run(RunOptions::incremental()).unwrap();
        assert_eq!(r.photos_scanned, 6);
        assert_eq!(r.photos_added, 5);
        assert_eq!(r.failures[0].photo, "broken.jpg");
        assert!(!fx.catalog.snapshot().has_photo("broken.jpg"));
    }

    #[test]
    fn photo_without_faces_is_recorded() {
        let fx = five_faces();
        fx.photo("landscape.jpg", &[]);
        let r = fx.run(RunOptions::incremental()).unwrap();
        assert_eq!(r.photos_added, 6);
        assert!(fx.catalog.snapshot().photo("landscape.jpg").unwrap().face_details.is_empty());
    }

    #[test]
    fn cancelled_run_commits_nothing() {
        let fx = five_faces();
        fx.run(RunOptions::incremental()).unwrap();
        let before = fx.catalog.snapshot();

        let cancel = CancelToken::new();
        let trip = cancel.clone();
        *fx.embedder.hook.lock() = Some(Box::new(move || trip.cancel()));
        fx.photo("g1.jpg", &[&[9.0, 9.0, 9.0]]);
        fx.photo("g2.jpg", &[&[9.1, 9.0, 9.0]]);

        let err = fx.pipeline().run(&RunOptions::full(true), &cancel).unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
        assert!(Arc::ptr_eq(&before, &fx.catalog.snapshot()));
        assert!(!fx.catalog.snapshot().has_photo("g1.jpg"));
    }

    #[test]
    fn full_reembed_recomputes_every_face() {
        let fx = five_faces();
        fx.run(RunOptions::incremental()).unwrap();
        let alice = fx.cluster_of("f1_face0").unwrap();
        fx.catalog.set_cluster_name(alice, "Alice").unwrap();

        let r = fx.run(RunOptions::full(true)).unwrap();
        assert_eq!(r.embedded, 5);
        assert_eq!(r.kept, 2);
        assert_eq!(fx.catalog.snapshot().cluster_name(alice), Some("Alice"));

        let r = fx.run(RunOptions::full(false)).unwrap();
        assert_eq!(r.embedded, 0);
    }

    #[test]
    fn concurrent_commit_is_a_conflict() {
        let fx = five_faces();
        fx.run(RunOptions::incremental()).unwrap();
        let catalog = fx.catalog.clone();
        *fx.embedder.hook.lock() = Some(Box::new(move || {
            catalog.upsert_family_entry("Eve", Default::default()).unwrap();
        }));
        fx.photo("late.jpg", &[&[0.0, 0.0, 0.1]]);

        let err = fx.run(RunOptions::incremental()).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Catalog(CatalogError::Conflict { expected: 1, found: 2 })
        ));
        assert!(err.is_retryable());
        assert!(!fx.catalog.snapshot().has_photo("late.jpg"));
    }

    #[test]
    fn cleanup_forgets_deleted_photo_and_orphans_name() {
        let fx = Fixture::new();
        fx.photo("a1.jpg", &[&[0.0, 0.0]]);
        fx.photo("a2.jpg", &[&[0.1, 0.0]]);
        fx.photo("b1.jpg", &[&[5.0, 5.0], &[5.1, 5.0]]);
        fx.run(RunOptions::incremental()).unwrap();
        let bob = fx.cluster_of("b1_face0").unwrap();
        fx.catalog.set_cluster_name(bob, "Bob").unwrap();

        fx.source.files.lock().remove("b1.jpg");
        let report = fx.pipeline().cleanup().unwrap();
        assert_eq!(report.photos_removed, vec!["b1.jpg".to_string()]);
        assert_eq!(report.faces_removed, 2);
        assert_eq!(report.clusters_removed, vec![bob]);
        assert_eq!(report.orphaned[0].name, "Bob");

        let snap = fx.catalog.snapshot();
        assert!(snap.cluster(bob).is_none());
        assert!(snap.people().iter().all(|p| p.name != "Bob"));
        assert_eq!(snap.orphaned_names().len(), 1);
    }
}
