//! Run drafts: ingesting photos, recording embeddings and folding a fresh
//! clustering back into the identity layer.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info};

use famface_cluster::{ClusterError, ClusterId, Clusterer, StabilizeConfig, stabilize};

use crate::error::CatalogError;
use crate::snapshot::Snapshot;
use crate::types::{BoundingBox, Cluster, Face, FaceId, OrphanedName, Photo};

/// Summary of one [`Snapshot::recluster`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Reclustered {
    /// Faces that took part in clustering.
    pub embedded: usize,
    pub clusters: usize,
    /// Faces left unclustered.
    pub noise: usize,
    /// Clusters that inherited a previous id, pinned clusters included.
    pub kept: usize,
    pub created: usize,
    /// Clusters held together by manual merges or splits.
    pub pinned: usize,
    pub retired: Vec<ClusterId>,
    pub orphaned: Vec<OrphanedName>,
    /// Faces whose cluster-derived label changed.
    pub relabeled: usize,
}

impl Snapshot {
    // -----------------------------------------------------------------------
    // Ingest
    // -----------------------------------------------------------------------

    /// Records a photo and one face per detected box. Returns the new face
    /// ids in detection order.
    pub fn add_photo(
        &mut self,
        file: &str,
        date: Option<NaiveDate>,
        boxes: &[BoundingBox],
    ) -> Result<Vec<FaceId>, CatalogError> {
        if self.photos.contains_key(file) {
            return Err(CatalogError::InvalidInput(format!("photo {file} already ingested")));
        }
        let ids: Vec<FaceId> = (0..boxes.len()).map(|i| FaceId::derive(file, i)).collect();
        if let Some(taken) = ids.iter().find_map(|id| self.faces.get(id)) {
            return Err(CatalogError::InvalidInput(format!(
                "face id {} of {file} is already used by photo {}",
                taken.id, taken.photo
            )));
        }
        for (id, bbox) in ids.iter().zip(boxes) {
            self.faces.insert(id.clone(), Face::new(id.clone(), file, *bbox, date));
        }
        self.photos.insert(
            file.to_string(),
            Photo {
                file: file.to_string(),
                date,
                faces: ids.clone(),
            },
        );
        Ok(ids)
    }

    /// Faces that still need an embedding, including earlier failures.
    pub fn pending_embeddings(&self) -> Vec<&Face> {
        self.faces.values().filter(|f| f.embedding.is_none()).collect()
    }

    /// Stores a face's vector and clears any earlier failure flag.
    pub fn record_embedding(
        &mut self,
        face: &FaceId,
        vector: Vec<f32>,
    ) -> Result<usize, CatalogError> {
        let current = self
            .faces
            .get(face)
            .ok_or_else(|| CatalogError::face_not_found(face.as_str()))?
            .embedding;
        if current.is_some() {
            return Err(CatalogError::InvalidInput(format!("face {face} is already embedded")));
        }
        let index = self.embeddings_mut().append(face.clone(), vector)?;
        if let Some(f) = self.faces.get_mut(face) {
            f.embedding = Some(index);
            f.embed_failed = false;
        }
        Ok(index)
    }

    pub fn mark_embed_failed(&mut self, face: &FaceId) -> Result<(), CatalogError> {
        let f = self
            .faces
            .get_mut(face)
            .ok_or_else(|| CatalogError::face_not_found(face.as_str()))?;
        f.embed_failed = true;
        Ok(())
    }

    /// Forgets every vector so all faces are embedded again. The new store
    /// may use a different dimension.
    pub fn drop_embeddings(&mut self) {
        self.embeddings = Default::default();
        for face in self.faces.values_mut() {
            face.embedding = None;
            face.embed_failed = false;
        }
        debug!(faces = self.faces.len(), "dropped embeddings for re-embed");
    }

    // -----------------------------------------------------------------------
    // Re-clustering
    // -----------------------------------------------------------------------

    /// Clusters every embedded face and reconciles the result with the
    /// current cluster ids.
    ///
    /// Pinned faces stay in their cluster. A raw group in which faces pinned
    /// to one cluster exceed `overlap_threshold` of the group joins that
    /// cluster whole. Remaining groups are stabilized against the unpinned
    /// clusters. Named clusters left without a successor become orphaned
    /// names.
    pub fn recluster(
        &mut self,
        clusterer: &Clusterer,
        cfg: &StabilizeConfig,
    ) -> Result<Reclustered, ClusterError> {
        let faces: Vec<(&FaceId, &[f32])> = self
            .faces
            .values()
            .filter_map(|f| {
                let rec = self.embeddings.get(f.embedding?)?;
                Some((&f.id, rec.vector.as_slice()))
            })
            .collect();
        let vectors: Vec<&[f32]> = faces.iter().map(|(_, v)| *v).collect();
        let partition = clusterer.cluster(&vectors)?;
        let raw: Vec<BTreeSet<FaceId>> = partition
            .groups
            .iter()
            .map(|g| g.iter().map(|&i| faces[i].0.clone()).collect())
            .collect();
        let embedded = faces.len();

        let pins: BTreeMap<FaceId, ClusterId> = self
            .faces
            .values()
            .filter(|f| f.pinned)
            .filter_map(|f| f.cluster.map(|c| (f.id.clone(), c)))
            .collect();
        let mut pinned: BTreeMap<ClusterId, BTreeSet<FaceId>> = BTreeMap::new();
        for (face, &cid) in &pins {
            pinned.entry(cid).or_default().insert(face.clone());
        }

        let mut free = Vec::new();
        for group in raw {
            let size = group.len();
            let mut votes: BTreeMap<ClusterId, usize> = BTreeMap::new();
            for face in &group {
                if let Some(&cid) = pins.get(face) {
                    *votes.entry(cid).or_default() += 1;
                }
            }
            // Highest vote; BTreeMap order makes the smaller id win ties.
            let best = votes
                .iter()
                .fold(None, |best: Option<(ClusterId, usize)>, (&cid, &n)| match best {
                    Some((_, m)) if m >= n => best,
                    _ => Some((cid, n)),
                });
            let unpinned: BTreeSet<FaceId> =
                group.into_iter().filter(|f| !pins.contains_key(f)).collect();
            match best {
                Some((cid, n)) if (n as f64) > cfg.overlap_threshold * size as f64 => {
                    pinned.entry(cid).or_default().extend(unpinned);
                }
                _ if unpinned.is_empty() => {}
                _ => free.push(unpinned),
            }
        }

        let reserved: BTreeSet<ClusterId> = pinned.keys().copied().collect();
        let previous: BTreeMap<ClusterId, BTreeSet<FaceId>> = self
            .clusters
            .values()
            .filter(|c| !reserved.contains(&c.id))
            .map(|c| (c.id, c.members.clone()))
            .collect();
        let stabilized = stabilize(&previous, &free, &reserved, cfg);

        let mut next: BTreeMap<ClusterId, BTreeSet<FaceId>> = pinned;
        let pinned_count = next.len();
        let (kept, created) = (stabilized.kept(), stabilized.created());
        for a in stabilized.clusters {
            next.insert(a.id, a.members);
        }

        let mut orphaned = Vec::new();
        for &id in &stabilized.retired {
            if let Some(orphan) = self.retire_cluster(id) {
                orphaned.push(orphan);
            }
        }

        let mut membership: BTreeMap<&FaceId, ClusterId> = BTreeMap::new();
        for (&cid, members) in &next {
            for m in members {
                membership.insert(m, cid);
            }
        }
        for face in self.faces.values_mut() {
            face.cluster = membership.get(&face.id).copied();
        }
        self.clusters = next
            .iter()
            .map(|(&id, members)| {
                (
                    id,
                    Cluster {
                        id,
                        members: members.clone(),
                    },
                )
            })
            .collect();
        let noise = self.faces.values().filter(|f| f.cluster.is_none()).count();
        let relabeled = self.propagate_all();

        let report = Reclustered {
            embedded,
            clusters: self.clusters.len(),
            noise,
            kept: kept + pinned_count,
            created,
            pinned: pinned_count,
            retired: stabilized.retired,
            orphaned,
            relabeled,
        };
        info!(
            embedded = report.embedded,
            clusters = report.clusters,
            noise = report.noise,
            kept = report.kept,
            created = report.created,
            retired = report.retired.len(),
            orphaned = report.orphaned.len(),
            "reclustered faces"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use famface_cluster::{Config, Method, Metric};
    use crate::types::FaceLabel;

    fn clusterer() -> Clusterer {
        Clusterer::new(Config::default()).unwrap()
    }

    fn ingest(s: &mut Snapshot, file: &str, v: &[f32]) -> FaceId {
        let ids = s.add_photo(file, None, &[BoundingBox::default()]).unwrap();
        s.record_embedding(&ids[0], v.to_vec()).unwrap();
        ids[0].clone()
    }

    /// f1..f3 near the origin, f4 and f5 far away.
    fn five() -> Snapshot {
        let mut s = Snapshot::default();
        ingest(&mut s, "f1.jpg", &[0.0, 0.0]);
        ingest(&mut s, "f2.jpg", &[0.1, 0.0]);
        ingest(&mut s, "f3.jpg", &[0.0, 0.1]);
        ingest(&mut s, "f4.jpg", &[3.0, 3.0]);
        ingest(&mut s, "f5.jpg", &[3.1, 3.0]);
        s
    }

    fn members(s: &Snapshot, id: u32) -> Vec<&str> {
        s.clusters[&ClusterId(id)].members.iter().map(|m| m.as_str()).collect()
    }

    #[test]
    fn first_run_builds_two_clusters() {
        let mut s = five();
        let r = s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        assert_eq!(r.clusters, 2);
        assert_eq!(r.noise, 0);
        assert_eq!(r.created, 2);
        assert_eq!(members(&s, 0), vec!["f1_face0", "f2_face0", "f3_face0"]);
        assert_eq!(members(&s, 1), vec!["f4_face0", "f5_face0"]);
        assert!(s.validate().is_empty());
    }

    #[test]
    fn named_cluster_survives_growth() {
        let mut s = five();
        s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        s.set_cluster_name(ClusterId(0), "Alice").unwrap();

        let f6 = ingest(&mut s, "f6.jpg", &[0.05, 0.05]);
        let r = s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        assert_eq!(r.kept, 2);
        assert_eq!(r.created, 0);
        assert!(r.orphaned.is_empty());
        assert_eq!(s.faces[&f6].cluster, Some(ClusterId(0)));
        assert_eq!(s.faces[&f6].label, FaceLabel::Cluster("Alice".into()));
        assert_eq!(s.cluster_name(ClusterId(0)), Some("Alice"));
        assert!(s.validate().is_empty());
    }

    #[test]
    fn rerun_is_stable() {
        let mut s = five();
        s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        let before = s.clusters.clone();
        let r = s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        assert_eq!(s.clusters, before);
        assert_eq!(r.relabeled, 0);
    }

    #[test]
    fn merge_survives_recluster() {
        let mut s = five();
        s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        s.set_cluster_name(ClusterId(0), "Alice").unwrap();
        s.merge_clusters(ClusterId(1), ClusterId(0)).unwrap();

        let r = s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        assert_eq!(r.clusters, 1);
        assert_eq!(r.pinned, 1);
        assert_eq!(members(&s, 0).len(), 5);
        assert!(s.faces.values().all(|f| f.name() == Some("Alice")));
        assert!(s.validate().is_empty());
    }

    #[test]
    fn split_survives_recluster() {
        let mut s = five();
        s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        let out = s.split_face("f3_face0").unwrap();
        assert_eq!(out.cluster, ClusterId(2));

        s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        assert_eq!(members(&s, 0), vec!["f1_face0", "f2_face0"]);
        assert_eq!(members(&s, 1), vec!["f4_face0", "f5_face0"]);
        assert_eq!(members(&s, 2), vec!["f3_face0"]);
        assert!(s.validate().is_empty());
    }

    #[test]
    fn pinned_majority_absorbs_new_face() {
        let mut s = five();
        s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        s.merge_clusters(ClusterId(1), ClusterId(0)).unwrap();
        let f7 = ingest(&mut s, "f7.jpg", &[3.05, 3.0]);
        s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        assert_eq!(s.faces[&f7].cluster, Some(ClusterId(0)));
        assert!(!s.faces[&f7].pinned);
    }

    #[test]
    fn vanished_named_clusters_become_orphans() {
        let mut s = five();
        s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        s.set_cluster_name(ClusterId(0), "Alice").unwrap();
        s.set_cluster_name(ClusterId(1), "Bob").unwrap();

        let strict = Clusterer::new(Config {
            method: Method::Dbscan {
                eps: 0.01,
                min_samples: 2,
            },
            metric: Metric::Euclidean,
        })
        .unwrap();
        let r = s.recluster(&strict, &StabilizeConfig::default()).unwrap();
        assert_eq!(r.clusters, 0);
        assert_eq!(r.noise, 5);
        assert_eq!(r.retired, vec![ClusterId(0), ClusterId(1)]);
        let names: Vec<&str> = r.orphaned.iter().map(|o| o.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
        assert!(s.name_map.is_empty());
        assert!(s.faces.values().all(|f| f.label == FaceLabel::Unnamed));
        assert!(s.validate().is_empty());
    }

    #[test]
    fn failed_embeddings_are_left_out() {
        let mut s = five();
        let ids = s.add_photo("f9.jpg", None, &[BoundingBox::default()]).unwrap();
        s.mark_embed_failed(&ids[0]).unwrap();
        let r = s.recluster(&clusterer(), &StabilizeConfig::default()).unwrap();
        assert_eq!(r.embedded, 5);
        assert_eq!(r.noise, 1);
        assert_eq!(s.pending_embeddings().len(), 1);
        assert!(s.faces[&ids[0]].embed_failed);
    }

    #[test]
    fn add_photo_rejects_duplicates() {
        let mut s = five();
        assert!(s.add_photo("f1.jpg", None, &[]).is_err());
        // Same stem, different extension.
        let err = s.add_photo("f1.png", None, &[BoundingBox::default()]).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidInput(_)));
        // A photo with no faces is still recorded.
        assert!(s.add_photo("empty.jpg", None, &[]).unwrap().is_empty());
        assert!(s.has_photo("empty.jpg"));
    }

    #[test]
    fn reembed_rebuilds_store() {
        let mut s = five();
        s.drop_embeddings();
        assert!(s.embeddings.is_empty());
        assert_eq!(s.pending_embeddings().len(), 5);
        let id = FaceId::from("f1_face0");
        assert_eq!(s.record_embedding(&id, vec![1.0, 2.0, 3.0]).unwrap(), 0);
        assert!(s.record_embedding(&id, vec![1.0, 2.0, 3.0]).is_err());
    }
}
