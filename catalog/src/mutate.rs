//! Manual corrections applied to a draft snapshot.
//!
//! Every function here edits a private draft; [`crate::Catalog`] validates
//! and commits the draft as one unit, so a failed call changes nothing.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use famface_cluster::ClusterId;

use crate::error::CatalogError;
use crate::snapshot::Snapshot;
use crate::types::{Cluster, Face, FaceId, FaceLabel, FamilyEntry, FamilyUpdate, OrphanedName};

/// Outcome of [`Snapshot::merge_clusters`] on a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergeOutcome {
    pub target: ClusterId,
    pub moved: usize,
    /// Name the merged cluster ends up with.
    pub name: Option<String>,
    pub relabeled: usize,
}

/// Outcome of [`Snapshot::split_face`] on a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SplitOutcome {
    pub face: FaceId,
    pub from: Option<ClusterId>,
    pub cluster: ClusterId,
    /// Set when the split emptied a named cluster.
    pub orphaned: Option<OrphanedName>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub photos_removed: Vec<String>,
    pub faces_removed: usize,
    pub embeddings_removed: usize,
    pub clusters_removed: Vec<ClusterId>,
    pub orphaned: Vec<OrphanedName>,
}

impl CleanupReport {
    pub fn is_noop(&self) -> bool {
        self.photos_removed.is_empty()
            && self.faces_removed == 0
            && self.embeddings_removed == 0
            && self.clusters_removed.is_empty()
    }
}

fn clean_name(name: &str) -> Result<String, CatalogError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CatalogError::InvalidInput("name must not be empty".into()));
    }
    Ok(name.to_string())
}

impl Snapshot {
    fn face_mut(&mut self, id: &str) -> Result<&mut Face, CatalogError> {
        self.faces.get_mut(id).ok_or_else(|| CatalogError::face_not_found(id))
    }

    fn require_cluster(&self, id: ClusterId) -> Result<(), CatalogError> {
        if self.clusters.contains_key(&id) {
            Ok(())
        } else {
            Err(CatalogError::cluster_not_found(id))
        }
    }

    pub(crate) fn assign_face_name(&mut self, face: &str, name: &str) -> Result<(), CatalogError> {
        let name = clean_name(name)?;
        self.face_mut(face)?.label = FaceLabel::Manual(name);
        Ok(())
    }

    pub(crate) fn clear_face_name(&mut self, face: &str) -> Result<(), CatalogError> {
        self.face_mut(face)?.label = FaceLabel::Cleared;
        Ok(())
    }

    /// Drops an individual override so the face follows its cluster again.
    pub(crate) fn reset_face_name(&mut self, face: &str) -> Result<(), CatalogError> {
        let f = self.face_mut(face)?;
        f.label = FaceLabel::Unnamed;
        let id = f.id.clone();
        self.propagate([&id]);
        Ok(())
    }

    /// Names a cluster and relabels its members. Returns faces relabeled.
    ///
    /// An orphaned name equal to `name` is considered resolved.
    pub(crate) fn set_cluster_name(
        &mut self,
        cluster: ClusterId,
        name: &str,
    ) -> Result<usize, CatalogError> {
        self.require_cluster(cluster)?;
        let name = clean_name(name)?;
        self.orphaned.retain(|o| o.name != name);
        self.name_map.insert(cluster, name);
        let members: Vec<FaceId> = self
            .clusters
            .get(&cluster)
            .map(|c| c.members.iter().cloned().collect())
            .unwrap_or_default();
        Ok(self.propagate(&members))
    }

    pub(crate) fn remove_cluster_name(
        &mut self,
        cluster: ClusterId,
    ) -> Result<usize, CatalogError> {
        if self.name_map.remove(&cluster).is_none() {
            return Err(CatalogError::NotFound {
                kind: "cluster name",
                id: cluster.to_string(),
            });
        }
        let members: Vec<FaceId> = self
            .clusters
            .get(&cluster)
            .map(|c| c.members.iter().cloned().collect())
            .unwrap_or_default();
        Ok(self.propagate(&members))
    }

    /// Moves every member of `source` into `target` and deletes `source`.
    ///
    /// The target keeps its name; an unnamed target adopts the source's.
    /// All members of the result are pinned so re-clustering keeps them
    /// together.
    pub(crate) fn merge_clusters(
        &mut self,
        source: ClusterId,
        target: ClusterId,
    ) -> Result<MergeOutcome, CatalogError> {
        if source == target {
            return Err(CatalogError::InvalidInput(format!(
                "cannot merge cluster {source} into itself"
            )));
        }
        self.require_cluster(source)?;
        self.require_cluster(target)?;

        let src = self
            .clusters
            .remove(&source)
            .ok_or_else(|| CatalogError::cluster_not_found(source))?;
        let source_name = self.name_map.remove(&source);
        if !self.name_map.contains_key(&target) {
            if let Some(name) = source_name {
                self.name_map.insert(target, name);
            }
        }

        let moved = src.members.len();
        let merged = match self.clusters.get_mut(&target) {
            Some(t) => {
                t.members.extend(src.members);
                t.members.clone()
            }
            None => return Err(CatalogError::cluster_not_found(target)),
        };
        for id in &merged {
            if let Some(face) = self.faces.get_mut(id) {
                face.cluster = Some(target);
                face.pinned = true;
            }
        }
        let relabeled = self.propagate(&merged);
        Ok(MergeOutcome {
            target,
            moved,
            name: self.name_map.get(&target).cloned(),
            relabeled,
        })
    }

    /// Moves one face into a fresh cluster of its own and pins it there.
    pub(crate) fn split_face(&mut self, face: &str) -> Result<SplitOutcome, CatalogError> {
        let from = self.face_mut(face)?.cluster;
        let id = self.face_mut(face)?.id.clone();
        let cluster = self.next_cluster_id();

        let mut orphaned = None;
        if let Some(old) = from {
            let emptied = match self.clusters.get_mut(&old) {
                Some(c) => {
                    c.members.remove(&id);
                    c.members.is_empty()
                }
                None => false,
            };
            if emptied {
                orphaned = self.retire_cluster(old);
            }
        }

        self.clusters.insert(
            cluster,
            Cluster {
                id: cluster,
                members: BTreeSet::from([id.clone()]),
            },
        );
        let f = self.face_mut(face)?;
        f.cluster = Some(cluster);
        f.pinned = true;
        self.propagate([&id]);

        Ok(SplitOutcome {
            face: id,
            from,
            cluster,
            orphaned,
        })
    }

    /// Re-propagates cluster names to every face without an override.
    pub(crate) fn apply_name_map(&mut self) -> usize {
        self.propagate_all()
    }

    /// Corrects a photo's date and the dates of its faces. Returns faces
    /// updated.
    pub(crate) fn set_photo_date(
        &mut self,
        file: &str,
        date: Option<NaiveDate>,
    ) -> Result<usize, CatalogError> {
        let photo = self.photos.get_mut(file).ok_or_else(|| CatalogError::NotFound {
            kind: "photo",
            id: file.to_string(),
        })?;
        photo.date = date;
        let ids = photo.faces.clone();
        let mut updated = 0;
        for id in &ids {
            if let Some(face) = self.faces.get_mut(id) {
                face.date = date;
                updated += 1;
            }
        }
        Ok(updated)
    }

    pub(crate) fn upsert_family_entry(
        &mut self,
        person: &str,
        update: FamilyUpdate,
    ) -> Result<FamilyEntry, CatalogError> {
        let person = clean_name(person)?;
        let mut entry = self.family.get(&person).cloned().unwrap_or_default();
        if let Some(parents) = update.parents {
            entry.parents = parents;
        }
        if let Some(children) = update.children {
            entry.children = children;
        }
        if let Some(spouse) = update.spouse {
            entry.spouse = spouse;
        }
        if entry.references(&person) {
            return Err(CatalogError::InvalidInput(format!(
                "{person} cannot be their own relative"
            )));
        }
        self.family.insert(person, entry.clone());
        Ok(entry)
    }

    pub(crate) fn delete_family_entry(
        &mut self,
        person: &str,
    ) -> Result<FamilyEntry, CatalogError> {
        self.family.remove(person).ok_or_else(|| CatalogError::NotFound {
            kind: "person",
            id: person.to_string(),
        })
    }

    /// Forgets orphaned names equal to `name`. Returns how many were dropped.
    pub(crate) fn dismiss_orphan(&mut self, name: &str) -> Result<usize, CatalogError> {
        let before = self.orphaned.len();
        self.orphaned.retain(|o| o.name != name);
        let dropped = before - self.orphaned.len();
        if dropped == 0 {
            return Err(CatalogError::NotFound {
                kind: "orphaned name",
                id: name.to_string(),
            });
        }
        Ok(dropped)
    }

    /// Removes photos whose files are gone together with their faces,
    /// drops clusters left empty and compacts the embedding store.
    pub(crate) fn cleanup(&mut self, exists: impl Fn(&str) -> bool) -> CleanupReport {
        let mut report = CleanupReport::default();

        let gone: Vec<String> = self.photos.keys().filter(|f| !exists(f)).cloned().collect();
        for file in &gone {
            self.photos.remove(file);
        }
        report.photos_removed = gone;

        let dead: Vec<FaceId> = self
            .faces
            .values()
            .filter(|f| !self.photos.contains_key(&f.photo))
            .map(|f| f.id.clone())
            .collect();
        let mut touched = BTreeSet::new();
        for id in &dead {
            if let Some(face) = self.faces.remove(id) {
                if let Some(c) = face.cluster {
                    touched.insert(c);
                }
            }
        }
        report.faces_removed = dead.len();

        for cid in touched {
            let emptied = match self.clusters.get_mut(&cid) {
                Some(c) => {
                    c.members.retain(|m| !dead.contains(m));
                    c.members.is_empty()
                }
                None => false,
            };
            if emptied {
                if let Some(orphan) = self.retire_cluster(cid) {
                    report.orphaned.push(orphan);
                }
                report.clusters_removed.push(cid);
            }
        }

        let owners: BTreeMap<usize, FaceId> = self
            .faces
            .values()
            .filter_map(|f| f.embedding.map(|i| (i, f.id.clone())))
            .collect();
        let owned = |i: usize, face: &FaceId| owners.get(&i) == Some(face);
        let stale = self
            .embeddings
            .records()
            .iter()
            .enumerate()
            .any(|(i, rec)| !owned(i, &rec.face));
        if stale {
            let before = self.embeddings.len();
            let remap = self.embeddings_mut().compact(|i, rec| owned(i, &rec.face));
            report.embeddings_removed = before - remap.len();
            for (old, new) in remap {
                if let Some(face) = owners.get(&old).and_then(|id| self.faces.get_mut(id)) {
                    face.embedding = Some(new);
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fixtures::{build, name};

    fn two_people() -> Snapshot {
        let mut s = build(
            &[
                ("p1.jpg", Some("2010-06-01"), &["p1_face0", "p1_face1"]),
                ("p2.jpg", Some("2012-03-09"), &["p2_face0", "p2_face1"]),
                ("p3.jpg", None, &["p3_face0"]),
            ],
            &[(0, &["p1_face0", "p2_face0"]), (1, &["p1_face1", "p2_face1"])],
        );
        name(&mut s, 0, "Alice");
        s
    }

    #[test]
    fn face_override_survives_cluster_naming() {
        let mut s = two_people();
        s.assign_face_name("p2_face0", "Alicia").unwrap();
        let n = s.set_cluster_name(ClusterId(0), "Alice B").unwrap();
        assert_eq!(n, 1);
        assert_eq!(s.faces["p1_face0"].label, FaceLabel::Cluster("Alice B".into()));
        assert_eq!(s.faces["p2_face0"].label, FaceLabel::Manual("Alicia".into()));
        assert!(s.validate().is_empty());
    }

    #[test]
    fn clear_face_name_is_sticky() {
        let mut s = two_people();
        s.clear_face_name("p1_face0").unwrap();
        assert_eq!(s.apply_name_map(), 0);
        assert_eq!(s.faces["p1_face0"].name(), None);
        s.reset_face_name("p1_face0").unwrap();
        assert_eq!(s.faces["p1_face0"].name(), Some("Alice"));
    }

    #[test]
    fn rejects_bad_names_and_unknown_ids() {
        let mut s = two_people();
        assert!(matches!(
            s.assign_face_name("p1_face0", "  "),
            Err(CatalogError::InvalidInput(_))
        ));
        assert!(matches!(
            s.assign_face_name("nope", "Ann"),
            Err(CatalogError::NotFound { kind: "face", .. })
        ));
        assert!(matches!(
            s.set_cluster_name(ClusterId(7), "Ann"),
            Err(CatalogError::NotFound { kind: "cluster", .. })
        ));
    }

    #[test]
    fn merge_moves_members_and_keeps_target_name() {
        let mut s = two_people();
        let out = s.merge_clusters(ClusterId(1), ClusterId(0)).unwrap();
        assert_eq!(out.moved, 2);
        assert_eq!(out.name.as_deref(), Some("Alice"));
        assert!(!s.clusters.contains_key(&ClusterId(1)));
        assert_eq!(s.faces["p1_face1"].cluster, Some(ClusterId(0)));
        assert_eq!(s.faces["p1_face1"].name(), Some("Alice"));
        assert!(s.faces.values().filter(|f| f.cluster.is_some()).all(|f| f.pinned));
        assert!(s.validate().is_empty());
    }

    #[test]
    fn merge_into_unnamed_adopts_source_name() {
        let mut s = two_people();
        let out = s.merge_clusters(ClusterId(0), ClusterId(1)).unwrap();
        assert_eq!(out.name.as_deref(), Some("Alice"));
        assert_eq!(s.name_map.get(&ClusterId(1)).map(String::as_str), Some("Alice"));
        assert!(!s.name_map.contains_key(&ClusterId(0)));
        assert!(s.validate().is_empty());
    }

    #[test]
    fn self_merge_is_rejected() {
        let mut s = two_people();
        let err = s.merge_clusters(ClusterId(0), ClusterId(0)).unwrap_err();
        assert!(matches!(err, CatalogError::InvalidInput(_)));
    }

    #[test]
    fn split_creates_pinned_singleton() {
        let mut s = two_people();
        let out = s.split_face("p2_face0").unwrap();
        assert_eq!(out.from, Some(ClusterId(0)));
        assert_eq!(out.cluster, ClusterId(2));
        assert!(out.orphaned.is_none());
        let face = &s.faces["p2_face0"];
        assert!(face.pinned);
        assert_eq!(face.name(), None);
        assert!(s.validate().is_empty());
    }

    #[test]
    fn split_of_last_member_orphans_name() {
        let mut s = build(&[("p.jpg", None, &["p_face0"])], &[(0, &["p_face0"])]);
        name(&mut s, 0, "Solo");
        let out = s.split_face("p_face0").unwrap();
        assert_eq!(out.cluster, ClusterId(1));
        assert_eq!(
            out.orphaned,
            Some(OrphanedName {
                cluster: ClusterId(0),
                name: "Solo".into()
            })
        );
        assert_eq!(s.orphaned.len(), 1);
        assert!(s.validate().is_empty());

        s.set_cluster_name(ClusterId(1), "Solo").unwrap();
        assert!(s.orphaned.is_empty());
    }

    #[test]
    fn photo_date_propagates_to_faces() {
        let mut s = two_people();
        let d = NaiveDate::from_ymd_opt(2011, 1, 1);
        assert_eq!(s.set_photo_date("p3.jpg", d).unwrap(), 1);
        assert_eq!(s.faces["p3_face0"].date, d);
        assert!(s.set_photo_date("missing.jpg", d).is_err());
    }

    #[test]
    fn family_partial_update() {
        let mut s = two_people();
        s.upsert_family_entry(
            "Alice",
            FamilyUpdate {
                parents: Some(vec!["Grandma".into()]),
                spouse: Some(Some("Bob".into())),
                ..Default::default()
            },
        )
        .unwrap();
        let e = s
            .upsert_family_entry(
                "Alice",
                FamilyUpdate {
                    children: Some(vec!["Cy".into()]),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(e.parents, vec!["Grandma".to_string()]);
        assert_eq!(e.children, vec!["Cy".to_string()]);
        assert_eq!(e.spouse.as_deref(), Some("Bob"));

        let err = s
            .upsert_family_entry(
                "Alice",
                FamilyUpdate {
                    spouse: Some(Some("Alice".into())),
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, CatalogError::InvalidInput(_)));
        assert_eq!(s.family["Alice"].spouse.as_deref(), Some("Bob"));

        s.delete_family_entry("Alice").unwrap();
        assert!(matches!(
            s.delete_family_entry("Alice"),
            Err(CatalogError::NotFound { kind: "person", .. })
        ));
    }

    #[test]
    fn cleanup_removes_missing_photo_and_orphans_name() {
        let mut s = build(
            &[
                ("keep.jpg", None, &["keep_face0", "keep_face1"]),
                ("gone.jpg", None, &["gone_face0", "gone_face1"]),
            ],
            &[(0, &["keep_face0"]), (3, &["gone_face0", "gone_face1"])],
        );
        name(&mut s, 3, "Bob");

        let report = s.cleanup(|f| f != "gone.jpg");
        assert_eq!(report.photos_removed, vec!["gone.jpg".to_string()]);
        assert_eq!(report.faces_removed, 2);
        assert_eq!(report.embeddings_removed, 2);
        assert_eq!(report.clusters_removed, vec![ClusterId(3)]);
        assert_eq!(report.orphaned[0].name, "Bob");
        assert!(!s.name_map.contains_key(&ClusterId(3)));
        assert_eq!(s.embeddings.len(), 2);
        assert!(s.validate().is_empty(), "{:?}", s.validate());

        assert!(s.cleanup(|_| true).is_noop());
    }
}
