use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use famface_cluster::{ClusterId, smallest_unused};

use crate::error::Violation;
use crate::types::{
    Cluster, EmbeddingStore, Face, FaceId, FaceLabel, FamilyEntry, OrphanedName, Photo,
};

/// Immutable view of the whole collection at one committed generation.
///
/// Mutations clone the snapshot into a draft, change the draft, validate
/// it and swap it in. The embedding store is shared copy-on-write between
/// generations.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub(crate) generation: u64,
    pub(crate) faces: BTreeMap<FaceId, Face>,
    pub(crate) photos: BTreeMap<String, Photo>,
    pub(crate) clusters: BTreeMap<ClusterId, Cluster>,
    pub(crate) name_map: BTreeMap<ClusterId, String>,
    pub(crate) family: BTreeMap<String, FamilyEntry>,
    pub(crate) orphaned: Vec<OrphanedName>,
    pub(crate) embeddings: Arc<EmbeddingStore>,
}

impl Snapshot {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn faces(&self) -> impl Iterator<Item = &Face> {
        self.faces.values()
    }

    pub fn photos(&self) -> impl Iterator<Item = &Photo> {
        self.photos.values()
    }

    pub fn cluster(&self, id: ClusterId) -> Option<&Cluster> {
        self.clusters.get(&id)
    }

    pub fn cluster_name(&self, id: ClusterId) -> Option<&str> {
        self.name_map.get(&id).map(String::as_str)
    }

    pub fn name_map(&self) -> &BTreeMap<ClusterId, String> {
        &self.name_map
    }

    pub fn family_tree(&self) -> &BTreeMap<String, FamilyEntry> {
        &self.family
    }

    pub fn family_entry(&self, person: &str) -> Option<&FamilyEntry> {
        self.family.get(person)
    }

    /// Cluster names whose cluster disappeared and that still await review.
    pub fn orphaned_names(&self) -> &[OrphanedName] {
        &self.orphaned
    }

    pub fn embeddings(&self) -> &EmbeddingStore {
        &self.embeddings
    }

    pub fn has_photo(&self, file: &str) -> bool {
        self.photos.contains_key(file)
    }

    // -----------------------------------------------------------------------
    // Draft editing (crate-internal)
    // -----------------------------------------------------------------------

    pub(crate) fn embeddings_mut(&mut self) -> &mut EmbeddingStore {
        Arc::make_mut(&mut self.embeddings)
    }

    /// Ids that must not be reused for a new cluster: live clusters and
    /// ids still carrying a name.
    pub(crate) fn next_cluster_id(&self) -> ClusterId {
        smallest_unused(self.clusters.keys().chain(self.name_map.keys()))
    }

    /// Recomputes the derived label of every face in `faces` from its
    /// cluster's name. Overrides are left alone. Returns faces changed.
    pub(crate) fn propagate<'a>(&mut self, faces: impl IntoIterator<Item = &'a FaceId>) -> usize {
        let mut changed = 0;
        for id in faces {
            let Some(face) = self.faces.get_mut(id) else {
                continue;
            };
            if face.label.is_override() {
                continue;
            }
            let want = match face.cluster.and_then(|c| self.name_map.get(&c)) {
                Some(name) => FaceLabel::Cluster(name.clone()),
                None => FaceLabel::Unnamed,
            };
            if face.label != want {
                face.label = want;
                changed += 1;
            }
        }
        changed
    }

    /// Re-propagates every name map entry. Idempotent.
    pub(crate) fn propagate_all(&mut self) -> usize {
        let ids: Vec<FaceId> = self.faces.keys().cloned().collect();
        self.propagate(&ids)
    }

    /// Removes a cluster; a name it carried becomes orphaned.
    pub(crate) fn retire_cluster(&mut self, id: ClusterId) -> Option<OrphanedName> {
        self.clusters.remove(&id);
        let name = self.name_map.remove(&id)?;
        let orphan = OrphanedName { cluster: id, name };
        self.orphaned.push(orphan.clone());
        Some(orphan)
    }

    /// Checks every cross-record invariant. Empty means consistent.
    pub fn validate(&self) -> Vec<Violation> {
        let mut out = Vec::new();

        for face in self.faces.values() {
            let fid = face.id.to_string();
            if let Some(cid) = face.cluster {
                match self.clusters.get(&cid) {
                    None => out.push(Violation::MissingCluster {
                        face: fid.clone(),
                        cluster: cid,
                    }),
                    Some(c) if !c.members.contains(&face.id) => {
                        out.push(Violation::NotAMember {
                            face: fid.clone(),
                            cluster: cid,
                        })
                    }
                    Some(_) => {}
                }
            }
            match self.photos.get(&face.photo) {
                None => out.push(Violation::MissingPhoto {
                    face: fid.clone(),
                    photo: face.photo.clone(),
                }),
                Some(p) if !p.faces.contains(&face.id) => out.push(Violation::UnlistedFace {
                    photo: face.photo.clone(),
                    face: fid.clone(),
                }),
                Some(_) => {}
            }
            if let Some(index) = face.embedding {
                let owned = self
                    .embeddings
                    .get(index)
                    .is_some_and(|rec| rec.face == face.id);
                if !owned {
                    out.push(Violation::BadEmbeddingIndex { face: fid, index });
                }
            }
        }

        for cluster in self.clusters.values() {
            if cluster.members.is_empty() {
                out.push(Violation::EmptyCluster(cluster.id));
            }
            for member in &cluster.members {
                let points_back = self
                    .faces
                    .get(member)
                    .is_some_and(|f| f.cluster == Some(cluster.id));
                if !points_back {
                    out.push(Violation::StrayMember {
                        cluster: cluster.id,
                        face: member.to_string(),
                    });
                }
            }
        }

        for (id, name) in &self.name_map {
            if !self.clusters.contains_key(id) {
                out.push(Violation::DanglingName(*id));
            }
            if name.trim().is_empty() {
                out.push(Violation::EmptyName(*id));
            }
        }

        let mut refs = vec![0usize; self.embeddings.len()];
        for index in self.faces.values().filter_map(|f| f.embedding) {
            if let Some(slot) = refs.get_mut(index) {
                *slot += 1;
            }
        }
        for (index, &n) in refs.iter().enumerate() {
            if n != 1 {
                out.push(Violation::UnownedEmbedding { index, refs: n });
            }
        }

        for photo in self.photos.values() {
            let mut seen = BTreeSet::new();
            for fid in &photo.faces {
                if !seen.insert(fid) {
                    out.push(Violation::Duplicate {
                        kind: "photo face",
                        id: fid.to_string(),
                    });
                }
                let belongs = self.faces.get(fid).is_some_and(|f| f.photo == photo.file);
                if !belongs {
                    out.push(Violation::UnknownFace {
                        photo: photo.file.clone(),
                        face: fid.to_string(),
                    });
                }
            }
        }

        for (person, entry) in &self.family {
            if entry.references(person) {
                out.push(Violation::SelfReference(person.clone()));
            }
        }

        out
    }
}
