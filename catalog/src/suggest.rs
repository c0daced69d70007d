//! Identity suggestions for a face from co-occurrence evidence.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::error::CatalogError;
use crate::snapshot::Snapshot;
use crate::types::FaceId;

/// Default number of suggestions returned.
pub const DEFAULT_SUGGESTIONS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reason {
    /// A face with this name appears in the same photo.
    CoOccursInPhoto,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub name: String,
    pub reason: Reason,
    /// Photos in which the name appears together with this face's cluster.
    pub score: usize,
}

impl Snapshot {
    /// Suggests names for `face`, best first.
    ///
    /// Candidates are the names of other faces in the same photo, minus the
    /// face's own name. Each is scored by how many photos show it next to
    /// the face's cluster (or next to the face itself when unclustered).
    pub fn suggest(&self, face: &str, limit: usize) -> Result<Vec<Suggestion>, CatalogError> {
        let face = self.faces.get(face).ok_or_else(|| CatalogError::face_not_found(face))?;
        let own = face.name();

        let candidates: BTreeSet<&str> = self
            .photos
            .get(&face.photo)
            .into_iter()
            .flat_map(|p| p.faces.iter())
            .filter(|id| **id != face.id)
            .filter_map(|id| self.faces.get(id)?.name())
            .filter(|n| Some(*n) != own)
            .collect();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let group: BTreeSet<&FaceId> = match face.cluster.and_then(|c| self.clusters.get(&c)) {
            Some(c) => c.members.iter().collect(),
            None => BTreeSet::from([&face.id]),
        };
        let group_photos: BTreeSet<&str> = group
            .iter()
            .filter_map(|id| self.faces.get(*id))
            .map(|f| f.photo.as_str())
            .collect();

        let mut scores: BTreeMap<&str, usize> = BTreeMap::new();
        for file in group_photos {
            let Some(photo) = self.photos.get(file) else {
                continue;
            };
            let names: BTreeSet<&str> = photo
                .faces
                .iter()
                .filter(|id| !group.contains(id))
                .filter_map(|id| self.faces.get(id)?.name())
                .filter(|n| candidates.contains(n))
                .collect();
            for name in names {
                *scores.entry(name).or_default() += 1;
            }
        }

        let mut out: Vec<Suggestion> = scores
            .into_iter()
            .map(|(name, score)| Suggestion {
                name: name.to_string(),
                reason: Reason::CoOccursInPhoto,
                score,
            })
            .collect();
        out.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::fixtures::{build, name};
    use crate::types::FaceLabel;

    fn party() -> Snapshot {
        // x_face0 and y_face0 are the same unnamed person (cluster 2).
        let mut s = build(
            &[
                ("x.jpg", None, &["x_face0", "x_face1", "x_face2"]),
                ("y.jpg", None, &["y_face0", "y_face1"]),
                ("z.jpg", None, &["z_face0"]),
            ],
            &[
                (0, &["x_face1"]),
                (1, &["x_face2", "y_face1"]),
                (2, &["x_face0", "y_face0"]),
            ],
        );
        name(&mut s, 0, "Ann");
        name(&mut s, 1, "Bo");
        s
    }

    #[test]
    fn ranks_by_shared_photos() {
        let s = party();
        let got = s.suggest("x_face0", DEFAULT_SUGGESTIONS).unwrap();
        let ranked: Vec<(&str, usize)> = got.iter().map(|g| (g.name.as_str(), g.score)).collect();
        assert_eq!(ranked, vec![("Bo", 2), ("Ann", 1)]);
        assert!(got.iter().all(|g| g.reason == Reason::CoOccursInPhoto));
    }

    #[test]
    fn no_named_companions_means_no_suggestions() {
        let s = party();
        assert!(s.suggest("z_face0", DEFAULT_SUGGESTIONS).unwrap().is_empty());
    }

    #[test]
    fn excludes_own_name_and_respects_limit() {
        let mut s = party();
        s.faces.get_mut("x_face0").unwrap().label = FaceLabel::Manual("Bo".into());
        let got = s.suggest("x_face0", DEFAULT_SUGGESTIONS).unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].name, "Ann");

        let s = party();
        assert_eq!(s.suggest("x_face0", 1).unwrap().len(), 1);
    }

    #[test]
    fn unknown_face() {
        let s = party();
        assert!(matches!(
            s.suggest("nope", 5),
            Err(CatalogError::NotFound { kind: "face", .. })
        ));
    }
}
