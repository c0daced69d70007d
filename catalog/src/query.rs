//! Read-only views over a [`Snapshot`].

use std::cmp::Reverse;
use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use famface_cluster::ClusterId;

use crate::error::CatalogError;
use crate::snapshot::Snapshot;
use crate::types::{Face, FaceId, Photo};

/// Page size when the caller gives none.
pub const DEFAULT_LIMIT: usize = 100;

/// Largest accepted page size.
pub const MAX_LIMIT: usize = 1000;

const CLUSTER_SAMPLE: usize = 5;
const TIMELINE_SAMPLE: usize = 10;
const UNKNOWN_YEAR: &str = "Unknown";

// ---------------------------------------------------------------------------
// Filters
// ---------------------------------------------------------------------------

/// Inclusive date bounds. Undated records never match a bounded range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    #[serde(default)]
    pub from: Option<NaiveDate>,
    #[serde(default)]
    pub to: Option<NaiveDate>,
}

impl DateRange {
    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.to.is_none()
    }

    pub fn contains(&self, date: Option<NaiveDate>) -> bool {
        if self.is_unbounded() {
            return true;
        }
        let Some(d) = date else {
            return false;
        };
        self.from.is_none_or(|f| d >= f) && self.to.is_none_or(|t| d <= t)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceQuery {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub cluster: Option<ClusterId>,
    #[serde(default)]
    pub dates: DateRange,
    /// `Some(true)`: only faces without a name; `Some(false)`: only named.
    #[serde(default)]
    pub unrecognized: Option<bool>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoQuery {
    #[serde(default)]
    pub dates: DateRange,
    #[serde(default)]
    pub has_faces: Option<bool>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn effective_limit(limit: Option<usize>) -> Result<usize, CatalogError> {
    match limit {
        None => Ok(DEFAULT_LIMIT),
        Some(n) if n > MAX_LIMIT => Err(CatalogError::InvalidInput(format!(
            "limit {n} exceeds maximum {MAX_LIMIT}"
        ))),
        Some(n) => Ok(n),
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// One page of a filtered listing; `total` counts all matches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub total: usize,
    pub offset: usize,
    pub limit: usize,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    fn slice(all: Vec<T>, offset: usize, limit: usize) -> Self {
        let total = all.len();
        let items = all.into_iter().skip(offset).take(limit).collect();
        Self {
            total,
            offset,
            limit,
            items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhotoDetail {
    #[serde(flatten)]
    pub photo: Photo,
    pub face_details: Vec<Face>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonSummary {
    pub name: String,
    pub face_count: usize,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterSummary {
    pub id: ClusterId,
    pub name: Option<String>,
    pub face_count: usize,
    pub sample: Vec<FaceId>,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterOverview {
    pub clusters: Vec<ClusterSummary>,
    pub unclustered: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TimelineYear {
    pub year: String,
    pub photo_count: usize,
    pub photos: Vec<Photo>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonYear {
    pub year: String,
    pub appearances: usize,
    pub faces: Vec<Face>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PersonTimeline {
    pub name: String,
    pub total_appearances: usize,
    pub years: Vec<PersonYear>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stats {
    pub generation: u64,
    pub photos: usize,
    pub faces: usize,
    pub named_faces: usize,
    pub unnamed_faces: usize,
    pub clustered_faces: usize,
    pub unclustered_faces: usize,
    pub clusters: usize,
    pub named_clusters: usize,
    pub unique_people: usize,
    pub embeddings: usize,
    pub embed_failures: usize,
    pub earliest: Option<NaiveDate>,
    pub latest: Option<NaiveDate>,
    pub family_tree_entries: usize,
    pub orphaned_names: usize,
}

fn year_label(year: Option<i32>) -> String {
    match year {
        Some(y) => y.to_string(),
        None => UNKNOWN_YEAR.to_string(),
    }
}

fn date_bounds<'a>(
    dates: impl Iterator<Item = &'a Option<NaiveDate>>,
) -> (Option<NaiveDate>, Option<NaiveDate>) {
    let dates: Vec<NaiveDate> = dates.flatten().copied().collect();
    (dates.iter().min().copied(), dates.iter().max().copied())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

impl Snapshot {
    pub fn face(&self, id: &str) -> Option<&Face> {
        self.faces.get(id)
    }

    /// Filtered faces, newest first; undated faces sort last.
    pub fn list_faces(&self, q: &FaceQuery) -> Result<Page<Face>, CatalogError> {
        let limit = effective_limit(q.limit)?;
        let mut matched: Vec<&Face> = self
            .faces
            .values()
            .filter(|f| q.name.as_deref().is_none_or(|n| f.name() == Some(n)))
            .filter(|f| q.cluster.is_none_or(|c| f.cluster == Some(c)))
            .filter(|f| q.unrecognized.is_none_or(|u| f.name().is_none() == u))
            .filter(|f| q.dates.contains(f.date))
            .collect();
        matched.sort_by(|a, b| Reverse(a.date).cmp(&Reverse(b.date)).then(a.id.cmp(&b.id)));
        let all: Vec<Face> = matched.into_iter().cloned().collect();
        Ok(Page::slice(all, q.offset, limit))
    }

    /// Every face carrying `name`, oldest first.
    pub fn faces_by_name(&self, name: &str) -> Vec<&Face> {
        let mut faces: Vec<&Face> =
            self.faces.values().filter(|f| f.name() == Some(name)).collect();
        faces.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        faces
    }

    /// A photo with its face records in photo order.
    pub fn photo(&self, file: &str) -> Option<PhotoDetail> {
        let photo = self.photos.get(file)?;
        let face_details = photo
            .faces
            .iter()
            .filter_map(|id| self.faces.get(id))
            .cloned()
            .collect();
        Some(PhotoDetail {
            photo: photo.clone(),
            face_details,
        })
    }

    /// Filtered photos, newest first.
    pub fn list_photos(&self, q: &PhotoQuery) -> Result<Page<Photo>, CatalogError> {
        let limit = effective_limit(q.limit)?;
        let mut matched: Vec<&Photo> = self
            .photos
            .values()
            .filter(|p| q.dates.contains(p.date))
            .filter(|p| q.has_faces.is_none_or(|h| p.faces.is_empty() != h))
            .collect();
        matched.sort_by(|a, b| Reverse(a.date).cmp(&Reverse(b.date)).then(a.file.cmp(&b.file)));
        let all: Vec<Photo> = matched.into_iter().cloned().collect();
        Ok(Page::slice(all, q.offset, limit))
    }

    /// Photos inside `range`, oldest first.
    pub fn photos_by_date(&self, range: &DateRange) -> Vec<&Photo> {
        let mut photos: Vec<&Photo> =
            self.photos.values().filter(|p| range.contains(p.date)).collect();
        photos.sort_by(|a, b| a.date.cmp(&b.date).then(a.file.cmp(&b.file)));
        photos
    }

    /// Distinct face names, alphabetical.
    pub fn people(&self) -> Vec<PersonSummary> {
        let mut by_name: BTreeMap<&str, Vec<&Face>> = BTreeMap::new();
        for face in self.faces.values() {
            if let Some(name) = face.name() {
                by_name.entry(name).or_default().push(face);
            }
        }
        by_name
            .into_iter()
            .map(|(name, faces)| {
                let (earliest, latest) = date_bounds(faces.iter().map(|f| &f.date));
                PersonSummary {
                    name: name.to_string(),
                    face_count: faces.len(),
                    earliest,
                    latest,
                }
            })
            .collect()
    }

    pub fn clusters(&self) -> ClusterOverview {
        let clusters = self
            .clusters
            .values()
            .map(|c| {
                let faces = c.members.iter().filter_map(|m| self.faces.get(m));
                let (earliest, latest) = date_bounds(faces.map(|f| &f.date));
                ClusterSummary {
                    id: c.id,
                    name: self.name_map.get(&c.id).cloned(),
                    face_count: c.members.len(),
                    sample: c.members.iter().take(CLUSTER_SAMPLE).cloned().collect(),
                    earliest,
                    latest,
                }
            })
            .collect();
        let unclustered = self.faces.values().filter(|f| f.cluster.is_none()).count();
        ClusterOverview {
            clusters,
            unclustered,
        }
    }

    /// Photos grouped by year, newest year first, undated last.
    pub fn timeline(&self) -> Vec<TimelineYear> {
        let mut years: BTreeMap<Reverse<Option<i32>>, Vec<&Photo>> = BTreeMap::new();
        for photo in self.photos.values() {
            years.entry(Reverse(photo.date.map(|d| d.year()))).or_default().push(photo);
        }
        years
            .into_iter()
            .map(|(Reverse(year), mut photos)| {
                photos.sort_by(|a, b| a.date.cmp(&b.date).then(a.file.cmp(&b.file)));
                TimelineYear {
                    year: year_label(year),
                    photo_count: photos.len(),
                    photos: photos.into_iter().take(TIMELINE_SAMPLE).cloned().collect(),
                }
            })
            .collect()
    }

    /// Appearances of one person by year, oldest first, undated last.
    pub fn person_timeline(&self, name: &str) -> Result<PersonTimeline, CatalogError> {
        let faces = self.faces_by_name(name);
        if faces.is_empty() {
            return Err(CatalogError::NotFound {
                kind: "person",
                id: name.to_string(),
            });
        }
        let total_appearances = faces.len();
        let mut dated: BTreeMap<i32, Vec<Face>> = BTreeMap::new();
        let mut undated = Vec::new();
        for face in faces {
            match face.date {
                Some(d) => dated.entry(d.year()).or_default().push(face.clone()),
                None => undated.push(face.clone()),
            }
        }
        let mut years: Vec<PersonYear> = dated
            .into_iter()
            .map(|(y, faces)| PersonYear {
                year: year_label(Some(y)),
                appearances: faces.len(),
                faces,
            })
            .collect();
        if !undated.is_empty() {
            years.push(PersonYear {
                year: year_label(None),
                appearances: undated.len(),
                faces: undated,
            });
        }
        Ok(PersonTimeline {
            name: name.to_string(),
            total_appearances,
            years,
        })
    }

    pub fn stats(&self) -> Stats {
        let faces = self.faces.len();
        let named_faces = self.faces.values().filter(|f| f.name().is_some()).count();
        let clustered_faces = self.faces.values().filter(|f| f.cluster.is_some()).count();
        let (earliest, latest) = date_bounds(self.faces.values().map(|f| &f.date));
        Stats {
            generation: self.generation,
            photos: self.photos.len(),
            faces,
            named_faces,
            unnamed_faces: faces - named_faces,
            clustered_faces,
            unclustered_faces: faces - clustered_faces,
            clusters: self.clusters.len(),
            named_clusters: self.name_map.len(),
            unique_people: self.people().len(),
            embeddings: self.embeddings.len(),
            embed_failures: self.faces.values().filter(|f| f.embed_failed).count(),
            earliest,
            latest,
            family_tree_entries: self.family.len(),
            orphaned_names: self.orphaned.len(),
        }
    }
}
