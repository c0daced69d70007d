use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use famface_cluster::ClusterId;

use crate::error::CatalogError;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Stable face identifier derived from the photo and detection index.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceId(pub String);

impl FaceId {
    /// Builds `"{photo_stem}_face{index}"`, e.g. `beach_face0` for
    /// `beach.jpg`.
    pub fn derive(photo_file: &str, index: usize) -> Self {
        let stem = Path::new(photo_file)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(photo_file);
        FaceId(format!("{stem}_face{index}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for FaceId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FaceId {
    fn from(s: &str) -> Self {
        FaceId(s.to_string())
    }
}

// ---------------------------------------------------------------------------
// Faces
// ---------------------------------------------------------------------------

/// Face location in pixels, as reported by the detector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

/// Where a face's name comes from.
///
/// `Manual` and `Cleared` are individual overrides: cluster-level naming
/// never touches them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", content = "name", rename_all = "snake_case")]
pub enum FaceLabel {
    #[default]
    Unnamed,
    /// Propagated from the face's cluster name.
    Cluster(String),
    /// Assigned to this face alone.
    Manual(String),
    /// Explicitly marked as unrecognized for this face alone.
    Cleared,
}

impl FaceLabel {
    pub fn name(&self) -> Option<&str> {
        match self {
            FaceLabel::Cluster(n) | FaceLabel::Manual(n) => Some(n),
            FaceLabel::Unnamed | FaceLabel::Cleared => None,
        }
    }

    pub fn is_override(&self) -> bool {
        matches!(self, FaceLabel::Manual(_) | FaceLabel::Cleared)
    }
}

/// A detected face.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Face {
    pub id: FaceId,

    /// Owning photo filename.
    pub photo: String,

    pub bbox: BoundingBox,

    /// Index into the embedding store. `None` until embedded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<usize>,

    /// The embedder failed on this face; it is retried on the next run.
    #[serde(default, skip_serializing_if = "is_false")]
    pub embed_failed: bool,

    /// `None` means unclustered (noise, or not yet clustered).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster: Option<ClusterId>,

    /// Set by manual merge/split: `cluster` is authoritative and
    /// re-clustering keeps the face there.
    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,

    #[serde(default)]
    pub label: FaceLabel,

    /// Capture date inherited from the photo.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl Face {
    pub fn new(
        id: FaceId,
        photo: impl Into<String>,
        bbox: BoundingBox,
        date: Option<NaiveDate>,
    ) -> Self {
        Self {
            id,
            photo: photo.into(),
            bbox,
            embedding: None,
            embed_failed: false,
            cluster: None,
            pinned: false,
            label: FaceLabel::Unnamed,
            date,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.label.name()
    }
}

// ---------------------------------------------------------------------------
// Photos and clusters
// ---------------------------------------------------------------------------

/// An ingested photo. Recorded even when no faces were found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Photo {
    /// Filename, unique within the collection.
    pub file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,

    #[serde(default)]
    pub faces: Vec<FaceId>,
}

/// Automatically discovered group of faces. Never empty while it exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub members: BTreeSet<FaceId>,
}

/// A cluster name that lost its cluster. Never reattached automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanedName {
    pub cluster: ClusterId,
    pub name: String,
}

// ---------------------------------------------------------------------------
// Family tree
// ---------------------------------------------------------------------------

/// Relations of one person, keyed by name in the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyEntry {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spouse: Option<String>,
}

impl FamilyEntry {
    /// True if `person` appears among its own relations.
    pub fn references(&self, person: &str) -> bool {
        self.parents.iter().any(|p| p == person)
            || self.children.iter().any(|c| c == person)
            || self.spouse.as_deref() == Some(person)
    }
}

/// Partial family tree update. `None` fields are left unchanged;
/// `spouse: Some(None)` removes the spouse.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyUpdate {
    #[serde(default)]
    pub parents: Option<Vec<String>>,
    #[serde(default)]
    pub children: Option<Vec<String>>,
    #[serde(default)]
    pub spouse: Option<Option<String>>,
}

// ---------------------------------------------------------------------------
// Embeddings
// ---------------------------------------------------------------------------

/// One vector, tied to the face that owns it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub face: FaceId,
    pub vector: Vec<f32>,
}

/// Ordered, append-only collection of face vectors.
///
/// Positions are referenced by [`Face::embedding`] and never shift, except
/// through [`EmbeddingStore::compact`] which returns the remapping so the
/// caller can rewrite face indices in the same snapshot. A full re-embed
/// builds a fresh store and rewrites every face index at once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingStore {
    records: Vec<EmbeddingRecord>,
}

impl EmbeddingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dimension of stored vectors, if any are stored.
    pub fn dim(&self) -> Option<usize> {
        self.records.first().map(|r| r.vector.len())
    }

    fn check_dim(&self, got: usize) -> Result<(), CatalogError> {
        match self.dim() {
            Some(expected) if expected != got => {
                Err(CatalogError::DimensionMismatch { expected, got })
            }
            _ if got == 0 => Err(CatalogError::InvalidInput("empty embedding vector".into())),
            _ => Ok(()),
        }
    }

    /// Appends a vector and returns its index.
    pub fn append(&mut self, face: FaceId, vector: Vec<f32>) -> Result<usize, CatalogError> {
        self.check_dim(vector.len())?;
        self.records.push(EmbeddingRecord { face, vector });
        Ok(self.records.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&EmbeddingRecord> {
        self.records.get(index)
    }

    pub fn records(&self) -> &[EmbeddingRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drops records rejected by `keep` and returns `(old, new)` index
    /// pairs for the survivors, in order.
    pub fn compact(
        &mut self,
        mut keep: impl FnMut(usize, &EmbeddingRecord) -> bool,
    ) -> Vec<(usize, usize)> {
        let old = std::mem::take(&mut self.records);
        let mut remap = Vec::with_capacity(old.len());
        for (i, rec) in old.into_iter().enumerate() {
            if keep(i, &rec) {
                remap.push((i, self.records.len()));
                self.records.push(rec);
            }
        }
        remap
    }
}
