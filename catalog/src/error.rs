use thiserror::Error;

use famface_cluster::ClusterId;

/// A broken cross-record invariant found by the validation pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("face {face} references missing cluster {cluster}")]
    MissingCluster { face: String, cluster: ClusterId },

    #[error("face {face} claims cluster {cluster} but is not a member")]
    NotAMember { face: String, cluster: ClusterId },

    #[error("cluster {cluster} lists face {face} which does not point back")]
    StrayMember { cluster: ClusterId, face: String },

    #[error("cluster {0} has no members")]
    EmptyCluster(ClusterId),

    #[error("name map entry for missing cluster {0}")]
    DanglingName(ClusterId),

    #[error("name map entry for cluster {0} is empty")]
    EmptyName(ClusterId),

    #[error("face {face} embedding index {index} is invalid")]
    BadEmbeddingIndex { face: String, index: usize },

    #[error("embedding record {index} is referenced by {refs} faces")]
    UnownedEmbedding { index: usize, refs: usize },

    #[error("face {face} belongs to missing photo {photo}")]
    MissingPhoto { face: String, photo: String },

    #[error("photo {photo} does not list face {face}")]
    UnlistedFace { photo: String, face: String },

    #[error("photo {photo} lists unknown face {face}")]
    UnknownFace { photo: String, face: String },

    #[error("family tree entry {0} references itself")]
    SelfReference(String),

    #[error("duplicate {kind} record {id}")]
    Duplicate { kind: &'static str, id: String },
}

/// Errors returned by catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog: {kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("catalog: invalid input: {0}")]
    InvalidInput(String),

    #[error("catalog: consistency check failed: {}", join(.0))]
    Consistency(Vec<Violation>),

    #[error("catalog: another mutation is committing, retry")]
    Busy,

    #[error("catalog: snapshot moved from generation {expected} to {found}, retry")]
    Conflict { expected: u64, found: u64 },

    #[error("catalog: embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("catalog: storage error: {0}")]
    Storage(String),

    #[error("catalog: serialization error: {0}")]
    Serialization(String),

    #[error("catalog: io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CatalogError {
    /// True for errors the caller should resolve by retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::Busy | CatalogError::Conflict { .. })
    }

    pub(crate) fn face_not_found(id: &str) -> Self {
        CatalogError::NotFound {
            kind: "face",
            id: id.to_string(),
        }
    }

    pub(crate) fn cluster_not_found(id: ClusterId) -> Self {
        CatalogError::NotFound {
            kind: "cluster",
            id: id.to_string(),
        }
    }
}

fn join(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
