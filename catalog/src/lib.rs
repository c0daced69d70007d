//! Identity metadata for a family photo collection.
//!
//! A [`Snapshot`] is an immutable view of every photo, face, cluster,
//! cluster name and family relation at one committed generation. The
//! [`Catalog`] owns the current snapshot and is the only writer: every
//! change is a clone-edit-validate-persist-publish cycle under a single
//! commit lease.
//!
//! Cluster names live in a name map keyed by [`ClusterId`] and propagate to
//! member faces unless a face carries an individual override
//! ([`FaceLabel::Manual`] or [`FaceLabel::Cleared`]). Manual merges and
//! splits pin faces so that [`Snapshot::recluster`] cannot undo them.

mod catalog;
mod error;
mod mutate;
mod persist;
mod query;
mod reconcile;
mod snapshot;
mod suggest;
mod types;

pub use catalog::{Catalog, DEFAULT_COMMIT_WAIT};
pub use error::{CatalogError, Violation};
pub use famface_cluster::ClusterId;
pub use mutate::{CleanupReport, MergeOutcome, SplitOutcome};
pub use persist::{DirStore, MemoryStore, SnapshotStore};
pub use query::{
    ClusterOverview, ClusterSummary, DEFAULT_LIMIT, DateRange, FaceQuery, MAX_LIMIT, Page,
    PersonSummary, PersonTimeline, PersonYear, PhotoDetail, PhotoQuery, Stats, TimelineYear,
};
pub use reconcile::Reclustered;
pub use snapshot::Snapshot;
pub use suggest::{DEFAULT_SUGGESTIONS, Reason, Suggestion};
pub use types::{
    BoundingBox, Cluster, EmbeddingRecord, EmbeddingStore, Face, FaceId, FaceLabel, FamilyEntry,
    FamilyUpdate, OrphanedName, Photo,
};
