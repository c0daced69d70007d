//! Density clustering of face embeddings and stable id reconciliation.
//!
//! The crate is generic over what the vectors represent; callers pass
//! plain `&[f32]` slices and get back index groups.
//!
//! # Usage
//!
//! ```
//! use std::collections::{BTreeMap, BTreeSet};
//! use famface_cluster::{Clusterer, Config, StabilizeConfig, stabilize};
//!
//! let vectors: Vec<Vec<f32>> =
//!     vec![vec![0.0, 0.0], vec![0.1, 0.0], vec![4.0, 4.0], vec![4.1, 4.0]];
//! let refs: Vec<&[f32]> = vectors.iter().map(|v| v.as_slice()).collect();
//!
//! let partition = Clusterer::new(Config::default()).unwrap().cluster(&refs).unwrap();
//! assert_eq!(partition.groups.len(), 2);
//!
//! let raw: Vec<BTreeSet<usize>> =
//!     partition.groups.iter().map(|g| g.iter().copied().collect()).collect();
//! let stable = stabilize(&BTreeMap::new(), &raw, &BTreeSet::new(), &StabilizeConfig::default());
//! assert_eq!(stable.created(), 2);
//! ```
//!
//! # Design
//!
//! [`Clusterer::cluster`] only produces a partition; its labels carry no
//! meaning across runs. [`stabilize`] is the only place cluster ids are
//! decided, by best-overlap matching against the previous clusters.

mod clusterer;
mod dbscan;
mod error;
mod hdbscan;
mod metric;
mod stabilize;

pub use clusterer::{Clusterer, Config, Method, Partition};
pub use error::ClusterError;
pub use metric::{Metric, cosine_sim, euclidean, l2_norm};
pub use stabilize::{
    Assignment, ClusterId, Origin, StabilizeConfig, Stabilized, smallest_unused, stabilize,
};
