use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dbscan::dbscan;
use crate::error::ClusterError;
use crate::hdbscan::{self, hdbscan};
use crate::metric::Metric;

/// Clustering algorithm and its parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Method {
    /// Fixed-radius density clustering.
    Dbscan {
        /// Maximum distance between two neighbors.
        /// Lower = stricter matching (0.4-0.6 is typical for face encodings).
        eps: f32,

        /// Minimum neighborhood size (including the point) to form a cluster.
        min_samples: usize,
    },

    /// Hierarchical density clustering; picks density levels per cluster
    /// instead of using a fixed `eps`.
    Hdbscan {
        min_cluster_size: usize,
        min_samples: usize,
        #[serde(default)]
        allow_single_cluster: bool,
    },
}

impl Default for Method {
    fn default() -> Self {
        Method::Dbscan {
            eps: 0.5,
            min_samples: 2,
        }
    }
}

/// Controls clustering behavior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub method: Method,

    #[serde(default)]
    pub metric: Metric,
}

/// Result of a clustering pass over `n` input vectors.
///
/// Groups hold input indices sorted ascending; groups are ordered by their
/// smallest index. Raw algorithm labels are not kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub groups: Vec<Vec<usize>>,
    pub noise: Vec<usize>,
}

impl Partition {
    pub(crate) fn from_labels(labels: &[i32]) -> Self {
        let mut by_label: std::collections::BTreeMap<i32, Vec<usize>> = Default::default();
        let mut noise = Vec::new();
        for (i, &l) in labels.iter().enumerate() {
            if l > 0 {
                by_label.entry(l).or_default().push(i);
            } else {
                noise.push(i);
            }
        }
        let mut groups: Vec<Vec<usize>> = by_label.into_values().collect();
        groups.sort_by_key(|g| g[0]);
        Self { groups, noise }
    }

    /// Number of clusters found.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

/// Groups embedding vectors using the configured [`Method`].
#[derive(Debug, Clone)]
pub struct Clusterer {
    cfg: Config,
}

impl Clusterer {
    /// Creates a clusterer after validating parameters.
    pub fn new(cfg: Config) -> Result<Self, ClusterError> {
        match cfg.method {
            Method::Dbscan { eps, min_samples } => {
                if !(eps > 0.0) {
                    return Err(ClusterError::InvalidParams(format!(
                        "eps must be positive, got {eps}"
                    )));
                }
                if min_samples == 0 {
                    return Err(ClusterError::InvalidParams(
                        "min_samples must be at least 1".into(),
                    ));
                }
            }
            Method::Hdbscan {
                min_cluster_size,
                min_samples,
                ..
            } => {
                if min_cluster_size < 2 {
                    return Err(ClusterError::InvalidParams(format!(
                        "min_cluster_size must be at least 2, got {min_cluster_size}"
                    )));
                }
                if min_samples == 0 {
                    return Err(ClusterError::InvalidParams(
                        "min_samples must be at least 1".into(),
                    ));
                }
            }
        }
        Ok(Self { cfg })
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Partitions `vectors` into clusters and noise.
    ///
    /// All vectors must share one dimension. Empty input yields an empty
    /// partition.
    pub fn cluster(&self, vectors: &[&[f32]]) -> Result<Partition, ClusterError> {
        if let Some(first) = vectors.first() {
            let expected = first.len();
            for (index, v) in vectors.iter().enumerate() {
                if v.len() != expected {
                    return Err(ClusterError::DimensionMismatch {
                        index,
                        expected,
                        got: v.len(),
                    });
                }
            }
        }

        let labels = match self.cfg.method {
            Method::Dbscan { eps, min_samples } => {
                dbscan(vectors, eps, min_samples, self.cfg.metric)
            }
            Method::Hdbscan {
                min_cluster_size,
                min_samples,
                allow_single_cluster,
            } => hdbscan(
                vectors,
                hdbscan::Params {
                    min_cluster_size,
                    min_samples,
                    allow_single_cluster,
                    metric: self.cfg.metric,
                },
            ),
        };

        let partition = Partition::from_labels(&labels);
        debug!(
            points = vectors.len(),
            clusters = partition.groups.len(),
            noise = partition.noise.len(),
            "clustered embeddings"
        );
        Ok(partition)
    }
}
