use thiserror::Error;

use famface_catalog::CatalogError;
use famface_cluster::ClusterError;

/// Failure of an external detector or embedder on one item.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle: {0}")]
    Failed(String),

    #[error("oracle: io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that abort a pipeline run. Nothing is committed when a run
/// returns one of these.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("pipeline: cannot list photos: {0}")]
    Source(#[source] std::io::Error),

    #[error("pipeline: run cancelled")]
    Cancelled,
}

impl PipelineError {
    /// True when running again may succeed without any change.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::Catalog(e) if e.is_retryable())
    }
}
