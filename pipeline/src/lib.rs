//! Incremental face-identity pipeline.
//!
//! [`Pipeline::run`] scans a [`PhotoSource`], asks a [`FaceDetector`] and a
//! [`FaceEmbedder`] about new photos, re-clusters every embedded face and
//! commits the reconciled result to a [`famface_catalog::Catalog`] in one
//! step. Detector and embedder are external; failures on single items are
//! reported and retried on the next run.

mod cancel;
mod error;
mod pipeline;
mod source;

pub use cancel::CancelToken;
pub use error::{OracleError, PipelineError};
pub use pipeline::{ItemFailure, Pipeline, PipelineConfig, RunMode, RunOptions, RunReport};
pub use source::{
    DirPhotoSource, Detection, FaceDetector, FaceEmbedder, PhotoSource, SUPPORTED_EXTENSIONS,
};
