use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use famface_catalog::BoundingBox;

use crate::error::OracleError;

/// Photo file extensions picked up by [`DirPhotoSource`], compared
/// case-insensitively.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "tiff", "webp"];

/// What a detector found in one photo.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Detection {
    pub faces: Vec<BoundingBox>,
    /// Capture date, if the detector could read one.
    pub date: Option<NaiveDate>,
}

/// Locates faces in a photo.
///
/// Implementations must be safe for concurrent use.
pub trait FaceDetector: Send + Sync {
    fn detect(&self, photo: &Path) -> Result<Detection, OracleError>;
}

/// Computes a fixed-length vector for one face. The vector is opaque to the
/// pipeline; only distances between vectors matter.
///
/// Implementations must be safe for concurrent use.
pub trait FaceEmbedder: Send + Sync {
    fn embed(&self, photo: &Path, face: &BoundingBox) -> Result<Vec<f32>, OracleError>;
}

/// Where photo files come from.
pub trait PhotoSource: Send + Sync {
    /// Photo filenames, sorted.
    fn list(&self) -> std::io::Result<Vec<String>>;

    fn path(&self, file: &str) -> PathBuf;

    fn exists(&self, file: &str) -> bool;
}

/// [`PhotoSource`] over the image files of one directory (not recursive).
#[derive(Debug, Clone)]
pub struct DirPhotoSource {
    dir: PathBuf,
}

impl DirPhotoSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn is_supported(path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SUPPORTED_EXTENSIONS.iter().any(|s| e.eq_ignore_ascii_case(s)))
    }
}

impl PhotoSource for DirPhotoSource {
    fn list(&self) -> std::io::Result<Vec<String>> {
        let mut files = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let path = entry.path();
            if !Self::is_supported(&path) {
                continue;
            }
            if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                files.push(name.to_string());
            }
        }
        files.sort();
        Ok(files)
    }

    fn path(&self, file: &str) -> PathBuf {
        self.dir.join(file)
    }

    fn exists(&self, file: &str) -> bool {
        self.path(file).is_file()
    }
}
