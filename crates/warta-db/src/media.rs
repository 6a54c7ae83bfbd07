//! Disk-backed storage for uploaded post images.
//!
//! Files are named by the SHA-256 of their content, so identical uploads map
//! to a single file and distinct uploads cannot collide. Everything lives
//! under a `posts/` subdirectory of the configured public storage root, which
//! the daemon exposes for static serving.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Subdirectory of the storage root that holds post images.
const MEDIA_SUBDIR: &str = "posts";

/// Image formats accepted for post uploads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
    Svg,
}

impl ImageKind {
    /// Canonical file extension for the format.
    pub fn extension(&self) -> &'static str {
        match self {
            ImageKind::Jpeg => "jpg",
            ImageKind::Png => "png",
            ImageKind::Gif => "gif",
            ImageKind::Svg => "svg",
        }
    }
}

/// Filesystem manager for uploaded post images.
#[derive(Clone, Debug)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    /// Creates a store rooted at the given public storage directory. The
    /// `posts/` subdirectory is created on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Writes image bytes under their content-hash filename and returns the
    /// filename. Storing identical content twice rewrites the same file.
    pub fn put(&self, data: &[u8], kind: ImageKind) -> Result<String> {
        let filename = format!("{}.{}", compute_hash(data), kind.extension());
        let dir = self.public_dir();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create media directory {}", dir.display()))?;

        let path = dir.join(&filename);
        std::fs::write(&path, data)
            .with_context(|| format!("failed to write image {}", path.display()))?;
        Ok(filename)
    }

    /// Removes a stored image. Returns `true` when a file was deleted and
    /// `false` when nothing was stored under the name.
    pub fn delete(&self, filename: &str) -> Result<bool> {
        let path = self.path(filename)?;
        if !path.exists() {
            return Ok(false);
        }
        std::fs::remove_file(&path)
            .with_context(|| format!("failed to delete image {}", path.display()))?;
        Ok(true)
    }

    /// Filesystem path of a stored image.
    pub fn path(&self, filename: &str) -> Result<PathBuf> {
        check_filename(filename)?;
        Ok(self.public_dir().join(filename))
    }

    /// Directory that should be exposed for static file serving.
    pub fn public_dir(&self) -> PathBuf {
        self.root.join(MEDIA_SUBDIR)
    }

    /// URL path under which a stored image is served.
    pub fn url_path(filename: &str) -> String {
        format!("/storage/{}/{}", MEDIA_SUBDIR, filename)
    }
}

/// Rejects names that could escape the media directory.
fn check_filename(filename: &str) -> Result<()> {
    if filename.is_empty()
        || filename.contains('/')
        || filename.contains('\\')
        || filename == "."
        || filename == ".."
    {
        bail!("invalid image filename '{}'", filename);
    }
    Ok(())
}

fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
