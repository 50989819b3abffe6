//! Content-addressed on-disk cache for raw block and transaction JSON.
//!
//! Layout: `<base>/<id[0:2]>/<id[2:4]>/<id>`. The two-level prefix fan-out
//! keeps per-directory entry counts bounded. The store is a soft cache:
//! deleting it wholesale is always safe.

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// A directory-backed blob store keyed by 43-character base64url ids.
///
/// Writes are atomic (temp file + rename). Concurrent `put` of the same id
/// is safe because the content is deterministic from the id.
#[derive(Debug, Clone)]
pub struct BlobStore {
    base: PathBuf,
}

impl BlobStore {
    /// Create a store rooted at `base`. The directory is created lazily.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// The root directory of this store.
    #[must_use]
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, id: &str) -> PathBuf {
        debug_assert!(id.len() >= 4, "ids are 43 chars");
        self.base.join(&id[0..2]).join(&id[2..4]).join(id)
    }

    /// Whether a blob exists for `id`.
    pub async fn has(&self, id: &str) -> bool {
        fs::metadata(self.path_for(id)).await.is_ok()
    }

    /// Read the blob for `id`, or `None` if it was never written.
    pub async fn get(&self, id: &str) -> io::Result<Option<Vec<u8>>> {
        match fs::read(self.path_for(id)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Write the blob for `id` atomically.
    pub async fn put(&self, id: &str, bytes: &[u8]) -> io::Result<()> {
        let path = self.path_for(id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &path).await
    }

    /// Remove the blob for `id`; absent blobs are not an error.
    pub async fn delete(&self, id: &str) -> io::Result<()> {
        match fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}
