//! Per-request workspace: an isolated temp directory tree.
//!
//! ```text
//! <base>/<unix-millis>-<random>/
//!     docs/original.pdf      staged input
//!     split/<name>_<n>.<ext> page images
//!     flattened.pdf          only when the output is persisted
//! ```
//!
//! The root is a [`tempfile::TempDir`], so the whole tree is removed when the
//! [`Workspace`] is dropped, including on an early `?` return or a panic.
//! [`Workspace::persist`] is the single way to keep anything: it prunes
//! `docs/` and `split/` and releases the root so that only the flattened PDF
//! survives.

use crate::config::ImageType;
use crate::error::FlattenError;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;
use tracing::{debug, info, warn};

const STAGING_DIR: &str = "docs";
const SPLIT_DIR: &str = "split";
const STAGED_FILE: &str = "original.pdf";

/// File name of the persisted artifact inside the workspace root.
pub const ARTIFACT_FILE: &str = "flattened.pdf";

/// Number of random characters appended after the timestamp.
const RANDOM_SUFFIX_LEN: usize = 8;

/// A uniquely-named directory tree owned by one flatten request.
#[derive(Debug)]
pub struct Workspace {
    root: TempDir,
}

impl Workspace {
    /// Create a fresh workspace under `base`, creating `base` if needed.
    ///
    /// The name is `<unix-millis>-<random>`; `tempfile` creates it with
    /// exclusive-create semantics and retries on collision, so two
    /// concurrent requests can never end up sharing a directory.
    pub async fn create(base: &Path) -> Result<Self, FlattenError> {
        tokio::fs::create_dir_all(base)
            .await
            .map_err(|e| FlattenError::workspace(base, e))?;

        let prefix = format!("{}-", unix_millis());
        let root = tempfile::Builder::new()
            .prefix(&prefix)
            .rand_bytes(RANDOM_SUFFIX_LEN)
            .tempdir_in(base)
            .map_err(|e| FlattenError::workspace(base, e))?;

        let ws = Self { root };
        for dir in [ws.staging_dir(), ws.split_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| FlattenError::workspace(&dir, e))?;
        }

        debug!("Created workspace {}", ws.path().display());
        Ok(ws)
    }

    /// Root directory of the workspace.
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.path().join(STAGING_DIR)
    }

    pub fn split_dir(&self) -> PathBuf {
        self.path().join(SPLIT_DIR)
    }

    /// Fixed path the input document is staged at.
    pub fn staged_input(&self) -> PathBuf {
        self.staging_dir().join(STAGED_FILE)
    }

    /// Path the flattened PDF is written to when persisting.
    pub fn artifact_path(&self) -> PathBuf {
        self.path().join(ARTIFACT_FILE)
    }

    /// Write the input document to [`Self::staged_input`].
    ///
    /// Rejects input without the `%PDF` magic so the engine is never handed
    /// something it cannot open.
    pub async fn stage(&self, document: &[u8]) -> Result<PathBuf, FlattenError> {
        let path = self.staged_input();

        if document.len() < 4 || &document[..4] != b"%PDF" {
            let magic: Vec<u8> = document.iter().take(4).copied().collect();
            return Err(FlattenError::UnreadableDocument {
                path,
                detail: format!("not a PDF (first bytes: {:?})", magic),
            });
        }

        tokio::fs::write(&path, document)
            .await
            .map_err(|e| FlattenError::workspace(&path, e))?;

        debug!("Staged {} bytes at {}", document.len(), path.display());
        Ok(path)
    }

    /// List the page images in the split directory, ordered by page index.
    ///
    /// Only files named `<name>_<page>.<ext>` count; the page index comes
    /// from the file name, never from directory order or timestamps.
    pub async fn enumerate_split(
        &self,
        name: &str,
        image_type: ImageType,
    ) -> Result<Vec<(usize, PathBuf)>, FlattenError> {
        let dir = self.split_dir();
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| FlattenError::workspace(&dir, e))?;

        let mut pages = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FlattenError::workspace(&dir, e))?
        {
            let path = entry.path();
            match parse_page_file_name(&path, name, image_type) {
                Some(page) => pages.push((page, path)),
                None => warn!("Ignoring unexpected file in split dir: {}", path.display()),
            }
        }

        pages.sort_by_key(|(page, _)| *page);
        Ok(pages)
    }

    /// Keep only the flattened PDF and release the workspace root.
    ///
    /// On any error the workspace is still owned by `self` and is removed
    /// when it drops, so a failed persist leaves nothing behind.
    pub async fn persist(self) -> Result<PathBuf, FlattenError> {
        let artifact = self.artifact_path();
        if !tokio::fs::try_exists(&artifact)
            .await
            .map_err(|e| FlattenError::workspace(&artifact, e))?
        {
            return Err(FlattenError::Internal(format!(
                "persist called before {} was written",
                artifact.display()
            )));
        }

        for dir in [self.staging_dir(), self.split_dir()] {
            tokio::fs::remove_dir_all(&dir)
                .await
                .map_err(|e| FlattenError::workspace(&dir, e))?;
        }

        let root = self.root.keep();
        info!("Persisted flattened PDF in {}", root.display());
        Ok(root.join(ARTIFACT_FILE))
    }
}

/// Page number encoded in `<name>_<page>.<ext>`, if `path` matches.
pub(crate) fn parse_page_file_name(path: &Path, name: &str, image_type: ImageType) -> Option<usize> {
    if ImageType::from_path(path)? != image_type {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let page = stem.strip_prefix(name)?.strip_prefix('_')?;
    // Reject "+3", " 3" and friends that `parse` would otherwise accept.
    if page.is_empty() || !page.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    page.parse().ok().filter(|&p| p >= 1)
}

/// File name the rasterizer writes page `page` to.
pub(crate) fn page_file_name(name: &str, page: usize, image_type: ImageType) -> String {
    format!("{}_{}.{}", name, page, image_type.extension())
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
}
