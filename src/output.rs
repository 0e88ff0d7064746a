//! The result of a flatten request.

use std::path::{Path, PathBuf};

/// Flattened PDF, either in memory or on disk.
///
/// Which one a request yields is decided by
/// [`crate::FlattenConfig::persist_to_disk`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputArtifact {
    /// Serialised PDF bytes; nothing was left on disk.
    Bytes(Vec<u8>),
    /// Path of the flattened PDF inside the persisted workspace.
    File(PathBuf),
}

impl OutputArtifact {
    /// The bytes, if the artifact is in memory.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            OutputArtifact::Bytes(b) => Some(b),
            OutputArtifact::File(_) => None,
        }
    }

    /// The path, if the artifact was written to disk.
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            OutputArtifact::Bytes(_) => None,
            OutputArtifact::File(p) => Some(p),
        }
    }

    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            OutputArtifact::Bytes(b) => Some(b),
            OutputArtifact::File(_) => None,
        }
    }
}
