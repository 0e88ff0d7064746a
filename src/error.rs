//! Error types for the pdf-flatten library.
//!
//! Two error types reflect the two layers of the pipeline:
//!
//! * [`FlattenError`] — what callers of [`crate::flatten()`] see. Every
//!   failure is fatal: a conversion is all-or-nothing, so a single bad page
//!   aborts the request and the workspace is removed before the error is
//!   returned.
//!
//! * [`EngineError`] — what a [`crate::engine::RasterEngine`] reports. The
//!   rasterizer translates it into the matching [`FlattenError`] variant
//!   (`UnreadableDocument` for a page-count query, `WriteFailure` for a
//!   page render) so callers never match on engine internals.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the pdf-flatten library.
#[derive(Debug, Error)]
pub enum FlattenError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The rasterization engine could not open the document, or found no pages.
    #[error("Document '{path}' is unreadable: {detail}")]
    UnreadableDocument { path: PathBuf, detail: String },

    /// The requested target page is outside `1..=total`.
    #[error("Page {page} is out of range (document has {total} pages)")]
    InvalidPageSelector { page: usize, total: usize },

    // ── Rasterization errors ──────────────────────────────────────────────
    /// The engine failed to produce the raster file for a page.
    #[error("Failed to write page {page} to '{path}': {detail}")]
    WriteFailure {
        page: usize,
        path: PathBuf,
        detail: String,
    },

    /// The engine reported success but left a zero-byte image behind.
    #[error("Page {page} produced an empty image at '{path}'")]
    EmptyOutput { page: usize, path: PathBuf },

    /// The raster engine binary or library could not be started at all.
    #[error("Rasterization engine unavailable: {0}")]
    EngineUnavailable(String),

    /// Rasterization did not finish within the configured timeout.
    #[error("Rasterization timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The files found in the split directory disagree with the pages rendered.
    #[error("Rendered page set mismatch: expected pages {expected:?}, found {found:?}")]
    PageSetMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    // ── Reassembly errors ─────────────────────────────────────────────────
    /// Reassembly only understands `.png`, `.jpg` and `.jpeg`.
    #[error("Unsupported image format: '{path}'\nExpected a .png, .jpg or .jpeg file.")]
    UnsupportedImageFormat { path: PathBuf },

    /// Reassembly was given no images.
    #[error("No images to assemble")]
    EmptyInputSet,

    /// An image file could not be decoded as its declared format.
    #[error("Failed to decode image '{path}': {detail}")]
    ImageDecode { path: PathBuf, detail: String },

    /// lopdf failed to serialise the assembled document.
    #[error("Failed to build output PDF: {0}")]
    PdfBuild(String),

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Creating, staging into, or pruning the workspace failed.
    #[error("Workspace error at '{path}': {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create or write the output PDF file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FlattenError {
    pub(crate) fn workspace(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FlattenError::Workspace {
            path: path.into(),
            source,
        }
    }
}

/// Failure reported by a [`crate::engine::RasterEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine process could not be spawned (binary missing, not executable).
    #[error("Failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine process exited unsuccessfully.
    #[error("'{program}' exited with {status}: {stderr}")]
    Failed {
        program: String,
        status: String,
        stderr: String,
    },

    /// The engine ran but its output could not be understood.
    #[error("Unexpected engine output: {0}")]
    UnexpectedOutput(String),

    /// Could not bind to a pdfium library.
    #[error("Failed to bind to pdfium library: {0}\nSet the library path or install libpdfium system-wide.")]
    Unavailable(String),

    /// pdfium-render returned an error.
    #[error("pdfium error: {0}")]
    Pdfium(String),

    /// Encoding the rendered bitmap to disk failed.
    #[error("Failed to encode image '{path}': {detail}")]
    Encode { path: PathBuf, detail: String },

    /// A blocking render task panicked.
    #[error("Render task panicked: {0}")]
    TaskPanicked(String),

    /// The caller stopped waiting before the render finished; nothing was written.
    #[error("Render abandoned before its image was written")]
    Abandoned,
}

impl EngineError {
    /// True when the engine itself is missing rather than the document being bad.
    pub fn is_unavailable(&self) -> bool {
        match self {
            EngineError::Spawn { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
                    || source.kind() == std::io::ErrorKind::PermissionDenied
            }
            EngineError::Unavailable(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_page_selector_display() {
        let e = FlattenError::InvalidPageSelector { page: 5, total: 4 };
        let msg = e.to_string();
        assert!(msg.contains("Page 5"), "got: {msg}");
        assert!(msg.contains("4 pages"), "got: {msg}");
    }

    #[test]
    fn empty_output_display() {
        let e = FlattenError::EmptyOutput {
            page: 2,
            path: PathBuf::from("/tmp/ws/split/split_2.png"),
        };
        assert!(e.to_string().contains("split_2.png"));
        assert!(e.to_string().contains("Page 2"));
    }

    #[test]
    fn unsupported_format_display() {
        let e = FlattenError::UnsupportedImageFormat {
            path: PathBuf::from("scan.gif"),
        };
        assert!(e.to_string().contains("scan.gif"));
    }

    #[test]
    fn spawn_not_found_is_unavailable() {
        let e = EngineError::Spawn {
            program: "magick".into(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert!(e.is_unavailable());
        assert!(e.to_string().contains("magick"));
    }

    #[test]
    fn failed_exit_is_not_unavailable() {
        let e = EngineError::Failed {
            program: "gm".into(),
            status: "exit status: 1".into(),
            stderr: "no decode delegate".into(),
        };
        assert!(!e.is_unavailable());
        assert!(e.to_string().contains("no decode delegate"));
    }
}
