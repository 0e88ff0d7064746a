//! Rasterization engines: the external collaborators that turn one PDF page
//! into one image file.
//!
//! The pipeline needs two things from an engine: the page count of a
//! document, and a single 0-based page rendered at a given density to a
//! given path. Both live behind [`RasterEngine`]. Engine settings
//! travel in each call as a [`RenderRequest`]; engines hold no per-request
//! state and one engine value can serve many requests concurrently.
//!
//! | Engine | Backend | Notes |
//! |--------|---------|-------|
//! | [`MagickEngine`] | `magick`, `convert` / `identify` or `gm` subprocess | Needs Ghostscript for PDF input |
//! | [`PdfiumEngine`] | pdfium-render, in-process | Needs libpdfium at runtime |

pub mod magick;
pub mod pdfium;

pub use magick::{MagickEngine, MagickFlavor};
pub use pdfium::PdfiumEngine;

use crate::config::{EngineKind, ImageType};
use crate::error::EngineError;
use std::future::Future;
use std::path::Path;

/// Quality requested from every engine. Page images are always written at
/// the encoder's maximum quality.
pub const MAX_QUALITY: u8 = 100;

/// Per-page render settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderRequest {
    /// Dots per inch, applied on both axes.
    pub density: u32,
    /// Output encoding; also decides the file extension.
    pub image_type: ImageType,
    /// Encoder quality, 1–100.
    pub quality: u8,
}

impl RenderRequest {
    pub fn new(density: u32, image_type: ImageType) -> Self {
        Self {
            density,
            image_type,
            quality: MAX_QUALITY,
        }
    }
}

/// A backend able to count and rasterize the pages of a PDF.
///
/// Both methods are one-shot: the returned future resolves exactly once,
/// after the underlying process or library call has finished. Dropping the
/// future before it resolves must not leave work running that writes into
/// the caller's directories indefinitely; subprocess engines kill the child.
pub trait RasterEngine: Send + Sync {
    /// Number of pages in the document at `input`.
    fn page_count(&self, input: &Path) -> impl Future<Output = Result<usize, EngineError>> + Send;

    /// Render 0-based page `page_index` of `input` into `output`.
    fn render_page(
        &self,
        input: &Path,
        page_index: usize,
        request: &RenderRequest,
        output: &Path,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// Whether dropping a `render_page` future stops the render.
    ///
    /// When this is `false` the rasterizer waits for every launched page to
    /// settle before reporting a failure, so no render is still writing into
    /// the workspace while it is removed.
    fn cancels_on_drop(&self) -> bool {
        true
    }
}

/// The engine selected by an [`EngineKind`], dispatching to the concrete type.
#[derive(Debug, Clone)]
pub enum ConfiguredEngine {
    Magick(MagickEngine),
    Pdfium(PdfiumEngine),
}

impl From<&EngineKind> for ConfiguredEngine {
    fn from(kind: &EngineKind) -> Self {
        match kind {
            EngineKind::ImageMagick => {
                ConfiguredEngine::Magick(MagickEngine::new(MagickFlavor::ImageMagick))
            }
            EngineKind::ImageMagick6 => {
                ConfiguredEngine::Magick(MagickEngine::new(MagickFlavor::ImageMagick6))
            }
            EngineKind::GraphicsMagick => {
                ConfiguredEngine::Magick(MagickEngine::new(MagickFlavor::GraphicsMagick))
            }
            EngineKind::Pdfium { library_path } => ConfiguredEngine::Pdfium(match library_path {
                Some(dir) => PdfiumEngine::with_library_dir(dir),
                None => PdfiumEngine::new(),
            }),
        }
    }
}

impl RasterEngine for ConfiguredEngine {
    async fn page_count(&self, input: &Path) -> Result<usize, EngineError> {
        match self {
            ConfiguredEngine::Magick(e) => e.page_count(input).await,
            ConfiguredEngine::Pdfium(e) => e.page_count(input).await,
        }
    }

    async fn render_page(
        &self,
        input: &Path,
        page_index: usize,
        request: &RenderRequest,
        output: &Path,
    ) -> Result<(), EngineError> {
        match self {
            ConfiguredEngine::Magick(e) => e.render_page(input, page_index, request, output).await,
            ConfiguredEngine::Pdfium(e) => e.render_page(input, page_index, request, output).await,
        }
    }

    fn cancels_on_drop(&self) -> bool {
        match self {
            ConfiguredEngine::Magick(e) => e.cancels_on_drop(),
            ConfiguredEngine::Pdfium(e) => e.cancels_on_drop(),
        }
    }
}
