//! # pdf-flatten
//!
//! Flatten PDF documents by rasterizing every page and rebuilding the PDF
//! from the page images.
//!
//! ## Why this crate?
//!
//! Form fields, annotations, layers and selectable text all disappear when a
//! page is turned into pixels. The result looks the same as the input but can
//! no longer be edited, filled in or scraped, which is what you want before
//! archiving a signed form or sending a redacted document out.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF bytes
//!  │
//!  ├─ 1. Workspace  private temp dir, input staged at docs/original.pdf
//!  ├─ 2. Rasterize  page count, then every page concurrently via the engine
//!  ├─ 3. Order      split/<name>_<page>.<ext>, sorted by page index
//!  ├─ 4. Assemble   one full-bleed image per page (lopdf)
//!  └─ 5. Output     bytes in memory, or <workspace>/flattened.pdf on disk
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_flatten::{flatten, FlattenConfig, ImageType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FlattenConfig::builder()
//!         .image_type(ImageType::Jpg)
//!         .density(150)
//!         .build()?;
//!     let input = std::fs::read("signed-form.pdf")?;
//!     let output = flatten(&input, &config).await?;
//!     if let Some(bytes) = output.as_bytes() {
//!         std::fs::write("signed-form.flat.pdf", bytes)?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Engines
//!
//! | Engine | Selected by | Requires |
//! |--------|-------------|----------|
//! | [`MagickEngine`] (ImageMagick) | `EngineKind::ImageMagick` (default) | `magick` + Ghostscript on `PATH` |
//! | [`MagickEngine`] (ImageMagick 6) | `EngineKind::ImageMagick6` | `identify` + `convert` + Ghostscript on `PATH` |
//! | [`MagickEngine`] (GraphicsMagick) | `EngineKind::GraphicsMagick` | `gm` + Ghostscript on `PATH` |
//! | [`PdfiumEngine`] | `EngineKind::Pdfium { .. }` | libpdfium shared library |
//!
//! Any other backend can be plugged in through [`RasterEngine`] and
//! [`flatten_with_engine`].
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdfflatten` binary (clap + anyhow + tracing-subscriber + indicatif) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! pdf-flatten = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod engine;
pub mod error;
pub mod flatten;
pub mod output;
pub mod pipeline;
pub mod progress;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{EngineKind, FlattenConfig, FlattenConfigBuilder, ImageType};
pub use engine::{
    ConfiguredEngine, MagickEngine, MagickFlavor, PdfiumEngine, RasterEngine, RenderRequest,
};
pub use error::{EngineError, FlattenError};
pub use flatten::{
    flatten, flatten_file, flatten_sync, flatten_with_engine, page_count, page_count_with_engine,
};
pub use output::OutputArtifact;
pub use pipeline::rasterize::PageDescriptor;
pub use progress::{FlattenProgressCallback, NoopProgressCallback, ProgressCallback};
