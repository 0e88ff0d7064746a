//! In-process engine built on pdfium-render.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a synchronous C++ library with internal global state. Every call
//! runs inside `tokio::task::spawn_blocking` so rendering never stalls the
//! runtime's worker threads. With the `thread_safe` feature pdfium-render
//! serialises access to the library, so concurrent page renders queue up
//! behind each other rather than racing.
//!
//! ## Cancellation
//!
//! A blocking render cannot be stopped once pdfium is inside it, so the
//! engine reports [`RasterEngine::cancels_on_drop`] as `false` and the
//! rasterizer waits for every launched page before surfacing a failure.
//! When the caller gives up anyway (request timeout), dropping the render
//! future raises an abandon flag; the blocking task checks it after pdfium
//! returns and skips writing the image instead of creating files in a
//! workspace that is being removed.

use super::{RasterEngine, RenderRequest};
use crate::config::ImageType;
use crate::error::EngineError;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat};
use pdfium_render::prelude::*;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// PDF user space unit: 72 points per inch.
const POINTS_PER_INCH: f32 = 72.0;

/// pdfium-render engine.
#[derive(Debug, Clone, Default)]
pub struct PdfiumEngine {
    library_path: Option<PathBuf>,
}

impl PdfiumEngine {
    /// Bind the system-wide pdfium library.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the platform pdfium library found in `dir`.
    pub fn with_library_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            library_path: Some(dir.into()),
        }
    }

    fn bind(library_path: Option<&Path>) -> Result<Pdfium, EngineError> {
        let bindings = match library_path {
            Some(dir) => {
                Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            }
            None => Pdfium::bind_to_system_library(),
        }
        .map_err(|e| EngineError::Unavailable(format!("{:?}", e)))?;
        Ok(Pdfium::new(bindings))
    }
}

impl RasterEngine for PdfiumEngine {
    async fn page_count(&self, input: &Path) -> Result<usize, EngineError> {
        let library = self.library_path.clone();
        let path = input.to_path_buf();

        tokio::task::spawn_blocking(move || page_count_blocking(library.as_deref(), &path))
            .await
            .map_err(|e| EngineError::TaskPanicked(e.to_string()))?
    }

    async fn render_page(
        &self,
        input: &Path,
        page_index: usize,
        request: &RenderRequest,
        output: &Path,
    ) -> Result<(), EngineError> {
        let library = self.library_path.clone();
        let path = input.to_path_buf();
        let out = output.to_path_buf();
        let request = *request;
        let guard = AbandonOnDrop::new();
        let abandoned = guard.flag();

        let result = tokio::task::spawn_blocking(move || {
            render_page_blocking(library.as_deref(), &path, page_index, &request, &out, &abandoned)
        })
        .await
        .map_err(|e| EngineError::TaskPanicked(e.to_string()))?;
        guard.disarm();
        result
    }

    fn cancels_on_drop(&self) -> bool {
        false
    }
}

/// Raises a shared flag if the render future is dropped before it resolves.
struct AbandonOnDrop {
    flag: Arc<AtomicBool>,
    armed: bool,
}

impl AbandonOnDrop {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            armed: true,
        }
    }

    fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.flag)
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.flag.store(true, Ordering::SeqCst);
        }
    }
}

/// Blocking implementation of the page-count query.
fn page_count_blocking(library: Option<&Path>, pdf_path: &Path) -> Result<usize, EngineError> {
    let pdfium = PdfiumEngine::bind(library)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| EngineError::Pdfium(format!("{:?}", e)))?;
    Ok(document.pages().len() as usize)
}

/// Blocking implementation of single-page rendering.
fn render_page_blocking(
    library: Option<&Path>,
    pdf_path: &Path,
    page_index: usize,
    request: &RenderRequest,
    output: &Path,
    abandoned: &AtomicBool,
) -> Result<(), EngineError> {
    let pdfium = PdfiumEngine::bind(library)?;
    let document = pdfium
        .load_pdf_from_file(pdf_path, None)
        .map_err(|e| EngineError::Pdfium(format!("{:?}", e)))?;

    let page = document
        .pages()
        .get(page_index as u16)
        .map_err(|e| EngineError::Pdfium(format!("page {}: {:?}", page_index, e)))?;

    let (width, height) = target_size(page.width().value, page.height().value, request.density);
    let render_config = PdfRenderConfig::new()
        .set_target_width(width)
        .set_target_height(height);

    let bitmap = page
        .render_with_config(&render_config)
        .map_err(|e| EngineError::Pdfium(format!("page {}: {:?}", page_index, e)))?;

    let image = bitmap.as_image();
    debug!(
        "Rendered page index {} → {}x{} px",
        page_index,
        image.width(),
        image.height()
    );

    if abandoned.load(Ordering::SeqCst) {
        return Err(EngineError::Abandoned);
    }
    write_image(&image, request, output)
}

/// Pixel size of a page of `width_pt` × `height_pt` points at `density` DPI.
fn target_size(width_pt: f32, height_pt: f32, density: u32) -> (i32, i32) {
    let scale = density as f32 / POINTS_PER_INCH;
    let w = (width_pt * scale).round().max(1.0) as i32;
    let h = (height_pt * scale).round().max(1.0) as i32;
    (w, h)
}

fn write_image(image: &DynamicImage, request: &RenderRequest, output: &Path) -> Result<(), EngineError> {
    let encode_err = |detail: String| EngineError::Encode {
        path: output.to_path_buf(),
        detail,
    };

    match request.image_type {
        ImageType::Png => image
            .save_with_format(output, ImageFormat::Png)
            .map_err(|e| encode_err(e.to_string())),
        ImageType::Jpg => {
            let file = File::create(output).map_err(|e| encode_err(e.to_string()))?;
            let mut writer = BufWriter::new(file);
            // JPEG has no alpha channel; pdfium bitmaps are RGBA.
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(&mut writer, request.quality)
                .encode_image(&rgb)
                .map_err(|e| encode_err(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn letter_page_at_200_dpi() {
        // 8.5in × 11in
        assert_eq!(target_size(612.0, 792.0, 200), (1700, 2200));
    }

    #[test]
    fn tiny_page_never_collapses_to_zero() {
        assert_eq!(target_size(0.1, 0.1, 72), (1, 1));
    }

    #[test]
    fn dropped_guard_raises_abandon_flag() {
        let guard = AbandonOnDrop::new();
        let flag = guard.flag();
        drop(guard);
        assert!(flag.load(Ordering::SeqCst));

        let guard = AbandonOnDrop::new();
        let flag = guard.flag();
        guard.disarm();
        assert!(!flag.load(Ordering::SeqCst));
    }

    #[test]
    fn writes_png_and_jpeg() {
        let dir = tempfile::tempdir().unwrap();
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(8, 6, Rgba([10, 20, 30, 255])));

        let png = dir.path().join("p_1.png");
        write_image(&img, &RenderRequest::new(72, ImageType::Png), &png).unwrap();
        let decoded = image::open(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));

        let jpg = dir.path().join("p_1.jpg");
        write_image(&img, &RenderRequest::new(72, ImageType::Jpg), &jpg).unwrap();
        assert!(std::fs::metadata(&jpg).unwrap().len() > 0);
        let decoded = image::open(&jpg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (8, 6));
    }
}
