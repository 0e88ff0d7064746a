//! Configuration types for PDF flattening.
//!
//! All conversion behaviour is controlled through [`FlattenConfig`], built
//! via its [`FlattenConfigBuilder`]. The config is passed by reference into
//! every stage; nothing in the pipeline keeps engine settings in global
//! state, so two requests with different densities or engines can run side
//! by side in the same process.

use crate::error::FlattenError;
use crate::progress::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Configuration for a flatten request.
///
/// Built via [`FlattenConfig::builder()`] or using
/// [`FlattenConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf_flatten::{FlattenConfig, ImageType};
///
/// let config = FlattenConfig::builder()
///     .image_type(ImageType::Jpg)
///     .density(300)
///     .target_page(2)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct FlattenConfig {
    /// Format of the intermediate page images. Default: [`ImageType::Png`].
    ///
    /// PNG keeps text edges lossless; JPEG produces much smaller output for
    /// scanned or photographic pages.
    pub image_type: ImageType,

    /// Rasterization density in dots per inch. Default: 200.
    ///
    /// Output page size in PDF points equals the image size in pixels, so a
    /// higher density also produces physically larger pages.
    pub density: u32,

    /// Convert only this 1-based page. Default: all pages.
    pub target_page: Option<usize>,

    /// Keep the flattened PDF on disk and return its path instead of bytes.
    /// Default: false.
    pub persist_to_disk: bool,

    /// Directory under which per-request workspaces are created.
    /// Default: the OS temp directory.
    pub base_directory: PathBuf,

    /// Which rasterization engine renders the pages. Default: ImageMagick.
    pub engine: EngineKind,

    /// File-name stem for page images (`<stem>_<page>.<ext>`). Default: `split`.
    pub output_name: String,

    /// Abandon rasterization after this many seconds. Default: no limit.
    pub timeout_secs: Option<u64>,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for FlattenConfig {
    fn default() -> Self {
        Self {
            image_type: ImageType::default(),
            density: 200,
            target_page: None,
            persist_to_disk: false,
            base_directory: std::env::temp_dir(),
            engine: EngineKind::default(),
            output_name: "split".to_string(),
            timeout_secs: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for FlattenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlattenConfig")
            .field("image_type", &self.image_type)
            .field("density", &self.density)
            .field("target_page", &self.target_page)
            .field("persist_to_disk", &self.persist_to_disk)
            .field("base_directory", &self.base_directory)
            .field("engine", &self.engine)
            .field("output_name", &self.output_name)
            .field("timeout_secs", &self.timeout_secs)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn FlattenProgressCallback>"),
            )
            .finish()
    }
}

impl FlattenConfig {
    /// Create a new builder for `FlattenConfig`.
    pub fn builder() -> FlattenConfigBuilder {
        FlattenConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check the constraints [`FlattenConfigBuilder::build`] enforces.
    ///
    /// The fields are public, so the flatten entry points call this again
    /// on whatever config they are handed.
    pub fn validate(&self) -> Result<(), FlattenError> {
        if self.density == 0 {
            return Err(FlattenError::InvalidConfig(
                "Density must be ≥ 1".into(),
            ));
        }
        // The stem is joined onto the split directory; anything that could
        // name another directory would write page images outside it.
        if self.output_name.is_empty()
            || self.output_name.contains(['/', '\\', '\0'])
            || self.output_name == "."
            || self.output_name == ".."
        {
            return Err(FlattenError::InvalidConfig(format!(
                "Output name must be a plain file stem, got {:?}",
                self.output_name
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(FlattenError::InvalidConfig(
                "Timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`FlattenConfig`].
#[derive(Debug)]
pub struct FlattenConfigBuilder {
    config: FlattenConfig,
}

impl FlattenConfigBuilder {
    pub fn image_type(mut self, image_type: ImageType) -> Self {
        self.config.image_type = image_type;
        self
    }

    pub fn density(mut self, dpi: u32) -> Self {
        self.config.density = dpi;
        self
    }

    /// Select a single 1-based page. Range checking happens once the page
    /// count is known, so `0` is accepted here and rejected during rasterization.
    pub fn target_page(mut self, page: usize) -> Self {
        self.config.target_page = Some(page);
        self
    }

    pub fn persist_to_disk(mut self, v: bool) -> Self {
        self.config.persist_to_disk = v;
        self
    }

    pub fn base_directory(mut self, dir: impl AsRef<Path>) -> Self {
        self.config.base_directory = dir.as_ref().to_path_buf();
        self
    }

    pub fn engine(mut self, engine: EngineKind) -> Self {
        self.config.engine = engine;
        self
    }

    pub fn output_name(mut self, name: impl Into<String>) -> Self {
        self.config.output_name = name.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = Some(secs);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<FlattenConfig, FlattenError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Raster format used for intermediate page images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageType {
    /// Lossless PNG (default).
    #[default]
    Png,
    /// JPEG, written at maximum quality.
    #[serde(alias = "jpeg")]
    Jpg,
}

impl ImageType {
    /// File extension written by the rasterizer, without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ImageType::Png => "png",
            ImageType::Jpg => "jpg",
        }
    }

    /// Recognise a file extension (case-insensitive). Accepts `jpeg` as well as `jpg`.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageType::Png),
            "jpg" | "jpeg" => Some(ImageType::Jpg),
            _ => None,
        }
    }

    /// Recognise the extension of `path`.
    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }
}

impl fmt::Display for ImageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

/// Which rasterization engine renders pages.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EngineKind {
    /// ImageMagick 7 (`magick`) as a subprocess, with Ghostscript as its PDF delegate. (default)
    #[default]
    ImageMagick,
    /// ImageMagick 6 (`identify` + `convert`) as subprocesses.
    ImageMagick6,
    /// GraphicsMagick (`gm`) as a subprocess.
    GraphicsMagick,
    /// PDFium loaded in-process through pdfium-render.
    Pdfium {
        /// Directory containing the platform pdfium library. `None` binds the
        /// system library.
        library_path: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = FlattenConfig::default();
        assert_eq!(c.image_type, ImageType::Png);
        assert_eq!(c.density, 200);
        assert_eq!(c.target_page, None);
        assert!(!c.persist_to_disk);
        assert_eq!(c.output_name, "split");
        assert_eq!(c.engine, EngineKind::ImageMagick);
    }

    #[test]
    fn builder_rejects_zero_density() {
        let err = FlattenConfig::builder().density(0).build().unwrap_err();
        assert!(matches!(err, FlattenError::InvalidConfig(_)));
    }

    #[test]
    fn builder_rejects_path_like_output_name() {
        assert!(FlattenConfig::builder().output_name("a/b").build().is_err());
        assert!(FlattenConfig::builder().output_name("").build().is_err());
        assert!(FlattenConfig::builder().output_name("..").build().is_err());
        assert!(FlattenConfig::builder().output_name("page").build().is_ok());
    }

    #[test]
    fn builder_accepts_page_zero_for_later_range_check() {
        let c = FlattenConfig::builder().target_page(0).build().unwrap();
        assert_eq!(c.target_page, Some(0));
    }

    #[test]
    fn validate_catches_struct_literal_configs() {
        let leaky = FlattenConfig {
            output_name: "../../leak".into(),
            ..Default::default()
        };
        assert!(matches!(leaky.validate(), Err(FlattenError::InvalidConfig(_))));

        let zero = FlattenConfig {
            density: 0,
            ..Default::default()
        };
        assert!(matches!(zero.validate(), Err(FlattenError::InvalidConfig(_))));

        assert!(FlattenConfig::default().validate().is_ok());
    }

    #[test]
    fn builder_rejects_zero_timeout() {
        assert!(FlattenConfig::builder().timeout_secs(0).build().is_err());
        assert!(FlattenConfig::builder().timeout_secs(30).build().is_ok());
    }

    #[test]
    fn image_type_extensions() {
        assert_eq!(ImageType::from_extension("PNG"), Some(ImageType::Png));
        assert_eq!(ImageType::from_extension("jpeg"), Some(ImageType::Jpg));
        assert_eq!(ImageType::from_extension("jpg"), Some(ImageType::Jpg));
        assert_eq!(ImageType::from_extension("gif"), None);
        assert_eq!(
            ImageType::from_path(Path::new("/w/split/split_3.jpg")),
            Some(ImageType::Jpg)
        );
        assert_eq!(ImageType::from_path(Path::new("noext")), None);
        assert_eq!(ImageType::Jpg.to_string(), "jpg");
    }
}
