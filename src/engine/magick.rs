//! Subprocess engine driving ImageMagick or GraphicsMagick.
//!
//! All three dialects delegate PDF decoding to Ghostscript and share the same
//! command-line vocabulary for what we need:
//!
//! ```text
//! identify -format "%p " <input>                       page count
//! -density DxD <input>[i] -quality 100 <output>        render page i (0-based)
//! ```
//!
//! | Flavor | Page count | Render |
//! |--------|------------|--------|
//! | ImageMagick 7 | `magick identify …` | `magick -density …` |
//! | ImageMagick 6 | `identify …` | `convert -density …` |
//! | GraphicsMagick | `gm identify …` | `gm convert -density …` |
//!
//! Children are spawned with `kill_on_drop`, so abandoning a request (first
//! page failure, timeout) kills the `magick` / `convert` / `gm` process.
//! Ghostscript runs as a grandchild of that process and is not killed with
//! it; a `gs` render that was already running can outlive the request until
//! it finishes on its own.

use super::{RasterEngine, RenderRequest};
use crate::error::EngineError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Which command-line dialect to speak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MagickFlavor {
    /// ImageMagick 7, invoked as `magick`. (default)
    #[default]
    ImageMagick,
    /// ImageMagick 6, with separate `identify` and `convert` binaries.
    ImageMagick6,
    /// GraphicsMagick, invoked as `gm`.
    GraphicsMagick,
}

impl MagickFlavor {
    /// Program used for rendering when no explicit binary is set.
    pub fn default_program(self) -> &'static str {
        match self {
            MagickFlavor::ImageMagick => "magick",
            MagickFlavor::ImageMagick6 => "convert",
            MagickFlavor::GraphicsMagick => "gm",
        }
    }

    /// Program used for the page-count query when no explicit binary is set.
    pub fn default_identify_program(self) -> &'static str {
        match self {
            MagickFlavor::ImageMagick6 => "identify",
            other => other.default_program(),
        }
    }

    /// Sub-command placed before the arguments, for multi-call binaries.
    fn subcommand(self, identify: bool) -> Option<&'static str> {
        match (self, identify) {
            (MagickFlavor::ImageMagick6, _) => None,
            (_, true) => Some("identify"),
            (MagickFlavor::GraphicsMagick, false) => Some("convert"),
            (MagickFlavor::ImageMagick, false) => None,
        }
    }
}

/// ImageMagick / GraphicsMagick subprocess engine.
#[derive(Debug, Clone)]
pub struct MagickEngine {
    flavor: MagickFlavor,
    program: PathBuf,
    identify_program: PathBuf,
}

impl Default for MagickEngine {
    fn default() -> Self {
        Self::new(MagickFlavor::default())
    }
}

impl MagickEngine {
    pub fn new(flavor: MagickFlavor) -> Self {
        Self {
            flavor,
            program: PathBuf::from(flavor.default_program()),
            identify_program: PathBuf::from(flavor.default_identify_program()),
        }
    }

    /// Use a specific binary instead of looking up the default name on `PATH`.
    ///
    /// For ImageMagick 6 this is the `convert` binary; see
    /// [`Self::with_identify_program`]. The other flavors use one binary for
    /// both operations.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        if self.flavor != MagickFlavor::ImageMagick6 {
            self.identify_program = self.program.clone();
        }
        self
    }

    /// Use a specific `identify` binary (ImageMagick 6).
    pub fn with_identify_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.identify_program = program.into();
        self
    }

    pub fn flavor(&self) -> MagickFlavor {
        self.flavor
    }

    fn identify_args(&self, input: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(4);
        if let Some(sub) = self.flavor.subcommand(true) {
            args.push(sub.into());
        }
        args.push("-format".into());
        args.push("%p ".into());
        args.push(input.as_os_str().to_os_string());
        args
    }

    fn render_args(
        &self,
        input: &Path,
        page_index: usize,
        request: &RenderRequest,
        output: &Path,
    ) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::with_capacity(8);
        if let Some(sub) = self.flavor.subcommand(false) {
            args.push(sub.into());
        }
        args.push("-density".into());
        args.push(format!("{0}x{0}", request.density).into());
        args.push(page_selector(input, page_index));
        args.push("-quality".into());
        args.push(request.quality.to_string().into());
        args.push(output.as_os_str().to_os_string());
        args
    }

    /// Run `program` to completion, returning stdout on a zero exit.
    async fn run(&self, program: &Path, args: &[OsString]) -> Result<Vec<u8>, EngineError> {
        let name = program.display().to_string();
        debug!("Running {} {:?}", name, args);

        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| EngineError::Spawn {
                program: name.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(EngineError::Failed {
                program: name,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output.stdout)
    }
}

impl RasterEngine for MagickEngine {
    async fn page_count(&self, input: &Path) -> Result<usize, EngineError> {
        let stdout = self
            .run(&self.identify_program, &self.identify_args(input))
            .await?;
        let count = page_count_from_identify(&String::from_utf8_lossy(&stdout))?;
        debug!("identify reported {} pages for {}", count, input.display());
        Ok(count)
    }

    async fn render_page(
        &self,
        input: &Path,
        page_index: usize,
        request: &RenderRequest,
        output: &Path,
    ) -> Result<(), EngineError> {
        self.run(&self.program, &self.render_args(input, page_index, request, output))
            .await
            .map(|_| ())
    }
}

static RE_PAGE_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").unwrap());

/// `identify -format "%p "` prints one number per page; count them.
fn parse_page_count(stdout: &str) -> usize {
    RE_PAGE_TOKEN.find_iter(stdout).count()
}

/// Page count from a successful `identify` run. A zero exit with no page
/// numbers means the tool printed something other than the requested format.
fn page_count_from_identify(stdout: &str) -> Result<usize, EngineError> {
    match parse_page_count(stdout) {
        0 => Err(EngineError::UnexpectedOutput(format!(
            "identify printed no page numbers: {:?}",
            stdout.trim()
        ))),
        n => Ok(n),
    }
}

/// `<input>[<index>]`, the page-addressing syntax every dialect understands.
fn page_selector(input: &Path, page_index: usize) -> OsString {
    let mut s = OsStr::new(input).to_os_string();
    s.push(format!("[{page_index}]"));
    s
}
