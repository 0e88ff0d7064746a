//! Flatten entry points: workspace setup, rasterization, reassembly, teardown.
//!
//! Every request runs in its own [`Workspace`]. The workspace value owns the
//! temp tree, so any `?` below that returns early also removes it; the only
//! path that keeps anything on disk is [`Workspace::persist`], taken after a
//! successful assembly when `persist_to_disk` is set.

use crate::config::FlattenConfig;
use crate::engine::{ConfiguredEngine, RasterEngine};
use crate::error::FlattenError;
use crate::output::OutputArtifact;
use crate::pipeline::assemble::assemble;
use crate::pipeline::rasterize::{discover_pages, rasterize, PageDescriptor, RasterOptions};
use crate::pipeline::workspace::Workspace;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Flatten a PDF held in memory, using the engine named by `config.engine`.
///
/// This is the primary entry point for the library.
///
/// # Returns
/// [`OutputArtifact::Bytes`] by default, or [`OutputArtifact::File`] pointing
/// at `<workspace>/flattened.pdf` when `config.persist_to_disk` is set.
///
/// # Errors
/// Any failure aborts the whole request; no partial document is produced and
/// the workspace is removed before the error is returned.
///
/// # Example
/// ```rust,no_run
/// use pdf_flatten::{flatten, FlattenConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let bytes = std::fs::read("form.pdf")?;
/// let flat = flatten(&bytes, &FlattenConfig::default()).await?;
/// std::fs::write("form-flat.pdf", flat.as_bytes().unwrap())?;
/// # Ok(())
/// # }
/// ```
pub async fn flatten(
    document: &[u8],
    config: &FlattenConfig,
) -> Result<OutputArtifact, FlattenError> {
    let engine = ConfiguredEngine::from(&config.engine);
    flatten_with_engine(&engine, document, config).await
}

/// Flatten a PDF with a caller-supplied [`RasterEngine`].
///
/// `config.engine` is ignored; every other field applies. The config is
/// validated first, so a hand-built struct fails with
/// [`FlattenError::InvalidConfig`] before any workspace is created.
pub async fn flatten_with_engine<E: RasterEngine>(
    engine: &E,
    document: &[u8],
    config: &FlattenConfig,
) -> Result<OutputArtifact, FlattenError> {
    config.validate()?;
    let total_start = Instant::now();
    info!(
        "Starting flatten: {} bytes, {} @ {} dpi",
        document.len(),
        config.image_type,
        config.density
    );

    // ── Step 1: Workspace + staging ──────────────────────────────────────
    let workspace = Workspace::create(&config.base_directory).await?;
    let input = workspace.stage(document).await?;

    // ── Step 2: Rasterize ────────────────────────────────────────────────
    let options = RasterOptions {
        image_type: config.image_type,
        density: config.density,
        target_page: config.target_page,
        output_name: config.output_name.clone(),
    };
    let render_start = Instant::now();
    let split_dir = workspace.split_dir();
    let rasterizing = rasterize(
        engine,
        &input,
        &split_dir,
        &options,
        config.progress_callback.as_ref(),
    );
    let descriptors = match config.timeout_secs {
        Some(secs) => tokio::time::timeout(Duration::from_secs(secs), rasterizing)
            .await
            .map_err(|_| FlattenError::Timeout { secs })??,
        None => rasterizing.await?,
    };
    let render_duration_ms = render_start.elapsed().as_millis() as u64;

    // ── Step 3: Enumerate and order by page index ────────────────────────
    let ordered = ordered_pages(&workspace, &options, &descriptors).await?;

    // ── Step 4: Reassemble ───────────────────────────────────────────────
    let sink = config.persist_to_disk.then(|| workspace.artifact_path());
    let artifact = assemble(&ordered, sink.as_deref()).await?;

    // ── Step 5: Persist or tear down ─────────────────────────────────────
    let artifact = match artifact {
        OutputArtifact::File(_) => OutputArtifact::File(workspace.persist().await?),
        bytes => {
            drop(workspace);
            bytes
        }
    };

    info!(
        "Flatten complete: {} pages, {}ms total ({}ms rasterizing)",
        ordered.len(),
        total_start.elapsed().as_millis(),
        render_duration_ms
    );
    Ok(artifact)
}

/// Flatten a PDF file and write the result to `output_path`.
///
/// Uses atomic write (temp file + rename) to prevent partial files. The
/// flatten itself always runs in memory, whatever `persist_to_disk` says.
///
/// # Returns
/// The size of the written PDF in bytes.
pub async fn flatten_file(
    input_path: impl AsRef<Path>,
    output_path: impl AsRef<Path>,
    config: &FlattenConfig,
) -> Result<u64, FlattenError> {
    let input_path = input_path.as_ref();
    let path = output_path.as_ref();

    let document =
        tokio::fs::read(input_path)
            .await
            .map_err(|e| FlattenError::UnreadableDocument {
                path: input_path.to_path_buf(),
                detail: e.to_string(),
            })?;

    let mut in_memory = config.clone();
    in_memory.persist_to_disk = false;
    let bytes = flatten(&document, &in_memory)
        .await?
        .into_bytes()
        .ok_or_else(|| FlattenError::Internal("in-memory flatten returned a path".into()))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| FlattenError::OutputWriteFailed {
                path: path.to_path_buf(),
                source: e,
            })?;
    }

    let tmp_path = path.with_extension("pdf.tmp");
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| FlattenError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| FlattenError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        })?;

    Ok(bytes.len() as u64)
}

/// Synchronous wrapper around [`flatten`].
///
/// Creates a temporary tokio runtime internally.
pub fn flatten_sync(
    document: &[u8],
    config: &FlattenConfig,
) -> Result<OutputArtifact, FlattenError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| FlattenError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(flatten(document, config))
}

/// Report how many pages the document has, without rasterizing anything.
///
/// Runs the configured engine's page-count query against a staged copy in
/// a throwaway workspace. `config.target_page` is validated as well, so a
/// selector that `flatten` would reject fails here too.
pub async fn page_count(document: &[u8], config: &FlattenConfig) -> Result<usize, FlattenError> {
    let engine = ConfiguredEngine::from(&config.engine);
    page_count_with_engine(&engine, document, config).await
}

/// [`page_count`] with a caller-supplied [`RasterEngine`].
pub async fn page_count_with_engine<E: RasterEngine>(
    engine: &E,
    document: &[u8],
    config: &FlattenConfig,
) -> Result<usize, FlattenError> {
    config.validate()?;
    let workspace = Workspace::create(&config.base_directory).await?;
    let input = workspace.stage(document).await?;

    let total = discover_pages(engine, &input, None).await?.len();
    match config.target_page {
        Some(page) if page == 0 || page > total => {
            Err(FlattenError::InvalidPageSelector { page, total })
        }
        _ => Ok(total),
    }
}

// ── Internal helpers ─────────────────────────────────────────────────────

/// Image paths from the split directory, in page order, checked against
/// what the rasterizer reported.
async fn ordered_pages(
    workspace: &Workspace,
    options: &RasterOptions,
    descriptors: &BTreeMap<usize, PageDescriptor>,
) -> Result<Vec<PathBuf>, FlattenError> {
    let found = workspace
        .enumerate_split(&options.output_name, options.image_type)
        .await?;

    let expected: Vec<usize> = descriptors.keys().copied().collect();
    let found_pages: Vec<usize> = found.iter().map(|(page, _)| *page).collect();
    if expected != found_pages {
        return Err(FlattenError::PageSetMismatch {
            expected,
            found: found_pages,
        });
    }

    debug!("Assembling pages {:?}", found_pages);
    Ok(found.into_iter().map(|(_, path)| path).collect())
}
