//! Page rasterization: discover the page count, then render every selected
//! page concurrently through a [`RasterEngine`] and validate each file.
//!
//! ## Concurrency policy
//!
//! All pages are launched at once with no throttling; the engine decides how
//! much real parallelism it has (one process per page for subprocess
//! engines). What happens on the first failure depends on
//! [`RasterEngine::cancels_on_drop`]:
//!
//! - **Fail fast** (subprocess engines): [`futures::future::try_join_all`]
//!   resolves on the first failing page and drops the rest, which kills
//!   their children.
//! - **Settle, then report** (PDFium): a render handed to `spawn_blocking`
//!   cannot be stopped, so every launched page is awaited with
//!   [`futures::future::join_all`] and the failure of the lowest page is
//!   returned. Nothing is still writing into the split directory when the
//!   caller tears the workspace down.
//!
//! Pages finish in any order. Results are keyed by page index and callers
//! order them by that key, never by completion order or file timestamps.

use crate::config::ImageType;
use crate::engine::{RasterEngine, RenderRequest};
use crate::error::{EngineError, FlattenError};
use crate::pipeline::workspace::page_file_name;
use crate::progress::ProgressCallback;
use futures::future::{join_all, try_join_all};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One rendered page image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// 1-based page number in the source document.
    pub page: usize,
    /// Image file written by the engine.
    pub path: PathBuf,
    /// Size of the image file in bytes (always > 0).
    pub size_bytes: u64,
    /// Encoding of the image file.
    pub image_type: ImageType,
}

/// Rasterization settings for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterOptions {
    pub image_type: ImageType,
    pub density: u32,
    /// Single 1-based page to render; `None` renders every page.
    pub target_page: Option<usize>,
    /// File-name stem for page images.
    pub output_name: String,
}

impl RasterOptions {
    fn request(&self) -> RenderRequest {
        RenderRequest::new(self.density, self.image_type)
    }
}

/// Determine which 1-based pages to render.
///
/// Fails with [`FlattenError::UnreadableDocument`] when the engine cannot open
/// the document or reports zero pages, and with
/// [`FlattenError::InvalidPageSelector`] when `target_page` is not in `1..=N`.
pub async fn discover_pages<E: RasterEngine>(
    engine: &E,
    input: &Path,
    target_page: Option<usize>,
) -> Result<Vec<usize>, FlattenError> {
    let total = engine
        .page_count(input)
        .await
        .map_err(|e| engine_to_unreadable(input, e))?;

    if total == 0 {
        return Err(FlattenError::UnreadableDocument {
            path: input.to_path_buf(),
            detail: "engine reported no pages".into(),
        });
    }
    info!("Document has {} pages", total);

    match target_page {
        Some(page) if page >= 1 && page <= total => Ok(vec![page]),
        Some(page) => Err(FlattenError::InvalidPageSelector { page, total }),
        None => Ok((1..=total).collect()),
    }
}

/// Render one 1-based page to `<output_dir>/<name>_<page>.<ext>` and validate it.
pub async fn convert_page<E: RasterEngine>(
    engine: &E,
    input: &Path,
    page: usize,
    output_dir: &Path,
    options: &RasterOptions,
) -> Result<PageDescriptor, FlattenError> {
    let path = output_dir.join(page_file_name(&options.output_name, page, options.image_type));
    let request = options.request();

    engine
        .render_page(input, page - 1, &request, &path)
        .await
        .map_err(|e| {
            if e.is_unavailable() {
                FlattenError::EngineUnavailable(e.to_string())
            } else {
                FlattenError::WriteFailure {
                    page,
                    path: path.clone(),
                    detail: e.to_string(),
                }
            }
        })?;

    let metadata = match tokio::fs::metadata(&path).await {
        Ok(m) => m,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(FlattenError::WriteFailure {
                page,
                path,
                detail: "engine reported success but wrote no file".into(),
            });
        }
        Err(e) => {
            return Err(FlattenError::WriteFailure {
                page,
                path,
                detail: format!("cannot stat output: {e}"),
            });
        }
    };

    if metadata.len() == 0 {
        return Err(FlattenError::EmptyOutput { page, path });
    }

    debug!("Page {} → {} ({} bytes)", page, path.display(), metadata.len());
    Ok(PageDescriptor {
        page,
        path,
        size_bytes: metadata.len(),
        image_type: options.image_type,
    })
}

/// Rasterize the selected pages of `input` into `output_dir`.
///
/// Resolves once every page has rendered, or with a page failure as
/// described in the module docs.
/// The returned map is keyed by 1-based page index and holds exactly one
/// descriptor per selected page.
pub async fn rasterize<E: RasterEngine>(
    engine: &E,
    input: &Path,
    output_dir: &Path,
    options: &RasterOptions,
    progress: Option<&ProgressCallback>,
) -> Result<BTreeMap<usize, PageDescriptor>, FlattenError> {
    // create_dir_all treats an existing directory as success.
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| FlattenError::workspace(output_dir, e))?;

    let pages = discover_pages(engine, input, options.target_page).await?;
    let total = pages.len();
    if let Some(cb) = progress {
        cb.on_flatten_start(total);
    }

    let conversions = pages.iter().map(|&page| async move {
        if let Some(cb) = progress {
            cb.on_page_start(page, total);
        }
        let result = convert_page(engine, input, page, output_dir, options).await;
        if let Some(cb) = progress {
            match &result {
                Ok(d) => cb.on_page_complete(page, total, d.size_bytes),
                Err(e) => cb.on_page_error(page, total, &e.to_string()),
            }
        }
        result
    });

    let descriptors = if engine.cancels_on_drop() {
        try_join_all(conversions).await?
    } else {
        // Results are in page order, so `collect` keeps the lowest page's error.
        join_all(conversions)
            .await
            .into_iter()
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut by_page = BTreeMap::new();
    for d in descriptors {
        if by_page.insert(d.page, d).is_some() {
            return Err(FlattenError::Internal("duplicate page descriptor".into()));
        }
    }

    if let Some(cb) = progress {
        cb.on_flatten_complete(total);
    }
    info!("Rasterized {} pages into {}", by_page.len(), output_dir.display());
    Ok(by_page)
}

fn engine_to_unreadable(input: &Path, e: EngineError) -> FlattenError {
    if e.is_unavailable() {
        FlattenError::EngineUnavailable(e.to_string())
    } else {
        FlattenError::UnreadableDocument {
            path: input.to_path_buf(),
            detail: e.to_string(),
        }
    }
}
