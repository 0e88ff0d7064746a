//! Integration tests for the flatten pipeline.
//!
//! These run against a scripted in-process engine, so no ImageMagick,
//! Ghostscript or PDFium installation is needed. The "document" handed to
//! the engine only has to carry the `%PDF` magic and a `pages=N` marker.

use pdf_flatten::{
    flatten_file, flatten_with_engine, page_count_with_engine, EngineError, FlattenConfig,
    FlattenError, FlattenProgressCallback, ImageType, NoopProgressCallback, OutputArtifact,
    RasterEngine, RenderRequest,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Scripted engine ──────────────────────────────────────────────────────────

/// Reads `pages=N` from the staged input and writes an RGB image per page
/// whose size encodes the page number. Later pages finish first.
#[derive(Default)]
struct ScriptedEngine {
    /// Sleep this long inside every render.
    stall: Option<Duration>,
    /// Also drop an unrequested `split_99.png` next to page 1.
    write_stray: bool,
    renders: AtomicUsize,
}

fn page_size(page: usize) -> (u32, u32) {
    (40 + page as u32, 20 + 2 * page as u32)
}

fn fake_pdf(pages: usize) -> Vec<u8> {
    format!("%PDF-1.7\n% pages={pages}\n%%EOF\n").into_bytes()
}

impl RasterEngine for ScriptedEngine {
    async fn page_count(&self, input: &Path) -> Result<usize, EngineError> {
        let text = tokio::fs::read_to_string(input)
            .await
            .map_err(|e| EngineError::Spawn {
                program: "scripted".into(),
                source: e,
            })?;
        text.split_once("pages=")
            .and_then(|(_, rest)| rest.split_whitespace().next())
            .and_then(|n| n.parse().ok())
            .ok_or_else(|| EngineError::UnexpectedOutput("no pages marker".into()))
    }

    async fn render_page(
        &self,
        _input: &Path,
        page_index: usize,
        request: &RenderRequest,
        output: &Path,
    ) -> Result<(), EngineError> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let delay = 5 * (10usize.saturating_sub(page_index)) as u64;
        tokio::time::sleep(Duration::from_millis(delay)).await;
        if let Some(stall) = self.stall {
            tokio::time::sleep(stall).await;
        }

        let page = page_index + 1;
        let (w, h) = page_size(page);
        let img = image::RgbImage::from_pixel(w, h, image::Rgb([page as u8 * 20, 80, 160]));
        let format = match request.image_type {
            ImageType::Png => image::ImageFormat::Png,
            ImageType::Jpg => image::ImageFormat::Jpeg,
        };
        img.save_with_format(output, format).unwrap();

        if self.write_stray && page == 1 {
            let stray = output.with_file_name("split_99.png");
            img.save_with_format(stray, image::ImageFormat::Png).unwrap();
        }
        Ok(())
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

/// Route library logs to the test harness; `RUST_LOG=debug` shows per-page events.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config_in(base: &Path) -> FlattenConfig {
    init_tracing();
    FlattenConfig::builder()
        .base_directory(base)
        .build()
        .unwrap()
}

fn entries(dir: &Path) -> Vec<PathBuf> {
    let mut v: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .collect();
    v.sort();
    v
}

/// `(MediaBox width, MediaBox height)` of every page, in page-tree order.
fn page_boxes(pdf: &[u8]) -> Vec<(i64, i64)> {
    let doc = lopdf::Document::load_mem(pdf).unwrap();
    doc.get_pages()
        .values()
        .map(|&id| {
            let page = doc.get_object(id).unwrap().as_dict().unwrap();
            let media = page.get(b"MediaBox").unwrap().as_array().unwrap();
            (media[2].as_i64().unwrap(), media[3].as_i64().unwrap())
        })
        .collect()
}

fn expect_bytes(artifact: OutputArtifact) -> Vec<u8> {
    match artifact {
        OutputArtifact::Bytes(b) => b,
        OutputArtifact::File(p) => panic!("expected bytes, got file {}", p.display()),
    }
}

// ── Ordering and page selection ──────────────────────────────────────────────

#[tokio::test]
async fn all_pages_in_order_with_image_sizes() {
    let base = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::default();

    let out = flatten_with_engine(&engine, &fake_pdf(4), &config_in(base.path()))
        .await
        .unwrap();

    let boxes = page_boxes(&expect_bytes(out));
    let expected: Vec<(i64, i64)> = (1..=4)
        .map(|p| {
            let (w, h) = page_size(p);
            (i64::from(w), i64::from(h))
        })
        .collect();
    assert_eq!(boxes, expected);
    assert_eq!(engine.renders.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn jpeg_pages_are_assembled() {
    let base = tempfile::tempdir().unwrap();
    let config = FlattenConfig::builder()
        .base_directory(base.path())
        .image_type(ImageType::Jpg)
        .build()
        .unwrap();

    let out = flatten_with_engine(&ScriptedEngine::default(), &fake_pdf(2), &config)
        .await
        .unwrap();
    assert_eq!(page_boxes(&expect_bytes(out)).len(), 2);
}

#[tokio::test]
async fn target_page_yields_single_page() {
    let base = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::default();
    let config = FlattenConfig::builder()
        .base_directory(base.path())
        .target_page(3)
        .build()
        .unwrap();

    let out = flatten_with_engine(&engine, &fake_pdf(5), &config)
        .await
        .unwrap();

    let (w, h) = page_size(3);
    assert_eq!(page_boxes(&expect_bytes(out)), vec![(i64::from(w), i64::from(h))]);
    assert_eq!(engine.renders.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn out_of_range_page_is_rejected() {
    let base = tempfile::tempdir().unwrap();
    for bad in [0, 4] {
        let config = FlattenConfig::builder()
            .base_directory(base.path())
            .target_page(bad)
            .build()
            .unwrap();
        let err = flatten_with_engine(&ScriptedEngine::default(), &fake_pdf(3), &config)
            .await
            .unwrap_err();
        assert!(
            matches!(err, FlattenError::InvalidPageSelector { page, total: 3 } if page == bad),
            "got: {err}"
        );
    }
    assert!(entries(base.path()).is_empty());
}

// ── Workspace lifecycle ──────────────────────────────────────────────────────

#[tokio::test]
async fn base_directory_is_empty_after_success() {
    let base = tempfile::tempdir().unwrap();
    flatten_with_engine(&ScriptedEngine::default(), &fake_pdf(2), &config_in(base.path()))
        .await
        .unwrap();
    assert!(entries(base.path()).is_empty());
}

#[tokio::test]
async fn non_pdf_input_is_unreadable_and_cleaned_up() {
    let base = tempfile::tempdir().unwrap();
    let err = flatten_with_engine(
        &ScriptedEngine::default(),
        b"just some text",
        &config_in(base.path()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FlattenError::UnreadableDocument { .. }), "got: {err}");
    assert!(entries(base.path()).is_empty());
}

#[tokio::test]
async fn hand_built_config_is_validated() {
    let base = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::default();

    let escaping = FlattenConfig {
        base_directory: base.path().to_path_buf(),
        output_name: "../../leak".into(),
        ..Default::default()
    };
    let err = flatten_with_engine(&engine, &fake_pdf(2), &escaping)
        .await
        .unwrap_err();
    assert!(matches!(err, FlattenError::InvalidConfig(_)), "got: {err}");

    let zero_density = FlattenConfig {
        base_directory: base.path().to_path_buf(),
        density: 0,
        ..Default::default()
    };
    let err = flatten_with_engine(&engine, &fake_pdf(2), &zero_density)
        .await
        .unwrap_err();
    assert!(matches!(err, FlattenError::InvalidConfig(_)), "got: {err}");

    let err = page_count_with_engine(&engine, &fake_pdf(2), &escaping)
        .await
        .unwrap_err();
    assert!(matches!(err, FlattenError::InvalidConfig(_)), "got: {err}");

    assert_eq!(engine.renders.load(Ordering::SeqCst), 0);
    assert!(entries(base.path()).is_empty());
}

#[tokio::test]
async fn missing_base_directory_is_created() {
    let base = tempfile::tempdir().unwrap();
    let nested = base.path().join("a/b");
    flatten_with_engine(&ScriptedEngine::default(), &fake_pdf(1), &config_in(&nested))
        .await
        .unwrap();
    assert!(nested.is_dir());
    assert!(entries(&nested).is_empty());
}

#[tokio::test]
async fn persisted_workspace_holds_only_the_artifact() {
    let base = tempfile::tempdir().unwrap();
    let config = FlattenConfig::builder()
        .base_directory(base.path())
        .persist_to_disk(true)
        .build()
        .unwrap();

    let out = flatten_with_engine(&ScriptedEngine::default(), &fake_pdf(3), &config)
        .await
        .unwrap();
    let path = out.as_path().expect("persisted output is a path").to_path_buf();

    assert_eq!(path.file_name().unwrap(), "flattened.pdf");
    let workspace = path.parent().unwrap();
    assert_eq!(entries(base.path()), vec![workspace.to_path_buf()]);
    assert_eq!(entries(workspace), vec![path.clone()]);
    assert_eq!(page_boxes(&std::fs::read(&path).unwrap()).len(), 3);
}

#[tokio::test]
async fn persisted_failure_leaves_nothing() {
    let base = tempfile::tempdir().unwrap();
    let config = FlattenConfig::builder()
        .base_directory(base.path())
        .persist_to_disk(true)
        .target_page(9)
        .build()
        .unwrap();

    assert!(flatten_with_engine(&ScriptedEngine::default(), &fake_pdf(2), &config)
        .await
        .is_err());
    assert!(entries(base.path()).is_empty());
}

#[tokio::test]
async fn stray_page_image_is_a_mismatch() {
    let base = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine {
        write_stray: true,
        ..Default::default()
    };
    let err = flatten_with_engine(&engine, &fake_pdf(2), &config_in(base.path()))
        .await
        .unwrap_err();
    match err {
        FlattenError::PageSetMismatch { expected, found } => {
            assert_eq!(expected, vec![1, 2]);
            assert_eq!(found, vec![1, 2, 99]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(entries(base.path()).is_empty());
}

#[tokio::test]
async fn timeout_abandons_and_cleans_up() {
    let base = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine {
        stall: Some(Duration::from_secs(30)),
        ..Default::default()
    };
    let config = FlattenConfig::builder()
        .base_directory(base.path())
        .timeout_secs(1)
        .build()
        .unwrap();

    let err = flatten_with_engine(&engine, &fake_pdf(2), &config)
        .await
        .unwrap_err();
    assert!(matches!(err, FlattenError::Timeout { secs: 1 }), "got: {err}");
    assert!(entries(base.path()).is_empty());
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_are_isolated() {
    let base = tempfile::tempdir().unwrap();
    let mut handles = Vec::new();
    for pages in 1..=6 {
        let config = config_in(base.path());
        handles.push(tokio::spawn(async move {
            let out = flatten_with_engine(&ScriptedEngine::default(), &fake_pdf(pages), &config)
                .await
                .unwrap();
            (pages, page_boxes(&expect_bytes(out)))
        }));
    }

    for handle in handles {
        let (pages, boxes) = handle.await.unwrap();
        assert_eq!(boxes.len(), pages);
        let (w, h) = page_size(pages);
        assert_eq!(boxes.last(), Some(&(i64::from(w), i64::from(h))));
    }
    assert!(entries(base.path()).is_empty());
}

// ── Progress events ──────────────────────────────────────────────────────────

#[derive(Default)]
struct RecordingCallback {
    events: Mutex<Vec<String>>,
}

impl FlattenProgressCallback for RecordingCallback {
    fn on_flatten_start(&self, total_pages: usize) {
        self.events.lock().unwrap().push(format!("start {total_pages}"));
    }
    fn on_page_complete(&self, page: usize, _total: usize, size_bytes: u64) {
        assert!(size_bytes > 0);
        self.events.lock().unwrap().push(format!("page {page}"));
    }
    fn on_flatten_complete(&self, total_pages: usize) {
        self.events.lock().unwrap().push(format!("done {total_pages}"));
    }
}

#[tokio::test]
async fn progress_callback_sees_every_page() {
    let base = tempfile::tempdir().unwrap();
    let cb = Arc::new(RecordingCallback::default());
    let config = FlattenConfig::builder()
        .base_directory(base.path())
        .progress_callback(cb.clone())
        .build()
        .unwrap();

    flatten_with_engine(&ScriptedEngine::default(), &fake_pdf(3), &config)
        .await
        .unwrap();

    let events = cb.events.lock().unwrap().clone();
    assert_eq!(events.first().map(String::as_str), Some("start 3"));
    assert_eq!(events.last().map(String::as_str), Some("done 3"));
    let mut pages: Vec<&String> = events.iter().filter(|e| e.starts_with("page")).collect();
    pages.sort();
    assert_eq!(pages, vec!["page 1", "page 2", "page 3"]);
}

#[tokio::test]
async fn noop_callback_can_be_configured() {
    let base = tempfile::tempdir().unwrap();
    let config = FlattenConfig::builder()
        .base_directory(base.path())
        .progress_callback(Arc::new(NoopProgressCallback))
        .build()
        .unwrap();

    let out = flatten_with_engine(&ScriptedEngine::default(), &fake_pdf(2), &config)
        .await
        .unwrap();
    assert_eq!(page_boxes(&expect_bytes(out)).len(), 2);
}

// ── Page count and file entry points ─────────────────────────────────────────

#[tokio::test]
async fn page_count_reports_total() {
    let base = tempfile::tempdir().unwrap();
    let engine = ScriptedEngine::default();
    let n = page_count_with_engine(&engine, &fake_pdf(7), &config_in(base.path()))
        .await
        .unwrap();
    assert_eq!(n, 7);
    assert_eq!(engine.renders.load(Ordering::SeqCst), 0);
    assert!(entries(base.path()).is_empty());
}

#[tokio::test]
async fn flatten_file_missing_input_is_unreadable() {
    let dir = tempfile::tempdir().unwrap();
    let err = flatten_file(
        dir.path().join("absent.pdf"),
        dir.path().join("out.pdf"),
        &config_in(dir.path()),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, FlattenError::UnreadableDocument { .. }), "got: {err}");
    assert!(!dir.path().join("out.pdf").exists());
}
