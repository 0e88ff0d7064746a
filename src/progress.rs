//! Progress-callback trait for per-page rasterization events.
//!
//! Inject an [`Arc<dyn FlattenProgressCallback>`] via
//! [`crate::config::FlattenConfigBuilder::progress_callback`] to receive
//! events while pages are rendered. Pages render concurrently, so events for
//! different pages arrive in completion order, not page order.
//!
//! # Example
//!
//! ```rust
//! use pdf_flatten::{FlattenConfig, FlattenProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     rendered: AtomicUsize,
//! }
//!
//! impl FlattenProgressCallback for CountingCallback {
//!     fn on_page_complete(&self, page: usize, total_pages: usize, size_bytes: u64) {
//!         let done = self.rendered.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("page {page} ({size_bytes} bytes), {done}/{total_pages} done");
//!     }
//! }
//!
//! let config = FlattenConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { rendered: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use std::sync::Arc;

/// Called by the rasterizer as it processes each page.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. Methods may be called from different tasks at once;
/// protect shared state with atomics or a `Mutex`.
pub trait FlattenProgressCallback: Send + Sync {
    /// Called once the operative page set is known, before any page renders.
    fn on_flatten_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called just before the engine is asked to render a page.
    ///
    /// # Arguments
    /// * `page`        — 1-indexed page number
    /// * `total_pages` — pages being rendered in this request
    fn on_page_start(&self, page: usize, total_pages: usize) {
        let _ = (page, total_pages);
    }

    /// Called when a page image has been written and validated.
    fn on_page_complete(&self, page: usize, total_pages: usize, size_bytes: u64) {
        let _ = (page, total_pages, size_bytes);
    }

    /// Called when a page fails. The request as a whole fails with it.
    fn on_page_error(&self, page: usize, total_pages: usize, error: &str) {
        let _ = (page, total_pages, error);
    }

    /// Called once every page has rendered, before reassembly.
    fn on_flatten_complete(&self, total_pages: usize) {
        let _ = total_pages;
    }
}

/// A callback that ignores every event.
///
/// The pipeline never builds one: with no callback configured it simply
/// skips the hooks. Use it where an API demands a [`ProgressCallback`] value
/// but no events are wanted.
pub struct NoopProgressCallback;

impl FlattenProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::FlattenConfig`].
pub type ProgressCallback = Arc<dyn FlattenProgressCallback>;
