//! Pipeline stages for PDF flattening.
//!
//! Each submodule implements exactly one step, so each can be tested on its
//! own and the engine can be swapped without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! workspace ──▶ rasterize ──▶ (enumerate + order) ──▶ assemble
//! (stage PDF)   (engine, N pages   (split dir,           (lopdf, one
//!                concurrently)      by page index)        page per image)
//! ```
//!
//! 1. [`workspace`] — per-request temp tree `docs/` + `split/`, removed on drop
//! 2. [`rasterize`] — page-count discovery and concurrent page rendering
//! 3. [`assemble`]  — one full-bleed image per page, serialised to bytes or a file

pub mod assemble;
pub mod rasterize;
pub mod workspace;
