//! Observer trait for per-document pipeline events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::agent::Pipeline::with_observer`] to receive events as each
//! document moves through the stages. The CLI uses it to drive a progress
//! bar during `batch`; library users can forward events anywhere.
//!
//! # Example
//!
//! ```rust
//! use logistics_agent::PipelineObserver;
//! use std::path::Path;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct Counter(AtomicUsize);
//!
//! impl PipelineObserver for Counter {
//!     fn on_document_complete(&self, _path: &Path, _elapsed_secs: f64) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::pipeline::Stage;
use std::path::Path;
use std::sync::Arc;

/// Receives pipeline events. Every method has a no-op default so
/// implementors only override what they care about.
///
/// Documents are processed one at a time, so events for one document never
/// interleave with another's.
pub trait PipelineObserver: Send + Sync {
    /// A document is about to be validated.
    fn on_document_start(&self, path: &Path) {
        let _ = path;
    }

    /// A stage is starting for the current document.
    fn on_stage(&self, path: &Path, stage: Stage) {
        let _ = (path, stage);
    }

    /// The document produced a result.
    fn on_document_complete(&self, path: &Path, elapsed_secs: f64) {
        let _ = (path, elapsed_secs);
    }

    /// The document failed; `error` is the rendered [`crate::AgentError`].
    fn on_document_error(&self, path: &Path, error: &str) {
        let _ = (path, error);
    }
}

/// Observer that ignores every event. Used when none is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

pub type SharedObserver = Arc<dyn PipelineObserver>;
