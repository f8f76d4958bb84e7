//! Error types for the logistics-agent library.
//!
//! Three layers of failure exist, each with its own type:
//!
//! * [`AgentError`]: **Fatal for one document**: the pipeline cannot produce
//!   a [`crate::output::ProcessedDocument`] (missing file, unreadable image,
//!   both OCR engines failed, extraction never validated). Returned as
//!   `Err(AgentError)` from every public pipeline operation. In batch mode the
//!   caller logs it and moves on to the next document.
//!
//! * [`LlmError`] / [`EngineError`]: **Capability failures**: a single call
//!   to the language model or an OCR engine went wrong. The stage that owns
//!   the call decides whether that is retried, falls back, or becomes an
//!   [`AgentError`].
//!
//! * [`BlockError`] / [`FrameDecodeError`]: **Value failures**: an OCR block
//!   or bounding box broke its invariant, or a decoder could not turn bytes
//!   into frames. Engines drop invalid blocks; the loader wraps decode
//!   failures in [`AgentError::DecodeError`].
//!
//! * [`FieldError`]: **Correctable**: one schema rule was violated by an
//!   extraction attempt. Field errors are fed back to the model as context
//!   for the next attempt and only surface inside
//!   [`AgentError::ExtractionFailed`] once the attempt budget is spent.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the logistics-agent library.
#[derive(Debug, Error)]
pub enum AgentError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is a regular file.")]
    NotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The file extension is outside the configured allow-list.
    #[error("Unsupported format '{extension}' for '{path}'. Supported formats: {supported}")]
    UnsupportedFormat {
        path: PathBuf,
        extension: String,
        supported: String,
    },

    /// The file exceeds the configured size ceiling.
    #[error("File '{path}' is too large ({size_mb:.2} MB). Maximum allowed: {max_mb} MB")]
    TooLarge {
        path: PathBuf,
        size_mb: f64,
        max_mb: u64,
    },

    /// The codec could not produce a frame from the file.
    #[error("Could not decode '{path}': {detail}")]
    DecodeError { path: PathBuf, detail: String },

    // ── Image errors ──────────────────────────────────────────────────────
    /// The frame is too dark or too light to be worth reading.
    #[error("Image quality too low: {reason}")]
    LowQuality { reason: String },

    /// The frame is empty, all black, or not three-channel.
    #[error("Invalid frame: {reason}")]
    InvalidFrame { reason: String },

    // ── Recognition errors ────────────────────────────────────────────────
    /// No engine produced any text block.
    #[error("OCR failed: {detail}")]
    OcrFailed { detail: String },

    /// The model returned an unknown label, or the call itself failed.
    #[error("Classification failed: {detail}")]
    ClassificationError { detail: String },

    /// Extraction never produced a record that passed schema validation.
    #[error("Field extraction failed after {attempts} attempt(s): {detail}{}", format_field_errors(.errors))]
    ExtractionFailed {
        attempts: u32,
        detail: String,
        errors: Vec<FieldError>,
    },

    /// An LLM call exceeded the configured deadline.
    #[error("LLM call timed out after {secs}s\nIncrease llm.timeout_seconds or check the provider.")]
    Timeout { secs: u64 },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write the result JSON file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Configuration failed validation or could not be read.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn format_field_errors(errors: &[FieldError]) -> String {
    if errors.is_empty() {
        return String::new();
    }
    let lines: Vec<String> = errors.iter().map(|e| format!("\n  {e}")).collect();
    lines.concat()
}

/// A failed call to the language-model capability.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// The call exceeded the configured deadline.
    #[error("LLM call timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider returned an error (transport, auth, HTTP status).
    #[error("LLM provider error: {0}")]
    Provider(String),

    /// The provider answered with no content at all.
    #[error("LLM returned an empty response")]
    EmptyResponse,

    /// The response did not contain a parseable JSON object.
    #[error("LLM response is not valid JSON: {detail}")]
    InvalidJson { detail: String },
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Timeout { secs } => AgentError::Timeout { secs },
            other => AgentError::Internal(other.to_string()),
        }
    }
}

/// A failed call to an OCR engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine could not be initialised (models or language data missing,
    /// provider unset, support not compiled in).
    #[error("OCR engine '{engine}' unavailable: {detail}")]
    Unavailable { engine: String, detail: String },

    /// The engine ran but could not recognise the frame.
    #[error("OCR engine '{engine}' failed: {detail}")]
    Recognition { engine: String, detail: String },

}

/// A bounding box or OCR block that violates its construction invariant.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlockError {
    #[error("x2 ({x2}) must be greater than x1 ({x1})")]
    InvertedX { x1: u32, x2: u32 },

    #[error("y2 ({y2}) must be greater than y1 ({y1})")]
    InvertedY { y1: u32, y2: u32 },

    #[error("polygon is empty or has non-finite coordinates")]
    InvalidPolygon,

    #[error("OCR text must not be empty")]
    EmptyText,

    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f32),
}

/// A frame decoder could not produce frames from the file bytes.
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error("pdfium library not available: {0}")]
    PdfiumUnavailable(String),

    #[error("cannot open PDF: {0}")]
    PdfOpen(String),

    #[error("page {page} failed to render: {detail}")]
    PageRender { page: usize, detail: String },

    #[error("PDF has no pages")]
    NoPages,
}

/// One violated schema rule, addressed by its JSON path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Dotted path of the offending field, e.g. `productos.0.cantidad`.
    pub field: String,
    /// Human-readable description of the violated rule.
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "- Field '{}': {}", self.field, self.message)
    }
}
