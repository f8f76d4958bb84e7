//! # logistics-agent
//!
//! Classify scanned logistics documents and extract validated, structured
//! fields from them with OCR and a language model.
//!
//! Four Spanish document types are understood: delivery notes (`ALBARAN`),
//! shipping orders (`ORDEN_ENVIO`), goods-received notes (`NOTA_RECEPCION`)
//! and transport sheets (`PARTE_TRANSPORTE`).
//!
//! ## Pipeline Overview
//!
//! ```text
//! image / PDF
//!  │
//!  ├─ 1. Validate    existence, format, size
//!  ├─ 2. Load        decode (image crate / pdfium), frame and quality checks
//!  ├─ 3. Preprocess  denoise, deskew, contrast, binarise (spawn_blocking)
//!  ├─ 4. OCR         primary engine, fallback on error or empty result
//!  ├─ 5. Classify    LLM picks one of four types, with confidence
//!  ├─ 6. Extract     LLM fills the type's schema; validation errors are
//!  │                 fed back into the next attempt
//!  └─ 7. Assemble    ProcessedDocument, optionally written as JSON
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use logistics_agent::{AgentConfig, Pipeline};
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AgentConfig::load(None)?;
//!     let pipeline = Pipeline::new(config)?;
//!     let doc = pipeline
//!         .process_document(Path::new("albaran.jpg"), Some(Path::new("out/albaran.json")))
//!         .await?;
//!     println!("{} ({:.2})", doc.document_type, doc.classification_confidence);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `logistics-agent` binary (clap + anyhow + tracing-subscriber + indicatif + glob) |
//! | `paddle` | off    | PaddleOCR engine via `oar-ocr` (needs ONNX Runtime and the model files under `ocr.paddle`) |
//! | `tesseract` | off | Tesseract engine via `leptess` (needs libtesseract, leptonica and language data) |
//!
//! The default configuration uses `paddle` as primary and `tesseract` as
//! fallback, so a build without either feature must select `vision`.
//!
//! Disable `cli` when using only the library:
//! ```toml
//! logistics-agent = { version = "1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod agent;
pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod schema;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use agent::Pipeline;
pub use config::{AgentConfig, AgentConfigBuilder};
pub use document::{BoundingBox, DocumentType, OcrResult};
pub use error::{AgentError, BlockError, EngineError, FieldError, FrameDecodeError, LlmError};
pub use output::{ProcessedDocument, ValidationStatus};
pub use pipeline::Stage;
pub use progress::{NoopObserver, PipelineObserver, SharedObserver};
pub use schema::ExtractedFields;
