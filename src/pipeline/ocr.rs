//! OCR capability: the engine trait and engine construction.
//!
//! An engine turns one frame into [`OcrResult`] blocks, dropping blocks
//! below the confidence threshold. Engines never fall back on their own:
//! the pipeline owns that policy (see [`crate::agent::Pipeline::run_ocr`]).

use super::vision::VisionEngine;
use crate::config::{LlmConfig, OcrConfig};
use crate::document::{BoundingBox, OcrResult};
use crate::error::EngineError;
use async_trait::async_trait;
use image::DynamicImage;
use tracing::Span;

#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Stable identifier recorded in results, e.g. `tesseract`.
    fn name(&self) -> &str;

    /// Recognise text on `frame`, keeping blocks with confidence ≥ `threshold`.
    async fn extract(
        &self,
        frame: &DynamicImage,
        threshold: f32,
    ) -> Result<Vec<OcrResult>, EngineError>;

    /// Recognise text inside `bbox` only. The box is clipped to the frame;
    /// result coordinates are relative to the crop.
    async fn extract_region(
        &self,
        frame: &DynamicImage,
        bbox: &BoundingBox,
        threshold: f32,
    ) -> Result<Vec<OcrResult>, EngineError> {
        let x1 = bbox.x1().min(frame.width());
        let y1 = bbox.y1().min(frame.height());
        let x2 = bbox.x2().min(frame.width());
        let y2 = bbox.y2().min(frame.height());
        if x2 <= x1 || y2 <= y1 {
            return Err(EngineError::Recognition {
                engine: self.name().to_string(),
                detail: format!("region {bbox:?} lies outside the frame"),
            });
        }
        let crop = frame.crop_imm(x1, y1, x2 - x1, y2 - y1);
        self.extract(&crop, threshold).await
    }
}

/// Build the engine called `name` (`paddle`, `tesseract` or `vision`).
///
/// Construction loads the engine's models, language data or provider, so an
/// `Err` here means the engine cannot be used at all.
pub fn build_engine(
    name: &str,
    ocr: &OcrConfig,
    llm: &LlmConfig,
    span: Span,
) -> Result<Box<dyn OcrEngine>, EngineError> {
    match name {
        "paddle" => paddle_engine(ocr, span),
        "tesseract" => tesseract_engine(ocr, span),
        "vision" => Ok(Box::new(VisionEngine::from_config(&ocr.vision, llm, span)?)),
        other => Err(EngineError::Unavailable {
            engine: other.to_string(),
            detail: "unknown OCR engine".into(),
        }),
    }
}

#[cfg(feature = "paddle")]
fn paddle_engine(ocr: &OcrConfig, span: Span) -> Result<Box<dyn OcrEngine>, EngineError> {
    Ok(Box::new(super::paddle::PaddleEngine::new(&ocr.paddle, span)?))
}

#[cfg(not(feature = "paddle"))]
fn paddle_engine(_ocr: &OcrConfig, _span: Span) -> Result<Box<dyn OcrEngine>, EngineError> {
    Err(not_compiled("paddle"))
}

#[cfg(feature = "tesseract")]
fn tesseract_engine(ocr: &OcrConfig, span: Span) -> Result<Box<dyn OcrEngine>, EngineError> {
    Ok(Box::new(super::tesseract::TesseractEngine::new(ocr, span)?))
}

#[cfg(not(feature = "tesseract"))]
fn tesseract_engine(_ocr: &OcrConfig, _span: Span) -> Result<Box<dyn OcrEngine>, EngineError> {
    Err(not_compiled("tesseract"))
}

#[cfg(not(all(feature = "paddle", feature = "tesseract")))]
fn not_compiled(engine: &str) -> EngineError {
    EngineError::Unavailable {
        engine: engine.to_string(),
        detail: format!("built without the `{engine}` feature (rebuild with --features {engine})"),
    }
}
