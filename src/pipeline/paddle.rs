//! PaddleOCR engine through `oar-ocr` (ONNX Runtime).
//!
//! Text detection finds line polygons, recognition reads each line and
//! scores it. Optional orientation models straighten rotated pages and
//! upside-down lines before recognition. Every polygon becomes the smallest
//! enclosing [`BoundingBox`], clipped to the frame.
//!
//! Requires the `paddle` feature. Model files are listed under
//! `ocr.paddle`; missing files make the engine unavailable at startup.

use crate::document::{BoundingBox, OcrResult};

#[cfg(feature = "paddle")]
pub use engine::PaddleEngine;

/// Turn one recognised line into a block.
///
/// Regions without text or score are dropped, as are scores below
/// `threshold` and polygons with no area inside the frame.
pub fn region_block(
    text: Option<&str>,
    score: Option<f32>,
    polygon: &[(f32, f32)],
    frame: (u32, u32),
    threshold: f32,
) -> Option<OcrResult> {
    let text = text?;
    let confidence = score?.clamp(0.0, 1.0);
    if confidence < threshold {
        return None;
    }
    let outer = BoundingBox::from_points(polygon.iter().copied()).ok()?;
    let clipped = BoundingBox::new(
        outer.x1().min(frame.0),
        outer.y1().min(frame.1),
        outer.x2().min(frame.0),
        outer.y2().min(frame.1),
    )
    .ok()?;
    OcrResult::new(text, clipped, confidence).ok()
}

#[cfg(feature = "paddle")]
mod engine {
    use super::region_block;
    use crate::config::PaddleConfig;
    use crate::document::OcrResult;
    use crate::error::EngineError;
    use crate::pipeline::ocr::OcrEngine;
    use async_trait::async_trait;
    use image::DynamicImage;
    use oar_ocr::oarocr::{OAROCRBuilder, OAROCR};
    use std::sync::Arc;
    use tracing::{debug, info, Span};

    const NAME: &str = "paddle";

    pub struct PaddleEngine {
        ocr: Arc<OAROCR>,
        span: Span,
    }

    impl PaddleEngine {
        /// Load the detection and recognition models (plus any orientation
        /// models configured).
        pub fn new(config: &PaddleConfig, span: Span) -> Result<Self, EngineError> {
            let unavailable = |detail: String| EngineError::Unavailable {
                engine: NAME.into(),
                detail,
            };
            for (what, path) in [
                ("detection model", &config.detection_model),
                ("recognition model", &config.recognition_model),
                ("character dictionary", &config.character_dict),
            ] {
                if !path.is_file() {
                    return Err(unavailable(format!("{what} not found at '{}'", path.display())));
                }
            }

            let mut builder = OAROCRBuilder::new(
                &config.detection_model,
                &config.recognition_model,
                &config.character_dict,
            )
            .region_batch_size(config.region_batch_size);
            if let Some(model) = &config.document_orientation_model {
                builder = builder.with_document_image_orientation_classification(model);
            }
            if let Some(model) = &config.text_line_orientation_model {
                builder = builder.with_text_line_orientation_classification(model);
            }
            let ocr = builder.build().map_err(|e| unavailable(e.to_string()))?;

            info!(
                parent: &span,
                "PaddleOCR ready: det={} rec={}",
                config.detection_model.display(),
                config.recognition_model.display()
            );
            Ok(Self {
                ocr: Arc::new(ocr),
                span,
            })
        }

        fn failure(detail: impl Into<String>) -> EngineError {
            EngineError::Recognition {
                engine: NAME.into(),
                detail: detail.into(),
            }
        }
    }

    #[async_trait]
    impl OcrEngine for PaddleEngine {
        fn name(&self) -> &str {
            NAME
        }

        async fn extract(
            &self,
            frame: &DynamicImage,
            threshold: f32,
        ) -> Result<Vec<OcrResult>, EngineError> {
            let ocr = Arc::clone(&self.ocr);
            let rgb = frame.to_rgb8();
            let size = (rgb.width(), rgb.height());

            let pages = tokio::task::spawn_blocking(move || ocr.predict(vec![rgb]))
                .await
                .map_err(|e| Self::failure(format!("paddle task panicked: {e}")))?
                .map_err(|e| Self::failure(e.to_string()))?;

            let mut blocks = Vec::new();
            let mut dropped = 0usize;
            for region in pages.iter().flat_map(|page| &page.text_regions) {
                let polygon: Vec<(f32, f32)> = region
                    .bounding_box
                    .points
                    .iter()
                    .map(|p| (p.x, p.y))
                    .collect();
                match region_block(
                    region.text.as_deref(),
                    region.confidence,
                    &polygon,
                    size,
                    threshold,
                ) {
                    Some(block) => blocks.push(block),
                    None => dropped += 1,
                }
            }
            debug!(
                parent: &self.span,
                "PaddleOCR kept {} block(s), dropped {}",
                blocks.len(),
                dropped
            );
            Ok(blocks)
        }
    }

}
