//! Tesseract engine through the `leptess` bindings.
//!
//! The frame is PNG-encoded in memory and handed to Tesseract with
//! `set_image_from_mem`. Word boxes come from `get_component_boxes` at word
//! level; each box is then recognised on its own rectangle, and its mean
//! confidence (0–100) is scaled to 0–1.
//!
//! Requires the `tesseract` feature (libtesseract + leptonica at build time).
//! Without it the engine reports itself unavailable and the pipeline moves
//! on to its other engine.

use crate::document::{BoundingBox, OcrResult};

#[cfg(feature = "tesseract")]
pub use engine::TesseractEngine;

/// Turn one recognised word into a block.
///
/// `mean_conf` is Tesseract's 0–100 score; negative scores mark layout-only
/// boxes. The box is clipped to the frame. Returns `None` for blank text,
/// confidence below `threshold`, or a box with no area inside the frame.
#[allow(clippy::too_many_arguments)]
pub fn word_block(
    text: &str,
    x: i32,
    y: i32,
    w: i32,
    h: i32,
    mean_conf: i32,
    frame: (u32, u32),
    threshold: f32,
) -> Option<OcrResult> {
    if mean_conf < 0 {
        return None;
    }
    let confidence = (mean_conf as f32 / 100.0).min(1.0);
    if confidence < threshold {
        return None;
    }
    let clip = |v: i32, max: u32| (v.max(0) as u32).min(max);
    let bbox = BoundingBox::new(
        clip(x, frame.0),
        clip(y, frame.1),
        clip(x.saturating_add(w), frame.0),
        clip(y.saturating_add(h), frame.1),
    )
    .ok()?;
    OcrResult::new(text, bbox, confidence).ok()
}

#[cfg(feature = "tesseract")]
mod engine {
    use super::word_block;
    use crate::config::OcrConfig;
    use crate::document::OcrResult;
    use crate::error::EngineError;
    use crate::pipeline::ocr::OcrEngine;
    use async_trait::async_trait;
    use image::DynamicImage;
    use leptess::{LepTess, Variable};
    use std::io::Cursor;
    use tracing::{debug, info, Span};

    const NAME: &str = "tesseract";

    pub struct TesseractEngine {
        data_path: Option<String>,
        language: String,
        psm: u8,
        span: Span,
    }

    impl TesseractEngine {
        /// Initialise Tesseract once with `ocr.language`; fails with
        /// `Unavailable` when the language data cannot be loaded.
        pub fn new(config: &OcrConfig, span: Span) -> Result<Self, EngineError> {
            let data_path = config
                .tesseract
                .data_path
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned());
            LepTess::new(data_path.as_deref(), &config.language).map_err(|e| {
                EngineError::Unavailable {
                    engine: NAME.into(),
                    detail: format!(
                        "cannot load language '{}': {e}. Install the traineddata \
                         (e.g. tesseract-ocr-{}) or set ocr.tesseract.data_path",
                        config.language, config.language
                    ),
                }
            })?;
            info!(parent: &span, "Tesseract ready (lang={})", config.language);

            Ok(Self {
                data_path,
                language: config.language.clone(),
                psm: config.tesseract.psm,
                span,
            })
        }

        fn failure(detail: impl Into<String>) -> EngineError {
            EngineError::Recognition {
                engine: NAME.into(),
                detail: detail.into(),
            }
        }

        fn recognise_blocking(
            data_path: Option<&str>,
            language: &str,
            psm: u8,
            frame: &DynamicImage,
            threshold: f32,
        ) -> Result<Vec<OcrResult>, EngineError> {
            let mut lt = LepTess::new(data_path, language)
                .map_err(|e| Self::failure(format!("init: {e}")))?;
            lt.set_variable(Variable::TesseditPagesegMode, &psm.to_string())
                .map_err(|e| Self::failure(format!("cannot set page segmentation mode: {e}")))?;

            let mut png = Cursor::new(Vec::new());
            frame
                .write_to(&mut png, image::ImageFormat::Png)
                .map_err(|e| Self::failure(format!("cannot encode frame: {e}")))?;
            lt.set_image_from_mem(png.get_ref())
                .map_err(|e| Self::failure(format!("cannot load frame: {e}")))?;

            // None means no text on the page.
            let Some(boxes) =
                lt.get_component_boxes(leptess::capi::TessPageIteratorLevel_RIL_WORD, true)
            else {
                return Ok(Vec::new());
            };

            let size = (frame.width(), frame.height());
            let mut blocks = Vec::new();
            for word in &boxes {
                let geom = word.get_geometry();
                lt.set_rectangle(geom.x, geom.y, geom.w, geom.h);
                let text = lt.get_utf8_text().unwrap_or_default();
                if let Some(block) = word_block(
                    &text,
                    geom.x,
                    geom.y,
                    geom.w,
                    geom.h,
                    lt.mean_text_conf(),
                    size,
                    threshold,
                ) {
                    blocks.push(block);
                }
            }
            Ok(blocks)
        }
    }

    #[async_trait]
    impl OcrEngine for TesseractEngine {
        fn name(&self) -> &str {
            NAME
        }

        async fn extract(
            &self,
            frame: &DynamicImage,
            threshold: f32,
        ) -> Result<Vec<OcrResult>, EngineError> {
            let data_path = self.data_path.clone();
            let language = self.language.clone();
            let psm = self.psm;
            let frame = frame.clone();

            let blocks = tokio::task::spawn_blocking(move || {
                Self::recognise_blocking(data_path.as_deref(), &language, psm, &frame, threshold)
            })
            .await
            .map_err(|e| Self::failure(format!("tesseract task panicked: {e}")))??;

            debug!(parent: &self.span, "Tesseract produced {} block(s)", blocks.len());
            Ok(blocks)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn missing_language_data_is_unavailable() {
            let mut config = OcrConfig::default();
            config.language = "zz-no-such-lang".into();
            config.tesseract.data_path = Some("/nonexistent/tessdata".into());
            let err = TesseractEngine::new(&config, Span::none()).err().unwrap();
            assert!(matches!(err, EngineError::Unavailable { .. }));
        }
    }
}
