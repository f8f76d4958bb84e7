//! Vision-model OCR: the frame is sent to a multimodal chat model, which
//! replies with positioned text lines as JSON.
//!
//! ## Coordinates
//!
//! Frames larger than `max_image_side` are downscaled before upload, so the
//! model answers in the coordinates of the smaller image. [`parse_vision_lines`]
//! maps every box back to the original frame and clips it to the frame
//! bounds. A line without a usable box is given a full-width horizontal band
//! derived from its position in the reply, so reading order survives
//! [`crate::document::assemble_rows`].

use super::encode::{encode_frame, fit_within};
use super::llm::{create_provider, parse_json_object};
use super::ocr::OcrEngine;
use crate::config::{LlmConfig, VisionOcrConfig};
use crate::document::{BoundingBox, OcrResult};
use crate::error::EngineError;
use crate::prompts::{vision_ocr_prompt, VISION_OCR_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider};
use image::DynamicImage;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn, Span};

const NAME: &str = "vision";

pub struct VisionEngine {
    provider: Arc<dyn LLMProvider>,
    config: VisionOcrConfig,
    temperature: f32,
    span: Span,
}

impl VisionEngine {
    pub fn new(
        provider: Arc<dyn LLMProvider>,
        config: VisionOcrConfig,
        temperature: f32,
        span: Span,
    ) -> Self {
        Self {
            provider,
            config,
            temperature,
            span,
        }
    }

    /// Create the vision provider. `vision.provider` overrides `llm.provider`.
    pub fn from_config(
        vision: &VisionOcrConfig,
        llm: &LlmConfig,
        span: Span,
    ) -> Result<Self, EngineError> {
        let provider_name = vision.provider.as_deref().unwrap_or(&llm.provider);
        let provider =
            create_provider(provider_name, &vision.model).map_err(|e| EngineError::Unavailable {
                engine: NAME.into(),
                detail: e.to_string(),
            })?;
        info!(
            parent: &span,
            "Vision OCR ready: {}/{}", provider_name, vision.model
        );
        Ok(Self::new(provider, vision.clone(), llm.temperature, span))
    }

    fn failure(detail: impl Into<String>) -> EngineError {
        EngineError::Recognition {
            engine: NAME.into(),
            detail: detail.into(),
        }
    }
}

#[async_trait]
impl OcrEngine for VisionEngine {
    fn name(&self) -> &str {
        NAME
    }

    async fn extract(
        &self,
        frame: &DynamicImage,
        threshold: f32,
    ) -> Result<Vec<OcrResult>, EngineError> {
        let (sent, scale) = fit_within(frame, self.config.max_image_side);
        let image = encode_frame(&sent, &self.config.detail)
            .map_err(|e| Self::failure(format!("cannot encode frame: {e}")))?;

        let messages = vec![
            ChatMessage::system(VISION_OCR_SYSTEM_PROMPT),
            ChatMessage::user_with_images(
                &vision_ocr_prompt(sent.width(), sent.height()),
                vec![image],
            ),
        ];
        let options = CompletionOptions {
            temperature: Some(self.temperature),
            max_tokens: Some(self.config.max_tokens),
            ..Default::default()
        };

        let deadline = Duration::from_secs(self.config.timeout_seconds);
        let response = match timeout(deadline, self.provider.chat(&messages, Some(&options))).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(Self::failure(e.to_string())),
            Err(_) => {
                return Err(Self::failure(format!(
                    "no reply within {}s",
                    self.config.timeout_seconds
                )))
            }
        };
        debug!(
            parent: &self.span,
            "Vision OCR: {} input tokens, {} output tokens",
            response.prompt_tokens,
            response.completion_tokens
        );

        let value = parse_json_object(&response.content).map_err(|e| Self::failure(e.to_string()))?;
        let lines = parse_vision_lines(&value, frame.width(), frame.height(), scale, threshold)?;
        if lines.is_empty() {
            warn!(parent: &self.span, "Vision OCR returned no usable lines");
        }
        Ok(lines)
    }
}

/// Turn a `{"lines": [...]}` reply into blocks on a `width`×`height` frame.
///
/// `scale` maps reply coordinates back to the frame. Confidences above 1 and
/// up to 100 are read as percentages; a missing confidence counts as 1.0.
/// Entries with blank text, out-of-range confidence, or a degenerate box are
/// skipped. Fails only when `lines` is absent or not an array.
pub fn parse_vision_lines(
    value: &Value,
    width: u32,
    height: u32,
    scale: f32,
    threshold: f32,
) -> Result<Vec<OcrResult>, EngineError> {
    let lines = value
        .get("lines")
        .and_then(Value::as_array)
        .ok_or_else(|| VisionEngine::failure("reply has no \"lines\" array"))?;

    let count = lines.len().max(1) as u32;
    let mut results = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        let text = match line.get("text").and_then(Value::as_str) {
            Some(t) if !t.trim().is_empty() => t,
            _ => continue,
        };

        let confidence = match line.get("confidence").and_then(Value::as_f64) {
            None => 1.0,
            Some(c) if (0.0..=1.0).contains(&c) => c as f32,
            Some(c) if c > 1.0 && c <= 100.0 => (c / 100.0) as f32,
            Some(_) => continue,
        };
        if confidence < threshold {
            continue;
        }

        let bbox = match line.get("box").and_then(|b| read_box(b, scale)) {
            Some(raw) => clip(raw, width, height),
            None => row_band(i as u32, count, width, height),
        };
        let Some(bbox) = bbox else { continue };

        if let Ok(block) = OcrResult::new(text, bbox, confidence) {
            results.push(block);
        }
    }
    Ok(results)
}

/// Read `[x1,y1,x2,y2]` or `[[x,y]; 4]`, scaled, as float corners.
fn read_box(raw: &Value, scale: f32) -> Option<[f32; 4]> {
    let items = raw.as_array()?;
    match items.len() {
        4 if items.iter().all(Value::is_number) => {
            let v: Vec<f32> = items.iter().filter_map(Value::as_f64).map(|n| n as f32 * scale).collect();
            Some([v[0], v[1], v[2], v[3]])
        }
        4 => {
            let mut quad = [[0f32; 2]; 4];
            for (slot, point) in quad.iter_mut().zip(items) {
                let p = point.as_array()?;
                if p.len() != 2 {
                    return None;
                }
                *slot = [p[0].as_f64()? as f32 * scale, p[1].as_f64()? as f32 * scale];
            }
            let b = BoundingBox::from_quad(&quad).ok()?;
            Some([b.x1() as f32, b.y1() as f32, b.x2() as f32, b.y2() as f32])
        }
        _ => None,
    }
}

fn clip(corners: [f32; 4], width: u32, height: u32) -> Option<BoundingBox> {
    let fit = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
    BoundingBox::new(
        fit(corners[0], width),
        fit(corners[1], height),
        fit(corners[2], width),
        fit(corners[3], height),
    )
    .ok()
}

fn row_band(index: u32, count: u32, width: u32, height: u32) -> Option<BoundingBox> {
    let band = (height / count).max(1);
    let y1 = (index * band).min(height.saturating_sub(1));
    let y2 = (y1 + band).min(height);
    BoundingBox::new(0, y1, width, y2).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rectangles_are_scaled_back() {
        let reply = json!({"lines": [
            {"text": "ALBARAN", "box": [10, 20, 110, 40], "confidence": 0.95}
        ]});
        let lines = parse_vision_lines(&reply, 1000, 1000, 2.0, 0.5).unwrap();
        let b = lines[0].bbox();
        assert_eq!((b.x1(), b.y1(), b.x2(), b.y2()), (20, 40, 220, 80));
    }

    #[test]
    fn quads_become_enclosing_boxes() {
        let reply = json!({"lines": [
            {"text": "Cliente", "box": [[5, 10], [60, 8], [62, 30], [4, 32]]}
        ]});
        let lines = parse_vision_lines(&reply, 200, 200, 1.0, 0.5).unwrap();
        let b = lines[0].bbox();
        assert_eq!((b.x1(), b.y1(), b.x2(), b.y2()), (4, 8, 62, 32));
        assert_eq!(lines[0].confidence(), 1.0);
    }

    #[test]
    fn missing_boxes_follow_reply_order() {
        let reply = json!({"lines": [
            {"text": "first"},
            {"text": "second", "box": "n/a"}
        ]});
        let lines = parse_vision_lines(&reply, 800, 600, 1.0, 0.0).unwrap();
        assert_eq!(lines[0].bbox().y1(), 0);
        assert_eq!(lines[1].bbox().y1(), 300);
        assert_eq!(lines[1].bbox().width(), 800);
    }

    #[test]
    fn percent_confidence_and_threshold() {
        let reply = json!({"lines": [
            {"text": "keep", "box": [0, 0, 10, 10], "confidence": 88},
            {"text": "drop", "box": [0, 20, 10, 30], "confidence": 0.3},
            {"text": "bogus", "box": [0, 40, 10, 50], "confidence": 250},
            {"text": "   ", "box": [0, 60, 10, 70]}
        ]});
        let lines = parse_vision_lines(&reply, 100, 100, 1.0, 0.7).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].text(), "keep");
        assert!((lines[0].confidence() - 0.88).abs() < 1e-6);
    }

    #[test]
    fn boxes_are_clipped_to_frame() {
        let reply = json!({"lines": [
            {"text": "edge", "box": [90, 90, 400, 400]},
            {"text": "outside", "box": [150, 150, 300, 300]}
        ]});
        let lines = parse_vision_lines(&reply, 100, 100, 1.0, 0.0).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].bbox().x2(), 100);
    }

    #[test]
    fn reply_without_lines_is_an_error() {
        assert!(matches!(
            parse_vision_lines(&json!({"text": "x"}), 10, 10, 1.0, 0.0),
            Err(EngineError::Recognition { .. })
        ));
    }
}
