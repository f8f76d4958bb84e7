//! Document loading: file bytes → ordered RGB frames.
//!
//! Raster formats go through the `image` crate; PDFs are rasterised page by
//! page with pdfium at the configured DPI (scale factor `dpi / 72`). Every
//! frame comes out as 8-bit RGB so later stages handle one representation.
//!
//! ## Why spawn_blocking?
//!
//! Decoding and rasterising are CPU-bound, and pdfium uses thread-local state
//! that must not run on a Tokio worker. [`DocumentLoader::load`] hands the
//! bytes to `tokio::task::spawn_blocking`.

use super::input::{InputValidator, ValidatedInput};
use crate::config::InputConfig;
use crate::error::{AgentError, FrameDecodeError};
use image::{DynamicImage, GenericImageView, ImageFormat};
use pdfium_render::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn, Span};

/// Soft minimum frame size; smaller frames only raise a warning.
pub const MIN_WIDTH: u32 = 800;
pub const MIN_HEIGHT: u32 = 600;

/// Decode capability: bytes plus a format hint (the file extension) →
/// frames in page order.
pub trait FrameDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8], hint: &str) -> Result<Vec<DynamicImage>, FrameDecodeError>;
}

/// `image` for rasters, pdfium for PDFs.
pub struct DefaultDecoder {
    dpi: u32,
}

impl DefaultDecoder {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }
}

impl FrameDecoder for DefaultDecoder {
    fn decode(&self, bytes: &[u8], hint: &str) -> Result<Vec<DynamicImage>, FrameDecodeError> {
        if hint.eq_ignore_ascii_case("pdf") {
            rasterise_pdf(bytes, self.dpi)
        } else {
            decode_raster(bytes, hint).map(|img| vec![img])
        }
    }
}

fn decode_raster(bytes: &[u8], hint: &str) -> Result<DynamicImage, FrameDecodeError> {
    let decoded = match ImageFormat::from_extension(hint) {
        Some(format) => image::load_from_memory_with_format(bytes, format),
        None => image::load_from_memory(bytes),
    };
    Ok(DynamicImage::ImageRgb8(decoded?.to_rgb8()))
}

fn bind_pdfium() -> Result<Pdfium, FrameDecodeError> {
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| FrameDecodeError::PdfiumUnavailable(format!("{e:?}")))?;
    Ok(Pdfium::new(bindings))
}

fn rasterise_pdf(bytes: &[u8], dpi: u32) -> Result<Vec<DynamicImage>, FrameDecodeError> {
    let pdfium = bind_pdfium()?;
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| FrameDecodeError::PdfOpen(format!("{e:?}")))?;

    let render_config = PdfRenderConfig::new().scale_page_by_factor(dpi as f32 / 72.0);

    let mut frames = Vec::new();
    for (idx, page) in document.pages().iter().enumerate() {
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| FrameDecodeError::PageRender {
                page: idx + 1,
                detail: format!("{e:?}"),
            })?;
        let image = DynamicImage::ImageRgb8(bitmap.as_image().to_rgb8());
        debug!(
            "Rendered page {} → {}x{} px",
            idx + 1,
            image.width(),
            image.height()
        );
        frames.push(image);
    }
    if frames.is_empty() {
        return Err(FrameDecodeError::NoPages);
    }
    Ok(frames)
}

// ── Loader ───────────────────────────────────────────────────────────────

pub struct DocumentLoader {
    validator: InputValidator,
    decoder: Arc<dyn FrameDecoder>,
    span: Span,
}

impl DocumentLoader {
    /// Loader with the default decoder at `config.min_resolution_dpi`.
    pub fn new(config: InputConfig, span: Span) -> Self {
        let decoder = Arc::new(DefaultDecoder::new(config.min_resolution_dpi));
        Self::with_decoder(config, decoder, span)
    }

    pub fn with_decoder(config: InputConfig, decoder: Arc<dyn FrameDecoder>, span: Span) -> Self {
        Self {
            validator: InputValidator::new(config, span.clone()),
            decoder,
            span,
        }
    }

    /// Check and decode `path` into frames, in page order.
    pub async fn load(&self, path: &Path) -> Result<Vec<DynamicImage>, AgentError> {
        let input = self.validator.validate(path)?;
        self.load_validated(&input).await
    }

    /// Decode a file already checked by [`InputValidator::validate`].
    pub async fn load_validated(
        &self,
        input: &ValidatedInput,
    ) -> Result<Vec<DynamicImage>, AgentError> {
        let bytes = tokio::fs::read(&input.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                AgentError::PermissionDenied {
                    path: input.path.clone(),
                }
            } else {
                AgentError::NotFound {
                    path: input.path.clone(),
                }
            }
        })?;

        let decoder = Arc::clone(&self.decoder);
        let hint = input.extension.clone();
        let frames = tokio::task::spawn_blocking(move || decoder.decode(&bytes, &hint))
            .await
            .map_err(|e| AgentError::Internal(format!("Decode task panicked: {e}")))?
            .map_err(|e| AgentError::DecodeError {
                path: input.path.clone(),
                detail: e.to_string(),
            })?;

        if frames.is_empty() {
            return Err(AgentError::DecodeError {
                path: input.path.clone(),
                detail: "decoder produced no frames".into(),
            });
        }
        info!(
            parent: &self.span,
            "Loaded {} frame(s) from {}",
            frames.len(),
            input.path.display()
        );
        Ok(frames)
    }

    /// Structural frame check: three channels, non-empty, not all black.
    /// Returns a warning when the frame is below 800×600.
    pub fn validate_frame(&self, frame: &DynamicImage) -> Result<Vec<String>, AgentError> {
        let channels = frame.color().channel_count();
        if channels != 3 {
            return Err(AgentError::InvalidFrame {
                reason: format!("expected 3 colour channels, found {channels}"),
            });
        }
        let (w, h) = frame.dimensions();
        if w == 0 || h == 0 {
            return Err(AgentError::InvalidFrame {
                reason: "frame is empty".into(),
            });
        }
        if frame.as_bytes().iter().all(|&b| b == 0) {
            return Err(AgentError::InvalidFrame {
                reason: "frame is empty (all pixels black)".into(),
            });
        }

        let mut warnings = Vec::new();
        if w < MIN_WIDTH || h < MIN_HEIGHT {
            let msg = format!("Low resolution ({w}x{h}); OCR quality may suffer");
            warn!(parent: &self.span, "{}", msg);
            warnings.push(msg);
        }
        Ok(warnings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    fn loader() -> DocumentLoader {
        DocumentLoader::new(InputConfig::default(), Span::none())
    }

    struct TwoPages;

    impl FrameDecoder for TwoPages {
        fn decode(
            &self,
            _bytes: &[u8],
            hint: &str,
        ) -> Result<Vec<DynamicImage>, FrameDecodeError> {
            assert_eq!(hint, "pdf");
            Ok(vec![
                DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([1, 1, 1]))),
                DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([2, 2, 2]))),
            ])
        }
    }

    #[tokio::test]
    async fn png_becomes_one_rgb_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        RgbaImage::from_pixel(32, 24, Rgba([200, 10, 10, 255]))
            .save(&path)
            .unwrap();

        let frames = loader().load(&path).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].color(), image::ColorType::Rgb8);
        assert_eq!(frames[0].dimensions(), (32, 24));
    }

    #[tokio::test]
    async fn corrupt_image_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        let err = loader().load(&path).await.unwrap_err();
        assert!(matches!(err, AgentError::DecodeError { .. }));
    }

    #[test]
    fn raster_decode_error_keeps_image_cause() {
        let err = DefaultDecoder::new(200)
            .decode(b"definitely not a png", "png")
            .unwrap_err();
        assert!(matches!(err, FrameDecodeError::Image(_)));
    }

    #[tokio::test]
    async fn custom_decoder_keeps_page_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multi.pdf");
        std::fs::write(&path, b"%PDF-1.7").unwrap();
        let l = DocumentLoader::with_decoder(InputConfig::default(), Arc::new(TwoPages), Span::none());
        let frames = l.load(&path).await.unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].as_bytes()[0], 2);
    }

    #[tokio::test]
    async fn missing_file_fails_before_decode() {
        let err = loader().load(Path::new("/nope/scan.png")).await.unwrap_err();
        assert!(matches!(err, AgentError::NotFound { .. }));
    }

    #[test]
    fn grey_frame_is_invalid() {
        let grey = DynamicImage::ImageLuma8(GrayImage::from_pixel(900, 700, Luma([120])));
        assert!(matches!(
            loader().validate_frame(&grey),
            Err(AgentError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn black_frame_is_invalid() {
        let black = DynamicImage::ImageRgb8(RgbImage::new(900, 700));
        assert!(matches!(
            loader().validate_frame(&black),
            Err(AgentError::InvalidFrame { .. })
        ));
    }

    #[test]
    fn small_frame_warns_only() {
        let small = DynamicImage::ImageRgb8(RgbImage::from_pixel(640, 480, Rgb([90, 90, 90])));
        let warnings = loader().validate_frame(&small).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("640x480"));

        let big = DynamicImage::ImageRgb8(RgbImage::from_pixel(800, 600, Rgb([90, 90, 90])));
        assert!(loader().validate_frame(&big).unwrap().is_empty());
    }
}
