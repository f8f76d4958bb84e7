//! Frame encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! PNG is lossless; JPEG artefacts around glyph edges hurt recognition far
//! more than the larger payload costs.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a frame as a base64 PNG attachment with the given detail hint.
pub fn encode_frame(img: &DynamicImage, detail: &str) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded frame → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail(detail))
}

/// Shrink `img` so its longest side is at most `max_side`.
///
/// Returns the image to send and the factor that maps its coordinates back
/// to the original (1.0 when no resize happened).
pub fn fit_within(img: &DynamicImage, max_side: u32) -> (DynamicImage, f32) {
    let longest = img.width().max(img.height());
    if max_side == 0 || longest <= max_side {
        return (img.clone(), 1.0);
    }
    let resized = img.resize(max_side, max_side, FilterType::Triangle);
    let scale = longest as f32 / resized.width().max(resized.height()) as f32;
    (resized, scale)
}
