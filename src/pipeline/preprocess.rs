//! Image preprocessing ahead of OCR.
//!
//! Stages run in a fixed order, each switched by [`PreprocessConfig`]:
//!
//! ```text
//! denoise ──▶ deskew ──▶ contrast ──▶ binarize
//! (median)   (canny +    (CLAHE on    (Otsu)
//!             hough)      luminance)
//! ```
//!
//! With every stage off the input frame is returned untouched, bit for bit.
//!
//! ## Deskew never rotates on noise
//!
//! Skew is the median angle of the Hough lines found on the Canny edge map,
//! keeping only lines within ±45° of horizontal. No lines, or no line inside
//! that window, means no rotation; so does a median below
//! `deskew_threshold`.

use crate::config::PreprocessConfig;
use crate::error::AgentError;
use image::{DynamicImage, GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::{equalize_histogram, otsu_level};
use imageproc::edges::canny;
use imageproc::filter::median_filter;
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use imageproc::hough::{detect_lines, LineDetectionOptions};
use tracing::{debug, info, Span};

/// Canny hysteresis thresholds.
const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;
/// Minimum Hough accumulator votes for a line.
const HOUGH_VOTES: u32 = 200;
const HOUGH_SUPPRESSION_RADIUS: u32 = 8;
/// Lines further than this from horizontal are ignored.
const MAX_SKEW_DEGREES: f32 = 45.0;
/// CLAHE clip limit and tile grid (tiles per side).
const CLAHE_CLIP_LIMIT: f32 = 2.0;
const CLAHE_GRID: u32 = 8;

pub struct Preprocessor {
    config: PreprocessConfig,
    span: Span,
}

impl Preprocessor {
    pub fn new(config: PreprocessConfig, span: Span) -> Self {
        Self { config, span }
    }

    fn any_enabled(&self) -> bool {
        let c = &self.config;
        c.denoise || c.deskew || c.enhance_contrast || c.binarize
    }

    /// Run the enabled stages in order. CPU-bound; call from a blocking
    /// context.
    pub fn preprocess(&self, frame: &DynamicImage) -> Result<DynamicImage, AgentError> {
        if frame.width() == 0 || frame.height() == 0 {
            return Err(AgentError::InvalidFrame {
                reason: "cannot preprocess an empty frame".into(),
            });
        }
        if !self.any_enabled() {
            debug!(parent: &self.span, "All preprocessing stages disabled");
            return Ok(frame.clone());
        }

        let c = &self.config;
        let mut img = frame.to_rgb8();

        if c.denoise {
            debug!(parent: &self.span, "Denoise (strength {})", c.denoise_strength);
            img = denoise(&img, c.denoise_strength);
        }
        if c.deskew {
            let (rotated, angle) = deskew(&img, c.deskew_threshold);
            match angle {
                Some(a) => info!(parent: &self.span, "Deskewed by {:.2}°", a),
                None => debug!(parent: &self.span, "Deskew skipped"),
            }
            img = rotated;
        }
        if c.enhance_contrast {
            debug!(parent: &self.span, "Contrast enhancement ({})", c.contrast_method);
            img = enhance_contrast(&img, &c.contrast_method);
        }
        if c.binarize {
            debug!(parent: &self.span, "Binarize (Otsu)");
            img = binarize(&img);
        }
        Ok(DynamicImage::ImageRgb8(img))
    }
}

// ── Stages ───────────────────────────────────────────────────────────────

/// Median filter; `strength` is the window size, radius `(strength-1)/2` ≥ 1.
pub fn denoise(img: &RgbImage, strength: u32) -> RgbImage {
    let radius = (strength.saturating_sub(1) / 2).max(1);
    median_filter(img, radius, radius)
}

/// Estimated skew in degrees, or `None` when no usable line is found.
pub fn estimate_skew(gray: &GrayImage) -> Option<f32> {
    let edges = canny(gray, CANNY_LOW, CANNY_HIGH);
    let lines = detect_lines(
        &edges,
        LineDetectionOptions {
            vote_threshold: HOUGH_VOTES,
            suppression_radius: HOUGH_SUPPRESSION_RADIUS,
        },
    );

    let mut angles: Vec<f32> = lines
        .iter()
        .map(|l| l.angle_in_degrees as f32 - 90.0)
        .filter(|a| a.abs() < MAX_SKEW_DEGREES)
        .collect();
    if angles.is_empty() {
        return None;
    }
    angles.sort_by(|a, b| a.total_cmp(b));
    let mid = angles.len() / 2;
    Some(if angles.len() % 2 == 0 {
        (angles[mid - 1] + angles[mid]) / 2.0
    } else {
        angles[mid]
    })
}

/// Rotate by the estimated skew when it exceeds `threshold` degrees.
/// Returns the image and the applied angle.
pub fn deskew(img: &RgbImage, threshold: f32) -> (RgbImage, Option<f32>) {
    let gray = DynamicImage::ImageRgb8(img.clone()).to_luma8();
    match estimate_skew(&gray) {
        Some(angle) if angle.abs() > threshold => {
            // rotate_about_center turns clockwise for positive theta.
            let rotated = rotate_about_center(
                img,
                -angle.to_radians(),
                Interpolation::Bilinear,
                Rgb([255, 255, 255]),
            );
            (rotated, Some(angle))
        }
        _ => (img.clone(), None),
    }
}

/// Equalise luminance (`clahe` or `global`) and shift each channel by the
/// luminance change, preserving hue.
pub fn enhance_contrast(img: &RgbImage, method: &str) -> RgbImage {
    let luma = luminance(img);
    let enhanced = match method {
        "global" => equalize_histogram(&luma),
        _ => clahe(&luma, CLAHE_CLIP_LIMIT, CLAHE_GRID),
    };
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        let delta = enhanced.get_pixel(x, y)[0] as i16 - luma.get_pixel(x, y)[0] as i16;
        let Rgb(c) = *img.get_pixel(x, y);
        Rgb(c.map(|v| (v as i16 + delta).clamp(0, 255) as u8))
    })
}

/// Global threshold at the Otsu level; output stays three-channel.
pub fn binarize(img: &RgbImage) -> RgbImage {
    let gray = luminance(img);
    let level = otsu_level(&gray);
    RgbImage::from_fn(img.width(), img.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > level {
            Rgb([255, 255, 255])
        } else {
            Rgb([0, 0, 0])
        }
    })
}

/// BT.601 luma.
fn luminance(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b] = img.get_pixel(x, y).0;
        let y = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([y.round().min(255.0) as u8])
    })
}

/// Contrast-limited adaptive histogram equalisation.
///
/// The image is split into `grid × grid` tiles; each tile's histogram is
/// clipped at `clip_limit × mean bin height`, the excess spread evenly, and
/// turned into a lookup table. Pixels blend the tables of the four nearest
/// tile centres bilinearly.
fn clahe(gray: &GrayImage, clip_limit: f32, grid: u32) -> GrayImage {
    let (w, h) = gray.dimensions();
    let tw = w.div_ceil(grid).max(1);
    let th = h.div_ceil(grid).max(1);
    let nx = w.div_ceil(tw);
    let ny = h.div_ceil(th);

    let mut luts = vec![[0u8; 256]; (nx * ny) as usize];
    for ty in 0..ny {
        for tx in 0..nx {
            let (x0, y0) = (tx * tw, ty * th);
            let (x1, y1) = ((x0 + tw).min(w), (y0 + th).min(h));
            let area = (x1 - x0) * (y1 - y0);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for x in x0..x1 {
                    hist[gray.get_pixel(x, y)[0] as usize] += 1;
                }
            }

            let limit = ((clip_limit * area as f32 / 256.0) as u32).max(1);
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > limit {
                    excess += *bin - limit;
                    *bin = limit;
                }
            }
            let (share, rest) = (excess / 256, (excess % 256) as usize);
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += share + u32::from(i < rest);
            }

            let lut = &mut luts[(ty * nx + tx) as usize];
            let mut cdf = 0u32;
            for (i, bin) in hist.iter().enumerate() {
                cdf += bin;
                lut[i] = (cdf as f32 * 255.0 / area as f32).round().min(255.0) as u8;
            }
        }
    }

    let lookup = |tx: u32, ty: u32, v: usize| luts[(ty * nx + tx) as usize][v] as f32;
    GrayImage::from_fn(w, h, |x, y| {
        let v = gray.get_pixel(x, y)[0] as usize;
        let fx = (x as f32 + 0.5) / tw as f32 - 0.5;
        let fy = (y as f32 + 0.5) / th as f32 - 0.5;
        let tx0 = fx.floor().clamp(0.0, (nx - 1) as f32) as u32;
        let ty0 = fy.floor().clamp(0.0, (ny - 1) as f32) as u32;
        let tx1 = (tx0 + 1).min(nx - 1);
        let ty1 = (ty0 + 1).min(ny - 1);
        let ax = (fx - tx0 as f32).clamp(0.0, 1.0);
        let ay = (fy - ty0 as f32).clamp(0.0, 1.0);

        let top = lookup(tx0, ty0, v) * (1.0 - ax) + lookup(tx1, ty0, v) * ax;
        let bottom = lookup(tx0, ty1, v) * (1.0 - ax) + lookup(tx1, ty1, v) * ax;
        Luma([(top * (1.0 - ay) + bottom * ay).round().clamp(0.0, 255.0) as u8])
    })
}
