//! Input validation: cheap file checks before decode, quality checks after.
//!
//! `validate` touches only file metadata (and opens the file once to prove
//! it is readable), so bad inputs fail fast before any decode work.
//! `validate_quality` inspects pixel statistics of the decoded frame.

use crate::config::InputConfig;
use crate::error::AgentError;
use image::DynamicImage;
use std::path::{Path, PathBuf};
use tracing::{debug, warn, Span};

/// Mean intensity below which a frame is considered black.
pub const MIN_MEAN_INTENSITY: f64 = 10.0;
/// Mean intensity above which a frame is considered blank white.
pub const MAX_MEAN_INTENSITY: f64 = 245.0;
/// Standard deviation below which a low-variance warning is raised.
pub const MIN_STD_DEV: f64 = 10.0;

/// Facts established about an input file that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedInput {
    pub path: PathBuf,
    /// Lowercase extension without the dot.
    pub extension: String,
    pub size_bytes: u64,
}

impl ValidatedInput {
    pub fn size_kb(&self) -> f64 {
        self.size_bytes as f64 / 1024.0
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn is_pdf(&self) -> bool {
        self.extension == "pdf"
    }
}

/// File and frame quality gate.
pub struct InputValidator {
    config: InputConfig,
    span: Span,
}

impl InputValidator {
    pub fn new(config: InputConfig, span: Span) -> Self {
        Self { config, span }
    }

    /// Check existence, readability, extension and size of `path`.
    pub fn validate(&self, path: &Path) -> Result<ValidatedInput, AgentError> {
        let meta = match std::fs::metadata(path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => {
                return Err(AgentError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                return Err(AgentError::PermissionDenied {
                    path: path.to_path_buf(),
                })
            }
            Err(_) => {
                return Err(AgentError::NotFound {
                    path: path.to_path_buf(),
                })
            }
        };

        if let Err(e) = std::fs::File::open(path) {
            return Err(if e.kind() == std::io::ErrorKind::PermissionDenied {
                AgentError::PermissionDenied {
                    path: path.to_path_buf(),
                }
            } else {
                AgentError::NotFound {
                    path: path.to_path_buf(),
                }
            });
        }

        let extension = extension_of(path);
        if !self.config.supports(&extension) {
            return Err(AgentError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
                supported: self.config.supported_formats.join(", "),
            });
        }

        let input = ValidatedInput {
            path: path.to_path_buf(),
            extension,
            size_bytes: meta.len(),
        };
        let max_bytes = self.config.max_file_size_mb * 1024 * 1024;
        if input.size_bytes > max_bytes {
            return Err(AgentError::TooLarge {
                path: path.to_path_buf(),
                size_mb: input.size_mb(),
                max_mb: self.config.max_file_size_mb,
            });
        }

        debug!(
            parent: &self.span,
            "Validated {} ({:.2} MB)",
            path.display(),
            input.size_mb()
        );
        Ok(input)
    }

    /// Reject frames that are nearly black or nearly white; warn on low
    /// variance. Returns the warnings raised.
    pub fn validate_quality(&self, frame: &DynamicImage) -> Result<Vec<String>, AgentError> {
        let (mean, std_dev) = intensity_stats(frame);
        debug!(parent: &self.span, "Frame intensity mean {:.2}, std {:.2}", mean, std_dev);

        if mean < MIN_MEAN_INTENSITY {
            return Err(AgentError::LowQuality {
                reason: format!("image is too dark (mean intensity {mean:.1})"),
            });
        }
        if mean > MAX_MEAN_INTENSITY {
            return Err(AgentError::LowQuality {
                reason: format!("image is too light (mean intensity {mean:.1})"),
            });
        }

        let mut warnings = Vec::new();
        if std_dev < MIN_STD_DEV {
            let msg = format!(
                "Low image variance (std {std_dev:.2}); the page may be empty or very uniform"
            );
            warn!(parent: &self.span, "{}", msg);
            warnings.push(msg);
        }
        Ok(warnings)
    }
}

/// Lowercase extension without the dot; empty when there is none.
pub fn extension_of(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

/// Mean and population standard deviation over every 8-bit sample of the
/// frame's RGB representation.
pub fn intensity_stats(frame: &DynamicImage) -> (f64, f64) {
    let rgb = frame.to_rgb8();
    let samples = rgb.as_raw();
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let n = samples.len() as f64;
    let (sum, sum_sq) = samples.iter().fold((0f64, 0f64), |(s, sq), &v| {
        let v = v as f64;
        (s + v, sq + v * v)
    });
    let mean = sum / n;
    let variance = (sum_sq / n - mean * mean).max(0.0);
    (mean, variance.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};
    use std::io::Write;

    fn validator() -> InputValidator {
        InputValidator::new(InputConfig::default(), Span::none())
    }

    fn checkerboard(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            if (x / 8 + y / 8) % 2 == 0 {
                Rgb([30, 30, 30])
            } else {
                Rgb([220, 220, 220])
            }
        }))
    }

    #[test]
    fn missing_file_is_not_found() {
        let err = validator().validate(Path::new("/nonexistent/scan.png")).unwrap_err();
        assert!(matches!(err, AgentError::NotFound { .. }));
    }

    #[test]
    fn directory_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = validator().validate(dir.path()).unwrap_err();
        assert!(matches!(err, AgentError::NotFound { .. }));
    }

    #[test]
    fn unsupported_extension() {
        let mut f = tempfile::Builder::new().suffix(".docx").tempfile().unwrap();
        f.write_all(b"hello").unwrap();
        let err = validator().validate(f.path()).unwrap_err();
        assert!(matches!(err, AgentError::UnsupportedFormat { ref extension, .. } if extension == "docx"));
    }

    #[test]
    fn uppercase_extension_is_accepted() {
        let mut f = tempfile::Builder::new().suffix(".PNG").tempfile().unwrap();
        f.write_all(b"not really a png").unwrap();
        let v = validator().validate(f.path()).unwrap();
        assert_eq!(v.extension, "png");
        assert_eq!(v.size_bytes, 16);
    }

    #[test]
    fn oversize_file_is_rejected() {
        let config = InputConfig {
            max_file_size_mb: 1,
            ..InputConfig::default()
        };
        let mut f = tempfile::Builder::new().suffix(".pdf").tempfile().unwrap();
        f.write_all(&vec![0u8; 1024 * 1024 + 1]).unwrap();
        let err = InputValidator::new(config, Span::none())
            .validate(f.path())
            .unwrap_err();
        assert!(matches!(err, AgentError::TooLarge { max_mb: 1, .. }));
    }

    #[test]
    fn dark_and_light_frames_are_low_quality() {
        let dark = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([3, 3, 3])));
        let light = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([252, 252, 252])));
        assert!(matches!(
            validator().validate_quality(&dark),
            Err(AgentError::LowQuality { .. })
        ));
        assert!(matches!(
            validator().validate_quality(&light),
            Err(AgentError::LowQuality { .. })
        ));
    }

    #[test]
    fn uniform_grey_frame_only_warns() {
        let grey = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([128, 128, 128])));
        let warnings = validator().validate_quality(&grey).unwrap();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("variance"));
    }

    #[test]
    fn textured_frame_passes_cleanly() {
        assert!(validator().validate_quality(&checkerboard(64, 64)).unwrap().is_empty());
    }

    #[test]
    fn stats_of_two_level_image() {
        let (mean, std) = intensity_stats(&checkerboard(16, 16));
        assert!((mean - 125.0).abs() < 1e-9);
        assert!((std - 95.0).abs() < 1e-9);
    }
}
