//! Pipeline stages for logistics document processing.
//!
//! Each submodule implements one step; [`crate::agent::Pipeline`] runs them
//! in order for one document at a time.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ load ──▶ preprocess ──▶ ocr ──▶ classify ──▶ extract ──▶ assemble
//! (checks)  (decode)  (image ops)   (+fallback) (LLM)    (LLM+schema)
//! ```
//!
//! 1. [`input`]     : file checks (existence, format, size) and frame quality
//! 2. [`load`]      : decode images, rasterise PDFs via pdfium; `spawn_blocking`
//! 3. [`preprocess`]: denoise, deskew, contrast, binarise
//! 4. [`ocr`]       : engine trait; [`paddle`], [`tesseract`] and [`vision`]
//!    implement it, [`encode`] prepares frames for the vision model
//! 5. [`classify`]  : one of four document types, with confidence
//! 6. [`extract`]   : JSON fields, [`normalize`]d and validated, retried with
//!    the validation errors as feedback
//!
//! [`llm`] is the shared language-model client used by stages 4–6.

pub mod classify;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod load;
pub mod normalize;
pub mod ocr;
pub mod paddle;
pub mod preprocess;
pub mod tesseract;
pub mod vision;

use std::fmt;

/// The seven logged stages of one document, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Validate,
    Load,
    Preprocess,
    Ocr,
    Classify,
    Extract,
    Assemble,
}

impl Stage {
    pub const COUNT: u8 = 7;

    /// 1-based position, as shown in `[n/7]` log lines.
    pub fn number(self) -> u8 {
        match self {
            Stage::Validate => 1,
            Stage::Load => 2,
            Stage::Preprocess => 3,
            Stage::Ocr => 4,
            Stage::Classify => 5,
            Stage::Extract => 6,
            Stage::Assemble => 7,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::Validate => "Validating input",
            Stage::Load => "Loading document",
            Stage::Preprocess => "Preprocessing image",
            Stage::Ocr => "Running OCR",
            Stage::Classify => "Classifying document",
            Stage::Extract => "Extracting fields",
            Stage::Assemble => "Assembling result",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}/{}] {}", self.number(), Self::COUNT, self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_display() {
        assert_eq!(Stage::Ocr.to_string(), "[4/7] Running OCR");
        assert_eq!(Stage::Assemble.number(), Stage::COUNT);
    }
}
