//! Field extraction with validation feedback.
//!
//! ## Why a feedback loop
//!
//! Most bad extractions are *almost* right: a date in the wrong format, a
//! document number missing its prefix, a total that ignores one line. An
//! identical retry tends to reproduce the same mistake, so every failed
//! attempt contributes its concrete field errors to the next prompt:
//!
//! ```text
//! attempt 1: base prompt                       → numero_albaran "INVALID"
//! attempt 2: base prompt + errors of attempt 1 → valid record
//! ```
//!
//! The loop is bounded by `max_attempts`. The accumulated history is a plain
//! value threaded into [`extraction_prompt`]; nothing is thrown across
//! iterations.

use super::classify::truncate_chars;
use super::llm::LlmClient;
use super::normalize::normalise_dates;
use crate::config::ExtractionConfig;
use crate::document::DocumentType;
use crate::error::{AgentError, FieldError, LlmError};
use crate::prompts::{extraction_prompt, EXTRACTION_SYSTEM_PROMPT};
use crate::schema::ExtractedFields;
use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, info, warn, Span};

pub struct Extractor {
    llm: Arc<LlmClient>,
    config: ExtractionConfig,
    span: Span,
}

/// Why one attempt did not yield a record.
enum AttemptFailure {
    Invalid(Vec<FieldError>),
    Llm(LlmError),
}

impl Extractor {
    pub fn new(llm: Arc<LlmClient>, config: ExtractionConfig, span: Span) -> Self {
        Self { llm, config, span }
    }

    /// Extract and validate the fields of a `doc_type` document, with the
    /// configured number of attempts.
    pub async fn extract(
        &self,
        ocr_text: &str,
        doc_type: DocumentType,
    ) -> Result<ExtractedFields, AgentError> {
        self.extract_fields(ocr_text, doc_type, self.config.max_attempts)
            .await
    }

    /// Run up to `max_attempts` extraction attempts.
    ///
    /// "Not in the future" rules are checked against the local date.
    pub async fn extract_fields(
        &self,
        ocr_text: &str,
        doc_type: DocumentType,
        max_attempts: u32,
    ) -> Result<ExtractedFields, AgentError> {
        let today = chrono::Local::now().date_naive();
        self.extract_fields_at(ocr_text, doc_type, max_attempts, today)
            .await
    }

    pub(crate) async fn extract_fields_at(
        &self,
        ocr_text: &str,
        doc_type: DocumentType,
        max_attempts: u32,
        today: NaiveDate,
    ) -> Result<ExtractedFields, AgentError> {
        let max_attempts = max_attempts.max(1);
        let text = truncate_chars(ocr_text, self.config.max_chars);
        let mut history: Vec<Vec<FieldError>> = Vec::new();
        let mut last = AttemptFailure::Invalid(Vec::new());

        for attempt in 1..=max_attempts {
            let prompt = extraction_prompt(doc_type, &text, &history);
            debug!(
                parent: &self.span,
                "Extraction attempt {}/{} ({} feedback block(s))",
                attempt,
                max_attempts,
                history.len()
            );

            match self.attempt(&prompt, doc_type, today).await {
                Ok(fields) => {
                    info!(
                        parent: &self.span,
                        "Fields for {} validated on attempt {}", doc_type, attempt
                    );
                    return Ok(fields);
                }
                Err(AttemptFailure::Invalid(errors)) => {
                    warn!(
                        parent: &self.span,
                        "Attempt {}/{}: {} validation error(s)",
                        attempt,
                        max_attempts,
                        errors.len()
                    );
                    history.push(errors.clone());
                    last = AttemptFailure::Invalid(errors);
                }
                Err(AttemptFailure::Llm(e)) => {
                    warn!(parent: &self.span, "Attempt {}/{} failed: {}", attempt, max_attempts, e);
                    // A malformed reply is correctable; a transport failure is not.
                    if let LlmError::InvalidJson { detail } = &e {
                        history.push(vec![FieldError::new(
                            "$",
                            format!("reply was not a valid JSON object ({detail})"),
                        )]);
                    }
                    last = AttemptFailure::Llm(e);
                }
            }
        }

        Err(match last {
            AttemptFailure::Invalid(errors) => AgentError::ExtractionFailed {
                attempts: max_attempts,
                detail: format!("{} record failed schema validation", doc_type),
                errors,
            },
            AttemptFailure::Llm(e) => AgentError::ExtractionFailed {
                attempts: max_attempts,
                detail: e.to_string(),
                errors: Vec::new(),
            },
        })
    }

    async fn attempt(
        &self,
        prompt: &str,
        doc_type: DocumentType,
        today: NaiveDate,
    ) -> Result<ExtractedFields, AttemptFailure> {
        let mut value = self
            .llm
            .generate_json(prompt, EXTRACTION_SYSTEM_PROMPT, Some(self.config.max_tokens))
            .await
            .map_err(AttemptFailure::Llm)?;
        normalise_dates(doc_type, &mut value);
        ExtractedFields::from_value(doc_type, value, today).map_err(AttemptFailure::Invalid)
    }
}
