//! Document classification: OCR text → one of the four document types.
//!
//! A single JSON prompt asks for `{document_type, confidence, reasoning}`.
//! An unknown label or a failed LLM call is fatal for the document. A
//! confidence below the configured threshold is only a warning: the result
//! is still used and the pipeline records the warning on the output.

use super::llm::LlmClient;
use crate::config::ClassificationConfig;
use crate::document::DocumentType;
use crate::error::{AgentError, LlmError};
use crate::prompts::{classification_prompt, CLASSIFICATION_SYSTEM_PROMPT};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn, Span};

#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub doc_type: DocumentType,
    /// Clamped to [0, 1]; 0 when the model gave none.
    pub confidence: f32,
    pub reasoning: Option<String>,
    /// Set when `confidence` is below the effective threshold for `doc_type`.
    pub warning: Option<String>,
}

pub struct Classifier {
    llm: Arc<LlmClient>,
    config: ClassificationConfig,
    span: Span,
}

impl Classifier {
    pub fn new(llm: Arc<LlmClient>, config: ClassificationConfig, span: Span) -> Self {
        Self { llm, config, span }
    }

    pub async fn classify(&self, ocr_text: &str) -> Result<Classification, AgentError> {
        let text = truncate_chars(ocr_text, self.config.max_chars);
        let prompt = classification_prompt(&text);

        let reply = self
            .llm
            .generate_json(&prompt, CLASSIFICATION_SYSTEM_PROMPT, Some(self.config.max_tokens))
            .await
            .map_err(|e| match e {
                LlmError::Timeout { secs } => AgentError::Timeout { secs },
                other => AgentError::ClassificationError {
                    detail: other.to_string(),
                },
            })?;

        let classification = self.interpret(&reply)?;
        info!(
            parent: &self.span,
            "Classified as {} (confidence {:.2})",
            classification.doc_type,
            classification.confidence
        );
        if let Some(reasoning) = &classification.reasoning {
            debug!(parent: &self.span, "Classifier reasoning: {}", reasoning);
        }
        if let Some(w) = &classification.warning {
            warn!(parent: &self.span, "{}", w);
        }
        Ok(classification)
    }

    fn interpret(&self, reply: &Value) -> Result<Classification, AgentError> {
        let label = reply
            .get("document_type")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::ClassificationError {
                detail: "reply has no \"document_type\" string".into(),
            })?;
        let doc_type: DocumentType = label.parse().map_err(|e| AgentError::ClassificationError {
            detail: format!("{e}"),
        })?;

        let confidence = reply
            .get("confidence")
            .and_then(Value::as_f64)
            .map(|c| c.clamp(0.0, 1.0) as f32)
            .unwrap_or(0.0);
        let reasoning = reply
            .get("reasoning")
            .and_then(Value::as_str)
            .map(str::to_string);

        let threshold = self.config.threshold_for(doc_type);
        let warning = (confidence < threshold).then(|| {
            format!(
                "Classification confidence {confidence:.2} for {doc_type} is below threshold {threshold:.2}"
            )
        });

        Ok(Classification {
            doc_type,
            confidence,
            reasoning,
            warning,
        })
    }
}

/// Cut `text` to `max_chars` characters, marking the cut with `...`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LlmConfig;
    use crate::pipeline::llm::TextGenerator;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Scripted {
        reply: Result<String, LlmError>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(
            &self,
            prompt: &str,
            _system_prompt: &str,
            _temperature: f32,
            _max_tokens: Option<usize>,
        ) -> Result<String, LlmError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    fn classifier(reply: Result<&str, LlmError>, config: ClassificationConfig) -> (Classifier, Arc<Scripted>) {
        let gen = Arc::new(Scripted {
            reply: reply.map(str::to_string),
            prompts: Mutex::new(vec![]),
        });
        let llm_config = LlmConfig {
            max_retries: 0,
            ..LlmConfig::default()
        };
        let llm = Arc::new(LlmClient::new(gen.clone(), &llm_config, Span::none()));
        (Classifier::new(llm, config, Span::none()), gen)
    }

    #[tokio::test]
    async fn confident_label_has_no_warning() {
        let (c, _) = classifier(
            Ok(r#"{"document_type": "ALBARAN", "confidence": 0.93, "reasoning": "ALB- number"}"#),
            ClassificationConfig::default(),
        );
        let result = c.classify("ALBARAN ALB-20250115").await.unwrap();
        assert_eq!(result.doc_type, DocumentType::Albaran);
        assert!((result.confidence - 0.93).abs() < 1e-6);
        assert_eq!(result.reasoning.as_deref(), Some("ALB- number"));
        assert!(result.warning.is_none());
    }

    #[tokio::test]
    async fn low_confidence_is_a_warning_not_an_error() {
        let (c, _) = classifier(
            Ok(r#"{"document_type": "parte_transporte", "confidence": 0.55}"#),
            ClassificationConfig::default(),
        );
        let result = c.classify("CMR").await.unwrap();
        assert_eq!(result.doc_type, DocumentType::ParteTransporte);
        assert!(result.warning.unwrap().contains("below threshold 0.80"));
    }

    #[tokio::test]
    async fn per_type_threshold_applies() {
        let mut config = ClassificationConfig::default();
        config.type_thresholds.insert(DocumentType::OrdenEnvio, 0.5);
        let (c, _) = classifier(Ok(r#"{"document_type": "ORDEN_ENVIO", "confidence": 0.6}"#), config);
        assert!(c.classify("ORD").await.unwrap().warning.is_none());
    }

    #[tokio::test]
    async fn unknown_label_fails() {
        let (c, _) = classifier(
            Ok(r#"{"document_type": "FACTURA", "confidence": 0.99}"#),
            ClassificationConfig::default(),
        );
        let err = c.classify("FACTURA").await.unwrap_err();
        assert!(matches!(err, AgentError::ClassificationError { .. }));
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_clamped() {
        let (c, _) = classifier(
            Ok(r#"{"document_type": "NOTA_RECEPCION", "confidence": 7}"#),
            ClassificationConfig::default(),
        );
        assert_eq!(c.classify("REC").await.unwrap().confidence, 1.0);
    }

    #[tokio::test]
    async fn llm_failures_map_to_stage_errors() {
        let (c, _) = classifier(
            Err(LlmError::Provider("connection refused".into())),
            ClassificationConfig::default(),
        );
        assert!(matches!(
            c.classify("x").await.unwrap_err(),
            AgentError::ClassificationError { .. }
        ));

        let (c, _) = classifier(Err(LlmError::Timeout { secs: 30 }), ClassificationConfig::default());
        assert!(matches!(
            c.classify("x").await.unwrap_err(),
            AgentError::Timeout { secs: 30 }
        ));
    }

    #[tokio::test]
    async fn long_text_is_truncated_in_prompt() {
        let config = ClassificationConfig {
            max_chars: 10,
            ..ClassificationConfig::default()
        };
        let (c, gen) = classifier(Ok(r#"{"document_type": "ALBARAN", "confidence": 0.9}"#), config);
        c.classify(&"ñ".repeat(50)).await.unwrap();
        let prompt = gen.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains(&format!("{}...", "ñ".repeat(10))));
        assert!(!prompt.contains(&"ñ".repeat(11)));
    }

    #[test]
    fn truncate_keeps_short_text() {
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abcdef", 3), "abc...");
    }
}
