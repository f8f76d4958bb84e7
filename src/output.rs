//! The terminal artifact of one pipeline run.

use crate::document::DocumentType;
use crate::error::AgentError;
use crate::schema::ExtractedFields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Crate version recorded in every result.
pub const AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Overall outcome of validation for a processed document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidationStatus {
    /// Fields validated and no warnings were raised.
    Valid,
    /// Fields validated; at least one non-fatal warning was raised.
    Warning,
}

impl ValidationStatus {
    pub fn from_warnings(warnings: &[String]) -> Self {
        if warnings.is_empty() {
            ValidationStatus::Valid
        } else {
            ValidationStatus::Warning
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValidationStatus::Valid => "valid",
            ValidationStatus::Warning => "warning",
        }
    }
}

/// Everything known about one successfully processed document.
///
/// Serialises to the persisted JSON layout field-for-field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedDocument {
    // ── File metadata ────────────────────────────────────────────────────
    pub file_path: String,
    pub file_name: String,
    pub file_size_kb: f64,
    pub processing_timestamp: DateTime<Utc>,
    pub processing_time_seconds: f64,
    pub agent_version: String,

    // ── Classification ───────────────────────────────────────────────────
    pub document_type: DocumentType,
    pub classification_confidence: f32,

    // ── OCR summary ──────────────────────────────────────────────────────
    pub ocr_engine_used: String,
    pub ocr_average_confidence: f32,
    pub total_text_blocks: usize,

    // ── Detection flags ──────────────────────────────────────────────────
    pub tables_detected: u32,
    pub signatures_detected: bool,
    pub stamps_detected: bool,

    // ── Fields and validation ────────────────────────────────────────────
    pub extracted_fields: ExtractedFields,
    pub validation_status: ValidationStatus,
    pub validation_errors: Vec<String>,
    pub validation_warnings: Vec<String>,

    pub raw_ocr_text: Option<String>,
}

impl ProcessedDocument {
    /// Serialise to JSON, indented with two spaces when `pretty`.
    pub fn to_json(&self, pretty: bool) -> Result<String, AgentError> {
        let out = if pretty {
            serde_json::to_string_pretty(self)
        } else {
            serde_json::to_string(self)
        };
        out.map_err(|e| AgentError::Internal(format!("JSON serialisation failed: {e}")))
    }

    /// Write the document to `path` atomically (temp file + rename),
    /// creating parent directories as needed.
    pub async fn write_json(&self, path: &Path, pretty: bool) -> Result<(), AgentError> {
        let json = self.to_json(pretty)?;
        let write_err = |source| AgentError::OutputWriteFailed {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        let tmp_path = path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json.as_bytes())
            .await
            .map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;
        Ok(())
    }
}

/// Round to two decimal places, as stored in the result.
pub(crate) fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn sample() -> ProcessedDocument {
        let fields = ExtractedFields::from_value(
            DocumentType::OrdenEnvio,
            json!({
                "numero_orden": "ORD-20250120",
                "fecha_orden": "2025-01-20",
                "fecha_envio_programada": "2025-01-22",
                "origen": { "ubicacion": "Almacen Central" },
                "destino": { "ubicacion": "Tienda 12" },
                "productos": [{ "codigo": "A-1", "descripcion": "Cajas", "cantidad_ordenada": 5 }]
            }),
            NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
        )
        .unwrap();
        ProcessedDocument {
            file_path: "/tmp/orden.png".into(),
            file_name: "orden.png".into(),
            file_size_kb: 123.46,
            processing_timestamp: Utc::now(),
            processing_time_seconds: 2.5,
            agent_version: AGENT_VERSION.into(),
            document_type: DocumentType::OrdenEnvio,
            classification_confidence: 0.93,
            ocr_engine_used: "tesseract".into(),
            ocr_average_confidence: 0.88,
            total_text_blocks: 42,
            tables_detected: 0,
            signatures_detected: false,
            stamps_detected: false,
            extracted_fields: fields,
            validation_status: ValidationStatus::Valid,
            validation_errors: vec![],
            validation_warnings: vec![],
            raw_ocr_text: None,
        }
    }

    #[test]
    fn status_follows_warnings() {
        assert_eq!(ValidationStatus::from_warnings(&[]), ValidationStatus::Valid);
        assert_eq!(
            ValidationStatus::from_warnings(&["low variance".into()]),
            ValidationStatus::Warning
        );
    }

    #[test]
    fn json_layout() {
        let v: serde_json::Value = serde_json::from_str(&sample().to_json(false).unwrap()).unwrap();
        assert_eq!(v["document_type"], "ORDEN_ENVIO");
        assert_eq!(v["validation_status"], "valid");
        assert_eq!(v["extracted_fields"]["numero_orden"], "ORD-20250120");
        assert!(v["raw_ocr_text"].is_null());
        assert_eq!(v["tables_detected"], 0);
    }

    #[test]
    fn round2_rounds() {
        assert_eq!(round2(1.23456), 1.23);
        assert_eq!(round2(0.005_1), 0.01);
    }

    #[tokio::test]
    async fn write_json_creates_parents_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/out/orden.json");
        sample().write_json(&path, true).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n  \""), "two-space indent");
        assert!(!path.with_extension("json.tmp").exists());
    }
}
