//! Per-document-type field schemas.
//!
//! Each document type has one record struct whose serde shape is the JSON
//! the model is asked to produce (Spanish field names, as printed on the
//! paper documents). Decoding checks structure; `validate` then checks every
//! business rule and returns *all* violations at once so the extractor can
//! feed the complete list back to the model.
//!
//! [`ExtractedFields`] is the closed sum over the four records. The only
//! place that maps a [`DocumentType`] to a schema is [`ExtractedFields::from_value`].

mod albaran;
mod fields;
mod nota_recepcion;
mod orden_envio;
mod parte_transporte;

pub use albaran::AlbaranFields;
pub use fields::{
    Carga, Cliente, Conductor, Producto, ProductoOrdenado, ProductoRecibido, Proveedor, Ubicacion,
};
pub use nota_recepcion::NotaRecepcionFields;
pub use orden_envio::OrdenEnvioFields;
pub use parte_transporte::ParteTransporteFields;

use crate::document::DocumentType;
use crate::error::FieldError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A validated record, one variant per [`DocumentType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExtractedFields {
    Albaran(AlbaranFields),
    OrdenEnvio(OrdenEnvioFields),
    NotaRecepcion(NotaRecepcionFields),
    ParteTransporte(ParteTransporteFields),
}

impl ExtractedFields {
    /// Decode and validate `value` against the schema for `doc_type`.
    ///
    /// `today` bounds the "not in the future" rules.
    pub fn from_value(
        doc_type: DocumentType,
        value: serde_json::Value,
        today: NaiveDate,
    ) -> Result<Self, Vec<FieldError>> {
        match doc_type {
            DocumentType::Albaran => decode::<AlbaranFields>(value)?
                .validate(today)
                .map(ExtractedFields::Albaran),
            DocumentType::OrdenEnvio => decode::<OrdenEnvioFields>(value)?
                .validate()
                .map(ExtractedFields::OrdenEnvio),
            DocumentType::NotaRecepcion => decode::<NotaRecepcionFields>(value)?
                .validate(today)
                .map(ExtractedFields::NotaRecepcion),
            DocumentType::ParteTransporte => decode::<ParteTransporteFields>(value)?
                .validate()
                .map(ExtractedFields::ParteTransporte),
        }
    }

    pub fn document_type(&self) -> DocumentType {
        match self {
            ExtractedFields::Albaran(_) => DocumentType::Albaran,
            ExtractedFields::OrdenEnvio(_) => DocumentType::OrdenEnvio,
            ExtractedFields::NotaRecepcion(_) => DocumentType::NotaRecepcion,
            ExtractedFields::ParteTransporte(_) => DocumentType::ParteTransporte,
        }
    }

    /// Any signature flag set on the record.
    pub fn signatures_detected(&self) -> bool {
        match self {
            ExtractedFields::Albaran(a) => a.firma_transportista,
            ExtractedFields::NotaRecepcion(n) => n.firma_receptor,
            ExtractedFields::ParteTransporte(p) => p.firma_origen,
            ExtractedFields::OrdenEnvio(_) => false,
        }
    }

    /// Company stamp present (delivery notes only carry this flag).
    pub fn stamps_detected(&self) -> bool {
        matches!(self, ExtractedFields::Albaran(a) if a.sello_empresa)
    }
}

static MISSING_FIELD: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:missing|unknown) field `([^`]+)`").expect("valid regex"));

/// Structural decode. A failure becomes a single [`FieldError`] named after
/// the offending field when serde reports one.
fn decode<T: DeserializeOwned>(value: serde_json::Value) -> Result<T, Vec<FieldError>> {
    serde_json::from_value(value).map_err(|e| {
        let msg = e.to_string();
        let field = MISSING_FIELD
            .captures(&msg)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "$".to_string());
        vec![FieldError::new(field, msg)]
    })
}

// ── Rule collector ───────────────────────────────────────────────────────

/// Accumulates rule violations for one record.
#[derive(Debug, Default)]
pub(crate) struct Violations(Vec<FieldError>);

impl Violations {
    pub(crate) fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError::new(field, message));
    }

    /// Record `message` against `field` unless `ok` holds.
    pub(crate) fn check(&mut self, ok: bool, field: impl Into<String>, message: impl Into<String>) {
        if !ok {
            self.push(field, message);
        }
    }

    pub(crate) fn pattern(&mut self, re: &Regex, value: &str, field: &str, shape: &str) {
        self.check(
            re.is_match(value),
            field,
            format!("value '{value}' does not match pattern {shape}"),
        );
    }

    pub(crate) fn non_empty<T>(&mut self, items: &[T], field: &str) {
        self.check(!items.is_empty(), field, "must contain at least one item");
    }

    pub(crate) fn finish<T>(self, value: T) -> Result<T, Vec<FieldError>> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(self.0)
        }
    }
}
