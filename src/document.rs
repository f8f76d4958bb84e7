//! Core domain values: document types, bounding boxes and OCR text blocks.
//!
//! [`BoundingBox`] and [`OcrResult`] are validated on construction and
//! immutable afterwards: their fields are private and the only way to obtain
//! one is through a constructor that enforces the invariants (or through
//! `Deserialize`, which routes through the same constructor).

use crate::error::BlockError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The four logistics document types the agent understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentType {
    /// Delivery note.
    Albaran,
    /// Shipping order / picking list.
    OrdenEnvio,
    /// Goods-received note.
    NotaRecepcion,
    /// Transport sheet (CMR).
    ParteTransporte,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::Albaran,
        DocumentType::OrdenEnvio,
        DocumentType::NotaRecepcion,
        DocumentType::ParteTransporte,
    ];

    /// Wire label, e.g. `"ORDEN_ENVIO"`.
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::Albaran => "ALBARAN",
            DocumentType::OrdenEnvio => "ORDEN_ENVIO",
            DocumentType::NotaRecepcion => "NOTA_RECEPCION",
            DocumentType::ParteTransporte => "PARTE_TRANSPORTE",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a label is not one of the four document types.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown document type '{0}'")]
pub struct UnknownDocumentType(pub String);

impl FromStr for DocumentType {
    type Err = UnknownDocumentType;

    /// Case-insensitive; surrounding whitespace is ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_uppercase();
        DocumentType::ALL
            .into_iter()
            .find(|t| t.as_str() == label)
            .ok_or_else(|| UnknownDocumentType(s.to_string()))
    }
}

// ── BoundingBox ──────────────────────────────────────────────────────────

/// Axis-aligned rectangle in pixel coordinates, `x2 > x1` and `y2 > y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawBox")]
pub struct BoundingBox {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

#[derive(Deserialize)]
struct RawBox {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl TryFrom<RawBox> for BoundingBox {
    type Error = BlockError;

    fn try_from(r: RawBox) -> Result<Self, Self::Error> {
        BoundingBox::new(r.x1, r.y1, r.x2, r.y2)
    }
}

impl BoundingBox {
    /// Build a box, rejecting degenerate or inverted coordinates.
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self, BlockError> {
        if x2 <= x1 {
            return Err(BlockError::InvertedX { x1, x2 });
        }
        if y2 <= y1 {
            return Err(BlockError::InvertedY { y1, y2 });
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Smallest box enclosing a quadrilateral. Negative coordinates clamp to 0.
    pub fn from_quad(quad: &[[f32; 2]; 4]) -> Result<Self, BlockError> {
        Self::from_points(quad.iter().map(|p| (p[0], p[1])))
    }

    /// Smallest box enclosing a polygon. Negative coordinates clamp to 0.
    pub fn from_points(points: impl IntoIterator<Item = (f32, f32)>) -> Result<Self, BlockError> {
        let points: Vec<(f32, f32)> = points.into_iter().collect();
        if points.is_empty() || points.iter().any(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(BlockError::InvalidPolygon);
        }
        let xs = points.iter().map(|p| p.0);
        let ys = points.iter().map(|p| p.1);
        let min_x = xs.clone().fold(f32::INFINITY, f32::min);
        let max_x = xs.fold(f32::NEG_INFINITY, f32::max);
        let min_y = ys.clone().fold(f32::INFINITY, f32::min);
        let max_y = ys.fold(f32::NEG_INFINITY, f32::max);
        Self::new(
            min_x.max(0.0) as u32,
            min_y.max(0.0) as u32,
            max_x.max(0.0) as u32,
            max_y.max(0.0) as u32,
        )
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }
    pub fn y1(&self) -> u32 {
        self.y1
    }
    pub fn x2(&self) -> u32 {
        self.x2
    }
    pub fn y2(&self) -> u32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }

    /// Integer centre point `(cx, cy)`.
    pub fn center(&self) -> (u32, u32) {
        ((self.x1 + self.x2) / 2, (self.y1 + self.y2) / 2)
    }
}

// ── OcrResult ────────────────────────────────────────────────────────────

/// One recognised text block: trimmed non-empty text, its box, and a
/// confidence in `[0, 1]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawOcrResult")]
pub struct OcrResult {
    text: String,
    bbox: BoundingBox,
    confidence: f32,
}

#[derive(Deserialize)]
struct RawOcrResult {
    text: String,
    bbox: BoundingBox,
    confidence: f32,
}

impl TryFrom<RawOcrResult> for OcrResult {
    type Error = BlockError;

    fn try_from(r: RawOcrResult) -> Result<Self, Self::Error> {
        OcrResult::new(r.text, r.bbox, r.confidence)
    }
}

impl OcrResult {
    /// Build a block. Text is trimmed; whitespace-only text and confidences
    /// outside `[0, 1]` are rejected.
    pub fn new(
        text: impl AsRef<str>,
        bbox: BoundingBox,
        confidence: f32,
    ) -> Result<Self, BlockError> {
        let text = text.as_ref().trim();
        if text.is_empty() {
            return Err(BlockError::EmptyText);
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(BlockError::ConfidenceOutOfRange(confidence));
        }
        Ok(Self {
            text: text.to_string(),
            bbox,
            confidence,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn confidence(&self) -> f32 {
        self.confidence
    }
}

/// Mean confidence of a set of blocks; 0 for an empty set.
pub fn average_confidence(results: &[OcrResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.confidence).sum::<f32>() / results.len() as f32
}

/// Join block texts with single spaces, in engine order.
pub fn concatenate_text(results: &[OcrResult]) -> String {
    results
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Group blocks into rows by top-edge proximity, each row left-to-right.
///
/// Blocks are sorted by `y1`; a block joins the current row while its `y1`
/// is within `y_tolerance` pixels of the row's first block. Short rows are
/// padded with empty cells to the width of the widest row.
pub fn assemble_rows(results: &[OcrResult], y_tolerance: u32) -> Vec<Vec<String>> {
    let mut sorted: Vec<&OcrResult> = results.iter().collect();
    sorted.sort_by_key(|r| (r.bbox.y1, r.bbox.x1));

    let mut rows: Vec<Vec<&OcrResult>> = Vec::new();
    let mut row_top: Option<u32> = None;
    for block in sorted {
        match row_top {
            Some(top) if block.bbox.y1.abs_diff(top) <= y_tolerance => {
                if let Some(row) = rows.last_mut() {
                    row.push(block);
                }
            }
            _ => {
                row_top = Some(block.bbox.y1);
                rows.push(vec![block]);
            }
        }
    }

    let width = rows.iter().map(Vec::len).max().unwrap_or(0);
    rows.into_iter()
        .map(|mut row| {
            row.sort_by_key(|r| r.bbox.x1);
            let mut cells: Vec<String> = row.into_iter().map(|r| r.text.clone()).collect();
            cells.resize(width, String::new());
            cells
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(text: &str, x1: u32, y1: u32, conf: f32) -> OcrResult {
        OcrResult::new(text, BoundingBox::new(x1, y1, x1 + 50, y1 + 20).unwrap(), conf).unwrap()
    }

    #[test]
    fn bbox_derived_values() {
        let b = BoundingBox::new(10, 20, 100, 200).unwrap();
        assert_eq!(b.width(), 90);
        assert_eq!(b.height(), 180);
        assert_eq!(b.area(), 90 * 180);
        assert_eq!(b.center(), (55, 110));
    }

    #[test]
    fn bbox_rejects_inverted_coordinates() {
        assert!(BoundingBox::new(100, 20, 10, 200).is_err());
        assert!(BoundingBox::new(10, 200, 100, 20).is_err());
        assert!(BoundingBox::new(10, 10, 10, 20).is_err(), "zero width");
    }

    #[test]
    fn bbox_deserialize_enforces_invariant() {
        let ok: Result<BoundingBox, _> =
            serde_json::from_str(r#"{"x1":1,"y1":2,"x2":3,"y2":4}"#);
        assert!(ok.is_ok());
        let bad: Result<BoundingBox, _> =
            serde_json::from_str(r#"{"x1":5,"y1":2,"x2":3,"y2":4}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn bbox_errors_are_typed() {
        assert_eq!(
            BoundingBox::new(100, 20, 10, 200),
            Err(BlockError::InvertedX { x1: 100, x2: 10 })
        );
        assert_eq!(
            BoundingBox::from_quad(&[[f32::NAN, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]),
            Err(BlockError::InvalidPolygon)
        );
        assert_eq!(
            BoundingBox::from_points(Vec::new()),
            Err(BlockError::InvalidPolygon)
        );
    }

    #[test]
    fn bbox_from_polygon_points() {
        let b = BoundingBox::from_points([(5.4, 3.0), (80.0, 2.2), (81.7, 30.0), (-2.0, 31.9)])
            .unwrap();
        assert_eq!((b.x1(), b.y1(), b.x2(), b.y2()), (0, 2, 81, 31));
    }

    #[test]
    fn bbox_from_rotated_quad() {
        let quad = [[12.6, 8.0], [110.2, 10.5], [109.0, 40.9], [11.0, 38.0]];
        let b = BoundingBox::from_quad(&quad).unwrap();
        assert_eq!((b.x1(), b.y1(), b.x2(), b.y2()), (11, 8, 110, 40));
    }

    #[test]
    fn ocr_result_trims_text() {
        let r = block("  Hola Mundo  ", 0, 0, 0.95);
        assert_eq!(r.text(), "Hola Mundo");
    }

    #[test]
    fn ocr_result_rejects_blank_text_and_bad_confidence() {
        let b = BoundingBox::new(0, 0, 10, 10).unwrap();
        assert_eq!(OcrResult::new("   ", b, 0.9), Err(BlockError::EmptyText));
        assert!(OcrResult::new("", b, 0.9).is_err());
        assert_eq!(
            OcrResult::new("x", b, 1.2),
            Err(BlockError::ConfidenceOutOfRange(1.2))
        );
        assert!(OcrResult::new("x", b, -0.1).is_err());
    }

    #[test]
    fn document_type_parses_case_insensitively() {
        assert_eq!("albaran".parse::<DocumentType>().unwrap(), DocumentType::Albaran);
        assert_eq!(
            " PARTE_TRANSPORTE ".parse::<DocumentType>().unwrap(),
            DocumentType::ParteTransporte
        );
        assert!("FACTURA".parse::<DocumentType>().is_err());
    }

    #[test]
    fn document_type_serialises_as_label() {
        let json = serde_json::to_string(&DocumentType::NotaRecepcion).unwrap();
        assert_eq!(json, "\"NOTA_RECEPCION\"");
    }

    #[test]
    fn concatenation_and_average() {
        let blocks = vec![block("ALBARAN", 0, 0, 0.9), block("ALB-20250115", 60, 0, 0.7)];
        assert_eq!(concatenate_text(&blocks), "ALBARAN ALB-20250115");
        assert!((average_confidence(&blocks) - 0.8).abs() < 1e-6);
        assert_eq!(average_confidence(&[]), 0.0);
    }

    #[test]
    fn rows_are_grouped_and_ordered() {
        let blocks = vec![
            block("Qty", 200, 52, 0.9),
            block("Code", 10, 50, 0.9),
            block("P001", 10, 100, 0.9),
            block("10", 200, 104, 0.9),
            block("Total", 10, 150, 0.9),
        ];
        let rows = assemble_rows(&blocks, 10);
        assert_eq!(
            rows,
            vec![
                vec!["Code".to_string(), "Qty".to_string()],
                vec!["P001".to_string(), "10".to_string()],
                vec!["Total".to_string(), String::new()],
            ]
        );
    }
}
