//! Delivery note (albarán).

use super::fields::{Cliente, Producto, Proveedor};
use super::Violations;
use crate::error::FieldError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NUMERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ALB-\d{8}$").expect("valid regex"));

/// Maximum accepted gap between `total` and the sum of line subtotals.
pub const TOTAL_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlbaranFields {
    pub numero_albaran: String,
    pub fecha_emision: NaiveDate,
    pub proveedor: Proveedor,
    pub cliente: Cliente,
    pub productos: Vec<Producto>,
    pub total: f64,
    #[serde(default)]
    pub firma_transportista: bool,
    #[serde(default)]
    pub sello_empresa: bool,
    #[serde(default)]
    pub observaciones: Option<String>,
}

impl AlbaranFields {
    pub fn validate(self, today: NaiveDate) -> Result<Self, Vec<FieldError>> {
        let mut v = Violations::default();
        v.pattern(&NUMERO, &self.numero_albaran, "numero_albaran", "ALB-YYYYMMDD");
        v.check(
            self.fecha_emision <= today,
            "fecha_emision",
            format!("{} is in the future", self.fecha_emision),
        );
        v.non_empty(&self.productos, "productos");
        for (i, p) in self.productos.iter().enumerate() {
            p.check(&format!("productos.{i}"), &mut v);
        }
        v.check(self.total >= 0.0, "total", "must not be negative");

        let sum = self.subtotal_sum();
        v.check(
            sum <= 0.0 || (self.total - sum).abs() <= TOTAL_TOLERANCE,
            "total",
            format!(
                "total ({:.2}) does not match the sum of subtotals ({:.2})",
                self.total, sum
            ),
        );
        v.finish(self)
    }

    /// Sum of the line subtotals that are present.
    pub fn subtotal_sum(&self) -> f64 {
        self.productos.iter().filter_map(|p| p.subtotal).sum()
    }
}
