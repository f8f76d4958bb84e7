//! Goods-received note (nota de recepción).

use super::fields::ProductoRecibido;
use super::Violations;
use crate::error::FieldError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NUMERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^REC-\d{8}$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotaRecepcionFields {
    pub numero_recepcion: String,
    pub fecha_recepcion: NaiveDate,
    pub referencia_pedido: String,
    pub referencia_albaran: String,
    pub proveedor: String,
    pub productos_recibidos: Vec<ProductoRecibido>,
    #[serde(default)]
    pub discrepancias: bool,
    #[serde(default)]
    pub firma_receptor: bool,
    #[serde(default)]
    pub observaciones_calidad: Option<String>,
}

impl NotaRecepcionFields {
    /// Validates the note. Item states are lowercased and `discrepancias` is
    /// forced on when any item differs from what was expected.
    pub fn validate(mut self, today: NaiveDate) -> Result<Self, Vec<FieldError>> {
        let mut v = Violations::default();
        v.pattern(
            &NUMERO,
            &self.numero_recepcion,
            "numero_recepcion",
            "REC-YYYYMMDD",
        );
        v.check(
            self.fecha_recepcion <= today,
            "fecha_recepcion",
            format!("{} is in the future", self.fecha_recepcion),
        );
        v.non_empty(&self.productos_recibidos, "productos_recibidos");

        self.productos_recibidos = std::mem::take(&mut self.productos_recibidos)
            .into_iter()
            .enumerate()
            .map(|(i, p)| p.normalise(&format!("productos_recibidos.{i}"), &mut v))
            .collect();

        if self.productos_recibidos.iter().any(ProductoRecibido::has_discrepancy) {
            self.discrepancias = true;
        }
        v.finish(self)
    }
}
