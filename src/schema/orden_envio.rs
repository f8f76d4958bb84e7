//! Shipping order (orden de envío).

use super::fields::{ProductoOrdenado, Ubicacion};
use super::Violations;
use crate::error::FieldError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NUMERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^ORD-\d{8}$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrdenEnvioFields {
    pub numero_orden: String,
    pub fecha_orden: NaiveDate,
    pub fecha_envio_programada: NaiveDate,
    pub origen: Ubicacion,
    pub destino: Ubicacion,
    pub productos: Vec<ProductoOrdenado>,
    #[serde(default)]
    pub transportista: Option<String>,
    #[serde(default)]
    pub instrucciones_especiales: Option<String>,
}

impl OrdenEnvioFields {
    pub fn validate(self) -> Result<Self, Vec<FieldError>> {
        let mut v = Violations::default();
        v.pattern(&NUMERO, &self.numero_orden, "numero_orden", "ORD-YYYYMMDD");
        v.check(
            self.fecha_envio_programada >= self.fecha_orden,
            "fecha_envio_programada",
            format!(
                "shipping date {} is before order date {}",
                self.fecha_envio_programada, self.fecha_orden
            ),
        );
        v.non_empty(&self.productos, "productos");
        for (i, p) in self.productos.iter().enumerate() {
            p.check(&format!("productos.{i}"), &mut v);
        }
        v.finish(self)
    }
}
