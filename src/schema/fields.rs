//! Nested records shared by the document schemas.

use super::Violations;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proveedor {
    pub razon_social: String,
    #[serde(default)]
    pub cif: Option<String>,
    #[serde(default)]
    pub direccion: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cliente {
    pub razon_social: String,
    #[serde(default)]
    pub cif: Option<String>,
    #[serde(default)]
    pub direccion_entrega: Option<String>,
}

/// Delivery-note line item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Producto {
    pub codigo_producto: String,
    pub descripcion: String,
    pub cantidad: i64,
    #[serde(default)]
    pub precio_unitario: Option<f64>,
    #[serde(default)]
    pub subtotal: Option<f64>,
}

impl Producto {
    pub(crate) fn check(&self, path: &str, v: &mut Violations) {
        v.check(
            self.cantidad > 0,
            format!("{path}.cantidad"),
            format!("must be greater than 0 (got {})", self.cantidad),
        );
        if let Some(p) = self.precio_unitario {
            v.check(p >= 0.0, format!("{path}.precio_unitario"), "must not be negative");
        }
        if let Some(s) = self.subtotal {
            v.check(s >= 0.0, format!("{path}.subtotal"), "must not be negative");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ubicacion {
    pub ubicacion: String,
    #[serde(default)]
    pub direccion: Option<String>,
    #[serde(default)]
    pub codigo_postal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conductor {
    pub nombre: String,
    #[serde(default)]
    pub dni: Option<String>,
    #[serde(default)]
    pub licencia: Option<String>,
}

/// One consignment carried on a transport sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Carga {
    pub numero_albaran: String,
    pub bultos: i64,
    pub peso_kg: f64,
}

impl Carga {
    pub(crate) fn check(&self, path: &str, v: &mut Violations) {
        v.check(
            self.bultos > 0,
            format!("{path}.bultos"),
            format!("must be greater than 0 (got {})", self.bultos),
        );
        v.check(
            self.peso_kg > 0.0,
            format!("{path}.peso_kg"),
            format!("must be greater than 0 (got {})", self.peso_kg),
        );
    }
}

/// Allowed receipt states, stored lowercase.
pub const ESTADOS_VALIDOS: [&str; 3] = ["correcto", "danado", "faltante"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductoRecibido {
    pub codigo: String,
    pub descripcion: String,
    pub cantidad_esperada: i64,
    pub cantidad_recibida: i64,
    pub estado: String,
    #[serde(default)]
    pub observaciones: Option<String>,
}

impl ProductoRecibido {
    /// Lowercases `estado` and records any violations.
    pub(crate) fn normalise(mut self, path: &str, v: &mut Violations) -> Self {
        self.estado = self.estado.trim().to_lowercase();
        v.check(
            self.cantidad_esperada > 0,
            format!("{path}.cantidad_esperada"),
            format!("must be greater than 0 (got {})", self.cantidad_esperada),
        );
        v.check(
            self.cantidad_recibida >= 0,
            format!("{path}.cantidad_recibida"),
            "must not be negative",
        );
        v.check(
            ESTADOS_VALIDOS.contains(&self.estado.as_str()),
            format!("{path}.estado"),
            format!(
                "'{}' is not one of: {}",
                self.estado,
                ESTADOS_VALIDOS.join(", ")
            ),
        );
        self
    }

    pub fn has_discrepancy(&self) -> bool {
        self.cantidad_esperada != self.cantidad_recibida || self.estado != "correcto"
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductoOrdenado {
    pub codigo: String,
    pub descripcion: String,
    pub cantidad_ordenada: i64,
    #[serde(default)]
    pub ubicacion_almacen: Option<String>,
}

impl ProductoOrdenado {
    pub(crate) fn check(&self, path: &str, v: &mut Violations) {
        v.check(
            self.cantidad_ordenada > 0,
            format!("{path}.cantidad_ordenada"),
            format!("must be greater than 0 (got {})", self.cantidad_ordenada),
        );
    }
}
