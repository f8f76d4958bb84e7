//! Transport sheet (parte de transporte).

use super::fields::{Carga, Conductor, Ubicacion};
use super::Violations;
use crate::error::FieldError;
use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

static NUMERO: Lazy<Regex> = Lazy::new(|| Regex::new(r"^PT-\d{8}$").expect("valid regex"));
static MATRICULA: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{4}-[A-Z]{3}$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParteTransporteFields {
    pub numero_parte: String,
    pub fecha_salida: NaiveDateTime,
    pub fecha_llegada_estimada: NaiveDateTime,
    pub matricula_vehiculo: String,
    pub conductor: Conductor,
    pub origen: Ubicacion,
    pub destino: Ubicacion,
    pub carga: Vec<Carga>,
    pub kilometraje_inicial: i64,
    #[serde(default)]
    pub kilometraje_final: Option<i64>,
    #[serde(default)]
    pub firma_origen: bool,
    #[serde(default)]
    pub firma_destino: Option<bool>,
    #[serde(default)]
    pub incidencias: Option<String>,
}

impl ParteTransporteFields {
    pub fn validate(self) -> Result<Self, Vec<FieldError>> {
        let mut v = Violations::default();
        v.pattern(&NUMERO, &self.numero_parte, "numero_parte", "PT-YYYYMMDD");
        v.pattern(
            &MATRICULA,
            &self.matricula_vehiculo,
            "matricula_vehiculo",
            "NNNN-LLL",
        );
        v.check(
            self.fecha_llegada_estimada > self.fecha_salida,
            "fecha_llegada_estimada",
            format!(
                "arrival {} must be after departure {}",
                self.fecha_llegada_estimada, self.fecha_salida
            ),
        );
        v.non_empty(&self.carga, "carga");
        for (i, c) in self.carga.iter().enumerate() {
            c.check(&format!("carga.{i}"), &mut v);
        }
        v.check(
            self.kilometraje_inicial >= 0,
            "kilometraje_inicial",
            "must not be negative",
        );
        if let Some(fin) = self.kilometraje_final {
            v.check(
                fin >= self.kilometraje_inicial,
                "kilometraje_final",
                format!(
                    "final odometer {fin} is below initial {}",
                    self.kilometraje_inicial
                ),
            );
        }
        v.finish(self)
    }
}
