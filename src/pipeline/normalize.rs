//! Date normalisation of extracted JSON, applied before schema validation.
//!
//! Models copy dates the way the document prints them (`15/01/2025`,
//! `15.01.25`, `2025/01/15 08:30`). The schemas only accept ISO forms, so
//! known date fields are rewritten to `YYYY-MM-DD` and datetime fields to
//! `YYYY-MM-DDTHH:MM:SS`. Values that cannot be read are left untouched and
//! surface later as field errors.

use crate::document::DocumentType;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static DATE_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<date>[0-9./-]+)(?:[T ]+(?P<h>\d{1,2}):(?P<m>\d{2})(?::(?P<s>\d{2}))?)?$")
        .expect("valid regex")
});

static YEAR_FIRST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{4})[-/](\d{1,2})[-/](\d{1,2})$").expect("valid regex"));

static DAY_FIRST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(\d{1,2})([-/.])(\d{1,2})([-/.])(\d{4}|\d{2})$").expect("valid regex")
});

/// Top-level date and datetime fields of each document type.
fn date_fields(doc_type: DocumentType) -> (&'static [&'static str], &'static [&'static str]) {
    match doc_type {
        DocumentType::Albaran => (&["fecha_emision"], &[]),
        DocumentType::OrdenEnvio => (&["fecha_orden", "fecha_envio_programada"], &[]),
        DocumentType::NotaRecepcion => (&["fecha_recepcion"], &[]),
        DocumentType::ParteTransporte => (&[], &["fecha_salida", "fecha_llegada_estimada"]),
    }
}

/// Rewrite the date fields of `doc_type` in `value` to ISO form, in place.
pub fn normalise_dates(doc_type: DocumentType, value: &mut Value) {
    let Some(obj) = value.as_object_mut() else {
        return;
    };
    let (dates, datetimes) = date_fields(doc_type);

    for key in dates {
        if let Some(Value::String(s)) = obj.get_mut(*key) {
            if let Some((date, _)) = parse_loose(s) {
                *s = date.format("%Y-%m-%d").to_string();
            }
        }
    }
    for key in datetimes {
        if let Some(Value::String(s)) = obj.get_mut(*key) {
            if let Some((date, time)) = parse_loose(s) {
                let dt = NaiveDateTime::new(date, time.unwrap_or(NaiveTime::MIN));
                *s = dt.format("%Y-%m-%dT%H:%M:%S").to_string();
            }
        }
    }
}

/// Read a date with an optional `HH:MM[:SS]` time part.
pub fn parse_loose(raw: &str) -> Option<(NaiveDate, Option<NaiveTime>)> {
    let caps = DATE_TIME.captures(raw.trim())?;
    let date = parse_date(&caps["date"])?;
    let time = match caps.name("h") {
        Some(h) => {
            let s = caps.name("s").map_or(Some(0), |s| s.as_str().parse().ok())?;
            Some(NaiveTime::from_hms_opt(
                h.as_str().parse().ok()?,
                caps["m"].parse().ok()?,
                s,
            )?)
        }
        None => None,
    };
    Some((date, time))
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    if let Some(c) = YEAR_FIRST.captures(raw) {
        return NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
    }
    let c = DAY_FIRST.captures(raw)?;
    // Mixed separators such as 15/01-2025 are not dates.
    if c[2] != c[4] {
        return None;
    }
    let year: i32 = c[5].parse().ok()?;
    let year = match c[5].len() {
        2 if year < 70 => 2000 + year,
        2 => 1900 + year,
        _ => year,
    };
    NaiveDate::from_ymd_opt(year, c[3].parse().ok()?, c[1].parse().ok()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn accepted_date_forms() {
        for raw in ["2025-01-15", "2025/01/15", "15/01/2025", "15-01-2025", "15.01.2025", "15/1/25"] {
            assert_eq!(parse_loose(raw).map(|(d, _)| d), Some(ymd(2025, 1, 15)), "{raw}");
        }
    }

    #[test]
    fn rejected_date_forms() {
        for raw in ["15 de enero", "31/02/2025", "15/01-2025", "", "2025-13-01"] {
            assert!(parse_loose(raw).is_none(), "{raw}");
        }
    }

    #[test]
    fn time_parts() {
        let (_, t) = parse_loose("10/01/2025 08:30").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(8, 30, 0));
        let (_, t) = parse_loose("2025-01-10T14:30:15").unwrap();
        assert_eq!(t, NaiveTime::from_hms_opt(14, 30, 15));
        assert!(parse_loose("2025-01-10 25:00").is_none());
    }

    #[test]
    fn albaran_date_is_rewritten() {
        let mut v = json!({"fecha_emision": "15/01/2025", "numero_albaran": "15/01/2025"});
        normalise_dates(DocumentType::Albaran, &mut v);
        assert_eq!(v["fecha_emision"], "2025-01-15");
        assert_eq!(v["numero_albaran"], "15/01/2025");
    }

    #[test]
    fn transport_datetimes_are_rewritten() {
        let mut v = json!({
            "fecha_salida": "10/01/2025 08:00",
            "fecha_llegada_estimada": "2025-01-10"
        });
        normalise_dates(DocumentType::ParteTransporte, &mut v);
        assert_eq!(v["fecha_salida"], "2025-01-10T08:00:00");
        assert_eq!(v["fecha_llegada_estimada"], "2025-01-10T00:00:00");
    }

    #[test]
    fn unreadable_values_are_left_alone() {
        let mut v = json!({"fecha_orden": "mañana", "fecha_envio_programada": 20250115});
        normalise_dates(DocumentType::OrdenEnvio, &mut v);
        assert_eq!(v["fecha_orden"], "mañana");
        assert_eq!(v["fecha_envio_programada"], 20250115);
    }
}
