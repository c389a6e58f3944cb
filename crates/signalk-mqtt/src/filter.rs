//! Value screening and composite expansion.
//!
//! Only three kinds of values are published:
//! - finite numbers, unchanged
//! - explicit nulls, published as the string "null"
//! - `navigation.position` and `navigation.attitude` objects, decomposed
//!   into one scalar entry per known sub-field
//!
//! Everything else is dropped with a debug diagnostic. Screening never fails.

use signalk_core::{Entry, EntryValue, Path, RawUpdate, UpdateValue};
use serde_json::{Map, Value};
use tracing::debug;

/// Composite paths and the sub-fields they decompose into, in output order.
const COMPOSITES: &[(&str, &[&str])] = &[
    ("navigation.position", &["latitude", "longitude"]),
    ("navigation.attitude", &["roll", "pitch", "yaw"]),
];

/// How a raw update is treated.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification<'a> {
    /// A single publishable scalar.
    Scalar(EntryValue),
    /// A recognized structured value with the sub-fields to extract.
    Structured {
        fields: &'static [&'static str],
        object: &'a Map<String, Value>,
    },
    /// Not publishable.
    Discarded(String),
}

/// Screen a scalar value. Null is publishable and checked before the number
/// rules.
fn screen_scalar(value: &UpdateValue) -> Result<EntryValue, String> {
    match value {
        UpdateValue::Null => Ok(EntryValue::Null),
        UpdateValue::Number(n) if n.is_finite() => Ok(EntryValue::Number(*n)),
        UpdateValue::Number(n) => Err(format!("value is invalid, '{}'", n)),
        UpdateValue::Other(v) => Err(format!("value is invalid, '{}'", v)),
        UpdateValue::Object(_) => Err("value is a structured object".to_string()),
    }
}

/// Classify a raw update.
pub fn classify(update: &RawUpdate) -> Classification<'_> {
    match &update.value {
        UpdateValue::Object(object) => COMPOSITES
            .iter()
            .find(|(path, _)| *path == update.path)
            .map(|(_, fields)| Classification::Structured {
                fields: *fields,
                object,
            })
            .unwrap_or_else(|| Classification::Discarded("unsupported path".to_string())),
        scalar => match screen_scalar(scalar) {
            Ok(value) => Classification::Scalar(value),
            Err(reason) => Classification::Discarded(reason),
        },
    }
}

/// Decompose a recognized structured value.
///
/// A sub-field that is absent from the object produces no entry; a sub-field
/// that is present goes through the scalar rules, so an explicit null becomes
/// a null entry and a non-numeric sub-field is skipped.
pub fn expand(
    update: &RawUpdate,
    fields: &[&str],
    object: &Map<String, Value>,
) -> Vec<Entry> {
    let base = Path::new(&update.path);

    fields
        .iter()
        .filter_map(|field| {
            let path = base.child(field);
            let Some(raw) = object.get(*field) else {
                debug!("Skipping '{}', field missing from '{}'", path, update.path);
                return None;
            };
            match screen_scalar(&UpdateValue::from(raw)) {
                Ok(value) => Some(Entry {
                    path: path.as_str().to_string(),
                    value,
                    timestamp: update.timestamp,
                }),
                Err(reason) => {
                    debug!("Skipping path '{}' because {}", path, reason);
                    None
                }
            }
        })
        .collect()
}

/// Turn one raw update into zero or more publishable entries.
pub fn entries(update: &RawUpdate) -> Vec<Entry> {
    match classify(update) {
        Classification::Scalar(value) => vec![Entry {
            path: update.path.clone(),
            value,
            timestamp: update.timestamp,
        }],
        Classification::Structured { fields, object } => expand(update, fields, object),
        Classification::Discarded(reason) => {
            debug!("Skipping path '{}' because {}", update.path, reason);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn at() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 17, 10, 30, 0).unwrap()
    }

    fn raw(path: &str, value: Value) -> RawUpdate {
        RawUpdate::new(path, value, at())
    }

    #[test]
    fn test_finite_number_passes_unchanged() {
        let out = entries(&raw("environment.depth.belowTransducer", json!(12.34)));
        assert_eq!(out, vec![Entry::number("environment.depth.belowTransducer", 12.34, at())]);
    }

    #[test]
    fn test_null_is_publishable() {
        let out = entries(&raw("navigation.speedOverGround", Value::Null));
        assert_eq!(out, vec![Entry::null("navigation.speedOverGround", at())]);
    }

    #[test]
    fn test_non_finite_numbers_discarded() {
        for n in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let update = RawUpdate::new("navigation.speedOverGround", n, at());
            assert!(entries(&update).is_empty(), "{} should be discarded", n);
        }
    }

    #[test]
    fn test_non_numeric_scalars_discarded() {
        assert!(entries(&raw("navigation.destination.waypoint", json!("WP001"))).is_empty());
        assert!(entries(&raw("electrical.switches.anchorLight.state", json!(true))).is_empty());
        assert!(entries(&raw("navigation.gnss.satellitesInView", json!([1, 2]))).is_empty());
    }

    #[test]
    fn test_position_expansion() {
        let out = entries(&raw(
            "navigation.position",
            json!({"latitude": 60.1, "longitude": 24.9}),
        ));

        assert_eq!(
            out,
            vec![
                Entry::number("navigation.position.latitude", 60.1, at()),
                Entry::number("navigation.position.longitude", 24.9, at()),
            ]
        );
    }

    #[test]
    fn test_position_altitude_ignored() {
        let out = entries(&raw(
            "navigation.position",
            json!({"latitude": 60.1, "longitude": 24.9, "altitude": 3.0}),
        ));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_attitude_expansion() {
        let out = entries(&raw(
            "navigation.attitude",
            json!({"roll": 0.01, "pitch": -0.02, "yaw": 1.5}),
        ));

        let paths: Vec<&str> = out.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "navigation.attitude.roll",
                "navigation.attitude.pitch",
                "navigation.attitude.yaw"
            ]
        );
        assert!(out.iter().all(|e| e.timestamp == at()));
    }

    #[test]
    fn test_missing_subfield_skipped() {
        let out = entries(&raw("navigation.attitude", json!({"roll": 0.01, "yaw": 1.5})));
        let paths: Vec<&str> = out.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["navigation.attitude.roll", "navigation.attitude.yaw"]);
    }

    #[test]
    fn test_null_subfield_kept_as_null() {
        let out = entries(&raw(
            "navigation.position",
            json!({"latitude": null, "longitude": 24.9}),
        ));
        assert_eq!(out[0], Entry::null("navigation.position.latitude", at()));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_non_numeric_subfield_skipped() {
        let out = entries(&raw(
            "navigation.position",
            json!({"latitude": "north", "longitude": 24.9}),
        ));
        assert_eq!(out, vec![Entry::number("navigation.position.longitude", 24.9, at())]);
    }

    #[test]
    fn test_unsupported_object_discarded() {
        let update = raw(
            "navigation.courseRhumbline.nextPoint",
            json!({"latitude": 60.1, "longitude": 24.9}),
        );
        assert!(matches!(classify(&update), Classification::Discarded(_)));
        assert!(entries(&update).is_empty());
    }

    #[test]
    fn test_classify_scalar() {
        let update = raw("environment.wind.speedApparent", json!(7));
        assert_eq!(classify(&update), Classification::Scalar(EntryValue::Number(7.0)));
    }
}
