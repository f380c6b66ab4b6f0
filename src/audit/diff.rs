//! Field-level before/after diffs between two row images.

use crate::config::AuditConfig;
use crate::core::{Record, Value};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as JsonValue};
use uuid::Uuid;

/// The changed fields only, rendered as JSON-safe values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditDiff {
    pub before: Map<String, JsonValue>,
    pub after: Map<String, JsonValue>,
}

impl AuditDiff {
    pub fn is_empty(&self) -> bool {
        self.before.is_empty() && self.after.is_empty()
    }

    pub fn fields(&self) -> Vec<&str> {
        self.after.keys().map(String::as_str).collect()
    }
}

/// Compares two images of a `table` row.
///
/// Only fields present in both images are considered; a field added or
/// dropped between the images never appears. Ignored tables produce an
/// empty diff, ignored fields are skipped.
pub fn diff_records(table: &str, before: &Record, after: &Record, config: &AuditConfig) -> AuditDiff {
    let mut diff = AuditDiff::default();
    if config.is_table_ignored(table) {
        return diff;
    }

    for (field, old) in before {
        let Some(new) = after.get(field) else {
            continue;
        };
        if old == new || config.is_field_ignored(table, field) {
            continue;
        }

        let old_json = normalize(field, old);
        let new_json = normalize(field, new);
        if old_json == new_json {
            continue;
        }
        diff.before.insert(field.clone(), old_json);
        diff.after.insert(field.clone(), new_json);
    }

    diff
}

/// Renders a column value for the audit trail.
///
/// 16-byte values in identifier-named fields become canonical UUID text,
/// other binary or non-printable values become base64, enum members
/// collapse to their scalar.
pub fn normalize(field: &str, value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Integer(i) => JsonValue::from(*i),
        Value::Float(f) => Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(f.to_string())),
        Value::Boolean(b) => JsonValue::Bool(*b),
        Value::Text(s) if is_printable(s) => JsonValue::String(s.clone()),
        Value::Text(s) => JsonValue::String(BASE64.encode(s.as_bytes())),
        Value::Bytes(bytes) => {
            if is_identifier_field(field)
                && let Ok(id) = Uuid::from_slice(bytes)
            {
                return JsonValue::String(id.hyphenated().to_string());
            }
            JsonValue::String(BASE64.encode(bytes))
        }
        Value::Enum(e) => normalize(field, &e.scalar),
    }
}

fn is_printable(s: &str) -> bool {
    !s.chars()
        .any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t'))
}

/// `id`, `uuid`, `*_id`, `*_uuid`, `*Id`, `*Uuid`
fn is_identifier_field(field: &str) -> bool {
    let lower = field.to_ascii_lowercase();
    lower == "id"
        || lower == "uuid"
        || lower.ends_with("_id")
        || lower.ends_with("_uuid")
        || field.ends_with("Id")
        || field.ends_with("Uuid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::EnumValue;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_only_changed_fields_are_reported() {
        let before = record(&[("a", 1.into()), ("b", 2.into()), ("c", 3.into())]);
        let after = record(&[("a", 1.into()), ("b", 5.into()), ("c", 3.into())]);

        let diff = diff_records("t", &before, &after, &AuditConfig::new());
        assert_eq!(JsonValue::Object(diff.before), json!({ "b": 2 }));
        assert_eq!(JsonValue::Object(diff.after), json!({ "b": 5 }));
    }

    #[test]
    fn test_fields_missing_from_either_image_are_skipped() {
        let before = record(&[("a", 1.into()), ("gone", 1.into())]);
        let after = record(&[("a", 1.into()), ("added", 9.into())]);

        assert!(diff_records("t", &before, &after, &AuditConfig::new()).is_empty());
    }

    #[test]
    fn test_ignore_rules() {
        let before = record(&[("name", "a".into()), ("seen", 1.into())]);
        let after = record(&[("name", "b".into()), ("seen", 2.into())]);

        let config = AuditConfig::new().ignore_field("t", "seen");
        assert_eq!(diff_records("t", &before, &after, &config).fields(), vec!["name"]);

        let config = AuditConfig::new().ignore_table("t");
        assert!(diff_records("t", &before, &after, &config).is_empty());
    }

    #[test]
    fn test_identifier_bytes_render_as_uuid() {
        let x = Uuid::parse_str("6f1c1b8e-2f44-4e3a-9d36-3c2b9b7e0a11").unwrap();
        let y = Uuid::parse_str("0b6a5f1e-7c1d-4b52-8a3e-1f9e2d4c6b70").unwrap();
        let before = record(&[("owner_id", Value::Bytes(x.as_bytes().to_vec()))]);
        let after = record(&[("owner_id", Value::Bytes(y.as_bytes().to_vec()))]);

        let diff = diff_records("t", &before, &after, &AuditConfig::new());
        assert_eq!(diff.before["owner_id"], json!("6f1c1b8e-2f44-4e3a-9d36-3c2b9b7e0a11"));
        assert_eq!(diff.after["owner_id"], json!("0b6a5f1e-7c1d-4b52-8a3e-1f9e2d4c6b70"));
    }

    #[test]
    fn test_other_binary_is_base64() {
        assert_eq!(normalize("avatar", &Value::Bytes(vec![0, 159, 146, 150])), json!("AJ+Slg=="));
        // 16 bytes but not an identifier-named field
        assert_eq!(normalize("digest", &Value::Bytes(vec![0; 16])), json!("AAAAAAAAAAAAAAAAAAAAAA=="));
        assert_eq!(normalize("note", &Value::from("a\u{0}b")), json!("YQBi"));
        assert_eq!(normalize("note", &Value::from("line\nbreak")), json!("line\nbreak"));
    }

    #[test]
    fn test_enum_reduces_to_scalar() {
        let before = record(&[("status", EnumValue::new("Draft", 0).into())]);
        let after = record(&[("status", EnumValue::new("Published", 1).into())]);

        let diff = diff_records("t", &before, &after, &AuditConfig::new());
        assert_eq!(diff.before["status"], json!(0));
        assert_eq!(diff.after["status"], json!(1));
    }
}
