//! Purpose: Record representation and field helpers shared by the operation layers.
//! Exports: `Record`, `IntoRecord`, `numeric_field`, `merge_fields`.
//! Role: Records are open JSON objects; no field set is enforced.
//! Invariants: A record is always a JSON object at the API boundary.
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};

pub type Record = Map<String, Value>;

/// Conversion accepted by `insert` and `update`.
pub trait IntoRecord {
    fn into_record(self) -> Result<Record, Error>;
}

impl IntoRecord for Record {
    fn into_record(self) -> Result<Record, Error> {
        Ok(self)
    }
}

impl IntoRecord for Value {
    fn into_record(self) -> Result<Record, Error> {
        match self {
            Value::Object(map) => Ok(map),
            other => Err(Error::new(ErrorKind::Usage)
                .with_message(format!("record must be a JSON object, got {}", kind_name(&other)))),
        }
    }
}

/// Numeric view of `record[field]`; `None` when missing or not a number.
pub fn numeric_field(record: &Record, field: &str) -> Option<f64> {
    record.get(field).and_then(Value::as_f64)
}

/// Shallow merge: every field of `partial` overwrites the same field of `base`.
pub fn merge_fields(base: &mut Record, partial: Record) {
    for (field, value) in partial {
        base.insert(field, value);
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::{IntoRecord, merge_fields, numeric_field};
    use crate::core::error::ErrorKind;
    use serde_json::json;

    #[test]
    fn value_object_converts() {
        let record = json!({"a": 1}).into_record().expect("record");
        assert_eq!(record.get("a"), Some(&json!(1)));
    }

    #[test]
    fn non_object_is_usage_error() {
        let err = json!([1, 2]).into_record().expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.to_string().contains("an array"));
    }

    #[test]
    fn merge_overwrites_and_keeps_absent_fields() {
        let mut base = json!({"id": 1, "name": "a", "age": 3}).into_record().expect("base");
        let partial = json!({"age": 4, "city": "x"}).into_record().expect("partial");
        merge_fields(&mut base, partial);
        assert_eq!(
            serde_json::Value::Object(base),
            json!({"id": 1, "name": "a", "age": 4, "city": "x"})
        );
    }

    #[test]
    fn numeric_field_ignores_non_numbers() {
        let record = json!({"n": 2.5, "s": "3", "z": null}).into_record().expect("record");
        assert_eq!(numeric_field(&record, "n"), Some(2.5));
        assert_eq!(numeric_field(&record, "s"), None);
        assert_eq!(numeric_field(&record, "z"), None);
        assert_eq!(numeric_field(&record, "missing"), None);
    }
}
