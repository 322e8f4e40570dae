//! Parse-or-reject normalization of untyped input.
//!
//! Items arriving from the authority or an import are plain JSON. Each field
//! is coerced on its own; any failure rejects the whole item. Unknown fields
//! are ignored.

use serde_json::{Map, Value};

use crate::record::{Record, Setting};
use crate::types::{
    MAX_DESCRIPTION_LEN, MAX_KEY_LEN, MAX_SETTING_VALUE_LEN, MAX_TIMESTAMP, ValidationError,
};

/// Parses a raw JSON item into a normalized [`Record`].
///
/// Requires `key`, `mt`, `t1` and `t2`. `ds` defaults to empty and `st` to 0.
pub fn normalize_record(raw: &Value) -> Result<Record, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let key = coerce_key(required(obj, "key")?)?;
    let mt = coerce_int("mt", required(obj, "mt")?)?;
    let t1 = coerce_int("t1", required(obj, "t1")?)?;
    let t2 = coerce_int("t2", required(obj, "t2")?)?;
    let ds = optional(obj, "ds")
        .map(coerce_description)
        .transpose()?
        .unwrap_or_default();
    let st = optional(obj, "st")
        .map(|value| coerce_float("st", value))
        .transpose()?
        .unwrap_or(0.0);

    normalize(Record {
        key,
        t1,
        t2,
        ds,
        mt,
        st,
    })
}

/// Normalizes an already typed record.
///
/// Checks the key and timestamp ranges, cleans the description and orders
/// `t1 <= t2`.
pub fn normalize(record: Record) -> Result<Record, ValidationError> {
    check_key(&record.key)?;
    check_timestamp("t1", record.t1)?;
    check_timestamp("t2", record.t2)?;
    if !record.st.is_finite() || record.st < 0.0 {
        return Err(ValidationError::InvalidType {
            field: "st",
            expected: "a non-negative number",
            value: record.st.to_string(),
        });
    }

    let (t1, t2) = if record.t1 > record.t2 {
        (record.t2, record.t1)
    } else {
        (record.t1, record.t2)
    };

    Ok(Record {
        t1,
        t2,
        ds: clean_description(&record.ds),
        ..record
    })
}

/// Parses a raw JSON item into a [`Setting`].
pub fn normalize_setting(raw: &Value) -> Result<Setting, ValidationError> {
    let obj = raw.as_object().ok_or(ValidationError::NotAnObject)?;

    let key = coerce_key(required(obj, "key")?)?;
    let mt = coerce_int("mt", required(obj, "mt")?)?;
    let value = obj
        .get("value")
        .cloned()
        .ok_or(ValidationError::Missing { field: "value" })?;
    let st = optional(obj, "st")
        .map(|value| coerce_float("st", value))
        .transpose()?
        .unwrap_or(0.0);

    check_setting_value(&value)?;
    Ok(Setting { key, value, mt, st })
}

/// Checks the serialized size of a setting value.
pub fn check_setting_value(value: &Value) -> Result<(), ValidationError> {
    let len = value.to_string().chars().count();
    if len > MAX_SETTING_VALUE_LEN {
        return Err(ValidationError::TooLong {
            field: "value",
            len,
            max: MAX_SETTING_VALUE_LEN,
        });
    }
    Ok(())
}

fn required<'a>(
    obj: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Value, ValidationError> {
    optional(obj, field).ok_or(ValidationError::Missing { field })
}

fn optional<'a>(obj: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    obj.get(field).filter(|value| !value.is_null())
}

fn invalid(field: &'static str, expected: &'static str, value: &Value) -> ValidationError {
    let mut shown = value.to_string();
    if shown.len() > 64 {
        let cut = shown
            .char_indices()
            .nth(64)
            .map_or(shown.len(), |(idx, _)| idx);
        shown.truncate(cut);
        shown.push_str("...");
    }
    ValidationError::InvalidType {
        field,
        expected,
        value: shown,
    }
}

fn coerce_key(value: &Value) -> Result<String, ValidationError> {
    let key = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => return Err(invalid("key", "a string", other)),
    };
    check_key(&key)?;
    Ok(key)
}

/// Checks that a key is non-empty and within [`MAX_KEY_LEN`].
pub fn check_key(key: &str) -> Result<(), ValidationError> {
    if key.is_empty() {
        return Err(ValidationError::Empty { field: "key" });
    }
    let len = key.chars().count();
    if len > MAX_KEY_LEN {
        return Err(ValidationError::TooLong {
            field: "key",
            len,
            max: MAX_KEY_LEN,
        });
    }
    Ok(())
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "fractional seconds are truncated after a range check"
)]
fn coerce_int(field: &'static str, value: &Value) -> Result<i64, ValidationError> {
    let from_float = |f: f64| {
        if f.is_finite() && f.abs() < 9.0e15 {
            Some(f.trunc() as i64)
        } else {
            None
        }
    };
    let parsed = match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(from_float)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(from_float))
        }
        _ => None,
    };
    parsed.ok_or_else(|| invalid(field, "an integer", value))
}

fn coerce_float(field: &'static str, value: &Value) -> Result<f64, ValidationError> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed
        .filter(|f| f.is_finite() && *f >= 0.0)
        .ok_or_else(|| invalid(field, "a non-negative number", value))
}

fn check_timestamp(field: &'static str, value: i64) -> Result<(), ValidationError> {
    if (0..=MAX_TIMESTAMP).contains(&value) {
        Ok(())
    } else {
        Err(ValidationError::OutOfRange { field, value })
    }
}

fn coerce_description(value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(invalid("ds", "a string", other)),
    }
}

/// Collapses runs of newlines and tabs into one space and truncates.
fn clean_description(ds: &str) -> String {
    let mut out = String::with_capacity(ds.len().min(MAX_DESCRIPTION_LEN * 4));
    let mut count = 0;
    let mut in_break = false;
    for c in ds.chars() {
        if count == MAX_DESCRIPTION_LEN {
            break;
        }
        if matches!(c, '\n' | '\r' | '\t') {
            if in_break {
                continue;
            }
            in_break = true;
            out.push(' ');
        } else {
            in_break = false;
            out.push(c);
        }
        count += 1;
    }
    out
}
