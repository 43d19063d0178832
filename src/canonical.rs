// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Canonical JSON encoding.
//!
//! Every fingerprint and every signed payload goes through this encoder.
//!
//! # Form
//! - Object keys sorted by their UTF-8 bytes
//! - No insignificant whitespace
//! - Strings escaped the way `serde_json` escapes them
//! - Numbers printed in their shortest round-trip decimal form
//!
//! The encoder sorts keys itself, so the output does not depend on whether
//! `serde_json` was built with `preserve_order`.

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Encodes any serializable value canonically.
pub fn to_vec<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    Ok(encode(&value))
}

/// Same as [`to_vec`], as a `String`.
pub fn to_string<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let value = serde_json::to_value(value)?;
    let mut out = String::new();
    write_value(&value, &mut out);
    Ok(out)
}

/// Encodes an already materialized JSON value.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = String::new();
    write_value(value, &mut out);
    out.into_bytes()
}

/// Compares two values under the canonical encoding.
pub fn equal(a: &Value, b: &Value) -> bool {
    encode(a) == encode(b)
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.as_bytes().cmp(b.0.as_bytes()));
            out.push('{');
            for (i, (key, item)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_string(key, out);
                out.push(':');
                write_value(item, out);
            }
            out.push('}');
        }
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push_str(&Value::from(s).to_string());
}
