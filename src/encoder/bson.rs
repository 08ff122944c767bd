//! Minimal BSON writer for JSON values.
//!
//! Only the element types JSON can produce are emitted. All integers are little-endian and
//! every document is prefixed with its total length, including the prefix and the trailing
//! NUL.
use serde_json::{Map, Value};

use super::EncodeError;

const TYPE_DOUBLE: u8 = 0x01;
const TYPE_STRING: u8 = 0x02;
const TYPE_DOCUMENT: u8 = 0x03;
const TYPE_ARRAY: u8 = 0x04;
const TYPE_BOOL: u8 = 0x08;
const TYPE_NULL: u8 = 0x0A;
const TYPE_INT32: u8 = 0x10;
const TYPE_INT64: u8 = 0x12;

/// Serializes a top-level object (or array, keyed by index) as a BSON document.
pub(crate) fn to_document(value: &Value) -> Result<Vec<u8>, EncodeError> {
    let mut out = Vec::with_capacity(64);
    match value {
        Value::Object(map) => write_object(&mut out, map)?,
        Value::Array(items) => write_array(&mut out, items)?,
        _ => {
            return Err(EncodeError::malformed_at_start(
                "top-level value must be an object or an array",
            ));
        }
    }
    Ok(out)
}

fn write_object(out: &mut Vec<u8>, map: &Map<String, Value>) -> Result<(), EncodeError> {
    write_document(out, map.iter().map(|(k, v)| (k.as_str(), v)))
}

fn write_array(out: &mut Vec<u8>, items: &[Value]) -> Result<(), EncodeError> {
    let keys = (0..items.len()).map(|i| i.to_string()).collect::<Vec<_>>();
    write_document(out, keys.iter().map(String::as_str).zip(items))
}

fn write_document<'a, I>(out: &mut Vec<u8>, elements: I) -> Result<(), EncodeError>
where
    I: Iterator<Item = (&'a str, &'a Value)>,
{
    let start = out.len();
    out.extend_from_slice(&[0; 4]);
    for (key, value) in elements {
        write_element(out, key, value)?;
    }
    out.push(0);

    let len = out.len() - start;
    let len = i32::try_from(len).map_err(|_| EncodeError::DocumentTooLarge(len))?;
    out[start..start + 4].copy_from_slice(&len.to_le_bytes());
    Ok(())
}

fn write_element(out: &mut Vec<u8>, key: &str, value: &Value) -> Result<(), EncodeError> {
    let kind = match value {
        Value::Null => TYPE_NULL,
        Value::Bool(_) => TYPE_BOOL,
        Value::Number(n) => match n.as_i64() {
            Some(i) if i32::try_from(i).is_ok() => TYPE_INT32,
            Some(_) => TYPE_INT64,
            None => TYPE_DOUBLE,
        },
        Value::String(_) => TYPE_STRING,
        Value::Array(_) => TYPE_ARRAY,
        Value::Object(_) => TYPE_DOCUMENT,
    };
    out.push(kind);
    write_cstring(out, key)?;

    match value {
        Value::Null => {}
        Value::Bool(b) => out.push(u8::from(*b)),
        Value::Number(n) => match (kind, n.as_i64()) {
            (TYPE_INT32, Some(i)) => out.extend_from_slice(&(i as i32).to_le_bytes()),
            (TYPE_INT64, Some(i)) => out.extend_from_slice(&i.to_le_bytes()),
            // u64 beyond i64::MAX, or a genuine float.
            _ => out.extend_from_slice(&n.as_f64().unwrap_or(f64::NAN).to_le_bytes()),
        },
        Value::String(s) => {
            let len =
                i32::try_from(s.len() + 1).map_err(|_| EncodeError::DocumentTooLarge(s.len()))?;
            out.extend_from_slice(&len.to_le_bytes());
            out.extend_from_slice(s.as_bytes());
            out.push(0);
        }
        Value::Array(items) => write_array(out, items)?,
        Value::Object(map) => write_object(out, map)?,
    }
    Ok(())
}

fn write_cstring(out: &mut Vec<u8>, key: &str) -> Result<(), EncodeError> {
    if key.as_bytes().contains(&0) {
        return Err(EncodeError::malformed_at_start(format!(
            "key {key:?} contains a NUL byte"
        )));
    }
    out.extend_from_slice(key.as_bytes());
    out.push(0);
    Ok(())
}
