//! Conversion between native [`Value`]s and wire [`AttributeValue`]s.
//!
//! The codec is stateless. `Null` has no wire form here: callers run
//! [`sanitize`] before encoding a record.

use std::collections::BTreeMap;
use std::str::FromStr;

use dynarecord_model::{AttributeValue, Item};

use crate::value::Value;

/// Errors raised while encoding or decoding values.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// A `Null` reached the encoder.
    #[error("null values are not encoded; sanitize the item first")]
    NullValue,

    /// An `N` attribute did not hold a valid decimal number.
    #[error("invalid number attribute: {0:?}")]
    InvalidNumber(String),
}

/// Encode a native value into its wire representation.
pub fn encode(value: &Value) -> Result<AttributeValue, CodecError> {
    Ok(match value {
        Value::Null => return Err(CodecError::NullValue),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Binary(b) => AttributeValue::B(b.clone()),
        Value::List(items) => {
            AttributeValue::L(items.iter().map(encode).collect::<Result<_, _>>()?)
        }
        Value::Map(entries) => AttributeValue::M(
            entries
                .iter()
                .map(|(k, v)| Ok::<_, CodecError>((k.clone(), encode(v)?)))
                .collect::<Result<_, _>>()?,
        ),
    })
}

/// Decode a wire value. Sets decode to lists of their scalar type.
pub fn decode(value: &AttributeValue) -> Result<Value, CodecError> {
    Ok(match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => decode_number(n)?,
        AttributeValue::B(b) => Value::Binary(b.clone()),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::Ss(v) => Value::List(v.iter().cloned().map(Value::String).collect()),
        AttributeValue::Ns(v) => {
            Value::List(v.iter().map(|n| decode_number(n)).collect::<Result<_, _>>()?)
        }
        AttributeValue::Bs(v) => Value::List(v.iter().cloned().map(Value::Binary).collect()),
        AttributeValue::L(items) => {
            Value::List(items.iter().map(decode).collect::<Result<_, _>>()?)
        }
        AttributeValue::M(entries) => Value::Map(
            entries
                .iter()
                .map(|(k, v)| Ok::<_, CodecError>((k.clone(), decode(v)?)))
                .collect::<Result<_, _>>()?,
        ),
    })
}

fn decode_number(n: &str) -> Result<Value, CodecError> {
    serde_json::Number::from_str(n.trim())
        .map(Value::Number)
        .map_err(|_| CodecError::InvalidNumber(n.to_owned()))
}

/// Encode a whole attribute map into a raw item.
pub fn encode_item(attributes: &BTreeMap<String, Value>) -> Result<Item, CodecError> {
    attributes
        .iter()
        .map(|(k, v)| Ok::<_, CodecError>((k.clone(), encode(v)?)))
        .collect()
}

/// Decode a raw item. Top-level `NULL` attributes are dropped.
pub fn decode_item(item: &Item) -> Result<BTreeMap<String, Value>, CodecError> {
    let mut attributes = BTreeMap::new();
    for (k, v) in item {
        let value = decode(v)?;
        if !value.is_null() {
            attributes.insert(k.clone(), value);
        }
    }
    Ok(attributes)
}

/// Recursively strip null, empty-string and empty-collection entries.
///
/// Collections emptied by the pass are removed from their parent as well.
pub fn sanitize(attributes: &mut BTreeMap<String, Value>) {
    attributes.retain(|_, v| {
        sanitize_value(v);
        !v.is_empty()
    });
}

fn sanitize_value(value: &mut Value) {
    match value {
        Value::Map(entries) => sanitize(entries),
        Value::List(items) => items.retain_mut(|v| {
            sanitize_value(v);
            !v.is_empty()
        }),
        _ => {}
    }
}
