//! Typed attribute values for principals and resources.

use std::collections::{BTreeMap, HashMap};

use sha2::Digest;

/// Attribute map with stable key ordering.
///
/// A `BTreeMap` keeps iteration order independent of insertion order, so two
/// semantically identical maps always encode and fingerprint the same way.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A typed attribute value.
///
/// Maps to/from `prost_types::Value` on the wire.
///
/// # Examples
///
/// ```
/// use arbiter::AttributeValue;
///
/// let v = AttributeValue::from("marketing");
/// let n = AttributeValue::from(42.0);
/// let b = AttributeValue::from(true);
/// let list = AttributeValue::List(vec!["GB".into(), "FR".into()]);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    /// JSON null.
    Null,
    /// A boolean value.
    Bool(bool),
    /// A numeric value (f64).
    Number(f64),
    /// A string value.
    String(String),
    /// A list of values.
    List(Vec<AttributeValue>),
    /// A nested key-value structure.
    Map(Attributes),
}

impl AttributeValue {
    /// Returns the string, if this is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttributeValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the number, if this is a `Number`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Feeds a canonical, self-delimiting encoding of this value into `hasher`.
    ///
    /// `-0.0` and `0.0` encode identically, as do all NaN payloads.
    pub(crate) fn digest_into(&self, hasher: &mut sha2::Sha256) {
        match self {
            AttributeValue::Null => hasher.update([0u8]),
            AttributeValue::Bool(b) => hasher.update([1u8, u8::from(*b)]),
            AttributeValue::Number(n) => {
                let n = if *n == 0.0 {
                    0.0
                } else if n.is_nan() {
                    f64::NAN
                } else {
                    *n
                };
                hasher.update([2u8]);
                hasher.update(n.to_bits().to_be_bytes());
            }
            AttributeValue::String(s) => {
                hasher.update([3u8]);
                digest_str(hasher, s);
            }
            AttributeValue::List(items) => {
                hasher.update([4u8]);
                hasher.update((items.len() as u64).to_be_bytes());
                for item in items {
                    item.digest_into(hasher);
                }
            }
            AttributeValue::Map(fields) => {
                hasher.update([5u8]);
                digest_attributes(hasher, fields);
            }
        }
    }
}

pub(crate) fn digest_str(hasher: &mut sha2::Sha256, s: &str) {
    hasher.update((s.len() as u64).to_be_bytes());
    hasher.update(s.as_bytes());
}

pub(crate) fn digest_attributes(hasher: &mut sha2::Sha256, attributes: &Attributes) {
    hasher.update((attributes.len() as u64).to_be_bytes());
    for (key, value) in attributes {
        digest_str(hasher, key);
        value.digest_into(hasher);
    }
}

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        AttributeValue::String(s.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(s: String) -> Self {
        AttributeValue::String(s)
    }
}

impl From<bool> for AttributeValue {
    fn from(b: bool) -> Self {
        AttributeValue::Bool(b)
    }
}

impl From<f64> for AttributeValue {
    fn from(n: f64) -> Self {
        AttributeValue::Number(n)
    }
}

impl From<i64> for AttributeValue {
    fn from(n: i64) -> Self {
        AttributeValue::Number(n as f64)
    }
}

impl From<Vec<AttributeValue>> for AttributeValue {
    fn from(items: Vec<AttributeValue>) -> Self {
        AttributeValue::List(items)
    }
}

impl From<Attributes> for AttributeValue {
    fn from(fields: Attributes) -> Self {
        AttributeValue::Map(fields)
    }
}

impl From<&AttributeValue> for prost_types::Value {
    fn from(av: &AttributeValue) -> Self {
        use prost_types::value::Kind;
        prost_types::Value {
            kind: Some(match av {
                AttributeValue::Null => Kind::NullValue(0),
                AttributeValue::Bool(b) => Kind::BoolValue(*b),
                AttributeValue::Number(n) => Kind::NumberValue(*n),
                AttributeValue::String(s) => Kind::StringValue(s.clone()),
                AttributeValue::List(items) => Kind::ListValue(prost_types::ListValue {
                    values: items.iter().map(Into::into).collect(),
                }),
                AttributeValue::Map(fields) => Kind::StructValue(prost_types::Struct {
                    fields: fields
                        .iter()
                        .map(|(k, v)| (k.clone(), v.into()))
                        .collect(),
                }),
            }),
        }
    }
}

impl From<prost_types::Value> for AttributeValue {
    fn from(v: prost_types::Value) -> Self {
        match v.kind {
            Some(prost_types::value::Kind::NullValue(_)) | None => AttributeValue::Null,
            Some(prost_types::value::Kind::BoolValue(b)) => AttributeValue::Bool(b),
            Some(prost_types::value::Kind::NumberValue(n)) => AttributeValue::Number(n),
            Some(prost_types::value::Kind::StringValue(s)) => AttributeValue::String(s),
            Some(prost_types::value::Kind::ListValue(list)) => {
                AttributeValue::List(list.values.into_iter().map(Into::into).collect())
            }
            Some(prost_types::value::Kind::StructValue(s)) => AttributeValue::Map(
                s.fields
                    .into_iter()
                    .map(|(k, v)| (k, v.into()))
                    .collect(),
            ),
        }
    }
}

/// Convert an attribute map to the wire representation.
pub(crate) fn attributes_to_proto(
    attributes: &Attributes,
) -> HashMap<String, prost_types::Value> {
    attributes
        .iter()
        .map(|(k, v)| (k.clone(), v.into()))
        .collect()
}
