//! Structured value <-> store attribute codec.
//!
//! # Responsibility
//! - Convert `serde_json::Value` trees into store-native `AttributeValue`s and back.
//! - Provide typed helpers for reading well-known attributes off stored items.
//!
//! # Invariants
//! - `decode(&encode(v)) == v` for every finite, acyclic JSON value.
//! - Numbers travel as decimal text (`N`) so no float conversion happens on the wire.
//! - Map attributes are kept in key order; insertion order is not preserved.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// One stored item: top-level attribute name -> attribute value.
pub type Item = BTreeMap<String, AttributeValue>;

pub type CodecResult<T> = Result<T, CodecError>;

/// Store-native attribute representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    /// Decimal text form of a number.
    #[serde(rename = "N")]
    N(String),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null,
    #[serde(rename = "M")]
    M(BTreeMap<String, AttributeValue>),
    #[serde(rename = "L")]
    L(Vec<AttributeValue>),
}

impl AttributeValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::S(value.into())
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::S(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, AttributeValue>> {
        match self {
            Self::M(value) => Some(value),
            _ => None,
        }
    }

    /// Short type tag used in diagnostics.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Self::S(_) => "S",
            Self::N(_) => "N",
            Self::Bool(_) => "BOOL",
            Self::Null => "NULL",
            Self::M(_) => "M",
            Self::L(_) => "L",
        }
    }
}

/// Codec failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    InvalidNumber(String),
    MissingAttribute(String),
    UnexpectedType {
        attribute: String,
        expected: &'static str,
        found: &'static str,
    },
    Serde(String),
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidNumber(text) => write!(f, "invalid decimal number text `{text}`"),
            Self::MissingAttribute(name) => write!(f, "missing attribute `{name}`"),
            Self::UnexpectedType {
                attribute,
                expected,
                found,
            } => write!(
                f,
                "attribute `{attribute}` has type {found}, expected {expected}"
            ),
            Self::Serde(message) => write!(f, "structured value mapping failed: {message}"),
        }
    }
}

impl Error for CodecError {}

/// Encodes a structured value into its store representation.
pub fn encode(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null,
        Value::Bool(flag) => AttributeValue::Bool(*flag),
        Value::Number(number) => AttributeValue::N(number.to_string()),
        Value::String(text) => AttributeValue::S(text.clone()),
        Value::Array(items) => AttributeValue::L(items.iter().map(encode).collect()),
        Value::Object(fields) => AttributeValue::M(
            fields
                .iter()
                .map(|(key, field)| (key.clone(), encode(field)))
                .collect(),
        ),
    }
}

/// Decodes a store representation back into a structured value.
pub fn decode(value: &AttributeValue) -> CodecResult<Value> {
    match value {
        AttributeValue::Null => Ok(Value::Null),
        AttributeValue::Bool(flag) => Ok(Value::Bool(*flag)),
        AttributeValue::N(text) => parse_number(text).map(Value::Number),
        AttributeValue::S(text) => Ok(Value::String(text.clone())),
        AttributeValue::L(items) => items
            .iter()
            .map(decode)
            .collect::<CodecResult<Vec<_>>>()
            .map(Value::Array),
        AttributeValue::M(fields) => {
            let mut object = Map::new();
            for (key, field) in fields {
                object.insert(key.clone(), decode(field)?);
            }
            Ok(Value::Object(object))
        }
    }
}

/// Encodes any serializable value by way of its structured form.
pub fn encode_struct<T: Serialize>(value: &T) -> CodecResult<AttributeValue> {
    let structured = serde_json::to_value(value).map_err(|err| CodecError::Serde(err.to_string()))?;
    Ok(encode(&structured))
}

/// Decodes a store value into a typed structure.
pub fn decode_struct<T: DeserializeOwned>(value: &AttributeValue) -> CodecResult<T> {
    let structured = decode(value)?;
    serde_json::from_value(structured).map_err(|err| CodecError::Serde(err.to_string()))
}

fn parse_number(text: &str) -> CodecResult<Number> {
    serde_json::from_str::<Number>(text.trim())
        .map_err(|_| CodecError::InvalidNumber(text.to_string()))
}

/// Reads a required string attribute.
pub fn required_string(item: &Item, name: &str) -> CodecResult<String> {
    optional_string(item, name)?.ok_or_else(|| CodecError::MissingAttribute(name.to_string()))
}

/// Reads an optional string attribute; `NULL` reads as absent.
pub fn optional_string(item: &Item, name: &str) -> CodecResult<Option<String>> {
    match item.get(name) {
        None | Some(AttributeValue::Null) => Ok(None),
        Some(AttributeValue::S(value)) => Ok(Some(value.clone())),
        Some(other) => Err(CodecError::UnexpectedType {
            attribute: name.to_string(),
            expected: "S",
            found: other.type_tag(),
        }),
    }
}

/// Reads a boolean flag, treating absence as `false`.
pub fn flag(item: &Item, name: &str) -> CodecResult<bool> {
    match item.get(name) {
        None | Some(AttributeValue::Null) => Ok(false),
        Some(AttributeValue::Bool(value)) => Ok(*value),
        Some(other) => Err(CodecError::UnexpectedType {
            attribute: name.to_string(),
            expected: "BOOL",
            found: other.type_tag(),
        }),
    }
}

/// Reads a list-of-strings attribute, treating absence as empty.
pub fn string_list(item: &Item, name: &str) -> CodecResult<Vec<String>> {
    match item.get(name) {
        None | Some(AttributeValue::Null) => Ok(Vec::new()),
        Some(AttributeValue::L(values)) => values
            .iter()
            .map(|value| {
                value
                    .as_str()
                    .map(str::to_string)
                    .ok_or_else(|| CodecError::UnexpectedType {
                        attribute: name.to_string(),
                        expected: "S",
                        found: value.type_tag(),
                    })
            })
            .collect(),
        Some(other) => Err(CodecError::UnexpectedType {
            attribute: name.to_string(),
            expected: "L",
            found: other.type_tag(),
        }),
    }
}

/// Decodes a nested structured attribute, treating absence as `null`.
pub fn structured(item: &Item, name: &str) -> CodecResult<Value> {
    match item.get(name) {
        None => Ok(Value::Null),
        Some(value) => decode(value),
    }
}

/// Builds a list-of-strings attribute.
pub fn string_list_value<I, S>(values: I) -> AttributeValue
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    AttributeValue::L(
        values
            .into_iter()
            .map(|value| AttributeValue::S(value.into()))
            .collect(),
    )
}
