//! Decoded record model and the decoder contract.
//!
//! Semantic decoding of a surveillance payload is not this crate's business.
//! The engine hands every [PayloadBlock](crate::envelope::PayloadBlock) to a
//! caller-supplied [RecordDecoder] and forwards whatever comes back to the
//! output channels without looking inside.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::envelope::PayloadBlock;

/// One field of a decoded record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordField {
    pub name: String,
    pub value: FieldValue,
}

impl RecordField {
    pub fn new(name: impl Into<String>, value: FieldValue) -> Self {
        RecordField {
            name: name.into(),
            value,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Integer(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl FieldValue {
    fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }
}

/// A structured record produced by a [RecordDecoder].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedRecord {
    pub category: String,
    pub timestamp: Option<DateTime<Utc>>,
    pub fields: Vec<RecordField>,
}

impl DecodedRecord {
    pub fn new(category: impl Into<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        DecodedRecord {
            category: category.into(),
            timestamp,
            fields: Vec::new(),
        }
    }

    pub fn push_field(&mut self, name: impl Into<String>, value: FieldValue) {
        self.fields.push(RecordField::new(name, value));
    }

    /// A record that carries the payload bytes without interpreting them:
    /// a length field and the bytes as hex.
    pub fn opaque(category: impl Into<String>, block: &PayloadBlock) -> Self {
        let mut rec = DecodedRecord::new(category, block.timestamp);
        rec.push_field("length", FieldValue::Integer(block.data.len() as i64));
        let hex: String = block.data.iter().map(|b| format!("{b:02x}")).collect();
        rec.push_field("data", FieldValue::Text(hex));
        rec
    }

    /// Geographic position, if the record carries numeric `latitude` and
    /// `longitude` fields. Used by the geospatial renderer.
    pub fn position(&self) -> Option<(f64, f64)> {
        let mut lat = None;
        let mut lon = None;
        for field in &self.fields {
            match field.name.as_str() {
                "latitude" => lat = field.value.as_f64(),
                "longitude" => lon = field.value.as_f64(),
                _ => {}
            }
        }
        Some((lat?, lon?))
    }
}

/// Reported by a [RecordDecoder] for a payload it cannot make sense of.
/// Recoverable: the engine skips the one block and moves on.
#[derive(thiserror::Error, Debug)]
#[error("record decode failed: {reason}")]
pub struct DecodeError {
    pub reason: String,
}

impl DecodeError {
    pub fn new(reason: impl Into<String>) -> Self {
        DecodeError {
            reason: reason.into(),
        }
    }
}

/// Turns one payload block into one structured record.
pub trait RecordDecoder {
    fn decode(&self, block: &PayloadBlock) -> Result<DecodedRecord, DecodeError>;
}
