//! Survey-domain entities and their remote mappers.
//!
//! Each entity has a wire struct mirroring the remote JSON shape exactly.
//! Decoding is strict: unknown fields, missing fields, wrong types and a
//! mismatched `__typename` are all rejected, so a remote schema change
//! surfaces as a [`MappingError`] instead of silently dropping data.

mod component;
mod element;
mod location;
mod phrase;
mod section;
mod survey;

pub use component::Component;
pub use element::Element;
pub use location::Location;
pub use phrase::Phrase;
pub use section::Section;
pub use survey::Survey;

use crate::record::{Entity, Record, RemoteRecord};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// A remote payload that does not match an entity's wire shape.
#[derive(Debug, Error)]
pub enum MappingError {
    /// The payload could not be decoded into the wire struct.
    #[error("{entity}: {message}")]
    Shape {
        /// Remote type name.
        entity: &'static str,
        /// Decoder message.
        message: String,
    },

    /// The payload names a different remote type.
    #[error("expected __typename {expected}, got {actual}")]
    Typename {
        /// Expected type name.
        expected: &'static str,
        /// Received type name.
        actual: String,
    },

    /// A field decoded but holds an unusable value.
    #[error("{entity}.{field}: {message}")]
    Field {
        /// Remote type name.
        entity: &'static str,
        /// Field name.
        field: &'static str,
        /// What is wrong.
        message: String,
    },
}

/// Conversion between a local record and the remote JSON shape.
///
/// Both directions are total over the entity's fields.
pub trait RemoteMapping: Entity {
    /// Remote (GraphQL) type name.
    const REMOTE_TYPE: &'static str;

    /// Encodes a local record as the remote input object.
    fn to_remote(record: &Record<Self>) -> Value;

    /// Decodes a remote object.
    ///
    /// # Errors
    ///
    /// Returns a [`MappingError`] for any deviation from the wire shape.
    fn from_remote(value: Value) -> Result<RemoteRecord<Self>, MappingError>;
}

/// Decodes `value` into a strict wire struct.
pub(crate) fn decode_wire<W: DeserializeOwned>(
    entity: &'static str,
    value: Value,
) -> Result<W, MappingError> {
    serde_json::from_value(value).map_err(|e| MappingError::Shape {
        entity,
        message: e.to_string(),
    })
}

/// Rejects a present but mismatched `__typename`.
pub(crate) fn check_typename(
    expected: &'static str,
    actual: &Option<String>,
) -> Result<(), MappingError> {
    match actual {
        Some(name) if name != expected => Err(MappingError::Typename {
            expected,
            actual: name.clone(),
        }),
        _ => Ok(()),
    }
}

/// Rejects empty required strings.
pub(crate) fn require_text(
    entity: &'static str,
    field: &'static str,
    text: &str,
) -> Result<(), MappingError> {
    if text.trim().is_empty() {
        return Err(MappingError::Field {
            entity,
            field,
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Serializes a wire struct; wire structs only hold JSON-native types.
pub(crate) fn encode_wire<W: serde::Serialize>(wire: &W) -> Value {
    serde_json::to_value(wire).unwrap_or(Value::Null)
}
