//! CBOR row encoding.

use crate::error::{CoreError, CoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encodes a row for storage.
pub(crate) fn encode_row<V: Serialize>(table: &str, value: &V) -> CoreResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::ser::into_writer(value, &mut bytes).map_err(|e| CoreError::Codec {
        table: table.to_string(),
        message: e.to_string(),
    })?;
    Ok(bytes)
}

/// Decodes a stored row.
pub(crate) fn decode_row<V: DeserializeOwned>(table: &str, bytes: &[u8]) -> CoreResult<V> {
    ciborium::de::from_reader(bytes).map_err(|e| CoreError::Codec {
        table: table.to_string(),
        message: e.to_string(),
    })
}
