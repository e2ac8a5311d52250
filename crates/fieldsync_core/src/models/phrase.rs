//! Condition phrases: reusable report text.

use super::{check_typename, decode_wire, encode_wire, require_text, MappingError, RemoteMapping};
use crate::error::{CoreError, CoreResult};
use crate::record::{Entity, Record, RemoteRecord, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A condition phrase the surveyor can drop into a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phrase {
    /// Grouping key ("roof", "damp", ...).
    pub category: String,
    /// Short name shown in pickers.
    pub name: String,
    /// Report text.
    pub body: String,
    /// Sort position within the category.
    pub ordinal: u32,
}

impl Phrase {
    /// Creates a phrase at ordinal 0.
    pub fn new(category: impl Into<String>, name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            name: name.into(),
            body: body.into(),
            ordinal: 0,
        }
    }
}

impl Entity for Phrase {
    const TABLE: &'static str = "phrases";

    fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() || self.body.trim().is_empty() {
            return Err(CoreError::Validation("phrase needs a name and a body".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PhraseWire {
    #[serde(rename = "__typename", default, skip_serializing)]
    typename: Option<String>,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<Timestamp>,
    updated_at: Timestamp,
    category: String,
    name: String,
    body: String,
    ordinal: u32,
}

impl RemoteMapping for Phrase {
    const REMOTE_TYPE: &'static str = "Phrase";

    fn to_remote(record: &Record<Self>) -> Value {
        encode_wire(&PhraseWire {
            typename: None,
            id: record.id.clone(),
            created_at: Some(record.created_at),
            updated_at: record.updated_at,
            category: record.data.category.clone(),
            name: record.data.name.clone(),
            body: record.data.body.clone(),
            ordinal: record.data.ordinal,
        })
    }

    fn from_remote(value: Value) -> Result<RemoteRecord<Self>, MappingError> {
        let wire: PhraseWire = decode_wire(Self::REMOTE_TYPE, value)?;
        check_typename(Self::REMOTE_TYPE, &wire.typename)?;
        require_text(Self::REMOTE_TYPE, "name", &wire.name)?;
        require_text(Self::REMOTE_TYPE, "body", &wire.body)?;
        Ok(RemoteRecord {
            id: wire.id,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            data: Phrase {
                category: wire.category,
                name: wire.name,
                body: wire.body,
                ordinal: wire.ordinal,
            },
        })
    }
}
