//! Survey sections.

use super::{check_typename, decode_wire, encode_wire, require_text, MappingError, RemoteMapping};
use crate::error::{CoreError, CoreResult};
use crate::record::{Entity, Record, RemoteRecord, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A report section ("External", "Internal", "Services", ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    /// Owning survey.
    pub survey_id: String,
    /// Display name.
    pub name: String,
    /// Position in the report.
    pub order: u32,
}

impl Entity for Section {
    const TABLE: &'static str = "sections";

    fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("section name must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SectionWire {
    #[serde(rename = "__typename", default, skip_serializing)]
    typename: Option<String>,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<Timestamp>,
    updated_at: Timestamp,
    survey_id: String,
    name: String,
    order: u32,
}

impl RemoteMapping for Section {
    const REMOTE_TYPE: &'static str = "Section";

    fn to_remote(record: &Record<Self>) -> Value {
        encode_wire(&SectionWire {
            typename: None,
            id: record.id.clone(),
            created_at: Some(record.created_at),
            updated_at: record.updated_at,
            survey_id: record.data.survey_id.clone(),
            name: record.data.name.clone(),
            order: record.data.order,
        })
    }

    fn from_remote(value: Value) -> Result<RemoteRecord<Self>, MappingError> {
        let wire: SectionWire = decode_wire(Self::REMOTE_TYPE, value)?;
        check_typename(Self::REMOTE_TYPE, &wire.typename)?;
        require_text(Self::REMOTE_TYPE, "name", &wire.name)?;
        Ok(RemoteRecord {
            id: wire.id,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            data: Section {
                survey_id: wire.survey_id,
                name: wire.name,
                order: wire.order,
            },
        })
    }
}
