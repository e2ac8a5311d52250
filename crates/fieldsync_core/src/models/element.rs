//! Building elements (roof, walls, windows, ...).

use super::{check_typename, decode_wire, encode_wire, require_text, MappingError, RemoteMapping};
use crate::error::{CoreError, CoreResult};
use crate::record::{Entity, Record, RemoteRecord, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A building element inside a survey section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    /// Owning survey.
    pub survey_id: String,
    /// Owning section.
    pub section_id: String,
    /// Display name.
    pub name: String,
    /// Position within the section.
    pub order: u32,
    /// Free-text description.
    pub description: Option<String>,
}

impl Entity for Element {
    const TABLE: &'static str = "elements";

    fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("element name must not be empty".into()));
        }
        if self.survey_id.is_empty() || self.section_id.is_empty() {
            return Err(CoreError::Validation(
                "element must reference a survey and a section".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ElementWire {
    #[serde(rename = "__typename", default, skip_serializing)]
    typename: Option<String>,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<Timestamp>,
    updated_at: Timestamp,
    survey_id: String,
    section_id: String,
    name: String,
    order: u32,
    description: Option<String>,
}

impl RemoteMapping for Element {
    const REMOTE_TYPE: &'static str = "Element";

    fn to_remote(record: &Record<Self>) -> Value {
        encode_wire(&ElementWire {
            typename: None,
            id: record.id.clone(),
            created_at: Some(record.created_at),
            updated_at: record.updated_at,
            survey_id: record.data.survey_id.clone(),
            section_id: record.data.section_id.clone(),
            name: record.data.name.clone(),
            order: record.data.order,
            description: record.data.description.clone(),
        })
    }

    fn from_remote(value: Value) -> Result<RemoteRecord<Self>, MappingError> {
        let wire: ElementWire = decode_wire(Self::REMOTE_TYPE, value)?;
        check_typename(Self::REMOTE_TYPE, &wire.typename)?;
        require_text(Self::REMOTE_TYPE, "name", &wire.name)?;
        require_text(Self::REMOTE_TYPE, "surveyId", &wire.survey_id)?;
        require_text(Self::REMOTE_TYPE, "sectionId", &wire.section_id)?;
        Ok(RemoteRecord {
            id: wire.id,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            data: Element {
                survey_id: wire.survey_id,
                section_id: wire.section_id,
                name: wire.name,
                order: wire.order,
                description: wire.description,
            },
        })
    }
}
