//! Locations within a surveyed property.

use super::{check_typename, decode_wire, encode_wire, require_text, MappingError, RemoteMapping};
use crate::error::{CoreError, CoreResult};
use crate::record::{Entity, Record, RemoteRecord, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A named location ("Bedroom 2", "Rear elevation"), optionally nested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    /// Owning survey.
    pub survey_id: String,
    /// Display name.
    pub name: String,
    /// Enclosing location.
    pub parent_id: Option<String>,
}

impl Entity for Location {
    const TABLE: &'static str = "locations";

    fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("location name must not be empty".into()));
        }
        if self.parent_id.as_deref() == Some("") {
            return Err(CoreError::Validation("parent location id must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct LocationWire {
    #[serde(rename = "__typename", default, skip_serializing)]
    typename: Option<String>,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<Timestamp>,
    updated_at: Timestamp,
    survey_id: String,
    name: String,
    parent_id: Option<String>,
}

impl RemoteMapping for Location {
    const REMOTE_TYPE: &'static str = "Location";

    fn to_remote(record: &Record<Self>) -> Value {
        encode_wire(&LocationWire {
            typename: None,
            id: record.id.clone(),
            created_at: Some(record.created_at),
            updated_at: record.updated_at,
            survey_id: record.data.survey_id.clone(),
            name: record.data.name.clone(),
            parent_id: record.data.parent_id.clone(),
        })
    }

    fn from_remote(value: Value) -> Result<RemoteRecord<Self>, MappingError> {
        let wire: LocationWire = decode_wire(Self::REMOTE_TYPE, value)?;
        check_typename(Self::REMOTE_TYPE, &wire.typename)?;
        require_text(Self::REMOTE_TYPE, "name", &wire.name)?;
        if wire.parent_id.as_deref() == Some(wire.id.as_str()) {
            return Err(MappingError::Field {
                entity: Self::REMOTE_TYPE,
                field: "parentId",
                message: "location cannot be its own parent".to_string(),
            });
        }
        Ok(RemoteRecord {
            id: wire.id,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            data: Location {
                survey_id: wire.survey_id,
                name: wire.name,
                parent_id: wire.parent_id,
            },
        })
    }
}
