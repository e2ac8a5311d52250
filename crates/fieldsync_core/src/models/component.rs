//! Components of a building element.

use super::{check_typename, decode_wire, encode_wire, require_text, MappingError, RemoteMapping};
use crate::error::{CoreError, CoreResult};
use crate::record::{Entity, Record, RemoteRecord, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A component (e.g. "gutters") of an element, with its materials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    /// Owning element.
    pub element_id: String,
    /// Display name.
    pub name: String,
    /// Material ids, in display order.
    pub materials: Vec<String>,
}

impl Component {
    /// Creates a component without materials.
    pub fn new(element_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            element_id: element_id.into(),
            name: name.into(),
            materials: Vec::new(),
        }
    }
}

impl Entity for Component {
    const TABLE: &'static str = "components";

    fn validate(&self) -> CoreResult<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::Validation("component name must not be empty".into()));
        }
        if self.materials.iter().any(|m| m.trim().is_empty()) {
            return Err(CoreError::Validation("material reference must not be empty".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ComponentWire {
    #[serde(rename = "__typename", default, skip_serializing)]
    typename: Option<String>,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<Timestamp>,
    updated_at: Timestamp,
    element_id: String,
    name: String,
    materials: Vec<String>,
}

impl RemoteMapping for Component {
    const REMOTE_TYPE: &'static str = "Component";

    fn to_remote(record: &Record<Self>) -> Value {
        encode_wire(&ComponentWire {
            typename: None,
            id: record.id.clone(),
            created_at: Some(record.created_at),
            updated_at: record.updated_at,
            element_id: record.data.element_id.clone(),
            name: record.data.name.clone(),
            materials: record.data.materials.clone(),
        })
    }

    fn from_remote(value: Value) -> Result<RemoteRecord<Self>, MappingError> {
        let wire: ComponentWire = decode_wire(Self::REMOTE_TYPE, value)?;
        check_typename(Self::REMOTE_TYPE, &wire.typename)?;
        require_text(Self::REMOTE_TYPE, "name", &wire.name)?;
        for material in &wire.materials {
            require_text(Self::REMOTE_TYPE, "materials", material)?;
        }
        Ok(RemoteRecord {
            id: wire.id,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            data: Component {
                element_id: wire.element_id,
                name: wire.name,
                materials: wire.materials,
            },
        })
    }
}
