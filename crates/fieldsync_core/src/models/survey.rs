//! Surveys.

use super::{check_typename, decode_wire, encode_wire, require_text, MappingError, RemoteMapping};
use crate::error::{CoreError, CoreResult};
use crate::record::{Entity, Record, RemoteRecord, Timestamp};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A building survey and its serialized form document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    /// Display title.
    pub title: String,
    /// Client the survey is for.
    pub client_name: Option<String>,
    /// Site address.
    pub address: Option<String>,
    /// Workflow label ("draft", "in_progress", "complete", ...).
    pub status: String,
    /// The serialized form document.
    pub form: Value,
}

impl Survey {
    /// Creates an in-progress survey with an empty form.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            client_name: None,
            address: None,
            status: "in_progress".to_string(),
            form: Value::Object(Default::default()),
        }
    }
}

impl Entity for Survey {
    const TABLE: &'static str = "surveys";

    fn validate(&self) -> CoreResult<()> {
        if self.title.trim().is_empty() {
            return Err(CoreError::Validation("survey title must not be empty".into()));
        }
        if !self.form.is_object() {
            return Err(CoreError::Validation("survey form must be an object".into()));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct SurveyWire {
    #[serde(rename = "__typename", default, skip_serializing)]
    typename: Option<String>,
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    created_at: Option<Timestamp>,
    updated_at: Timestamp,
    title: String,
    client_name: Option<String>,
    address: Option<String>,
    status: String,
    form_data: Value,
}

impl RemoteMapping for Survey {
    const REMOTE_TYPE: &'static str = "Survey";

    fn to_remote(record: &Record<Self>) -> Value {
        encode_wire(&SurveyWire {
            typename: None,
            id: record.id.clone(),
            created_at: Some(record.created_at),
            updated_at: record.updated_at,
            title: record.data.title.clone(),
            client_name: record.data.client_name.clone(),
            address: record.data.address.clone(),
            status: record.data.status.clone(),
            form_data: record.data.form.clone(),
        })
    }

    fn from_remote(value: Value) -> Result<RemoteRecord<Self>, MappingError> {
        let wire: SurveyWire = decode_wire(Self::REMOTE_TYPE, value)?;
        check_typename(Self::REMOTE_TYPE, &wire.typename)?;
        require_text(Self::REMOTE_TYPE, "title", &wire.title)?;
        if !wire.form_data.is_object() {
            return Err(MappingError::Field {
                entity: Self::REMOTE_TYPE,
                field: "formData",
                message: "must be an object".to_string(),
            });
        }
        Ok(RemoteRecord {
            id: wire.id,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            data: Survey {
                title: wire.title,
                client_name: wire.client_name,
                address: wire.address,
                status: wire.status,
                form: wire.form_data,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::SyncStatus;
    use serde_json::json;

    fn wire() -> Value {
        json!({
            "__typename": "Survey",
            "id": "s-1",
            "createdAt": "2024-05-01T09:00:00Z",
            "updatedAt": "2024-05-02T10:30:00Z",
            "title": "12 Acacia Avenue",
            "clientName": "J. Smith",
            "address": null,
            "status": "in_progress",
            "formData": { "roof": { "covering": "slate" } }
        })
    }

    #[test]
    fn decodes_full_payload() {
        let remote = Survey::from_remote(wire()).unwrap();
        assert_eq!(remote.id, "s-1");
        assert_eq!(remote.data.title, "12 Acacia Avenue");
        assert_eq!(remote.data.client_name.as_deref(), Some("J. Smith"));
        assert_eq!(remote.data.form["roof"]["covering"], "slate");
        assert!(remote.created_at.is_some());
    }

    #[test]
    fn unknown_field_fails_closed() {
        let mut value = wire();
        value["surveyor"] = json!("someone");
        assert!(matches!(
            Survey::from_remote(value),
            Err(MappingError::Shape { .. })
        ));
    }

    #[test]
    fn missing_field_fails_closed() {
        let mut value = wire();
        value.as_object_mut().unwrap().remove("status");
        assert!(Survey::from_remote(value).is_err());
    }

    #[test]
    fn wrong_typename_fails_closed() {
        let mut value = wire();
        value["__typename"] = json!("Element");
        assert!(matches!(
            Survey::from_remote(value),
            Err(MappingError::Typename { .. })
        ));
    }

    #[test]
    fn non_object_form_is_rejected() {
        let mut value = wire();
        value["formData"] = json!("{}");
        assert!(matches!(
            Survey::from_remote(value),
            Err(MappingError::Field { field: "formData", .. })
        ));
    }

    #[test]
    fn to_remote_then_back_preserves_fields() {
        let mut survey = Survey::new("Mill House");
        survey.address = Some("1 Mill Lane".into());
        let record = Record::new("s-9", survey.clone(), SyncStatus::Queued);

        let value = Survey::to_remote(&record);
        assert_eq!(value["formData"], json!({}));
        assert!(value.get("__typename").is_none());

        let remote = Survey::from_remote(value).unwrap();
        assert_eq!(remote.data, survey);
        assert_eq!(remote.updated_at, record.updated_at);
    }

    #[test]
    fn validate_rejects_blank_title() {
        assert!(Survey::new("  ").validate().is_err());
        assert!(Survey::new("ok").validate().is_ok());
    }
}
