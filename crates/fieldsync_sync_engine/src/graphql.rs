//! Remote adapter over a GraphQL service.
//!
//! Operation names follow the service's conventions: `list<Type>s`
//! returns `{ "items": [...] }`, `create<Type>` / `update<Type>` take an
//! `input` object and return the stored record, and `delete<Type>` takes
//! `{ "id" }` and returns `{ "id" }` (or `null` when nothing was deleted).
//! Every write carries a `tenantId` from the [`TenantResolver`]; returned
//! records may echo it back.

use crate::adapter::{RemoteAdapter, Reply};
use crate::error::RemoteError;
use async_trait::async_trait;
use fieldsync_core::{Record, RemoteMapping, RemoteRecord};
use serde_json::{json, Map, Value};
use std::marker::PhantomData;
use std::sync::Arc;

/// Executes GraphQL operations.
#[async_trait]
pub trait GraphqlClient: Send + Sync {
    /// Runs `operation` with `variables` and returns the operation's
    /// result field (the value under `data.<operation>`).
    async fn execute(&self, operation: &str, variables: Value) -> Result<Value, RemoteError>;
}

/// Resolves the tenant every write is scoped to.
#[async_trait]
pub trait TenantResolver: Send + Sync {
    /// The current tenant id.
    async fn tenant_id(&self) -> Result<String, RemoteError>;
}

/// A resolver that always returns the same tenant.
#[derive(Debug, Clone)]
pub struct StaticTenant(pub String);

#[async_trait]
impl TenantResolver for StaticTenant {
    async fn tenant_id(&self) -> Result<String, RemoteError> {
        Ok(self.0.clone())
    }
}

/// [`RemoteAdapter`] for any entity with a [`RemoteMapping`].
pub struct GraphqlAdapter<T, C> {
    client: Arc<C>,
    tenant: Arc<dyn TenantResolver>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: RemoteMapping, C: GraphqlClient> GraphqlAdapter<T, C> {
    /// Creates an adapter.
    pub fn new(client: Arc<C>, tenant: Arc<dyn TenantResolver>) -> Self {
        Self {
            client,
            tenant,
            _entity: PhantomData,
        }
    }

    fn operation(verb: &str) -> String {
        match verb {
            "list" => format!("list{}s", T::REMOTE_TYPE),
            _ => format!("{}{}", verb, T::REMOTE_TYPE),
        }
    }

    /// Maps one returned record. The tenant scope is owned by the adapter,
    /// so a `tenantId` echoed by the service is dropped before mapping.
    fn decode(mut value: Value) -> Result<RemoteRecord<T>, RemoteError> {
        if let Some(fields) = value.as_object_mut() {
            fields.remove("tenantId");
        }
        T::from_remote(value).map_err(|e| RemoteError::other(format!("unexpected response: {e}")))
    }

    async fn scoped_input(&self, mut input: Value) -> Result<Value, RemoteError> {
        let tenant = self.tenant.tenant_id().await?;
        match input.as_object_mut() {
            Some(fields) => {
                fields.insert("tenantId".to_string(), Value::String(tenant));
                Ok(json!({ "input": input }))
            }
            None => Err(RemoteError::other("remote input is not an object")),
        }
    }

    async fn write(&self, verb: &str, record: &Record<T>) -> Result<RemoteRecord<T>, RemoteError> {
        let variables = self.scoped_input(T::to_remote(record)).await?;
        let operation = Self::operation(verb);
        let response = self.client.execute(&operation, variables).await?;
        if response.is_null() {
            return Err(RemoteError::not_found(format!("{operation}: {} not found", record.id)));
        }
        Self::decode(response)
    }

    async fn list_all(&self) -> Result<Vec<RemoteRecord<T>>, RemoteError> {
        let operation = Self::operation("list");
        let response = self.client.execute(&operation, Value::Object(Map::new())).await?;
        let items = match response {
            Value::Object(mut page) => page.remove("items"),
            _ => None,
        };
        match items {
            Some(Value::Array(items)) => items.into_iter().map(Self::decode).collect(),
            _ => Err(RemoteError::other(format!("{operation}: response has no items array"))),
        }
    }

    async fn delete_one(&self, id: &str) -> Result<String, RemoteError> {
        let variables = self.scoped_input(json!({ "id": id })).await?;
        let operation = Self::operation("delete");
        let response = self.client.execute(&operation, variables).await?;
        match response.get("id").and_then(Value::as_str) {
            Some(deleted) => Ok(deleted.to_string()),
            None if response.is_null() => {
                Err(RemoteError::not_found(format!("{operation}: {id} not found")))
            }
            None => Err(RemoteError::other(format!("{operation}: response has no id"))),
        }
    }
}

#[async_trait]
impl<T: RemoteMapping, C: GraphqlClient> RemoteAdapter<T> for GraphqlAdapter<T, C> {
    async fn list(&self) -> Reply<Vec<RemoteRecord<T>>> {
        self.list_all().await.into()
    }

    async fn create(&self, record: &Record<T>) -> Reply<RemoteRecord<T>> {
        self.write("create", record).await.into()
    }

    async fn update(&self, record: &Record<T>) -> Reply<RemoteRecord<T>> {
        self.write("update", record).await.into()
    }

    async fn delete(&self, id: &str) -> Reply<String> {
        self.delete_one(id).await.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldsync_core::models::Survey;
    use fieldsync_core::SyncStatus;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct ScriptedClient {
        responses: Mutex<Vec<Result<Value, RemoteError>>>,
        requests: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedClient {
        fn respond(&self, response: Result<Value, RemoteError>) {
            self.responses.lock().push(response);
        }
    }

    #[async_trait]
    impl GraphqlClient for ScriptedClient {
        async fn execute(&self, operation: &str, variables: Value) -> Result<Value, RemoteError> {
            self.requests.lock().push((operation.to_string(), variables));
            self.responses.lock().remove(0)
        }
    }

    fn adapter(client: &Arc<ScriptedClient>) -> GraphqlAdapter<Survey, ScriptedClient> {
        GraphqlAdapter::new(Arc::clone(client), Arc::new(StaticTenant("tenant-7".into())))
    }

    fn wire(id: &str) -> Value {
        json!({
            "__typename": "Survey",
            "id": id,
            "createdAt": "2024-05-01T09:00:00Z",
            "updatedAt": "2024-05-02T10:30:00Z",
            "title": "12 High Street",
            "clientName": null,
            "address": null,
            "status": "in_progress",
            "formData": {}
        })
    }

    #[tokio::test]
    async fn list_decodes_items() {
        let client = Arc::new(ScriptedClient::default());
        client.respond(Ok(json!({ "items": [wire("s-1"), wire("s-2")] })));

        let records = adapter(&client).list().await.into_result().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(client.requests.lock()[0].0, "listSurveys");
    }

    #[tokio::test]
    async fn malformed_item_fails_the_listing() {
        let client = Arc::new(ScriptedClient::default());
        let mut broken = wire("s-2");
        broken["unexpected"] = json!(true);
        client.respond(Ok(json!({ "items": [wire("s-1"), broken] })));

        let err = adapter(&client).list().await.into_result().unwrap_err();
        assert!(err.message.contains("unexpected"));
    }

    #[tokio::test]
    async fn writes_carry_the_tenant() {
        let client = Arc::new(ScriptedClient::default());
        client.respond(Ok(wire("s-1")));

        let record = Record::new("s-1", Survey::new("12 High Street"), SyncStatus::Queued);
        let stored = adapter(&client).create(&record).await.into_result().unwrap();
        assert_eq!(stored.id, "s-1");

        let requests = client.requests.lock();
        let (operation, variables) = &requests[0];
        assert_eq!(operation, "createSurvey");
        assert_eq!(variables["input"]["tenantId"], "tenant-7");
        assert_eq!(variables["input"]["title"], "12 High Street");
    }

    /// Stores whatever it is sent, like a service that returns the
    /// written record including its tenant scope.
    struct EchoClient;

    #[async_trait]
    impl GraphqlClient for EchoClient {
        async fn execute(&self, operation: &str, variables: Value) -> Result<Value, RemoteError> {
            let mut stored = variables["input"].clone();
            stored["__typename"] = json!("Survey");
            if operation == "listSurveys" {
                return Ok(json!({ "items": [stored] }));
            }
            Ok(stored)
        }
    }

    #[tokio::test]
    async fn echoed_tenant_is_accepted() {
        let echo: GraphqlAdapter<Survey, EchoClient> =
            GraphqlAdapter::new(Arc::new(EchoClient), Arc::new(StaticTenant("tenant-7".into())));
        let record = Record::new("s-1", Survey::new("12 High Street"), SyncStatus::Queued);

        let created = echo.create(&record).await.into_result().unwrap();
        assert_eq!(created.id, "s-1");
        assert_eq!(created.data, record.data);
        let updated = echo.update(&record).await.into_result().unwrap();
        assert_eq!(updated.updated_at, record.updated_at);

        let mut item = wire("s-2");
        item["tenantId"] = json!("tenant-7");
        let client = Arc::new(ScriptedClient::default());
        client.respond(Ok(json!({ "items": [item] })));
        let listed = adapter(&client).list().await.into_result().unwrap();
        assert_eq!(listed[0].id, "s-2");
    }

    #[tokio::test]
    async fn null_delete_is_not_found() {
        let client = Arc::new(ScriptedClient::default());
        client.respond(Ok(Value::Null));
        client.respond(Ok(json!({ "id": "s-1" })));

        let adapter = adapter(&client);
        let err = adapter.delete("s-9").await.into_result().unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(adapter.delete("s-1").await.into_result().unwrap(), "s-1");
        assert_eq!(client.requests.lock()[0].1["input"]["id"], "s-9");
    }
}
