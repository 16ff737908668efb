//! The Storage Service (C9): dispatches `storage_*` operations to the
//! `StageClient` through an operation-type mapping table.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use super::client::{StageClient, StageClientError};
use crate::serde_tags::{serialize_bytes, ATTRIBUTE_NAME_ERROR, ATTRIBUTE_NAME_ERROR_TYPE, ATTRIBUTE_NAME_RESULT};

const ERROR_TYPE_NOTFOUND: &str = "NotFound";
const ERROR_TYPE_PERMISSIONS: &str = "Permissions";

pub struct StorageService {
    client: Arc<dyn StageClient>,
}

impl StorageService {
    pub fn new(client: Arc<dyn StageClient>) -> Self {
        Self { client }
    }

    /// Executes a storage operation event and returns a result object in the
    /// agent's `{"__mcd_result__": ...}` / `{"__mcd_error__": ...}` shape.
    pub fn execute_operation(&self, event: &Value) -> Value {
        let operation = event.get("operation").cloned().unwrap_or(Value::Null);
        let operation_type = operation.get("type").and_then(Value::as_str);

        let Some(operation_type) = operation_type else {
            return serde_json::json!({
                ATTRIBUTE_NAME_ERROR: "Invalid operation type: null",
            });
        };

        let result = match operation_type {
            "storage_read" => self.read(&operation),
            "storage_read_json" => self.read_json(&operation),
            "storage_write" => self.write(&operation),
            "storage_delete" => self.delete(&operation),
            "storage_generate_presigned_url" => self.presigned_url(&operation),
            "storage_is_bucket_private" => Ok(Value::Bool(self.client.is_bucket_private())),
            other => {
                return serde_json::json!({
                    ATTRIBUTE_NAME_ERROR: format!("Invalid operation type: {}", other),
                });
            }
        };

        match result {
            Ok(value) => serde_json::json!({ ATTRIBUTE_NAME_RESULT: value }),
            Err((error_type, message, suppress_log)) => {
                if !suppress_log {
                    error!("storage operation failed"; "error" => &message);
                }
                serde_json::json!({
                    ATTRIBUTE_NAME_ERROR_TYPE: error_type,
                    ATTRIBUTE_NAME_ERROR: message,
                })
            }
        }
    }

    fn get_key(operation: &Value) -> Result<String, (Option<String>, String, bool)> {
        operation
            .get("key")
            .and_then(Value::as_str)
            .filter(|k| !k.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| (None, "Key is required".to_owned(), false))
    }

    fn map_err(key: &str, err: StageClientError) -> (Option<String>, String, bool) {
        // idempotent files not found are expected and shouldn't be logged
        let is_idempotent = key.starts_with("idempotent/");
        match err {
            StageClientError::NotFound(msg) => {
                (Some(ERROR_TYPE_NOTFOUND.to_owned()), msg, is_idempotent)
            }
            StageClientError::Permissions(msg) => {
                (Some(ERROR_TYPE_PERMISSIONS.to_owned()), msg, false)
            }
            StageClientError::NotImplemented(msg) => (None, msg, false),
            StageClientError::Generic(msg) => (None, msg, false),
        }
    }

    fn read(&self, operation: &Value) -> Result<Value, (Option<String>, String, bool)> {
        let key = Self::get_key(operation)?;
        let decompress = operation.get("decompress").and_then(Value::as_bool).unwrap_or(false);
        let encoding = operation.get("encoding").and_then(Value::as_str);
        let contents = self
            .client
            .read(&key, decompress, encoding)
            .map_err(|e| Self::map_err(&key, e))?;
        Ok(serialize_bytes(&contents))
    }

    fn read_json(&self, operation: &Value) -> Result<Value, (Option<String>, String, bool)> {
        let key = Self::get_key(operation)?;
        let contents = self.client.read(&key, false, None).map_err(|e| Self::map_err(&key, e))?;
        serde_json::from_slice(&contents)
            .map_err(|e| (None, format!("invalid JSON at {}: {}", key, e), false))
    }

    fn write(&self, operation: &Value) -> Result<Value, (Option<String>, String, bool)> {
        let key = Self::get_key(operation)?;
        match operation.get("obj_to_write") {
            Some(Value::String(s)) => {
                self.client.write(&key, s.as_bytes()).map_err(|e| Self::map_err(&key, e))?;
            }
            Some(Value::Null) | None => {}
            Some(_) => {
                return Err((None, "Invalid type for obj_to_write parameter".to_owned(), false));
            }
        }
        Ok(serde_json::json!({}))
    }

    fn delete(&self, operation: &Value) -> Result<Value, (Option<String>, String, bool)> {
        let key = Self::get_key(operation)?;
        self.client.delete(&key).map_err(|e| Self::map_err(&key, e))?;
        Ok(serde_json::json!({}))
    }

    fn presigned_url(&self, operation: &Value) -> Result<Value, (Option<String>, String, bool)> {
        let key = Self::get_key(operation)?;
        let expiration = operation
            .get("expiration")
            .and_then(Value::as_u64)
            .unwrap_or(300);
        let url = self
            .client
            .generate_presigned_url(&key, Duration::from_secs(expiration))
            .map_err(|e| Self::map_err(&key, e))?;
        Ok(Value::String(url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStageClient;

    fn service() -> StorageService {
        StorageService::new(Arc::new(LocalStageClient::new()))
    }

    #[test]
    fn write_then_read_round_trips() {
        let service = service();
        let write_event = serde_json::json!({
            "operation": {"type": "storage_write", "key": "a.txt", "obj_to_write": "hello"}
        });
        let result = service.execute_operation(&write_event);
        assert!(result.get(ATTRIBUTE_NAME_RESULT).is_some());

        let read_event = serde_json::json!({
            "operation": {"type": "storage_read", "key": "a.txt"}
        });
        let result = service.execute_operation(&read_event);
        assert!(result.get(ATTRIBUTE_NAME_RESULT).is_some());
    }

    #[test]
    fn missing_key_is_an_error() {
        let service = service();
        let event = serde_json::json!({"operation": {"type": "storage_delete"}});
        let result = service.execute_operation(&event);
        assert_eq!(result[ATTRIBUTE_NAME_ERROR], "Key is required");
    }

    #[test]
    fn unknown_operation_type_is_an_error() {
        let service = service();
        let event = serde_json::json!({"operation": {"type": "storage_teleport"}});
        let result = service.execute_operation(&event);
        assert!(result[ATTRIBUTE_NAME_ERROR].as_str().unwrap().contains("storage_teleport"));
    }

    #[test]
    fn read_missing_key_is_not_found() {
        let service = service();
        let event = serde_json::json!({"operation": {"type": "storage_read", "key": "missing.txt"}});
        let result = service.execute_operation(&event);
        assert_eq!(result[ATTRIBUTE_NAME_ERROR_TYPE], ERROR_TYPE_NOTFOUND);
    }
}
