//! The operation/result data model shared across C1–C11: the attributes an
//! inbound operation carries across the async warehouse round trip, and the
//! envelope an outbound result is wrapped in before it's pushed back to the
//! orchestrator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::serde_tags::{
    ATTRIBUTE_NAME_ERROR, ATTRIBUTE_NAME_ERROR_ATTRS, ATTRIBUTE_NAME_ERROR_TYPE,
    ATTRIBUTE_NAME_RESULT, ATTRIBUTE_NAME_RESULT_COMPRESSED, ATTRIBUTE_NAME_RESULT_LOCATION,
    ATTRIBUTE_NAME_TRACE_ID,
};

fn generate_trace_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_compress_response_file() -> bool {
    true
}

fn default_response_size_limit_bytes() -> i64 {
    5_000_000
}

/// The attributes carried through the async warehouse round trip (stored
/// procedure dispatch → `query_completed`/`query_failed` callback) so the
/// executor can rehydrate routing context from a callback that only
/// supplies a JSON string. Round-trips through `serde_json` unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperationAttributes {
    pub operation_id: String,
    #[serde(default = "generate_trace_id")]
    pub trace_id: String,
    #[serde(default = "default_compress_response_file")]
    pub compress_response_file: bool,
    #[serde(default = "default_response_size_limit_bytes")]
    pub response_size_limit_bytes: i64,
    #[serde(default)]
    pub job_type: Option<String>,
}

impl OperationAttributes {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            trace_id: generate_trace_id(),
            compress_response_file: default_compress_response_file(),
            response_size_limit_bytes: default_response_size_limit_bytes(),
            job_type: None,
        }
    }

    pub fn job_type_or_default(&self) -> &str {
        self.job_type.as_deref().unwrap_or("default")
    }
}

/// What a queued `AgentOperationResult` still needs before it can be
/// published: either a direct value (success or error, already known), or a
/// warehouse-assigned query id whose rows must still be fetched.
#[derive(Debug, Clone)]
pub enum ResultCarrier {
    QueryId(String),
    Result(Value),
    Error {
        error_type: Option<String>,
        message: String,
        errno: Option<i32>,
        sqlstate: Option<String>,
    },
}

/// An item queued on the Results Publisher (C1 specialization): everything
/// needed to resolve, size-gate, and push a final envelope, without having
/// blocked the caller that scheduled it.
#[derive(Debug, Clone)]
pub struct AgentOperationResult {
    pub operation_id: String,
    pub attrs: OperationAttributes,
    pub carrier: ResultCarrier,
}

impl AgentOperationResult {
    pub fn success(attrs: OperationAttributes, result: Value) -> Self {
        Self {
            operation_id: attrs.operation_id.clone(),
            attrs,
            carrier: ResultCarrier::Result(result),
        }
    }

    pub fn pending_query(attrs: OperationAttributes, query_id: impl Into<String>) -> Self {
        Self {
            operation_id: attrs.operation_id.clone(),
            attrs,
            carrier: ResultCarrier::QueryId(query_id.into()),
        }
    }

    pub fn error(
        attrs: OperationAttributes,
        error_type: Option<String>,
        message: impl Into<String>,
        errno: Option<i32>,
        sqlstate: Option<String>,
    ) -> Self {
        Self {
            operation_id: attrs.operation_id.clone(),
            attrs,
            carrier: ResultCarrier::Error {
                error_type,
                message: message.into(),
                errno,
                sqlstate,
            },
        }
    }
}

/// The finalized, wire-ready envelope pushed to the orchestrator. Distinct
/// from `AgentOperationResult`, which may still need an async fetch before
/// it can be turned into one of these.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedResult {
    pub operation_id: String,
    #[serde(flatten)]
    pub envelope: ResultEnvelope,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct ResultEnvelope {
    #[serde(rename = "__mcd_trace_id__", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(rename = "__mcd_result__", skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(rename = "__mcd_result_location__", skip_serializing_if = "Option::is_none")]
    pub result_location: Option<String>,
    #[serde(rename = "__mcd_result_compressed__", skip_serializing_if = "Option::is_none")]
    pub result_compressed: Option<bool>,
    #[serde(rename = "__mcd_error__", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(rename = "__mcd_error_type__", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(rename = "__mcd_error_attrs__", skip_serializing_if = "Option::is_none")]
    pub error_attrs: Option<Value>,
}

impl PublishedResult {
    pub fn success(operation_id: impl Into<String>, trace_id: impl Into<String>, result: Value) -> Self {
        Self {
            operation_id: operation_id.into(),
            envelope: ResultEnvelope {
                trace_id: Some(trace_id.into()),
                result: Some(result),
                ..Default::default()
            },
        }
    }

    pub fn error(
        operation_id: impl Into<String>,
        trace_id: impl Into<String>,
        error_type: Option<String>,
        message: impl Into<String>,
        errno: Option<i32>,
        sqlstate: Option<String>,
    ) -> Self {
        let error_attrs = if errno.is_some() || sqlstate.is_some() {
            Some(serde_json::json!({ "errno": errno, "sqlstate": sqlstate }))
        } else {
            None
        };
        Self {
            operation_id: operation_id.into(),
            envelope: ResultEnvelope {
                trace_id: Some(trace_id.into()),
                error: Some(message.into()),
                error_type,
                error_attrs,
                ..Default::default()
            },
        }
    }
}

pub const ENVELOPE_KEYS: &[&str] = &[
    ATTRIBUTE_NAME_TRACE_ID,
    ATTRIBUTE_NAME_RESULT,
    ATTRIBUTE_NAME_ERROR,
    ATTRIBUTE_NAME_ERROR_TYPE,
    ATTRIBUTE_NAME_ERROR_ATTRS,
    ATTRIBUTE_NAME_RESULT_LOCATION,
    ATTRIBUTE_NAME_RESULT_COMPRESSED,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_envelope_serializes_result_key() {
        let result = PublishedResult::success("op-1", "trace-1", serde_json::json!({"rows": []}));
        let json = serde_json::to_value(&result).unwrap();
        assert!(json.get("__mcd_result__").is_some());
        assert!(json.get("__mcd_error__").is_none());
    }

    #[test]
    fn error_envelope_serializes_error_keys_with_attrs() {
        let result = PublishedResult::error(
            "op-2",
            "trace-2",
            Some("ProgrammingError".to_owned()),
            "bad query",
            Some(630),
            Some("57014".to_owned()),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["__mcd_error__"], "bad query");
        assert_eq!(json["__mcd_error_type__"], "ProgrammingError");
        assert_eq!(json["__mcd_error_attrs__"]["errno"], 630);
        assert_eq!(json["__mcd_error_attrs__"]["sqlstate"], "57014");
        assert!(json.get("__mcd_result__").is_none());
    }

    #[test]
    fn operation_attributes_default_trace_id_and_limits_when_absent() {
        let attrs: OperationAttributes = serde_json::from_str(r#"{"operation_id": "op-3"}"#).unwrap();
        assert!(!attrs.trace_id.is_empty());
        assert!(attrs.compress_response_file);
        assert_eq!(attrs.response_size_limit_bytes, 5_000_000);
        assert_eq!(attrs.job_type, None);
    }

    #[test]
    fn operation_attributes_round_trip_through_json() {
        let original = OperationAttributes {
            operation_id: "op-4".to_owned(),
            trace_id: "t-4".to_owned(),
            compress_response_file: false,
            response_size_limit_bytes: 42,
            job_type: Some("query_logs".to_owned()),
        };
        let encoded = serde_json::to_string(&original).unwrap();
        let decoded: OperationAttributes = serde_json::from_str(&encoded).unwrap();
        assert_eq!(original, decoded);
    }
}
