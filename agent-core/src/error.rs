//! Error types and macros.
use std::fmt;

use actix_web::{error::ResponseError, http::StatusCode, HttpResponse};
use backtrace::Backtrace;
use serde::{
    ser::{SerializeMap, Serializer},
    Serialize,
};
use thiserror::Error;

use agent_common::{from_error, impl_fmt_display, MetricError, ReportableError};

/// Common `Result` type.
pub type AgentResult<T> = Result<T, AgentError>;

/// Top-level error type.
#[derive(Debug)]
pub struct AgentError {
    kind: AgentErrorKind,
    pub(crate) backtrace: Box<Backtrace>,
    status: StatusCode,
}

/// Top-level ErrorKind.
#[derive(Error, Debug)]
pub enum AgentErrorKind {
    #[error("warehouse error: {}", _0)]
    Warehouse(String),

    #[error("storage error: {}", _0)]
    Storage(String),

    #[error("orchestrator request failed: {}", _0)]
    Orchestrator(String),

    #[error("configuration error: {}", _0)]
    Config(String),

    #[error("invalid operation: {}", _0)]
    InvalidOperation(String),

    #[error("{}", _0)]
    Internal(String),
}

impl AgentErrorKind {
    pub fn metric_label(&self) -> Option<String> {
        match self {
            AgentErrorKind::Warehouse(_) => Some("warehouse".to_owned()),
            AgentErrorKind::Storage(_) => Some("storage".to_owned()),
            AgentErrorKind::Orchestrator(_) => Some("orchestrator".to_owned()),
            _ => None,
        }
    }
}

impl AgentError {
    pub fn is_reportable(&self) -> bool {
        self.status.is_server_error()
    }

    pub fn kind(&self) -> &AgentErrorKind {
        &self.kind
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl From<AgentErrorKind> for AgentError {
    fn from(kind: AgentErrorKind) -> Self {
        let status = match &kind {
            AgentErrorKind::InvalidOperation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        Self {
            kind,
            backtrace: Box::new(Backtrace::new()),
            status,
        }
    }
}

impl From<MetricError> for AgentError {
    fn from(inner: MetricError) -> Self {
        AgentErrorKind::Internal(inner.to_string()).into()
    }
}

impl From<std::io::Error> for AgentError {
    fn from(inner: std::io::Error) -> Self {
        AgentErrorKind::Internal(inner.to_string()).into()
    }
}

impl From<r2d2::Error> for AgentError {
    fn from(inner: r2d2::Error) -> Self {
        AgentErrorKind::Warehouse(inner.to_string()).into()
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(inner: reqwest::Error) -> Self {
        AgentErrorKind::Orchestrator(inner.to_string()).into()
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(inner: serde_json::Error) -> Self {
        AgentErrorKind::Internal(inner.to_string()).into()
    }
}

impl ResponseError for AgentError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status).json(self)
    }
}

impl Serialize for AgentError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("status", &self.status.as_u16())?;
        map.serialize_entry("error", &self.kind.to_string())?;
        map.end()
    }
}

impl_fmt_display!(AgentError, AgentErrorKind);

from_error!(String, AgentError, AgentErrorKind::Internal);

impl ReportableError for AgentError {
    fn error_backtrace(&self) -> String {
        format!("{:#?}", self.backtrace)
    }

    fn is_reportable(&self) -> bool {
        self.status.is_server_error()
    }

    fn metric_label(&self) -> Option<String> {
        self.kind.metric_label()
    }
}
