use std::fmt;

use super::pool::ConnectionFactory;
use super::{ConnectionPoolSet, PoolConfig, QueryRows};
use crate::error::{AgentError, AgentErrorKind};
use crate::sna::operation_result::OperationAttributes;

const ERROR_INSUFFICIENT_PRIVILEGES: i32 = 3001;
const ERROR_SHARED_DATABASE_NO_LONGER_AVAILABLE: i32 = 3030;
const ERROR_OBJECT_DOES_NOT_EXIST: i32 = 2043;
const ERROR_QUERY_CANCELLED: i32 = 604;
const ERROR_STATEMENT_TIMED_OUT: i32 = 630;

/// Default per-session statement timeout, in seconds, applied before running
/// a query in helper-sync or async mode.
pub const DEFAULT_STATEMENT_TIMEOUT_SECONDS: u64 = 850;

/// A two-bucket classification of warehouse error codes: a small allowlist
/// of "this is actually a programming mistake, not a transient failure"
/// codes, everything else bucketed as a generic database error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarehouseErrorKind {
    ProgrammingError,
    DatabaseError,
}

impl WarehouseErrorKind {
    pub fn classify(code: i32) -> Self {
        match code {
            ERROR_INSUFFICIENT_PRIVILEGES
            | ERROR_SHARED_DATABASE_NO_LONGER_AVAILABLE
            | ERROR_OBJECT_DOES_NOT_EXIST
            | ERROR_QUERY_CANCELLED
            | ERROR_STATEMENT_TIMED_OUT => WarehouseErrorKind::ProgrammingError,
            _ => WarehouseErrorKind::DatabaseError,
        }
    }
}

/// A classified warehouse error: the client library's "SQL compilation
/// error: " style prefix is stripped up to the first `:` before forwarding
/// the message to the orchestrator. Carries `errno`/`sqlstate` so they can
/// be surfaced in the result envelope's `__mcd_error_attrs__`.
#[derive(Debug, Clone)]
pub struct WarehouseError {
    pub kind: WarehouseErrorKind,
    pub code: i32,
    pub message: String,
    pub sqlstate: Option<String>,
}

impl WarehouseError {
    pub fn new(code: i32, raw_message: &str, sqlstate: Option<String>) -> Self {
        let message = match raw_message.find(':') {
            Some(idx) => raw_message[idx + 1..].trim().to_owned(),
            None => raw_message.trim().to_owned(),
        };
        Self {
            kind: WarehouseErrorKind::classify(code),
            code,
            message,
            sqlstate,
        }
    }

    /// Canonicalizes an executor-side failure (connection errors, pool
    /// exhaustion, malformed SQL before it ever reaches the warehouse) into
    /// the same envelope shape a classified warehouse error would produce.
    pub fn from_exception(message: impl Into<String>) -> Self {
        Self {
            kind: WarehouseErrorKind::DatabaseError,
            code: 0,
            message: message.into(),
            sqlstate: None,
        }
    }
}

impl fmt::Display for WarehouseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?} {}] {}", self.kind, self.code, self.message)
    }
}

impl std::error::Error for WarehouseError {}

impl From<WarehouseError> for AgentError {
    fn from(inner: WarehouseError) -> Self {
        AgentErrorKind::Warehouse(inner.to_string()).into()
    }
}

/// The three ways a dispatched query can run, selected by the caller from
/// deployment config rather than by the query itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Runs the statement on the caller's thread and returns rows directly.
    /// Local development only — the warehouse container never takes this
    /// path in production.
    DirectSync,
    /// Sets the statement timeout, then calls the helper stored procedure
    /// that runs the SQL synchronously and returns rows directly.
    HelperSync,
    /// Dispatches an async stored procedure and returns immediately;
    /// completion arrives later via `query_completed`/`query_failed`.
    Async,
}

/// A SQL statement bound to the operation attributes that must survive the
/// async round trip to the warehouse and back.
#[derive(Debug, Clone)]
pub struct SnowflakeQuery {
    pub operation_id: String,
    pub sql: String,
    pub timeout_seconds: u64,
    pub attrs: OperationAttributes,
}

impl SnowflakeQuery {
    pub fn new(sql: impl Into<String>, attrs: OperationAttributes) -> Self {
        Self {
            operation_id: attrs.operation_id.clone(),
            sql: sql.into(),
            timeout_seconds: DEFAULT_STATEMENT_TIMEOUT_SECONDS,
            attrs,
        }
    }

    fn job_type(&self) -> &str {
        self.attrs.job_type.as_deref().unwrap_or("default")
    }
}

/// The Warehouse Query Executor (C7): routes a query to the pool for its job
/// type, runs it in the requested mode, and returns rows or a classified
/// error.
pub struct QueryExecutor {
    pools: ConnectionPoolSet,
}

impl QueryExecutor {
    pub fn new(pools: ConnectionPoolSet) -> Self {
        Self { pools }
    }

    /// Provisions a dedicated pool for `job_type`, used when the `JOB_TYPES`
    /// config value names a warehouse other than the default.
    pub fn add_job_type_pool(
        &self,
        job_type: impl Into<String>,
        factory: ConnectionFactory,
        config: PoolConfig,
    ) -> Result<(), AgentError> {
        self.pools.add_pool(job_type, factory, config)
    }

    /// Runs `query` in `mode`, selecting the pool by `query.attrs.job_type`
    /// (falling back to the default pool). Returns `Some(rows)` for the
    /// synchronous modes, `None` for async (the caller learns the outcome
    /// later via `result_for_query`/`result_for_query_failed`).
    pub fn run_query(&self, query: &SnowflakeQuery, mode: QueryMode) -> Result<Option<QueryRows>, AgentError> {
        let mut conn = self.pools.get(query.job_type())?;
        conn.execute(
            "ALTER SESSION SET STATEMENT_TIMEOUT_IN_SECONDS = ?",
            &[&query.timeout_seconds.to_string()],
        )?;

        match mode {
            QueryMode::DirectSync => {
                let rows = conn.query_rows(&query.sql, &[])?;
                Ok(Some(QueryRows { columns: Vec::new(), rows }))
            }
            QueryMode::HelperSync => {
                let rows = conn.query_rows("CALL app_public.run_query_sync(?)", &[&query.sql])?;
                Ok(Some(QueryRows { columns: Vec::new(), rows }))
            }
            QueryMode::Async => {
                let op_json = serde_json::to_string(&query.attrs)?;
                conn.execute_async(&query.sql, &op_json)?;
                Ok(None)
            }
        }
    }

    /// Runs an ad-hoc query without the OperationAttributes ceremony — used
    /// by the Logs and Config Store subsystems, which don't go through the
    /// operation dispatch pipeline.
    pub fn execute_query(&self, job_type: &str, sql: &str, params: &[&str]) -> Result<QueryRows, AgentError> {
        let mut conn = self.pools.get(job_type)?;
        let rows = conn.query_rows(sql, params)?;
        Ok(QueryRows { columns: Vec::new(), rows })
    }

    pub fn execute(&self, job_type: &str, sql: &str, params: &[&str]) -> Result<(), AgentError> {
        let mut conn = self.pools.get(job_type)?;
        conn.execute(sql, params)
    }

    /// Fetches results for a completed async query by its warehouse-assigned
    /// id, invoked from `query_completed`.
    pub fn result_for_query(&self, job_type: &str, query_id: &str) -> Result<QueryRows, AgentError> {
        let mut conn = self.pools.get(job_type)?;
        let rows = conn.fetch_result(query_id)?;
        Ok(QueryRows { columns: Vec::new(), rows })
    }

    /// Produces a classified error for an async query that failed, invoked
    /// from `query_failed`.
    pub fn result_for_query_failed(code: i32, message: &str, sqlstate: Option<String>) -> WarehouseError {
        WarehouseError::new(code, message, sqlstate)
    }

    /// Canonicalizes an executor-side exception (not a warehouse error code
    /// at all — a pool exhaustion, a connection failure) into the same
    /// envelope shape.
    pub fn result_for_exception(message: impl Into<String>) -> WarehouseError {
        WarehouseError::from_exception(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_known_codes_as_programming_errors() {
        assert_eq!(
            WarehouseErrorKind::classify(3001),
            WarehouseErrorKind::ProgrammingError
        );
        assert_eq!(
            WarehouseErrorKind::classify(630),
            WarehouseErrorKind::ProgrammingError
        );
    }

    #[test]
    fn classifies_unknown_codes_as_database_errors() {
        assert_eq!(
            WarehouseErrorKind::classify(99999),
            WarehouseErrorKind::DatabaseError
        );
    }

    #[test]
    fn strips_prefix_up_to_first_colon() {
        let err = WarehouseError::new(2043, "SQL compilation error: object does not exist", None);
        assert_eq!(err.message, "object does not exist");
    }

    #[test]
    fn leaves_message_unchanged_without_colon() {
        let err = WarehouseError::new(630, "statement timed out", Some("57014".to_owned()));
        assert_eq!(err.message, "statement timed out");
        assert_eq!(err.sqlstate.as_deref(), Some("57014"));
    }

    #[test]
    fn result_for_query_failed_classifies_and_carries_sqlstate() {
        let err = QueryExecutor::result_for_query_failed(630, "Uncaught exception : timeout", Some("57014".to_owned()));
        assert_eq!(err.kind, WarehouseErrorKind::ProgrammingError);
        assert_eq!(err.message, "timeout");
        assert_eq!(err.sqlstate.as_deref(), Some("57014"));
    }
}
