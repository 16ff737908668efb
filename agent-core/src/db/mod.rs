//! Warehouse connectivity: a `WarehouseConnection` trait abstracting over the
//! warehouse client, pooled per job type with `r2d2`.
//!
//! No production warehouse-connector crate exists in the Rust ecosystem, so
//! the trait is the seam: a real implementation talks to the warehouse over
//! whatever wire protocol the container provides; tests use an in-memory
//! fake.

mod pool;
mod query;

pub use pool::{
    ConnectionFactory, ConnectionPoolSet, JobTypeConfiguration, JobTypesConfiguration, PoolConfig,
    WarehouseConnectionManager,
};
pub use query::{QueryExecutor, QueryMode, SnowflakeQuery, WarehouseError, WarehouseErrorKind};

use crate::error::AgentResult;

/// A single query result: column headers plus rows of stringly-typed cells.
/// Real warehouse clients produce richer typed values; the tagged-JSON
/// encoding in `serde_tags` is what recovers bytes/datetime/decimal from the
/// string form for wire transmission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// A pooled connection to the warehouse. Implementations are expected to be
/// cheap to construct (one per pool slot) and to support being dropped and
/// recreated transparently by `r2d2` when `is_valid`/`has_broken` indicate
/// staleness.
pub trait WarehouseConnection: Send {
    /// Runs `query`, substituting `params` positionally, and returns all
    /// rows.
    fn query_rows(&mut self, query: &str, params: &[&str]) -> AgentResult<Vec<Vec<String>>>;

    /// Runs `query` for side effects only (DML), substituting `params`.
    fn execute(&mut self, query: &str, params: &[&str]) -> AgentResult<()>;

    /// Invokes the async stored procedure wrapping `query`, passing the
    /// JSON-encoded `OperationAttributes` through so the warehouse's
    /// completion callback can echo it back verbatim. Returns as soon as the
    /// procedure is dispatched; completion arrives later via
    /// `query_completed`/`query_failed`.
    fn execute_async(&mut self, query: &str, operation_attributes_json: &str) -> AgentResult<()>;

    /// Fetches the result rows of a previously dispatched async query by its
    /// warehouse-assigned id.
    fn fetch_result(&mut self, query_id: &str) -> AgentResult<Vec<Vec<String>>>;

    /// Cheap liveness probe used by the pool before handing out a connection
    /// (`pre_ping`).
    fn ping(&mut self) -> bool;
}
