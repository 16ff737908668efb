use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Deserialize;

use super::WarehouseConnection;
use crate::error::{AgentError, AgentErrorKind};

pub type ConnectionFactory =
    Arc<dyn Fn() -> Result<Box<dyn WarehouseConnection>, AgentError> + Send + Sync>;

/// One entry of the `JOB_TYPES` config value: `{job_type, warehouse_name,
/// pool_size?}`. Parsed once at startup to provision a dedicated pool per
/// job type alongside the default pool.
#[derive(Debug, Clone, Deserialize)]
pub struct JobTypeConfiguration {
    pub job_type: String,
    pub warehouse_name: String,
    #[serde(default)]
    pub pool_size: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobTypesConfiguration {
    #[serde(default)]
    pub job_types: Vec<JobTypeConfiguration>,
}

/// `r2d2::ManageConnection` over a `WarehouseConnection` factory.
///
/// Pre-ping liveness is expressed through `r2d2`'s `test_on_check_out`, which
/// calls `is_valid` (backed by `WarehouseConnection::ping`) before a
/// connection is handed to a caller.
pub struct WarehouseConnectionManager {
    factory: ConnectionFactory,
}

impl WarehouseConnectionManager {
    pub fn new(factory: ConnectionFactory) -> Self {
        Self { factory }
    }
}

impl r2d2::ManageConnection for WarehouseConnectionManager {
    type Connection = Box<dyn WarehouseConnection>;
    type Error = AgentError;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        (self.factory)()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        if conn.ping() {
            Ok(())
        } else {
            Err(AgentErrorKind::Warehouse("connection ping failed".to_owned()).into())
        }
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

/// Pool sizing/lifecycle parameters: a default pool size of 3, connections
/// recycled after 30 minutes, and liveness checked on checkout. `r2d2` is a
/// hard-capped, blocking pool with no unbounded-overflow mode; callers that
/// need a larger ceiling should size `max_size` generously instead (see
/// DESIGN.md).
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub pool_size: u32,
    pub recycle: Duration,
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 3,
            recycle: Duration::from_secs(30 * 60),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

fn build_pool(
    factory: ConnectionFactory,
    config: &PoolConfig,
) -> Result<r2d2::Pool<WarehouseConnectionManager>, AgentError> {
    r2d2::Pool::builder()
        .max_size(config.pool_size)
        .max_lifetime(Some(config.recycle))
        .connection_timeout(config.connection_timeout)
        .test_on_check_out(true)
        .build(WarehouseConnectionManager::new(factory))
        .map_err(|err| AgentErrorKind::Warehouse(err.to_string()).into())
}

/// A set of connection pools keyed by job type, with a default pool used for
/// job types that don't have a dedicated one configured.
pub struct ConnectionPoolSet {
    pools: RwLock<HashMap<String, r2d2::Pool<WarehouseConnectionManager>>>,
    default_pool: r2d2::Pool<WarehouseConnectionManager>,
}

impl ConnectionPoolSet {
    pub fn new(default_factory: ConnectionFactory, config: PoolConfig) -> Result<Self, AgentError> {
        Ok(Self {
            pools: RwLock::new(HashMap::new()),
            default_pool: build_pool(default_factory, &config)?,
        })
    }

    /// Registers a dedicated pool for `job_type`, overriding the default.
    pub fn add_pool(
        &self,
        job_type: impl Into<String>,
        factory: ConnectionFactory,
        config: PoolConfig,
    ) -> Result<(), AgentError> {
        let pool = build_pool(factory, &config)?;
        self.pools
            .write()
            .expect("connection pool set lock poisoned")
            .insert(job_type.into(), pool);
        Ok(())
    }

    pub fn get(
        &self,
        job_type: &str,
    ) -> Result<r2d2::PooledConnection<WarehouseConnectionManager>, AgentError> {
        let pools = self.pools.read().expect("connection pool set lock poisoned");
        let pool = pools.get(job_type).unwrap_or(&self.default_pool);
        pool.get()
            .map_err(|err| AgentErrorKind::Warehouse(err.to_string()).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentResult;

    struct TaggedConnection {
        warehouse: &'static str,
    }

    impl WarehouseConnection for TaggedConnection {
        fn query_rows(&mut self, _query: &str, _params: &[&str]) -> AgentResult<Vec<Vec<String>>> {
            Ok(vec![vec![self.warehouse.to_owned()]])
        }
        fn execute(&mut self, _query: &str, _params: &[&str]) -> AgentResult<()> {
            Ok(())
        }
        fn execute_async(&mut self, _query: &str, _operation_attributes_json: &str) -> AgentResult<()> {
            Ok(())
        }
        fn fetch_result(&mut self, _query_id: &str) -> AgentResult<Vec<Vec<String>>> {
            Ok(vec![])
        }
        fn ping(&mut self) -> bool {
            true
        }
    }

    fn factory_for(warehouse: &'static str) -> ConnectionFactory {
        Arc::new(move || Ok(Box::new(TaggedConnection { warehouse }) as Box<dyn WarehouseConnection>))
    }

    /// Given `JOB_TYPES` configuring `query_logs -> QL_WH (pool_size 1)` and
    /// `sql_query -> SQ_WH (pool_size 2)`, a connection fetched for each job
    /// type comes from its own pool; any other job type (or none) falls back
    /// to the default pool.
    #[test]
    fn job_types_route_to_their_own_pool_others_fall_back_to_default() {
        let pools = ConnectionPoolSet::new(factory_for("DEFAULT_WH"), PoolConfig::default()).unwrap();
        pools
            .add_pool(
                "query_logs",
                factory_for("QL_WH"),
                PoolConfig {
                    pool_size: 1,
                    ..PoolConfig::default()
                },
            )
            .unwrap();
        pools
            .add_pool(
                "sql_query",
                factory_for("SQ_WH"),
                PoolConfig {
                    pool_size: 2,
                    ..PoolConfig::default()
                },
            )
            .unwrap();

        let warehouse_for = |job_type: &str| {
            let mut conn = pools.get(job_type).unwrap();
            conn.query_rows("", &[]).unwrap()[0][0].clone()
        };

        assert_eq!(warehouse_for("query_logs"), "QL_WH");
        assert_eq!(warehouse_for("sql_query"), "SQ_WH");
        assert_eq!(warehouse_for("metadata"), "DEFAULT_WH");
        assert_eq!(warehouse_for("default"), "DEFAULT_WH");
    }
}
