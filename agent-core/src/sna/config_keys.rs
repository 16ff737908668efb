//! String constants for the Config Store's key/value namespace.
//!
//! These are looked up as string keys, either in a warehouse table row or as
//! `SNA_<KEY>` environment variables, never as compiled-in fields.

pub const USE_CONNECTION_POOL: &str = "USE_CONNECTION_POOL";
pub const CONNECTION_POOL_SIZE: &str = "CONNECTION_POOL_SIZE";
pub const QUERIES_RUNNER_THREAD_COUNT: &str = "QUERIES_RUNNER_THREAD_COUNT";
pub const OPS_RUNNER_THREAD_COUNT: &str = "OPS_RUNNER_THREAD_COUNT";
pub const PUBLISHER_THREAD_COUNT: &str = "PUBLISHER_THREAD_COUNT";
pub const USE_SYNC_QUERIES: &str = "USE_SYNC_QUERIES";
pub const STAGE_NAME: &str = "STAGE_NAME";

/// Tunables for the event-receiver/ack subsystems, configurable rather than
/// hardcoded so an operator can adjust timing without a redeploy.
pub const ACK_INTERVAL_SECONDS: &str = "ACK_INTERVAL_SECONDS";
pub const HEARTBEAT_TIMEOUT_SECONDS: &str = "HEARTBEAT_TIMEOUT_SECONDS";

/// Per-job-type connection pool provisioning, read once at startup as a JSON
/// blob: `{"job_types": [{"job_type": "...", "warehouse_name": "...",
/// "pool_size": 3}, ...]}`.
pub const JOB_TYPES: &str = "JOB_TYPES";
pub const PRE_SIGNED_URL_RESPONSE_EXPIRATION_SECONDS: &str = "PRE_SIGNED_URL_RESPONSE_EXPIRATION_SECONDS";
pub const IS_REMOTE_UPGRADABLE: &str = "IS_REMOTE_UPGRADABLE";
pub const WAREHOUSE_NAME: &str = "WAREHOUSE_NAME";
pub const PUSH_LOGS_INTERVAL_SECONDS: &str = "PUSH_LOGS_INTERVAL_SECONDS";
pub const CONFIG_TABLE_NAME: &str = "CONFIG_TABLE_NAME";
pub const SNA_WAREHOUSE_NAME: &str = "SNA_WAREHOUSE_NAME";

pub const ALL_CONFIG_KEYS: &[&str] = &[
    USE_CONNECTION_POOL,
    CONNECTION_POOL_SIZE,
    QUERIES_RUNNER_THREAD_COUNT,
    OPS_RUNNER_THREAD_COUNT,
    PUBLISHER_THREAD_COUNT,
    USE_SYNC_QUERIES,
    STAGE_NAME,
    ACK_INTERVAL_SECONDS,
    HEARTBEAT_TIMEOUT_SECONDS,
    JOB_TYPES,
    PRE_SIGNED_URL_RESPONSE_EXPIRATION_SECONDS,
    IS_REMOTE_UPGRADABLE,
    WAREHOUSE_NAME,
    PUSH_LOGS_INTERVAL_SECONDS,
    CONFIG_TABLE_NAME,
    SNA_WAREHOUSE_NAME,
];
