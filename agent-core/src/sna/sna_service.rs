//! `SnaService`: the operation-dispatch subsystem (C11) wiring together the
//! Operation Router, Warehouse Query Executor (C7), Storage Service (C9),
//! Result Processor/Publisher (C10, C1), Ack Sender (C3), Orchestrator Client
//! (C8), and Logs/Metrics Services (C12). Plays the same coordinating role
//! between the event handler and the warehouse/storage/backend clients.

use std::sync::Arc;
use std::time::Duration;

use agent_common::Metrics;
use serde_json::Value;
use uuid::Uuid;

use crate::db::{QueryExecutor, QueryMode};
use crate::events::AckSender;
use crate::orchestrator::OrchestratorClient;
use crate::queue::QueueAsyncProcessor;
use crate::serde_tags::{ATTRIBUTE_NAME_ERROR, ATTRIBUTE_NAME_ERROR_TYPE, ATTRIBUTE_NAME_RESULT};
use crate::services::{LocalMetricsService, LogsService, MetricsService};
use crate::storage::StorageService;

use super::config_keys;
use super::config_store::ConfigurationManager;
use super::operation_result::{AgentOperationResult, OperationAttributes};
use super::results_publisher::ResultsPublisher;
use super::router::{RouteKind, RouteTable};

struct QueuedOperation {
    operation_id: String,
    kind: RouteKind,
    operation: Value,
}

pub struct SnaService {
    routes: RouteTable,
    executor: Arc<QueryExecutor>,
    config: Arc<ConfigurationManager>,
    orchestrator: Arc<OrchestratorClient>,
    ack_sender: Arc<AckSender>,
    results_publisher: Arc<ResultsPublisher>,
    metrics_service: Option<Arc<MetricsService>>,
    metrics: Metrics,
    queries_runner: QueueAsyncProcessor<QueuedOperation>,
    ops_runner: QueueAsyncProcessor<QueuedOperation>,
}

impl SnaService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        routes: RouteTable,
        executor: Arc<QueryExecutor>,
        storage_service: Arc<StorageService>,
        config: Arc<ConfigurationManager>,
        orchestrator: Arc<OrchestratorClient>,
        ack_sender: Arc<AckSender>,
        results_publisher: Arc<ResultsPublisher>,
        logs_service: Arc<LogsService>,
        metrics_service: Option<Arc<MetricsService>>,
        metrics: Metrics,
        query_mode: QueryMode,
    ) -> Arc<Self> {
        let queries_runner_threads = config.get_int_value(config_keys::QUERIES_RUNNER_THREAD_COUNT, 1).max(1) as usize;
        let ops_runner_threads = config.get_int_value(config_keys::OPS_RUNNER_THREAD_COUNT, 1).max(1) as usize;

        let queries_runner = QueueAsyncProcessor::start("queries-runner", queries_runner_threads, {
            let executor = Arc::clone(&executor);
            let publisher = Arc::clone(&results_publisher);
            move |op: QueuedOperation| {
                if let Some(result) = Self::run_query_operation(&executor, query_mode, &op.operation_id, &op.operation) {
                    publisher.publish(result);
                }
            }
        });

        let ops_runner = QueueAsyncProcessor::start("ops-runner", ops_runner_threads, {
            let storage_service = Arc::clone(&storage_service);
            let logs_service = Arc::clone(&logs_service);
            let metrics_service = metrics_service.clone();
            let config = Arc::clone(&config);
            let orchestrator = Arc::clone(&orchestrator);
            let executor = Arc::clone(&executor);
            let publisher = Arc::clone(&results_publisher);
            move |op: QueuedOperation| {
                let result = Self::run_other_operation(
                    &op,
                    &storage_service,
                    &logs_service,
                    metrics_service.as_deref(),
                    &config,
                    &orchestrator,
                    &executor,
                );
                if let Some(result) = result {
                    publisher.publish(result);
                }
            }
        });

        Arc::new(Self {
            routes,
            executor,
            config,
            orchestrator,
            ack_sender,
            results_publisher,
            metrics_service,
            metrics,
            queries_runner,
            ops_runner,
        })
    }

    /// Called by the Events Client (C5) for every operation event that isn't
    /// a bare `heartbeat`/`welcome`, and for the synthetic `push_metrics`
    /// event the Events Client raises off the heartbeat frame's flag.
    pub fn handle_event(&self, event: Value) {
        self.metrics.incr("sna.events.received");
        let operation_id = event.get("operation_id").and_then(Value::as_str).map(str::to_owned);
        let path = event.get("path").and_then(Value::as_str).map(str::to_owned);

        if let (Some(operation_id), Some(path)) = (operation_id, path) {
            self.ack_sender.schedule_ack(
                operation_id.clone(),
                Duration::from_secs(self.config.get_int_value(config_keys::ACK_INTERVAL_SECONDS, 45) as u64),
            );

            let mut operation = event.get("operation").cloned().unwrap_or(Value::Null);
            if operation.get("__mcd_size_exceeded__").and_then(Value::as_bool) == Some(true) {
                info!("downloading oversized operation"; "operation_id" => &operation_id);
                match self.orchestrator.download_operation(&operation_id) {
                    Ok(downloaded) => operation = downloaded,
                    Err(err) => {
                        error!("failed to download oversized operation"; "operation_id" => &operation_id, "error" => err);
                        return;
                    }
                }
            }

            self.route(&path, operation_id, operation);
            return;
        }

        if event.get("type").and_then(Value::as_str) == Some("push_metrics") {
            self.route("push_metrics", Uuid::new_v4().to_string(), Value::Null);
        }
    }

    fn route(&self, path: &str, operation_id: String, operation: Value) {
        let Some(kind) = self.routes.resolve(&serde_json::json!({ "path": path })) else {
            self.metrics.incr("sna.events.unrouted");
            warn!("received event with no resolvable route"; "operation_id" => &operation_id, "path" => path);
            return;
        };

        let queued = QueuedOperation { operation_id, kind, operation };
        match kind {
            RouteKind::Snowflake => self.queries_runner.schedule(queued),
            _ => self.ops_runner.schedule(queued),
        }
    }

    /// Builds the `OperationAttributes` for a snowflake operation from its
    /// body, falling back to `operation_id`-derived defaults for whatever
    /// the caller didn't supply.
    fn attributes_from_operation(operation_id: &str, operation: &Value) -> OperationAttributes {
        let mut attrs = OperationAttributes::new(operation_id);
        if let Some(trace_id) = operation.get("trace_id").and_then(Value::as_str) {
            attrs.trace_id = trace_id.to_owned();
        }
        if let Some(compress) = operation.get("compress_response_file").and_then(Value::as_bool) {
            attrs.compress_response_file = compress;
        }
        if let Some(limit) = operation.get("response_size_limit_bytes").and_then(Value::as_i64) {
            attrs.response_size_limit_bytes = limit;
        }
        if let Some(job_type) = operation.get("job_type").and_then(Value::as_str) {
            attrs.job_type = Some(job_type.to_owned());
        }
        attrs
    }

    fn run_query_operation(
        executor: &QueryExecutor,
        mode: QueryMode,
        operation_id: &str,
        operation: &Value,
    ) -> Option<AgentOperationResult> {
        let operation_type = operation.get("type").and_then(Value::as_str).unwrap_or_default();
        match operation_type {
            "snowflake_query" => {
                let sql = operation.get("query").and_then(Value::as_str).unwrap_or_default();
                let attrs = Self::attributes_from_operation(operation_id, operation);
                let query = crate::db::SnowflakeQuery::new(sql, attrs.clone());
                match executor.run_query(&query, mode) {
                    Ok(Some(rows)) => Some(AgentOperationResult::success(
                        attrs,
                        serde_json::json!({ "rows": rows.rows, "rowcount": rows.rows.len() }),
                    )),
                    Ok(None) => None,
                    Err(err) => {
                        error!("snowflake query failed"; "operation_id" => operation_id, "error" => err.to_string());
                        Some(AgentOperationResult::error(attrs, None, err.to_string(), None, None))
                    }
                }
            }
            "snowflake_connection_test" => {
                let attrs = OperationAttributes {
                    trace_id: operation_id.to_owned(),
                    ..OperationAttributes::new(operation_id)
                };
                Some(AgentOperationResult::success(attrs, serde_json::json!({ "ok": true })))
            }
            other => {
                error!("invalid snowflake operation type"; "operation_id" => operation_id, "type" => other);
                let attrs = OperationAttributes::new(operation_id);
                Some(AgentOperationResult::error(
                    attrs,
                    None,
                    format!("Invalid operation type: {}", other),
                    None,
                    None,
                ))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_other_operation(
        op: &QueuedOperation,
        storage_service: &StorageService,
        logs_service: &LogsService,
        metrics_service: Option<&MetricsService>,
        config: &ConfigurationManager,
        orchestrator: &OrchestratorClient,
        executor: &QueryExecutor,
    ) -> Option<AgentOperationResult> {
        let trace_id = op
            .operation
            .get("trace_id")
            .and_then(Value::as_str)
            .unwrap_or(&op.operation_id)
            .to_owned();
        let attrs = OperationAttributes {
            trace_id,
            ..OperationAttributes::new(&op.operation_id)
        };

        match op.kind {
            RouteKind::Storage => {
                let event = serde_json::json!({ "operation": op.operation });
                let outcome = storage_service.execute_operation(&event);
                if let Some(result) = outcome.get(ATTRIBUTE_NAME_RESULT) {
                    Some(AgentOperationResult::success(attrs, result.clone()))
                } else {
                    let message = outcome
                        .get(ATTRIBUTE_NAME_ERROR)
                        .and_then(Value::as_str)
                        .unwrap_or("unknown storage error")
                        .to_owned();
                    let error_type = outcome.get(ATTRIBUTE_NAME_ERROR_TYPE).and_then(Value::as_str).map(str::to_owned);
                    Some(AgentOperationResult::error(attrs, error_type, message, None, None))
                }
            }
            RouteKind::Health => Some(AgentOperationResult::success(attrs, Self::health_information())),
            RouteKind::Logs => match logs_service.get_logs(100) {
                Ok(lines) => Some(AgentOperationResult::success(
                    attrs,
                    serde_json::to_value(lines).unwrap_or(Value::Null),
                )),
                Err(err) => Some(AgentOperationResult::error(attrs, None, err.to_string(), None, None)),
            },
            RouteKind::Metrics => {
                let lines = Self::collect_metrics(metrics_service);
                Some(AgentOperationResult::success(attrs, serde_json::json!({ "metrics": lines })))
            }
            RouteKind::PushMetrics => {
                let lines = Self::collect_metrics(metrics_service);
                orchestrator.push_metrics(&lines);
                None
            }
            RouteKind::Upgrade => {
                let parameters = op.operation.get("parameters").cloned().unwrap_or(Value::Null);
                Self::apply_upgrade(config, executor, &parameters);
                Some(AgentOperationResult::success(
                    attrs,
                    serde_json::json!({ "updated": true, "trace_id": op.operation_id }),
                ))
            }
            RouteKind::Snowflake => {
                error!("snowflake operation reached the ops runner"; "operation_id" => &op.operation_id);
                None
            }
        }
    }

    fn collect_metrics(metrics_service: Option<&MetricsService>) -> Vec<String> {
        match metrics_service {
            Some(service) => service.fetch_metrics(),
            None => LocalMetricsService::fetch_metrics(),
        }
    }

    /// Merges `operation.parameters` into the Config Store, then, if
    /// `IS_REMOTE_UPGRADABLE` is set, fires the warehouse async call that
    /// waits and restarts the container. Failures are logged: an upgrade
    /// that can't restart the process still leaves the new config applied
    /// for the next natural restart.
    fn apply_upgrade(config: &ConfigurationManager, executor: &QueryExecutor, parameters: &Value) {
        if let Value::Object(map) = parameters {
            let updates: std::collections::HashMap<String, String> = map
                .iter()
                .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_owned())))
                .collect();
            if let Err(err) = config.set_values(&updates) {
                error!("failed to merge upgrade parameters into config store"; "error" => err.to_string());
            }
        }

        if config.get_bool_value(config_keys::IS_REMOTE_UPGRADABLE, false) {
            info!("restarting service for remote upgrade");
            if let Err(err) = executor.execute("default", "CALL app_public.restart_agent_container(5)", &[]) {
                error!("failed to schedule remote restart"; "error" => err.to_string());
            }
        }
    }

    /// Built for the admin `/api/v1/test/health` route and the Operation
    /// Router's own `health` route.
    pub fn health_information() -> Value {
        serde_json::json!({
            "platform": "sna-agent",
            "version": env!("CARGO_PKG_VERSION"),
            "cpu_count": std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1),
        })
    }

    /// Invoked by the admin `/api/v1/test/metrics` route: scrapes the same
    /// metrics the `RouteKind::Metrics`/`PushMetrics` router paths collect,
    /// without publishing or pushing them anywhere.
    pub fn scrape_metrics(&self) -> Vec<String> {
        Self::collect_metrics(self.metrics_service.as_deref())
    }

    /// Invoked by the admin `/api/v1/test/reachability` route: pings the
    /// orchestrator and returns whatever it answers with.
    pub fn run_reachability_test(&self) -> Value {
        let trace_id = Uuid::new_v4().to_string();
        info!("running reachability test"; "trace_id" => &trace_id);
        self.orchestrator.execute_operation(&format!("/api/v1/test/ping?trace_id={}", trace_id), "GET", None)
    }

    /// Invoked by the admin `/api/v1/agent/execute/snowflake/query_completed`
    /// route when an asynchronously-dispatched warehouse statement finishes.
    /// `op_json` is the `OperationAttributes` the executor handed to the
    /// stored procedure at dispatch time, echoed back verbatim.
    pub fn query_completed(&self, op_json: &str, query_id: &str) {
        let attrs = match serde_json::from_str::<OperationAttributes>(op_json) {
            Ok(attrs) => attrs,
            Err(err) => {
                error!("malformed operation attributes on query_completed"; "error" => err.to_string());
                return;
            }
        };
        info!("query completed"; "operation_id" => &attrs.operation_id, "query_id" => query_id);
        self.metrics.incr("sna.queries.completed");
        self.results_publisher.publish(AgentOperationResult::pending_query(attrs, query_id));
    }

    /// Invoked by the admin `…/query_failed` route when an asynchronously
    /// dispatched warehouse statement errors out.
    pub fn query_failed(&self, op_json: &str, code: i32, message: &str, state: &str) {
        let attrs = match serde_json::from_str::<OperationAttributes>(op_json) {
            Ok(attrs) => attrs,
            Err(err) => {
                error!("malformed operation attributes on query_failed"; "error" => err.to_string());
                return;
            }
        };
        error!("query failed"; "operation_id" => &attrs.operation_id, "code" => code, "state" => state);
        self.metrics.incr("sna.queries.failed");
        let warehouse_error = QueryExecutor::result_for_query_failed(code, message, Some(state.to_owned()));
        let error_type = format!("{:?}", warehouse_error.kind);
        self.results_publisher.publish(AgentOperationResult::error(
            attrs,
            Some(error_type),
            warehouse_error.message,
            Some(warehouse_error.code),
            warehouse_error.sqlstate,
        ));
    }

    pub fn stop(&self) {
        self.queries_runner.stop();
        self.ops_runner.stop();
        self.ack_sender.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ConnectionPoolSet, PoolConfig, QueryRows, WarehouseConnection};
    use crate::error::AgentResult;
    use crate::storage::LocalStageClient;
    use std::sync::Mutex;

    struct FakeConnection {
        rows: Vec<Vec<String>>,
    }

    impl WarehouseConnection for FakeConnection {
        fn query_rows(&mut self, _query: &str, _params: &[&str]) -> AgentResult<Vec<Vec<String>>> {
            Ok(self.rows.clone())
        }
        fn execute(&mut self, _query: &str, _params: &[&str]) -> AgentResult<()> {
            Ok(())
        }
        fn execute_async(&mut self, _query: &str, _operation_attributes_json: &str) -> AgentResult<()> {
            Ok(())
        }
        fn fetch_result(&mut self, _query_id: &str) -> AgentResult<Vec<Vec<String>>> {
            Ok(self.rows.clone())
        }
        fn ping(&mut self) -> bool {
            true
        }
    }

    fn executor_with_rows(rows: Vec<Vec<String>>) -> QueryExecutor {
        let factory: crate::db::ConnectionFactory = Arc::new(move || {
            Ok(Box::new(FakeConnection { rows: rows.clone() }) as Box<dyn WarehouseConnection>)
        });
        let pools = ConnectionPoolSet::new(factory, PoolConfig::default()).unwrap();
        QueryExecutor::new(pools)
    }

    #[test]
    fn direct_sync_query_returns_an_inline_success_result() {
        let executor = executor_with_rows(vec![vec!["1".to_owned()]]);
        let operation = serde_json::json!({"type": "snowflake_query", "query": "SELECT 1"});
        let result = SnaService::run_query_operation(&executor, QueryMode::DirectSync, "op-1", &operation).unwrap();
        match result.carrier {
            super::super::operation_result::ResultCarrier::Result(value) => {
                assert_eq!(value["rowcount"], 1);
            }
            other => panic!("expected an inline result, got {:?}", other),
        }
    }

    #[test]
    fn async_query_defers_publication() {
        let executor = executor_with_rows(vec![]);
        let operation = serde_json::json!({"type": "snowflake_query", "query": "SELECT 1"});
        let result = SnaService::run_query_operation(&executor, QueryMode::Async, "op-2", &operation);
        assert!(result.is_none());
    }

    #[test]
    fn connection_test_uses_the_operation_id_as_trace_id() {
        let executor = executor_with_rows(vec![]);
        let operation = serde_json::json!({"type": "snowflake_connection_test"});
        let result = SnaService::run_query_operation(&executor, QueryMode::DirectSync, "op-3", &operation).unwrap();
        assert_eq!(result.attrs.trace_id, "op-3");
    }

    #[test]
    fn invalid_operation_type_is_reported_as_an_error() {
        let executor = executor_with_rows(vec![]);
        let operation = serde_json::json!({"type": "teleport"});
        let result = SnaService::run_query_operation(&executor, QueryMode::DirectSync, "op-4", &operation).unwrap();
        match result.carrier {
            super::super::operation_result::ResultCarrier::Error { message, .. } => {
                assert!(message.contains("teleport"));
            }
            other => panic!("expected an error, got {:?}", other),
        }
    }

    #[test]
    fn storage_operation_runs_against_the_storage_service() {
        let storage_service = StorageService::new(Arc::new(LocalStageClient::new()));
        let op = QueuedOperation {
            operation_id: "op-5".to_owned(),
            kind: RouteKind::Storage,
            operation: serde_json::json!({"type": "storage_write", "key": "a.txt", "obj_to_write": "hi"}),
        };
        let executor = executor_with_rows(vec![]);
        let config = ConfigurationManager::new(Box::new(super::super::config_store::EnvConfig));
        let orchestrator = OrchestratorClient::new("http://localhost:1", "/nonexistent");
        let logs_service = LogsService::new(Arc::new(executor_with_rows(vec![])));
        let result = SnaService::run_other_operation(&op, &storage_service, &logs_service, None, &config, &orchestrator, &executor).unwrap();
        match result.carrier {
            super::super::operation_result::ResultCarrier::Result(_) => {}
            other => panic!("expected a success result, got {:?}", other),
        }
    }

    #[test]
    fn health_information_reports_platform_and_version() {
        let info = SnaService::health_information();
        assert_eq!(info["platform"], "sna-agent");
        assert!(info["cpu_count"].as_u64().unwrap_or(0) >= 1);
    }

    #[test]
    fn upgrade_merges_parameters_into_the_config_store_when_it_can_persist_them() {
        let recorded = Arc::new(Mutex::new(Vec::new()));
        struct RecordingPersistence {
            recorded: Arc<Mutex<Vec<(String, String)>>>,
        }
        impl super::super::config_store::ConfigurationPersistence for RecordingPersistence {
            fn get_value(&self, _key: &str) -> AgentResult<Option<String>> {
                Ok(None)
            }
            fn set_value(&self, key: &str, value: &str) -> AgentResult<()> {
                self.recorded.lock().unwrap().push((key.to_owned(), value.to_owned()));
                Ok(())
            }
            fn get_all_values(&self) -> AgentResult<std::collections::HashMap<String, String>> {
                Ok(std::collections::HashMap::new())
            }
        }
        let config = ConfigurationManager::new(Box::new(RecordingPersistence { recorded: Arc::clone(&recorded) }));
        let executor = executor_with_rows(vec![]);
        let parameters = serde_json::json!({"USE_SYNC_QUERIES": "true"});
        SnaService::apply_upgrade(&config, &executor, &parameters);
        assert_eq!(recorded.lock().unwrap().as_slice(), &[("USE_SYNC_QUERIES".to_owned(), "true".to_owned())]);
    }
}
