#[macro_use]
extern crate slog_scope;

pub mod db;
pub mod error;
pub mod events;
pub mod logging;
pub mod orchestrator;
pub mod queue;
pub mod serde_tags;
pub mod services;
pub mod sna;
pub mod server;
pub mod storage;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use agent_common::{metrics_from_opts, Metrics};
use agent_settings::Settings;
use crate::db::{ConnectionPoolSet, JobTypesConfiguration, PoolConfig, QueryExecutor, QueryMode};
use crate::error::AgentResult;
use crate::events::{AckSender, EventsClient, HeartbeatChecker, StreamReceiver};
use crate::orchestrator::OrchestratorClient;
use crate::services::{LogsService, MetricsService};
use crate::sna::config_store::{ConfigurationManager, ConfigurationPersistence, EnvConfig, WarehouseConfig};
use crate::sna::{ResultsProcessor, ResultsPublisher, RouteTable, SnaService};
use crate::storage::{LocalStageClient, StageClient, StorageService, WarehouseStageClient};

const DEFAULT_HEARTBEAT_TIMEOUT_SECONDS: u64 = 120;
const DEFAULT_PRE_SIGNED_URL_EXPIRATION_SECONDS: u64 = 3600;

#[derive(Debug, Deserialize)]
struct AgentSecret {
    mcd_id: String,
    #[allow(dead_code)]
    mcd_token: String,
}

/// Ties together every component (C1–C13) into the running process. Made
/// explicit as a type so it can be constructed once in `main` and shared
/// with the admin HTTP surface.
pub struct AgentCore {
    pub settings: Settings,
    pub sna_service: Arc<SnaService>,
    pub events_client: Arc<EventsClient>,
    pub heartbeat_checker: Arc<HeartbeatChecker>,
    pub stream_receiver: Arc<StreamReceiver>,
}

impl AgentCore {
    pub fn new(settings: Settings) -> AgentResult<Self> {
        let _secret = Self::load_secret(&settings.secret_string_path);

        let config_warehouse_name = settings
            .sna_warehouse_name
            .clone()
            .unwrap_or_else(|| "AGENT_WH".to_owned());

        let executor = Arc::new(Self::build_query_executor(&settings, &config_warehouse_name)?);

        let config_persistence: Box<dyn ConfigurationPersistence> = if settings.in_container() {
            let config_pool = r2d2::Pool::builder()
                .max_size(1)
                .build(db::WarehouseConnectionManager::new(Self::connection_factory(
                    &settings,
                    &config_warehouse_name,
                )))
                .map_err(|e| error::AgentErrorKind::Config(e.to_string()))?;
            Box::new(WarehouseConfig::new(config_pool, settings.config_table_name.clone())?)
        } else {
            Box::new(EnvConfig)
        };
        let config = Arc::new(ConfigurationManager::new(config_persistence));

        let stage_client: Arc<dyn StageClient> = if settings.in_container() {
            let stage_name = config.get_str_value(sna::config_keys::STAGE_NAME, "mcd_agent.core.app_stage");
            Arc::new(WarehouseStageClient::new(Arc::clone(&executor), Some(stage_name), true))
        } else {
            Arc::new(LocalStageClient::new())
        };
        let storage_service = Arc::new(StorageService::new(Arc::clone(&stage_client)));

        let presigned_url_expiration = Duration::from_secs(config.get_int_value(
            sna::config_keys::PRE_SIGNED_URL_RESPONSE_EXPIRATION_SECONDS,
            DEFAULT_PRE_SIGNED_URL_EXPIRATION_SECONDS as i64,
        ) as u64);
        let results_processor = Arc::new(ResultsProcessor::new(Arc::clone(&stage_client), presigned_url_expiration));

        let orchestrator = Arc::new(OrchestratorClient::new(
            settings.backend_service_url.clone(),
            settings.warehouse_token_path.clone(),
        ));

        Self::provision_job_type_pools(&settings, &config, &executor);

        let ack_sender = Arc::new(AckSender::start({
            let orchestrator = Arc::clone(&orchestrator);
            move |operation_id: &str| {
                orchestrator.execute_operation(
                    &format!("/api/v1/agent/operations/{}/ack", operation_id),
                    "POST",
                    None,
                );
            }
        }));

        let publisher_threads = config.get_int_value(sna::config_keys::PUBLISHER_THREAD_COUNT, 1).max(1) as usize;
        let results_publisher = Arc::new(ResultsPublisher::start(
            publisher_threads,
            Arc::clone(&executor),
            results_processor,
            Arc::clone(&orchestrator),
            Arc::clone(&ack_sender),
        ));

        let metrics_service = if settings.in_container() {
            Some(Arc::new(MetricsService::new(
                config.get_str_value("COMPUTE_POOL_NAME", "mcd_agent_compute_pool"),
            )))
        } else {
            None
        };

        let logs_service = Arc::new(LogsService::new(Arc::clone(&executor)));

        let query_mode = if !settings.in_container() {
            QueryMode::DirectSync
        } else if config.get_bool_value(sna::config_keys::USE_SYNC_QUERIES, false) {
            QueryMode::HelperSync
        } else {
            QueryMode::Async
        };

        let statsd_client = metrics_from_opts("sna_agent", settings.statsd_host.as_deref(), settings.statsd_port)
            .map_err(|e| error::AgentErrorKind::Config(e.to_string()))?;
        let metrics = Metrics::from(&statsd_client);

        let routes = RouteTable::default_routes();
        let sna_service = SnaService::new(
            routes,
            Arc::clone(&executor),
            storage_service,
            Arc::clone(&config),
            Arc::clone(&orchestrator),
            Arc::clone(&ack_sender),
            Arc::clone(&results_publisher),
            logs_service,
            metrics_service,
            metrics,
            query_mode,
        );

        let heartbeat_timeout = Duration::from_secs(config.get_int_value(
            sna::config_keys::HEARTBEAT_TIMEOUT_SECONDS,
            DEFAULT_HEARTBEAT_TIMEOUT_SECONDS as i64,
        ) as u64);
        let heartbeat_checker = Arc::new(HeartbeatChecker::new(heartbeat_timeout));

        let stream_url = format!("{}/api/v1/agent/events", settings.backend_service_url.trim_end_matches('/'));
        let stream_receiver = Arc::new(StreamReceiver::new(stream_url, settings.secret_string_path.clone()));

        let events_client = Arc::new(EventsClient::new(Arc::clone(&heartbeat_checker), {
            let sna_service = Arc::clone(&sna_service);
            Box::new(move |event: serde_json::Value| sna_service.handle_event(event))
        }));

        Ok(Self {
            settings,
            sna_service,
            events_client,
            heartbeat_checker,
            stream_receiver,
        })
    }

    fn load_secret(path: &str) -> Option<AgentSecret> {
        std::fs::read_to_string(Path::new(path))
            .ok()
            .and_then(|contents| serde_json::from_str(&contents).ok())
    }

    /// Parses the `JOB_TYPES` config value and provisions a dedicated
    /// connection pool per entry alongside the default pool. Malformed JSON
    /// or a single entry's pool failing to provision is logged and skipped
    /// rather than treated as a startup failure — job types are additive,
    /// not required for the agent to run.
    fn provision_job_type_pools(settings: &Settings, config: &ConfigurationManager, executor: &QueryExecutor) {
        let raw = config.get_str_value(sna::config_keys::JOB_TYPES, "");
        if raw.trim().is_empty() {
            return;
        }
        let job_types: JobTypesConfiguration = match serde_json::from_str(&raw) {
            Ok(parsed) => parsed,
            Err(err) => {
                error!("failed to parse JOB_TYPES config value"; "error" => err.to_string());
                return;
            }
        };
        for job_type in job_types.job_types {
            let factory = Self::connection_factory(settings, &job_type.warehouse_name);
            let mut pool_config = PoolConfig::default();
            if let Some(pool_size) = job_type.pool_size {
                pool_config.pool_size = pool_size;
            }
            if let Err(err) = executor.add_job_type_pool(job_type.job_type.clone(), factory, pool_config) {
                error!("failed to provision job-type pool"; "job_type" => job_type.job_type, "error" => err.to_string());
            }
        }
    }

    fn connection_factory(
        settings: &Settings,
        warehouse_name: &str,
    ) -> db::ConnectionFactory {
        let _ = (settings, warehouse_name);
        Arc::new(|| {
            Err(error::AgentErrorKind::Warehouse(
                "no warehouse connector configured outside the warehouse container".to_owned(),
            )
            .into())
        })
    }

    fn build_query_executor(settings: &Settings, warehouse_name: &str) -> AgentResult<QueryExecutor> {
        let pools = ConnectionPoolSet::new(Self::connection_factory(settings, warehouse_name), PoolConfig::default())?;
        Ok(QueryExecutor::new(pools))
    }

    /// Starts the background loops for C1–C5: the Stream Receiver connects
    /// to the orchestrator's SSE endpoint, demultiplexing every event
    /// through the Events Client, which in turn feeds the Heartbeat Checker
    /// and Operation Router.
    pub fn start(&self) {
        let events_client = Arc::clone(&self.events_client);
        let heartbeat_checker = Arc::clone(&self.heartbeat_checker);
        let stream_receiver_for_timeout = Arc::clone(&self.stream_receiver);

        self.heartbeat_checker.start(move || {
            warn!("heartbeat timed out, reconnecting stream");
            stream_receiver_for_timeout.restart();
        });

        self.stream_receiver.start(
            move |payload: String| events_client.handle_raw_event(&payload),
            move || info!("stream connected"),
            {
                let heartbeat_checker = Arc::clone(&heartbeat_checker);
                move || {
                    warn!("stream disconnected");
                    heartbeat_checker.heartbeat_received();
                }
            },
        );
    }

    pub fn stop(&self) {
        self.stream_receiver.stop();
        self.heartbeat_checker.stop();
        self.sna_service.stop();
    }
}
