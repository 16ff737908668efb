//! The Results Publisher: a `QueueAsyncProcessor<AgentOperationResult>`
//! specialization that resolves whatever the carrier still needs (a
//! deferred async query fetch, or an already-known result/error), runs it
//! through the Result Processor (C10), and pushes it to the orchestrator via
//! the Orchestrator Client (C8).

use std::sync::Arc;

use crate::db::QueryExecutor;
use crate::events::AckSender;
use crate::orchestrator::OrchestratorClient;
use crate::queue::QueueAsyncProcessor;

use super::operation_result::{AgentOperationResult, PublishedResult, ResultCarrier};
use super::results_processor::ResultsProcessor;

pub struct ResultsPublisher {
    processor: QueueAsyncProcessor<AgentOperationResult>,
}

impl ResultsPublisher {
    pub fn start(
        thread_count: usize,
        executor: Arc<QueryExecutor>,
        results_processor: Arc<ResultsProcessor>,
        orchestrator: Arc<OrchestratorClient>,
        ack_sender: Arc<AckSender>,
    ) -> Self {
        let processor = QueueAsyncProcessor::start("results-publisher", thread_count, move |item: AgentOperationResult| {
            ack_sender.operation_completed(&item.operation_id);

            let published = match item.carrier {
                ResultCarrier::QueryId(query_id) => {
                    match executor.result_for_query(item.attrs.job_type_or_default(), &query_id) {
                        Ok(rows) => Some(PublishedResult::success(
                            item.operation_id.clone(),
                            item.attrs.trace_id.clone(),
                            serde_json::json!({ "rows": rows.rows, "rowcount": rows.rows.len() }),
                        )),
                        Err(err) => {
                            error!("failed to fetch async query result"; "operation_id" => &item.operation_id, "query_id" => &query_id, "error" => err.to_string());
                            None
                        }
                    }
                }
                ResultCarrier::Result(value) => Some(PublishedResult::success(
                    item.operation_id.clone(),
                    item.attrs.trace_id.clone(),
                    value,
                )),
                ResultCarrier::Error { error_type, message, errno, sqlstate } => Some(PublishedResult::error(
                    item.operation_id.clone(),
                    item.attrs.trace_id.clone(),
                    error_type,
                    message,
                    errno,
                    sqlstate,
                )),
            };

            if let Some(published) = published {
                let published = results_processor.process(
                    published,
                    item.attrs.response_size_limit_bytes,
                    item.attrs.compress_response_file,
                );
                orchestrator.push_results(&item.operation_id, &published);
            }
        });
        Self { processor }
    }

    pub fn publish(&self, result: AgentOperationResult) {
        self.processor.schedule(result);
    }

    pub fn stop(&self) {
        self.processor.stop();
    }
}
