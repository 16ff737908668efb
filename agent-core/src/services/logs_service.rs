//! The Logs Service: fetches recent warehouse-side service logs via a
//! stored procedure call, parsing the `[timestamp] message` line format the
//! procedure emits.

use std::sync::Arc;

use serde::Serialize;

use crate::db::QueryExecutor;
use crate::error::AgentResult;

const JOB_TYPE: &str = "logs";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub timestamp: String,
    pub message: String,
}

pub struct LogsService {
    executor: Arc<QueryExecutor>,
}

impl LogsService {
    pub fn new(executor: Arc<QueryExecutor>) -> Self {
        Self { executor }
    }

    pub fn get_logs(&self, limit: u32) -> AgentResult<Vec<LogLine>> {
        let rows = self
            .executor
            .execute_query(JOB_TYPE, "CALL app_public.service_logs(?)", &[&limit.to_string()])?;
        Ok(Self::parse_logs(&rows.rows))
    }

    fn parse_logs(rows: &[Vec<String>]) -> Vec<LogLine> {
        rows.iter()
            .filter_map(|row| row.first())
            .map(|line| Self::parse_log_line(line))
            .collect()
    }

    fn parse_log_line(log_line: &str) -> LogLine {
        if let Some(rest) = log_line.strip_prefix('[') {
            if let Some((timestamp, message)) = rest.split_once("] ") {
                return LogLine {
                    timestamp: timestamp.to_owned(),
                    message: message.to_owned(),
                };
            }
        }
        LogLine {
            timestamp: String::new(),
            message: log_line.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bracketed_timestamp_prefix() {
        let line = LogsService::parse_log_line("[2026-01-01T00:00:00Z] something happened");
        assert_eq!(line.timestamp, "2026-01-01T00:00:00Z");
        assert_eq!(line.message, "something happened");
    }

    #[test]
    fn falls_back_to_empty_timestamp_without_bracket() {
        let line = LogsService::parse_log_line("no timestamp here");
        assert_eq!(line.timestamp, "");
        assert_eq!(line.message, "no timestamp here");
    }
}
