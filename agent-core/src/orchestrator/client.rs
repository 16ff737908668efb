//! The Orchestrator Client (C8): the HTTP client used to push results,
//! execute ad-hoc backend operations, and download full operation bodies
//! when SSE's event size limit truncated one. Retries every call three
//! times with a 1 second initial delay and factor-2 backoff.

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use serde_json::Value;

use crate::sna::operation_result::PublishedResult;

const RETRY_TRIES: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_secs(1);
const RETRY_BACKOFF_FACTOR: u32 = 2;
const RESULT_PUSH_TIMEOUT: Duration = Duration::from_secs(60);

pub struct OrchestratorClient {
    client: reqwest::blocking::Client,
    base_url: String,
    warehouse_token_path: PathBuf,
}

/// Retries `f` up to `RETRY_TRIES` times on a `tries=3, delay=1, backoff=2`
/// schedule: 1s, then 2s between attempts.
fn with_retries<T, E>(mut f: impl FnMut() -> Result<T, E>) -> Result<T, E> {
    let mut delay = RETRY_DELAY;
    let mut last_err = None;
    for attempt in 0..RETRY_TRIES {
        match f() {
            Ok(value) => return Ok(value),
            Err(err) => {
                last_err = Some(err);
                if attempt + 1 < RETRY_TRIES {
                    thread::sleep(delay);
                    delay *= RETRY_BACKOFF_FACTOR;
                }
            }
        }
    }
    Err(last_err.expect("loop ran at least once"))
}

impl OrchestratorClient {
    pub fn new(base_url: impl Into<String>, warehouse_token_path: impl Into<PathBuf>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            base_url: base_url.into(),
            warehouse_token_path: warehouse_token_path.into(),
        }
    }

    /// Reads the warehouse session token fresh on every call: the platform
    /// rotates it underneath the process, so it must never be cached.
    fn login_header(&self) -> Option<(&'static str, String)> {
        std::fs::read_to_string(&self.warehouse_token_path)
            .ok()
            .map(|token| ("Authorization", format!("Snowflake Token=\"{}\"", token.trim())))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// Pushes a result for `operation_id`. Failures are logged and swallowed
    /// — results are pushed from a background publisher thread with nothing
    /// downstream waiting synchronously on this call.
    pub fn push_results(&self, operation_id: &str, result: &PublishedResult) {
        if let Err(err) = with_retries(|| self.push_results_once(operation_id, result)) {
            error!("failed to push results to backend"; "operation_id" => operation_id, "error" => err.to_string());
        }
    }

    fn push_results_once(&self, operation_id: &str, result: &PublishedResult) -> Result<(), reqwest::Error> {
        info!("sending query results to backend"; "operation_id" => operation_id);
        let url = self.url(&format!("/api/v1/agent/operations/{}/result", operation_id));
        let mut request = self
            .client
            .put(&url)
            .timeout(RESULT_PUSH_TIMEOUT)
            .json(&serde_json::json!({ "result": result }));
        if let Some((name, value)) = self.login_header() {
            request = request.header(name, value);
        }
        let response = request.send()?;
        info!("sent query results to backend"; "operation_id" => operation_id, "status" => response.status().as_u16());
        Ok(())
    }

    /// Performs a generic operation against the orchestrator (e.g. `ping`).
    /// Errors are returned as a `{"error": ...}` value rather than
    /// propagated, so callers on the ops runner always get a value to
    /// publish back as a result.
    pub fn execute_operation(&self, path: &str, method: &str, body: Option<&Value>) -> Value {
        match with_retries(|| self.execute_operation_once(path, method, body)) {
            Ok(value) => value,
            Err(err) => {
                error!("error sending request to backend"; "path" => path, "error" => err.to_string());
                serde_json::json!({ "error": err.to_string() })
            }
        }
    }

    fn execute_operation_once(&self, path: &str, method: &str, body: Option<&Value>) -> Result<Value, reqwest::Error> {
        let url = self.url(path);
        let method = reqwest::Method::from_bytes(method.as_bytes()).unwrap_or(reqwest::Method::GET);
        let mut request = self.client.request(method, &url);
        if let Some((name, value)) = self.login_header() {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send()?;
        info!("sent backend request"; "path" => path, "status" => response.status().as_u16());
        response.error_for_status_ref()?;
        let value = response.json::<Value>().unwrap_or(Value::Null);
        Ok(if value.is_null() {
            serde_json::json!({ "error": "empty response" })
        } else {
            value
        })
    }

    /// Pushes scraped Prometheus metric lines to the orchestrator. Best
    /// effort, same as `push_results` — there's no caller waiting on this.
    pub fn push_metrics(&self, lines: &[String]) {
        self.execute_operation(
            "/api/v1/agent/metrics",
            "POST",
            Some(&serde_json::json!({ "format": "prometheus", "metrics": lines })),
        );
    }

    /// Downloads the full body of an operation, used when SSE's event size
    /// limit truncated it.
    pub fn download_operation(&self, operation_id: &str) -> Result<Value, String> {
        let path = format!("/api/v1/agent/operations/{}/request", operation_id);
        let operation = self.execute_operation(&path, "GET", None);
        if let Some(error_message) = operation.get("error").and_then(Value::as_str) {
            return Err(format!("Failed to download operation {}: {}", operation_id, error_message));
        }
        Ok(operation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn with_retries_stops_on_first_success() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retries(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Ok(42)
        });
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn with_retries_gives_up_after_configured_tries() {
        let attempts = AtomicU32::new(0);
        let result: Result<u32, &str> = with_retries(|| {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err("boom")
        });
        assert_eq!(result, Err("boom"));
        assert_eq!(attempts.load(Ordering::SeqCst), RETRY_TRIES);
    }

    #[test]
    fn push_results_puts_the_envelope_to_the_operation_result_endpoint() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("PUT", "/api/v1/agent/operations/op1/result")
            .match_body(mockito::Matcher::PartialJson(serde_json::json!({
                "result": {"__mcd_trace_id__": "t1", "__mcd_result__": {"rowcount": 3}}
            })))
            .with_status(200)
            .with_body("{}")
            .create();

        let client = OrchestratorClient::new(server.url(), "/nonexistent-token-path");
        let result = PublishedResult::success("op1", "t1", serde_json::json!({"rowcount": 3}));
        client.push_results("op1", &result);

        mock.assert();
    }

    #[test]
    fn push_results_does_not_panic_when_the_orchestrator_is_unreachable() {
        let client = OrchestratorClient::new("http://127.0.0.1:1", "/nonexistent-token-path");
        let result = PublishedResult::error("op2", "t2", None, "boom", None, None);
        client.push_results("op2", &result);
    }
}
