//! The Events Client (C5): demultiplexes raw SSE payloads from the Stream
//! Receiver. `heartbeat` events notify the Heartbeat Checker and, when the
//! frame itself carries `push_metrics: true`, synthesize a `push_metrics`
//! event so the Metrics Service (C12) is pushed exactly when the orchestrator
//! asks for it rather than on a locally-guessed cadence. `welcome` events are
//! logged and dropped — they carry no operation. Everything else is
//! forwarded verbatim to the operation handler (the Operation Router, C11).

use std::sync::Arc;

use serde_json::Value;

use super::HeartbeatChecker;

pub trait OperationHandler: Send + Sync {
    fn handle(&self, event: Value);
}

impl<F: Fn(Value) + Send + Sync> OperationHandler for F {
    fn handle(&self, event: Value) {
        self(event)
    }
}

pub struct EventsClient {
    heartbeat_checker: Arc<HeartbeatChecker>,
    operation_handler: Box<dyn OperationHandler>,
}

impl EventsClient {
    pub fn new(
        heartbeat_checker: Arc<HeartbeatChecker>,
        operation_handler: Box<dyn OperationHandler>,
    ) -> Self {
        Self {
            heartbeat_checker,
            operation_handler,
        }
    }

    /// Parses and dispatches a single raw SSE payload. Malformed JSON is
    /// logged and dropped rather than propagated — one bad frame must not
    /// take down the receive loop.
    pub fn handle_raw_event(&self, payload: &str) {
        let event: Value = match serde_json::from_str(payload) {
            Ok(event) => event,
            Err(err) => {
                warn!("dropping malformed event payload"; "error" => err.to_string());
                return;
            }
        };
        self.handle_event(event);
    }

    fn handle_event(&self, event: Value) {
        match event.get("type").and_then(Value::as_str) {
            Some("heartbeat") => {
                self.heartbeat_checker.heartbeat_received();
                if event.get("push_metrics").and_then(Value::as_bool) == Some(true) {
                    self.operation_handler
                        .handle(serde_json::json!({"type": "push_metrics"}));
                }
            }
            Some("welcome") => {
                info!("received welcome event from orchestrator");
            }
            _ => {
                self.operation_handler.handle(event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    #[test]
    fn heartbeat_events_reset_the_checker_without_forwarding() {
        let checker = Arc::new(HeartbeatChecker::new(Duration::from_secs(30)));
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&forwarded);
        let handler: Box<dyn OperationHandler> =
            Box::new(move |event: Value| recorder.lock().unwrap().push(event));
        let client = EventsClient::new(checker, handler);

        client.handle_raw_event(r#"{"type": "heartbeat"}"#);
        assert!(forwarded.lock().unwrap().is_empty());
    }

    #[test]
    fn welcome_events_are_dropped() {
        let checker = Arc::new(HeartbeatChecker::new(Duration::from_secs(30)));
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&forwarded);
        let handler: Box<dyn OperationHandler> =
            Box::new(move |event: Value| recorder.lock().unwrap().push(event));
        let client = EventsClient::new(checker, handler);

        client.handle_raw_event(r#"{"type": "welcome"}"#);
        assert!(forwarded.lock().unwrap().is_empty());
    }

    #[test]
    fn unrecognized_events_are_forwarded_verbatim() {
        let checker = Arc::new(HeartbeatChecker::new(Duration::from_secs(30)));
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&forwarded);
        let handler: Box<dyn OperationHandler> =
            Box::new(move |event: Value| recorder.lock().unwrap().push(event));
        let client = EventsClient::new(checker, handler);

        client.handle_raw_event(r#"{"type": "snowflake_query", "operation_id": "abc"}"#);
        let events = forwarded.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["operation_id"], "abc");
    }

    #[test]
    fn heartbeat_with_push_metrics_flag_synthesizes_a_push_metrics_event() {
        let checker = Arc::new(HeartbeatChecker::new(Duration::from_secs(30)));
        let forwarded = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::clone(&forwarded);
        let handler: Box<dyn OperationHandler> =
            Box::new(move |event: Value| recorder.lock().unwrap().push(event));
        let client = EventsClient::new(checker, handler);

        client.handle_raw_event(r#"{"type": "heartbeat", "push_metrics": false}"#);
        assert!(forwarded.lock().unwrap().is_empty());

        client.handle_raw_event(r#"{"type": "heartbeat", "push_metrics": true}"#);
        let events = forwarded.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["type"], "push_metrics");
    }
}
