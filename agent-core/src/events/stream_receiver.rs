//! The Stream Receiver (C4): maintains the persistent SSE connection to the
//! orchestrator, reconnecting with exponential backoff on any failure: base
//! 2s, factor 2, capped at 240s, retried indefinitely (there's no ceiling on
//! attempts — the agent has nothing better to do than keep trying to reach
//! the orchestrator).
//!
//! Uses the same generation-token pattern as the Heartbeat Checker so a
//! `stop` followed immediately by a new `start` can't have the old loop's
//! in-flight reconnect attempt clobber the new one's connection.

use std::io::{BufRead, BufReader};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::Deserialize;
use uuid::Uuid;

/// The local fallback identity used when no secret file is mounted, e.g. a
/// developer running the agent outside its warehouse container. A mismatched
/// orchestrator rejects these immediately rather than hanging, which is the
/// point — local runs talk to a local orchestrator stub that accepts them.
const LOCAL_FALLBACK_MCD_ID: &str = "local-dev-agent";
const LOCAL_FALLBACK_MCD_TOKEN: &str = "local-dev-token";

#[derive(Debug, Deserialize)]
struct AgentIdentity {
    mcd_id: String,
    mcd_token: String,
}

/// Resolves the `x-mcd-id`/`x-mcd-token` headers from the secret file,
/// falling back to local dev tokens (with a warning) if it's missing or
/// malformed.
fn resolve_identity(secret_path: &str) -> (String, String) {
    match std::fs::read_to_string(secret_path) {
        Ok(contents) => match serde_json::from_str::<AgentIdentity>(&contents) {
            Ok(identity) => (identity.mcd_id, identity.mcd_token),
            Err(err) => {
                warn!("malformed agent secret file, using local fallback identity"; "path" => secret_path, "error" => err.to_string());
                (LOCAL_FALLBACK_MCD_ID.to_owned(), LOCAL_FALLBACK_MCD_TOKEN.to_owned())
            }
        },
        Err(err) => {
            warn!("no agent secret file found, using local fallback identity"; "path" => secret_path, "error" => err.to_string());
            (LOCAL_FALLBACK_MCD_ID.to_owned(), LOCAL_FALLBACK_MCD_TOKEN.to_owned())
        }
    }
}

const BASE_BACKOFF: Duration = Duration::from_secs(2);
const BACKOFF_FACTOR: u32 = 2;
const MAX_BACKOFF: Duration = Duration::from_secs(240);

struct State {
    loop_id: Option<Uuid>,
}

type EventCallback = Arc<dyn Fn(String) + Send + Sync>;
type ConnectedCallback = Arc<dyn Fn() + Send + Sync>;
type DisconnectedCallback = Arc<dyn Fn() + Send + Sync>;

struct Callbacks {
    on_event: EventCallback,
    on_connected: ConnectedCallback,
    on_disconnected: DisconnectedCallback,
}

pub struct StreamReceiver {
    state: Arc<Mutex<State>>,
    client: reqwest::blocking::Client,
    stream_url: String,
    secret_path: String,
    handle: Mutex<Option<JoinHandle<()>>>,
    callbacks: Mutex<Option<Callbacks>>,
}

impl StreamReceiver {
    pub fn new(stream_url: impl Into<String>, secret_path: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(State { loop_id: None })),
            client: reqwest::blocking::Client::new(),
            stream_url: stream_url.into(),
            secret_path: secret_path.into(),
            handle: Mutex::new(None),
            callbacks: Mutex::new(None),
        }
    }

    /// Starts the receive loop. `on_event` is called with the raw payload of
    /// every `data:` line received; `on_connected`/`on_disconnected` let
    /// callers (the Heartbeat Checker) track liveness. The callbacks are
    /// retained so `restart()` can bring up a fresh generation without the
    /// caller having to resupply them.
    pub fn start<E, C, D>(&self, on_event: E, on_connected: C, on_disconnected: D)
    where
        E: Fn(String) + Send + Sync + 'static,
        C: Fn() + Send + Sync + 'static,
        D: Fn() + Send + Sync + 'static,
    {
        let callbacks = Callbacks {
            on_event: Arc::new(on_event),
            on_connected: Arc::new(on_connected),
            on_disconnected: Arc::new(on_disconnected),
        };
        *self.callbacks.lock().expect("callbacks lock poisoned") = Some(Callbacks {
            on_event: Arc::clone(&callbacks.on_event),
            on_connected: Arc::clone(&callbacks.on_connected),
            on_disconnected: Arc::clone(&callbacks.on_disconnected),
        });
        self.spawn(callbacks);
    }

    /// `stop()` followed by starting a fresh generation against the same
    /// callbacks supplied to the most recent `start()`. A no-op if `start`
    /// was never called.
    pub fn restart(&self) {
        self.stop();
        let callbacks = {
            let guard = self.callbacks.lock().expect("callbacks lock poisoned");
            match guard.as_ref() {
                Some(callbacks) => Callbacks {
                    on_event: Arc::clone(&callbacks.on_event),
                    on_connected: Arc::clone(&callbacks.on_connected),
                    on_disconnected: Arc::clone(&callbacks.on_disconnected),
                },
                None => return,
            }
        };
        self.spawn(callbacks);
    }

    fn spawn(&self, callbacks: Callbacks) {
        let loop_id = Uuid::new_v4();
        self.state.lock().expect("stream receiver lock poisoned").loop_id = Some(loop_id);

        let state = Arc::clone(&self.state);
        let client = self.client.clone();
        let url = self.stream_url.clone();
        let (mcd_id, mcd_token) = resolve_identity(&self.secret_path);

        let join = thread::Builder::new()
            .name("stream-receiver".to_owned())
            .spawn(move || Self::run(state, loop_id, client, url, mcd_id, mcd_token, callbacks))
            .expect("failed to spawn stream receiver thread");

        *self.handle.lock().expect("handle lock poisoned") = Some(join);
    }

    fn run(
        state: Arc<Mutex<State>>,
        loop_id: Uuid,
        client: reqwest::blocking::Client,
        url: String,
        mcd_id: String,
        mcd_token: String,
        callbacks: Callbacks,
    ) {
        let mut backoff = BASE_BACKOFF;

        loop {
            if state.lock().expect("stream receiver lock poisoned").loop_id != Some(loop_id) {
                return;
            }

            match client
                .get(&url)
                .header("x-mcd-id", &mcd_id)
                .header("x-mcd-token", &mcd_token)
                .send()
            {
                Ok(response) if response.status().is_success() => {
                    backoff = BASE_BACKOFF;
                    (callbacks.on_connected)();
                    let reader = BufReader::new(response);
                    for line in reader.lines() {
                        if state.lock().expect("stream receiver lock poisoned").loop_id
                            != Some(loop_id)
                        {
                            return;
                        }
                        match line {
                            Ok(line) => {
                                if let Some(payload) = line.strip_prefix("data:") {
                                    (callbacks.on_event)(payload.trim().to_owned());
                                }
                            }
                            Err(_) => break,
                        }
                    }
                    (callbacks.on_disconnected)();
                }
                _ => {
                    (callbacks.on_disconnected)();
                }
            }

            if state.lock().expect("stream receiver lock poisoned").loop_id != Some(loop_id) {
                return;
            }
            thread::sleep(backoff);
            backoff = std::cmp::min(backoff * BACKOFF_FACTOR, MAX_BACKOFF);
        }
    }

    pub fn stop(&self) {
        self.state.lock().expect("stream receiver lock poisoned").loop_id = None;
        if let Some(handle) = self.handle.lock().expect("handle lock poisoned").take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_the_cap() {
        let mut backoff = BASE_BACKOFF;
        let mut seen = vec![backoff];
        for _ in 0..10 {
            backoff = std::cmp::min(backoff * BACKOFF_FACTOR, MAX_BACKOFF);
            seen.push(backoff);
        }
        assert_eq!(seen.first(), Some(&Duration::from_secs(2)));
        assert_eq!(seen.last(), Some(&MAX_BACKOFF));
        assert!(seen.windows(2).all(|w| w[1] >= w[0]));
    }
}
