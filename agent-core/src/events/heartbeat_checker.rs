//! The Heartbeat Checker (C2): watches for `heartbeat` events on the stream
//! and, if none arrive within the configured timeout, signals the Stream
//! Receiver (C4) to reconnect.
//!
//! Uses a generation token rather than a plain running flag: every call to
//! `start` bumps a UUID "loop id", and the background thread compares its
//! captured id against the current one inside the lock before acting. A
//! naive boolean would race if `start`/`stop` were called back-to-back (the
//! old thread could still be mid-wakeup when a new loop started), firing a
//! stale reconnect against the *new* loop's connection.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use uuid::Uuid;

struct State {
    loop_id: Option<Uuid>,
    last_heartbeat: Instant,
}

pub struct HeartbeatChecker {
    state: Arc<Mutex<State>>,
    condvar: Arc<Condvar>,
    timeout: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatChecker {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(State {
                loop_id: None,
                last_heartbeat: Instant::now(),
            })),
            condvar: Arc::new(Condvar::new()),
            timeout,
            handle: Mutex::new(None),
        }
    }

    /// Starts watching for heartbeats, invoking `on_timeout` if the timeout
    /// elapses without one. Replaces any loop already running.
    pub fn start<F>(&self, on_timeout: F)
    where
        F: Fn() + Send + 'static,
    {
        let loop_id = Uuid::new_v4();
        {
            let mut guard = self.state.lock().expect("heartbeat lock poisoned");
            guard.loop_id = Some(loop_id);
            guard.last_heartbeat = Instant::now();
        }

        let state = Arc::clone(&self.state);
        let condvar = Arc::clone(&self.condvar);
        let timeout = self.timeout;

        let join = thread::Builder::new()
            .name("heartbeat-checker".to_owned())
            .spawn(move || {
                loop {
                    let mut guard = state.lock().expect("heartbeat lock poisoned");
                    if guard.loop_id != Some(loop_id) {
                        return;
                    }
                    let elapsed = guard.last_heartbeat.elapsed();
                    if elapsed >= timeout {
                        // Reset the deadline before firing so a handler that can't
                        // immediately restore heartbeats (e.g. a reconnect that's
                        // still backing off) doesn't cause this loop to spin and
                        // re-fire on every iteration; it gets a fresh full timeout
                        // window before the next call.
                        guard.last_heartbeat = Instant::now();
                        drop(guard);
                        on_timeout();
                        continue;
                    }
                    let remaining = timeout - elapsed;
                    let (new_guard, _) = condvar
                        .wait_timeout(guard, remaining)
                        .expect("heartbeat lock poisoned");
                    guard = new_guard;
                    if guard.loop_id != Some(loop_id) {
                        return;
                    }
                }
            })
            .expect("failed to spawn heartbeat checker thread");

        if let Some(old) = self.handle.lock().expect("handle lock poisoned").replace(join) {
            // Previous loop's id has already been superseded above; just
            // detach rather than join to avoid blocking the caller.
            drop(old);
        }
    }

    /// Records that a heartbeat was received, resetting the deadline.
    pub fn heartbeat_received(&self) {
        let mut guard = self.state.lock().expect("heartbeat lock poisoned");
        guard.last_heartbeat = Instant::now();
        self.condvar.notify_all();
    }

    /// Stops the current loop, if any, by invalidating its generation token.
    pub fn stop(&self) {
        let mut guard = self.state.lock().expect("heartbeat lock poisoned");
        guard.loop_id = None;
        self.condvar.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[test]
    fn fires_timeout_when_no_heartbeat_arrives() {
        let checker = HeartbeatChecker::new(Duration::from_millis(50));
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        checker.start(move || flag.store(true, Ordering::SeqCst));

        thread::sleep(Duration::from_millis(200));
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn heartbeat_resets_the_deadline() {
        let checker = HeartbeatChecker::new(Duration::from_millis(100));
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        checker.start(move || flag.store(true, Ordering::SeqCst));

        thread::sleep(Duration::from_millis(50));
        checker.heartbeat_received();
        thread::sleep(Duration::from_millis(70));
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[test]
    fn restarting_invalidates_the_previous_loop() {
        let checker = HeartbeatChecker::new(Duration::from_millis(50));
        let fired_old = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired_old);
        checker.start(move || flag.store(true, Ordering::SeqCst));

        // restart before the old loop could have timed out
        checker.start(|| {});
        thread::sleep(Duration::from_millis(150));
        assert!(!fired_old.load(Ordering::SeqCst));
    }
}
