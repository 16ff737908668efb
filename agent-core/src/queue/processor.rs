//! A generic FIFO worker pool (C1): a condition-guarded queue, `schedule`
//! appends and notifies, a fixed number of worker threads pop one item at a
//! time and run a handler, handler panics/errors are caught and logged
//! rather than killing the worker, and `stop` flips a flag and wakes every
//! waiter so workers can exit at the next queue-wait boundary. The queries
//! runner, ops runner, and results publisher are each this processor wired
//! to a different handler and item type.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

struct State<T> {
    queue: VecDeque<T>,
    stopped: bool,
}

/// A bounded pool of worker threads draining a shared FIFO queue.
pub struct QueueAsyncProcessor<T> {
    state: Arc<Mutex<State<T>>>,
    condvar: Arc<Condvar>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    name: String,
}

impl<T: Send + 'static> QueueAsyncProcessor<T> {
    /// Starts `thread_count` worker threads, each looping: wait for an item,
    /// pop it, run `handler`. A panicking `handler` is caught and logged
    /// rather than taking the worker down — one bad item must never shrink
    /// the pool.
    pub fn start<F>(name: impl Into<String>, thread_count: usize, handler: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        let name = name.into();
        let state = Arc::new(Mutex::new(State {
            queue: VecDeque::new(),
            stopped: false,
        }));
        let condvar = Arc::new(Condvar::new());
        let handler = Arc::new(handler);

        let workers = (0..thread_count.max(1))
            .map(|i| {
                let state = Arc::clone(&state);
                let condvar = Arc::clone(&condvar);
                let handler = Arc::clone(&handler);
                let thread_name = format!("{}-{}", name, i);
                thread::Builder::new()
                    .name(thread_name)
                    .spawn(move || Self::worker_loop(state, condvar, handler))
                    .expect("failed to spawn queue worker thread")
            })
            .collect();

        Self {
            state,
            condvar,
            workers: Mutex::new(workers),
            name,
        }
    }

    fn worker_loop(
        state: Arc<Mutex<State<T>>>,
        condvar: Arc<Condvar>,
        handler: Arc<dyn Fn(T) + Send + Sync>,
    ) {
        loop {
            let item = {
                let mut guard = state.lock().expect("queue lock poisoned");
                loop {
                    if guard.stopped {
                        break None;
                    }
                    if let Some(item) = guard.queue.pop_front() {
                        break Some(item);
                    }
                    guard = condvar.wait(guard).expect("queue lock poisoned");
                }
            };

            match item {
                Some(item) => {
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(item))) {
                        let message = payload
                            .downcast_ref::<&str>()
                            .map(|s| s.to_string())
                            .or_else(|| payload.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "non-string panic payload".to_owned());
                        error!("queue worker handler panicked, continuing"; "message" => message);
                    }
                }
                None => return,
            }
        }
    }

    /// Appends `item` to the queue and wakes one worker.
    pub fn schedule(&self, item: T) {
        let mut guard = self.state.lock().expect("queue lock poisoned");
        guard.queue.push_back(item);
        self.condvar.notify_one();
    }

    pub fn queue_len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").queue.len()
    }

    /// Flips the stop flag and wakes every worker. Workers check the flag
    /// only at the queue-wait boundary, so an item a worker already popped
    /// still runs to completion, but anything still sitting in the queue is
    /// discarded rather than processed.
    pub fn stop(&self) {
        {
            let mut guard = self.state.lock().expect("queue lock poisoned");
            guard.stopped = true;
        }
        self.condvar.notify_all();
        let mut workers = self.workers.lock().expect("workers lock poisoned");
        for worker in workers.drain(..) {
            let _ = worker.join();
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn processes_scheduled_items_in_order() {
        let results = Arc::new(Mutex::new(Vec::new()));
        let handler_results = Arc::clone(&results);
        let processor = QueueAsyncProcessor::start("test", 1, move |item: i32| {
            handler_results.lock().unwrap().push(item);
        });

        for i in 0..5 {
            processor.schedule(i);
        }

        // give the single worker a moment to drain
        thread::sleep(Duration::from_millis(100));
        processor.stop();

        assert_eq!(*results.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn stop_discards_items_still_queued() {
        // Workers block on in-flight handlers, so give a single slow worker
        // one item to chew on, queue a pile more behind it, then stop
        // immediately: the queued-but-not-yet-popped items must never reach
        // the handler (they're recoverable via the orchestrator's ACK
        // timeout, not by the queue itself).
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&processed);
        let release = Arc::new((Mutex::new(false), Condvar::new()));
        let handler_release = Arc::clone(&release);
        let processor = Arc::new(QueueAsyncProcessor::start("drain", 1, move |item: i32| {
            if item == 0 {
                let (lock, cv) = &*handler_release;
                let mut go = lock.lock().unwrap();
                while !*go {
                    go = cv.wait(go).unwrap();
                }
            }
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        processor.schedule(0);
        thread::sleep(Duration::from_millis(50)); // worker is now blocked inside item 0's handler
        for i in 1..20 {
            processor.schedule(i);
        }
        assert_eq!(processor.queue_len(), 19);

        // stop() flips the stopped flag (near-instantly) before it blocks
        // joining the worker, which is still parked inside item 0's handler.
        let stopper = Arc::clone(&processor);
        let stop_handle = thread::spawn(move || stopper.stop());
        thread::sleep(Duration::from_millis(50));

        {
            let (lock, cv) = &*release;
            *lock.lock().unwrap() = true;
            cv.notify_all();
        }
        stop_handle.join().unwrap();

        assert_eq!(processed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn handler_panic_does_not_kill_the_worker() {
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&processed);
        let processor = QueueAsyncProcessor::start("panicky", 1, move |item: i32| {
            if item == 1 {
                panic!("boom");
            }
            counter.fetch_add(1, Ordering::SeqCst);
        });

        processor.schedule(0);
        processor.schedule(1);
        processor.schedule(2);
        processor.stop();

        assert_eq!(processed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_errors_do_not_kill_the_worker() {
        let processed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&processed);
        let processor = QueueAsyncProcessor::start("resilient", 1, move |item: i32| {
            if item == 1 {
                // simulate a handler that logs and swallows its own error
                return;
            }
            counter.fetch_add(1, Ordering::SeqCst);
        });

        processor.schedule(0);
        processor.schedule(1);
        processor.schedule(2);
        processor.stop();

        assert_eq!(processed.load(Ordering::SeqCst), 2);
    }
}
