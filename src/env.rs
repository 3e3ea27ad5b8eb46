// Copyright 2026 The Callio Project Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

//! Environment & completion-queue runtime (SPEC_FULL §10.1).
//!
//! The Call spec treats "the completion queue" as an external collaborator
//! it merely posts tags to (spec §1). This module gives that collaborator a
//! real, minimal shape: an `Environment` owns a small pool of poll threads,
//! each driving one `CompletionQueue`, matching `grpcio::Environment`'s
//! structure without any FFI underneath it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};

/// What one iteration of a poll loop observed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EventType {
    OpComplete,
    QueueTimeout,
    QueueShutdown,
}

type Work = Box<dyn FnOnce() + Send>;

struct QueueState {
    work: VecDeque<Work>,
    shutdown: bool,
}

/// A queue of posted completion work, drained by one `Environment` poll
/// thread. `Channel`/`Call` code never calls `next` directly; they `spawn`
/// work onto whichever queue `Environment::pick_cq` handed them.
pub struct CompletionQueue {
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl CompletionQueue {
    fn new() -> CompletionQueue {
        CompletionQueue {
            state: Mutex::new(QueueState {
                work: VecDeque::new(),
                shutdown: false,
            }),
            ready: Condvar::new(),
        }
    }

    /// Post one unit of work to be run on this queue's poll thread. A no-op
    /// once the queue has been shut down.
    pub fn spawn(&self, work: impl FnOnce() + Send + 'static) {
        let mut state = self.state.lock().unwrap();
        if state.shutdown {
            return;
        }
        state.work.push_back(Box::new(work));
        self.ready.notify_one();
    }

    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        self.ready.notify_all();
    }

    /// Block until there is something to do, run it if so, and report what
    /// happened. Runs the popped work with the lock released so queueing
    /// more work from inside a completion never deadlocks.
    fn next(&self) -> EventType {
        let mut state = self.state.lock().unwrap();
        loop {
            if let Some(work) = state.work.pop_front() {
                drop(state);
                work();
                return EventType::OpComplete;
            }
            if state.shutdown {
                return EventType::QueueShutdown;
            }
            state = self.ready.wait(state).unwrap();
        }
    }
}

fn poll_loop(cq: Arc<CompletionQueue>) {
    loop {
        match cq.next() {
            EventType::QueueShutdown => break,
            EventType::OpComplete | EventType::QueueTimeout => {}
        }
    }
}

/// Configures and builds an [`Environment`], mirroring `grpcio::EnvBuilder`.
pub struct EnvBuilder {
    cq_count: Option<usize>,
    name_prefix: String,
}

impl EnvBuilder {
    pub fn new() -> EnvBuilder {
        EnvBuilder {
            cq_count: None,
            name_prefix: "callio-poll".to_owned(),
        }
    }

    /// Number of completion-queue poll threads. Defaults to the number of
    /// logical CPUs, matching `grpcio::EnvBuilder`'s default.
    pub fn cq_count(mut self, count: usize) -> EnvBuilder {
        self.cq_count = Some(count);
        self
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> EnvBuilder {
        self.name_prefix = prefix.into();
        self
    }

    pub fn build(self) -> Environment {
        let cq_count = self
            .cq_count
            .unwrap_or_else(|| thread::available_parallelism().map(|n| n.get()).unwrap_or(1));
        Environment::with_name_prefix(cq_count.max(1), &self.name_prefix)
    }
}

impl Default for EnvBuilder {
    fn default() -> EnvBuilder {
        EnvBuilder::new()
    }
}

/// Owns the completion-queue poll-thread pool a `Channel`/`Server` runs
/// against. Shutting down joins every poll thread.
pub struct Environment {
    cqs: Vec<Arc<CompletionQueue>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    next: AtomicUsize,
}

impl Environment {
    /// Equivalent to `EnvBuilder::new().cq_count(cq_count).build()`, kept
    /// for the common case of a caller who just wants N threads.
    pub fn new(cq_count: usize) -> Environment {
        Environment::with_name_prefix(cq_count.max(1), "callio-poll")
    }

    fn with_name_prefix(cq_count: usize, prefix: &str) -> Environment {
        let mut cqs = Vec::with_capacity(cq_count);
        let mut handles = Vec::with_capacity(cq_count);
        for i in 0..cq_count {
            let cq = Arc::new(CompletionQueue::new());
            let cq_for_thread = cq.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", prefix, i))
                .spawn(move || poll_loop(cq_for_thread))
                .expect("failed to spawn completion-queue poll thread");
            cqs.push(cq);
            handles.push(handle);
        }
        Environment {
            cqs,
            handles: Mutex::new(handles),
            next: AtomicUsize::new(0),
        }
    }

    pub fn completion_queues(&self) -> &[Arc<CompletionQueue>] {
        &self.cqs
    }

    /// Round-robin pick across the pool, so repeated calls spread load
    /// instead of always landing on the first queue.
    pub fn pick_cq(&self) -> Arc<CompletionQueue> {
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % self.cqs.len();
        self.cqs[idx].clone()
    }

    /// Shut down every queue and join its poll thread. Idempotent.
    pub fn shutdown(&self) {
        for cq in &self.cqs {
            cq.shutdown();
        }
        let mut handles = self.handles.lock().unwrap();
        for handle in handles.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn spawned_work_runs_on_a_poll_thread() {
        let env = Environment::new(1);
        let cq = env.pick_cq();
        let (tx, rx) = mpsc::channel();
        cq.spawn(move || tx.send(42).unwrap());
        assert_eq!(rx.recv().unwrap(), 42);
    }

    #[test]
    fn pick_cq_round_robins() {
        let env = Environment::new(3);
        let first = env.pick_cq();
        let second = env.pick_cq();
        let third = env.pick_cq();
        let fourth = env.pick_cq();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&second, &third));
        assert!(Arc::ptr_eq(&first, &fourth));
    }

    #[test]
    fn env_builder_defaults_to_at_least_one_queue() {
        let env = EnvBuilder::new().cq_count(0).build();
        assert_eq!(env.completion_queues().len(), 1);
    }

    #[test]
    fn shutdown_stops_accepting_work_and_joins_threads() {
        let env = Environment::new(1);
        let cq = env.pick_cq();
        env.shutdown();
        // Posted after shutdown: silently dropped, not run.
        let (tx, rx) = mpsc::channel::<()>();
        cq.spawn(move || tx.send(()).unwrap());
        assert!(rx.recv_timeout(std::time::Duration::from_millis(50)).is_err());
    }
}
