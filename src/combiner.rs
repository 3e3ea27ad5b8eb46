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

//! Call Combiner Gate (spec §4.1/§5): a single-producer-at-a-time
//! serialization gate in front of the filter stack. At most one thread is
//! ever running a combiner-scheduled action; everyone else's action is
//! queued and run by whichever thread happens to finish the current one.
//!
//! Cancellation gets its own entry point that jumps the queue, matching "a
//! distinct combiner channel that can pre-empt queued work" -- it cannot
//! interrupt an action already running, only skip ahead of anything merely
//! queued.

use std::collections::VecDeque;
use std::sync::Mutex;

type Action = Box<dyn FnOnce() + Send>;

struct State {
    busy: bool,
    queue: VecDeque<Action>,
}

pub struct CallCombiner {
    state: Mutex<State>,
}

impl CallCombiner {
    pub fn new() -> CallCombiner {
        CallCombiner {
            state: Mutex::new(State {
                busy: false,
                queue: VecDeque::new(),
            }),
        }
    }

    /// Enqueue `action`. If the combiner is idle, runs it (and anything else
    /// that becomes queued while it runs) on the calling thread right away;
    /// otherwise it waits its turn.
    pub fn start(&self, action: impl FnOnce() + Send + 'static) {
        self.enqueue(Box::new(action), false);
    }

    /// Like `start`, but jumps ahead of anything merely queued (not anything
    /// already executing).
    pub fn cancel(&self, action: impl FnOnce() + Send + 'static) {
        self.enqueue(Box::new(action), true);
    }

    fn enqueue(&self, action: Action, front: bool) {
        let to_run = {
            let mut state = self.state.lock().unwrap();
            if state.busy {
                if front {
                    state.queue.push_front(action);
                } else {
                    state.queue.push_back(action);
                }
                None
            } else {
                state.busy = true;
                Some(action)
            }
        };
        if let Some(action) = to_run {
            self.drain(action);
        }
    }

    /// Runs `first`, then keeps running whatever was queued until the queue
    /// is empty (this is the "STOP" half of the START/STOP contract: a
    /// callback returning is exactly it reaching its STOP point).
    fn drain(&self, first: Action) {
        let mut next = Some(first);
        while let Some(action) = next.take() {
            action();
            let mut state = self.state.lock().unwrap();
            match state.queue.pop_front() {
                Some(action) => next = Some(action),
                None => state.busy = false,
            }
        }
    }
}

impl Default for CallCombiner {
    fn default() -> CallCombiner {
        CallCombiner::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn serializes_queued_actions_in_order() {
        let combiner = Arc::new(CallCombiner::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        // Re-entrant start() calls from inside a running action land on the
        // same thread and must still run after the current action returns.
        let order2 = order.clone();
        let combiner2 = combiner.clone();
        combiner.start(move || {
            order2.lock().unwrap().push(1);
            let order3 = order2.clone();
            combiner2.start(move || order3.lock().unwrap().push(2));
            order2.lock().unwrap().push(3);
        });

        assert_eq!(*order.lock().unwrap(), vec![1, 3, 2]);
    }

    #[test]
    fn cancel_jumps_the_queue() {
        let combiner = Arc::new(CallCombiner::new());
        let seen = Arc::new(AtomicUsize::new(0));
        let combiner2 = combiner.clone();
        let seen2 = seen.clone();
        let seen3 = seen.clone();
        combiner.start(move || {
            combiner2.start(move || seen2.store(1, Ordering::SeqCst));
            combiner2.cancel(move || seen3.store(2, Ordering::SeqCst));
        });
        // cancel() ran second but was queued ahead of the plain start(), so
        // the last write observed is the plain start()'s.
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
