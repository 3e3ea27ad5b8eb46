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

//! Receive-Ordering Coordinator (spec §4.5): resolves the race between
//! "initial metadata arrived first" and "first message arrived first".
//!
//! Message processing cannot start until initial metadata has been filtered,
//! because the incoming compression algorithm lives in that metadata. The
//! state word is one of: `NONE`, `INITIAL_FIRST`, or a stashed pointer to the
//! batch control that tried to process a message before metadata was ready.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::batch::BatchControl;

const NONE: usize = 0;
const INITIAL_FIRST: usize = 1;

pub struct RecvOrder {
    state: AtomicUsize,
}

/// What the caller of `initial_metadata_ready`/`message_ready` should do next.
pub enum RecvOrderOutcome {
    /// Nothing to do yet; the other side of the race hasn't happened.
    Deferred,
    /// Proceed immediately; the preconditions this call needed are satisfied.
    ProcessNow,
    /// A message-ready callback had stashed itself waiting for initial
    /// metadata; that stashed batch control should now be resumed.
    ResumeStashed(Arc<BatchControl>),
}

impl RecvOrder {
    pub fn new() -> RecvOrder {
        RecvOrder {
            state: AtomicUsize::new(NONE),
        }
    }

    /// Called exactly once per call, when initial metadata has finished
    /// being filtered.
    pub fn initial_metadata_ready(&self) -> RecvOrderOutcome {
        match self
            .state
            .compare_exchange(NONE, INITIAL_FIRST, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => RecvOrderOutcome::Deferred,
            Err(INITIAL_FIRST) => {
                // Spec §4.5: "initial-md-ready must fire at most once".
                panic!("initial metadata ready fired twice for the same call");
            }
            Err(stashed) => {
                // message_ready() got here first and stashed its batch control's
                // pointer (which it leaked via Arc::into_raw); reclaim it.
                log::debug!("initial metadata arrived after a stashed message-ready, resuming it");
                let bctl = unsafe { Arc::from_raw(stashed as *const BatchControl) };
                RecvOrderOutcome::ResumeStashed(bctl)
            }
        }
    }

    /// Called whenever a message becomes ready to read, once per batch that
    /// requested `RECV_MESSAGE`.
    pub fn message_ready(&self, bctl: &Arc<BatchControl>) -> RecvOrderOutcome {
        if self.state.load(Ordering::Acquire) != NONE {
            return RecvOrderOutcome::ProcessNow;
        }
        let ptr = Arc::into_raw(bctl.clone()) as usize;
        match self
            .state
            .compare_exchange(NONE, ptr, Ordering::Release, Ordering::Relaxed)
        {
            Ok(_) => RecvOrderOutcome::Deferred,
            Err(_) => {
                // Lost the race (initial metadata got there first); drop the
                // extra ref-count bump we took for the stash attempt.
                unsafe {
                    drop(Arc::from_raw(ptr as *const BatchControl));
                }
                RecvOrderOutcome::ProcessNow
            }
        }
    }
}

impl Default for RecvOrder {
    fn default() -> RecvOrder {
        RecvOrder::new()
    }
}

impl Drop for RecvOrder {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        if state != NONE && state != INITIAL_FIRST {
            // A message-ready stash was never resumed (e.g. the call was torn
            // down mid-race); reclaim the leaked Arc so it doesn't leak for real.
            unsafe {
                drop(Arc::from_raw(state as *const BatchControl));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::tests_support::dummy_batch_control;

    #[test]
    fn initial_first_then_message() {
        let order = RecvOrder::new();
        match order.initial_metadata_ready() {
            RecvOrderOutcome::Deferred => {}
            _ => panic!("expected deferred"),
        }
        let bctl = dummy_batch_control();
        match order.message_ready(&bctl) {
            RecvOrderOutcome::ProcessNow => {}
            _ => panic!("expected process now"),
        }
    }

    #[test]
    fn message_first_then_initial() {
        let order = RecvOrder::new();
        let bctl = dummy_batch_control();
        match order.message_ready(&bctl) {
            RecvOrderOutcome::Deferred => {}
            _ => panic!("expected deferred"),
        }
        match order.initial_metadata_ready() {
            RecvOrderOutcome::ResumeStashed(resumed) => {
                assert!(Arc::ptr_eq(&resumed, &bctl));
            }
            _ => panic!("expected resume"),
        }
    }

    #[test]
    #[should_panic(expected = "fired twice")]
    fn initial_metadata_ready_twice_panics() {
        let order = RecvOrder::new();
        order.initial_metadata_ready();
        order.initial_metadata_ready();
    }
}
