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

//! Batch Control Pool (spec §2 item 3) and Batch Planner (spec §4.3).
//!
//! A `BatchControl` tracks one in-flight `start_batch` call from validation
//! through however many asynchronous sub-callbacks it requested. Completion
//! is many-to-one: the dispatcher that drives `step_done` only resolves the
//! batch once every requested sub-callback (and the transport's own
//! completion signal) has reported in.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::combiner::CallCombiner;
use crate::error::RpcError;
use crate::message::RawMessage;
use crate::status::StatusRegister;

pub mod planner;

/// What a `BatchControl` needs from the call that owns it. A trait rather
/// than a direct `Arc<Call>` field so this module has no dependency on
/// `crate::call`.
pub trait CallBack: Send + Sync {
    fn combiner(&self) -> &CallCombiner;
    fn status(&self) -> &StatusRegister;
    fn is_client(&self) -> bool;
}

/// One of the six slots a batch can occupy. `SendFinal`/`RecvFinal` are each
/// shared between a client-side and server-side op (spec §4.3: the two
/// "final" ops are mutually exclusive by role, so they share a slot rather
/// than doubling the slot count).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[repr(usize)]
pub enum OpKind {
    SendInitialMetadata = 0,
    SendMessage = 1,
    SendFinal = 2,
    RecvInitialMetadata = 3,
    RecvMessage = 4,
    RecvFinal = 5,
}

pub const SLOT_COUNT: usize = 6;

impl OpKind {
    pub fn bit(self) -> u8 {
        1 << (self as usize)
    }
}

/// Tracks one in-flight batch: how many asynchronous steps it is still
/// waiting on, what errors those steps have reported, and what to do once
/// they have all reported in.
pub struct BatchControl {
    call: Weak<dyn CallBack>,
    ops_mask: u8,
    steps_to_complete: AtomicUsize,
    errors: Mutex<Vec<RpcError>>,
    on_complete: Mutex<Option<Box<dyn FnOnce(Vec<RpcError>) + Send>>>,
    /// Holds a message that arrived before initial metadata was filtered,
    /// while the receive-ordering coordinator defers processing it (spec
    /// §4.5). Empty outside of that race window.
    pending_message: Mutex<Option<RawMessage>>,
}

impl BatchControl {
    pub fn new(
        call: Weak<dyn CallBack>,
        ops_mask: u8,
        steps: usize,
        on_complete: Box<dyn FnOnce(Vec<RpcError>) + Send>,
    ) -> BatchControl {
        BatchControl {
            call,
            ops_mask,
            steps_to_complete: AtomicUsize::new(steps.max(1)),
            errors: Mutex::new(Vec::new()),
            on_complete: Mutex::new(Some(on_complete)),
            pending_message: Mutex::new(None),
        }
    }

    pub fn stash_message(&self, raw: RawMessage) {
        *self.pending_message.lock().unwrap() = Some(raw);
    }

    pub fn take_message(&self) -> Option<RawMessage> {
        self.pending_message.lock().unwrap().take()
    }

    pub fn call(&self) -> Option<Arc<dyn CallBack>> {
        self.call.upgrade()
    }

    pub fn has_op(&self, kind: OpKind) -> bool {
        self.ops_mask & kind.bit() != 0
    }

    pub fn record_error(&self, error: RpcError) {
        self.errors.lock().unwrap().push(error);
    }

    /// One sub-callback (or the transport's own completion signal) has
    /// fired. If this was the last outstanding step, runs the completion
    /// closure with whatever errors were consolidated along the way (spec
    /// §4.4 error consolidation).
    pub fn step_done(&self) {
        if self.steps_to_complete.fetch_sub(1, Ordering::AcqRel) == 1 {
            let errors = std::mem::take(&mut *self.errors.lock().unwrap());
            if let Some(on_complete) = self.on_complete.lock().unwrap().take() {
                on_complete(errors);
            }
        }
    }
}

#[cfg(test)]
pub mod tests_support {
    use super::*;

    struct NoopCall;

    impl CallBack for NoopCall {
        fn combiner(&self) -> &CallCombiner {
            unimplemented!("dummy_batch_control's call back-ref is never dereferenced")
        }
        fn status(&self) -> &StatusRegister {
            unimplemented!("dummy_batch_control's call back-ref is never dereferenced")
        }
        fn is_client(&self) -> bool {
            true
        }
    }

    /// A dangling `Weak<dyn CallBack>`, for tests that need to construct a
    /// `BatchControl` but never dereference its call back-ref.
    pub fn dummy_call_ref() -> Weak<dyn CallBack> {
        let owner = Arc::new(NoopCall);
        Arc::downgrade(&owner)
    }

    /// A `BatchControl` with no real call behind it, for tests that only
    /// need a distinct, `Arc`-identity-comparable handle (e.g. the receive-
    /// ordering coordinator's race tests).
    pub fn dummy_batch_control() -> Arc<BatchControl> {
        Arc::new(BatchControl::new(dummy_call_ref(), 0, 1, Box::new(|_| {})))
    }
}

#[cfg(test)]
mod tests {
    use super::tests_support::{dummy_batch_control, dummy_call_ref};
    use super::*;

    #[test]
    fn step_done_runs_completion_only_once_all_steps_report() {
        let ran = Arc::new(Mutex::new(None));
        let ran2 = ran.clone();
        let bctl = BatchControl::new(
            dummy_call_ref(),
            OpKind::SendMessage.bit(),
            2,
            Box::new(move |errors| *ran2.lock().unwrap() = Some(errors)),
        );
        bctl.record_error(RpcError::internal("first"));
        bctl.step_done();
        assert!(ran.lock().unwrap().is_none());
        bctl.step_done();
        let errors = ran.lock().unwrap().take().unwrap();
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn has_op_reflects_ops_mask() {
        let bctl = dummy_batch_control();
        assert!(!bctl.has_op(OpKind::SendMessage));
    }
}
