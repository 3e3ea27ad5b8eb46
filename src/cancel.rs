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

//! Cancellation subsystem (spec §4.7).
//!
//! Cancelling a call is: record the reason in the status register under
//! `ApiOverride` (first writer wins -- a call already finished or already
//! cancelled ignores a second cancellation), recursively cancel every child
//! attached *at this moment*, and push a cancel-stream op through the
//! combiner's pre-emptive channel so it runs ahead of anything merely
//! queued.
//!
//! This is expressed against the `CancelTarget` trait rather than
//! `crate::call::Call` directly so this module has no dependency on the
//! call module; `Call` implements it.

use std::sync::Arc;

use crate::combiner::CallCombiner;
use crate::error::{RpcError, RpcStatus};
use crate::status::{StatusRegister, StatusSource};
use crate::transport::Transport;

pub trait CancelTarget: Send + Sync {
    fn combiner(&self) -> &CallCombiner;
    fn status(&self) -> &StatusRegister;
    fn transport(&self) -> Arc<dyn Transport>;
    /// Children attached to this call at the moment this is called. A child
    /// attached after this snapshot is taken is not retroactively cancelled.
    fn children(&self) -> Vec<Arc<dyn CancelTarget>>;
}

/// Cancel `target` (and, recursively, every child attached to it right
/// now) with `error`. A no-op if `target` already has an `ApiOverride`
/// status recorded.
pub fn cancel_with_error(target: &Arc<dyn CancelTarget>, error: RpcError) {
    if !target.status().set(StatusSource::ApiOverride, error.clone()) {
        log::debug!("cancel ignored, call already finished or cancelled: {}", error);
        return;
    }
    log::debug!("cancelling call: {}", error);

    for child in target.children() {
        cancel_with_error(&child, error.clone());
    }

    let transport = target.transport();
    target.combiner().cancel(move || {
        transport.cancel(error, Box::new(|_| {}));
    });
}

/// Cancel with an explicit status rather than a bare error. Cancelling with
/// an `OK` status is a no-op (there is nothing to cancel *to*).
pub fn cancel_with_status(target: &Arc<dyn CancelTarget>, status: RpcStatus) {
    if let Some(error) = status.into_error() {
        cancel_with_error(target, error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcStatusCode;
    use std::sync::Mutex;

    struct FakeCall {
        combiner: CallCombiner,
        status: StatusRegister,
        transport: Arc<crate::transport::ScriptedTransport>,
        children: Mutex<Vec<Arc<dyn CancelTarget>>>,
    }

    impl CancelTarget for FakeCall {
        fn combiner(&self) -> &CallCombiner {
            &self.combiner
        }
        fn status(&self) -> &StatusRegister {
            &self.status
        }
        fn transport(&self) -> Arc<dyn Transport> {
            self.transport.clone()
        }
        fn children(&self) -> Vec<Arc<dyn CancelTarget>> {
            self.children.lock().unwrap().clone()
        }
    }

    fn new_call() -> Arc<FakeCall> {
        Arc::new(FakeCall {
            combiner: CallCombiner::new(),
            status: StatusRegister::new(),
            transport: Arc::new(crate::transport::ScriptedTransport::new()),
            children: Mutex::new(Vec::new()),
        })
    }

    #[test]
    fn cancel_marks_status_and_reaches_transport() {
        let call = new_call();
        let target: Arc<dyn CancelTarget> = call.clone();
        cancel_with_error(&target, RpcError::cancelled("user cancel"));
        assert!(call.transport.was_cancelled());
        assert_eq!(call.status.get_final(true).code, RpcStatusCode::Cancelled);
    }

    #[test]
    fn second_cancel_is_a_no_op() {
        let call = new_call();
        let target: Arc<dyn CancelTarget> = call.clone();
        cancel_with_error(&target, RpcError::cancelled("first"));
        cancel_with_error(&target, RpcError::internal("second"));
        assert_eq!(call.status.get_final(true).code, RpcStatusCode::Cancelled);
    }

    #[test]
    fn cancel_propagates_to_children_attached_at_call_time() {
        let parent = new_call();
        let child = new_call();
        parent
            .children
            .lock()
            .unwrap()
            .push(child.clone() as Arc<dyn CancelTarget>);

        let target: Arc<dyn CancelTarget> = parent.clone();
        cancel_with_error(&target, RpcError::cancelled("parent gone"));
        assert!(child.transport.was_cancelled());
    }

    #[test]
    fn cancel_with_ok_status_is_a_no_op() {
        let call = new_call();
        let target: Arc<dyn CancelTarget> = call.clone();
        cancel_with_status(&target, RpcStatus::ok());
        assert!(!call.transport.was_cancelled());
    }
}
