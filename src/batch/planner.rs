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

//! Batch Planner (spec §4.3): validates a caller-supplied batch of ops
//! before any of them touch the combiner or the transport, and computes the
//! op mask / step count a `BatchControl` needs.
//!
//! Validation is atomic: the first rule a batch fails is the reason the
//! whole batch is rejected, and nothing about the batch's ops takes effect
//! (no partial application of "the send ops went through but the recv ops
//! didn't").

use crate::error::{CallError, RpcStatus};
use crate::metadata::MetadataBatch;

use super::{OpKind, SLOT_COUNT};

/// One application-supplied operation, as handed to `start_batch`.
pub enum Op {
    SendInitialMetadata(MetadataBatch),
    SendMessage(Vec<u8>),
    SendCloseFromClient,
    SendStatusFromServer(RpcStatus, MetadataBatch),
    RecvInitialMetadata,
    RecvMessage,
    RecvStatusOnClient,
    RecvCloseOnServer,
}

impl Op {
    pub fn kind(&self) -> OpKind {
        match self {
            Op::SendInitialMetadata(_) => OpKind::SendInitialMetadata,
            Op::SendMessage(_) => OpKind::SendMessage,
            Op::SendCloseFromClient | Op::SendStatusFromServer(..) => OpKind::SendFinal,
            Op::RecvInitialMetadata => OpKind::RecvInitialMetadata,
            Op::RecvMessage => OpKind::RecvMessage,
            Op::RecvStatusOnClient | Op::RecvCloseOnServer => OpKind::RecvFinal,
        }
    }

    fn is_client_only(&self) -> bool {
        matches!(self, Op::SendCloseFromClient | Op::RecvStatusOnClient)
    }

    fn is_server_only(&self) -> bool {
        matches!(self, Op::SendStatusFromServer(..) | Op::RecvCloseOnServer)
    }
}

/// The subset of a call's bookkeeping the planner needs to evaluate
/// "already done"/"not yet invoked" rules. Kept separate from the `Call`
/// type so this module has no dependency on `crate::call`.
pub struct BatchState {
    pub is_client: bool,
    pub invoked: bool,
    pub send_initial_metadata_sent: bool,
    pub send_message_pending: bool,
    pub send_final_sent: bool,
    pub recv_initial_metadata_requested: bool,
    pub recv_message_pending: bool,
    pub recv_final_requested: bool,
}

/// The result of successfully validating a batch: the slot mask to record
/// against the new `BatchControl`, and the number of asynchronous steps
/// (sub-callbacks) it will need before it can complete.
pub struct Plan {
    pub ops_mask: u8,
    pub steps: usize,
}

/// Validate `ops` against `state`, in the order the rules are listed in
/// spec §4.3. Returns the first rule's `CallError` on failure.
pub fn validate(ops: &[Op], state: &BatchState) -> Result<Plan, CallError> {
    if !state.invoked && !state.is_client {
        return Err(CallError::NotInvoked);
    }
    if ops.is_empty() {
        return Ok(Plan { ops_mask: 0, steps: 0 });
    }
    if ops.len() > SLOT_COUNT {
        return Err(CallError::TooManyOperations);
    }

    let mut seen_mask: u8 = 0;
    for op in ops {
        let bit = op.kind().bit();
        if seen_mask & bit != 0 {
            // Two ops in the same batch both claim the same slot.
            return Err(CallError::TooManyOperations);
        }
        seen_mask |= bit;

        if op.is_client_only() && !state.is_client {
            return Err(CallError::NotOnClient);
        }
        if op.is_server_only() && state.is_client {
            return Err(CallError::NotOnServer);
        }

        match op {
            Op::SendInitialMetadata(md) => {
                if state.send_initial_metadata_sent {
                    return Err(CallError::AlreadyInvoked);
                }
                if !md.all_valid() {
                    return Err(CallError::InvalidMetadata);
                }
            }
            Op::SendMessage(_) => {
                if state.send_message_pending {
                    return Err(CallError::TooManyOperations);
                }
            }
            Op::SendCloseFromClient => {
                if state.send_final_sent {
                    return Err(CallError::AlreadyFinished);
                }
            }
            Op::SendStatusFromServer(_, md) => {
                if state.send_final_sent {
                    return Err(CallError::AlreadyFinished);
                }
                if !md.all_valid() {
                    return Err(CallError::InvalidMetadata);
                }
            }
            Op::RecvInitialMetadata => {
                if state.recv_initial_metadata_requested {
                    return Err(CallError::AlreadyInvoked);
                }
            }
            Op::RecvMessage => {
                if state.recv_message_pending {
                    return Err(CallError::TooManyOperations);
                }
            }
            Op::RecvStatusOnClient | Op::RecvCloseOnServer => {
                if state.recv_final_requested {
                    return Err(CallError::AlreadyFinished);
                }
            }
        }
    }

    Ok(Plan {
        ops_mask: seen_mask,
        steps: ops.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcStatusCode;
    use crate::metadata::MetadataEntry;

    fn client_state() -> BatchState {
        BatchState {
            is_client: true,
            invoked: true,
            send_initial_metadata_sent: false,
            send_message_pending: false,
            send_final_sent: false,
            recv_initial_metadata_requested: false,
            recv_message_pending: false,
            recv_final_requested: false,
        }
    }

    #[test]
    fn empty_batch_is_trivially_valid() {
        let plan = validate(&[], &client_state()).unwrap();
        assert_eq!(plan.steps, 0);
        assert_eq!(plan.ops_mask, 0);
    }

    #[test]
    fn rejects_server_only_op_on_client() {
        let err = validate(&[Op::RecvCloseOnServer], &client_state()).unwrap_err();
        assert_eq!(err, CallError::NotOnClient);
    }

    #[test]
    fn rejects_duplicate_slot_in_one_batch() {
        let err = validate(
            &[Op::SendMessage(vec![1]), Op::SendMessage(vec![2])],
            &client_state(),
        )
        .unwrap_err();
        assert_eq!(err, CallError::TooManyOperations);
    }

    #[test]
    fn rejects_invalid_metadata() {
        let bad = MetadataBatch::from_entries(vec![MetadataEntry::new("Bad Key", "v")]);
        let err = validate(&[Op::SendInitialMetadata(bad)], &client_state()).unwrap_err();
        assert_eq!(err, CallError::InvalidMetadata);
    }

    #[test]
    fn rejects_second_send_initial_metadata() {
        let mut state = client_state();
        state.send_initial_metadata_sent = true;
        let err = validate(
            &[Op::SendInitialMetadata(MetadataBatch::new())],
            &state,
        )
        .unwrap_err();
        assert_eq!(err, CallError::AlreadyInvoked);
    }

    #[test]
    fn accepts_well_formed_unary_request_batch() {
        let plan = validate(
            &[
                Op::SendInitialMetadata(MetadataBatch::new()),
                Op::SendMessage(b"hello".to_vec()),
                Op::SendCloseFromClient,
                Op::RecvInitialMetadata,
                Op::RecvMessage,
                Op::RecvStatusOnClient,
            ],
            &client_state(),
        )
        .unwrap();
        assert_eq!(plan.steps, 6);
        assert_eq!(plan.ops_mask, 0b11_1111);
    }

    #[test]
    fn status_from_server_carries_code() {
        let mut state = client_state();
        state.is_client = false;
        let plan = validate(
            &[Op::SendStatusFromServer(
                RpcStatus::new(RpcStatusCode::Internal, Some("boom".into())),
                MetadataBatch::new(),
            )],
            &state,
        )
        .unwrap();
        assert_eq!(plan.steps, 1);
    }
}
