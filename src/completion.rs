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

//! Completion Dispatcher (spec §4.4, §4.9): what runs once every
//! sub-callback a batch requested has reported in.
//!
//! Consolidates whatever errors the sub-callbacks recorded into the status
//! register under `StatusSource::Core`, applies the trailing-metadata
//! filter's synthesized wire error (if this batch received trailing
//! metadata), computes the final status if this was a status-observing op,
//! and finally hands the result to whichever sink the application is
//! waiting on -- a polled future, in this crate's case, rather than a raw
//! completion-queue tag (spec §1: the completion-queue dispatch itself is
//! out of scope; only the status/ordering logic that feeds it is ours).

use crate::error::{RpcError, RpcStatus};
use crate::status::{StatusRegister, StatusSource};

/// The result handed to whatever is waiting on one batch.
#[derive(Clone, Debug)]
pub struct BatchOutcome {
    pub ok: bool,
    pub status: RpcStatus,
}

/// Consolidate a batch's collected sub-callback errors into the status
/// register, then compute the call's final status.
///
/// `wants_final_status` is true for batches that included
/// `RECV_STATUS_ON_CLIENT`/`RECV_CLOSE_ON_SERVER` -- only those batches'
/// completions need to report the reconciled final status rather than just
/// "did this batch itself succeed" (spec §4.9: final status is computed at
/// two moments, batch completion being one of them).
pub fn finish_batch(
    status: &StatusRegister,
    is_client: bool,
    errors: Vec<RpcError>,
    wants_final_status: bool,
) -> BatchOutcome {
    for error in errors {
        status.set(StatusSource::Core, error);
    }

    if wants_final_status {
        let final_status = status.get_final(is_client);
        let ok = matches!(final_status.code, crate::error::RpcStatusCode::Ok);
        BatchOutcome {
            ok,
            status: final_status,
        }
    } else {
        let ok = !status.is_set(StatusSource::Core) && !status.is_set(StatusSource::ApiOverride);
        BatchOutcome {
            ok,
            status: RpcStatus::ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RpcStatusCode;

    #[test]
    fn plain_batch_ok_when_no_errors_recorded() {
        let reg = StatusRegister::new();
        let outcome = finish_batch(&reg, true, Vec::new(), false);
        assert!(outcome.ok);
    }

    #[test]
    fn plain_batch_not_ok_once_an_error_is_recorded() {
        let reg = StatusRegister::new();
        let outcome = finish_batch(
            &reg,
            true,
            vec![RpcError::new(RpcStatusCode::Internal, "boom")],
            false,
        );
        assert!(!outcome.ok);
    }

    #[test]
    fn status_observing_batch_reports_reconciled_status() {
        let reg = StatusRegister::new();
        reg.set(StatusSource::Wire, RpcError::new(RpcStatusCode::NotFound, "missing"));
        let outcome = finish_batch(&reg, true, Vec::new(), true);
        assert_eq!(outcome.status.code, RpcStatusCode::NotFound);
        assert!(!outcome.ok);
    }
}
