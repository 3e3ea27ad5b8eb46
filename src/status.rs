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

//! Status Register (spec §4.1): five priority-ordered, set-once slots that
//! racing subsystems write into, and from which the final status is
//! reconciled.
//!
//! Each slot is a single `AtomicPtr<RpcError>`: null means unset, any other
//! value is a leaked `Box<RpcError>` pointer owned by the slot. This mirrors
//! the "pack `(is_set, error_ptr)` into one word" design note -- a null
//! pointer already carries the `is_set = false` bit for free, and the
//! pointer is never reused once installed, so no ABA hazard exists.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::error::{RpcError, RpcStatus, RpcStatusCode};

/// Priority order: numerically lower wins when two sources both carry a
/// non-OK status. `API_OVERRIDE` is the application's explicit intent;
/// `SERVER_STATUS` is what the peer actually sent.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(usize)]
pub enum StatusSource {
    ApiOverride = 0,
    Wire = 1,
    Core = 2,
    Surface = 3,
    ServerStatus = 4,
}

impl StatusSource {
    const ALL: [StatusSource; 5] = [
        StatusSource::ApiOverride,
        StatusSource::Wire,
        StatusSource::Core,
        StatusSource::Surface,
        StatusSource::ServerStatus,
    ];

    fn index(self) -> usize {
        self as usize
    }
}

const SLOT_COUNT: usize = 5;

struct Slot(AtomicPtr<RpcError>);

impl Slot {
    const fn empty() -> Slot {
        Slot(AtomicPtr::new(ptr::null_mut()))
    }
}

/// Set-once, priority-ordered status slots for one call.
pub struct StatusRegister {
    slots: [Slot; SLOT_COUNT],
}

impl StatusRegister {
    pub fn new() -> StatusRegister {
        StatusRegister {
            slots: [
                Slot::empty(),
                Slot::empty(),
                Slot::empty(),
                Slot::empty(),
                Slot::empty(),
            ],
        }
    }

    /// First-writer-wins: if the slot is already set, `error` is dropped and
    /// `false` is returned.
    pub fn set(&self, source: StatusSource, error: RpcError) -> bool {
        let boxed = Box::into_raw(Box::new(error));
        let slot = &self.slots[source.index()].0;
        match slot.compare_exchange(
            ptr::null_mut(),
            boxed,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(_) => {
                // Someone else already set this source; drop our value.
                unsafe {
                    drop(Box::from_raw(boxed));
                }
                false
            }
        }
    }

    fn get(&self, source: StatusSource) -> Option<&RpcError> {
        let ptr = self.slots[source.index()].0.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { &*ptr })
        }
    }

    pub fn is_set(&self, source: StatusSource) -> bool {
        !self.slots[source.index()].0.load(Ordering::Acquire).is_null()
    }

    /// Two-pass priority scan: a non-OK error from any source beats an OK
    /// from a higher-priority one; only if nothing at all is set does the
    /// role-dependent default (`UNKNOWN` client / `OK` server) apply.
    pub fn get_final(&self, is_client: bool) -> RpcStatus {
        for exclude_ok in [true, false] {
            for source in StatusSource::ALL {
                if let Some(err) = self.get(source) {
                    if exclude_ok && matches!(err.code, RpcStatusCode::Ok) {
                        continue;
                    }
                    return RpcStatus {
                        code: err.code,
                        details: Some(err.message.clone()),
                    };
                }
            }
        }
        let default_code = if is_client {
            RpcStatusCode::Unknown
        } else {
            RpcStatusCode::Ok
        };
        RpcStatus {
            code: default_code,
            details: Some(String::new()),
        }
    }
}

impl Default for StatusRegister {
    fn default() -> StatusRegister {
        StatusRegister::new()
    }
}

impl Drop for StatusRegister {
    fn drop(&mut self) {
        for slot in &self.slots {
            let ptr = slot.0.swap(ptr::null_mut(), Ordering::AcqRel);
            if !ptr.is_null() {
                unsafe {
                    drop(Box::from_raw(ptr));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_once_first_writer_wins() {
        let reg = StatusRegister::new();
        assert!(reg.set(StatusSource::Wire, RpcError::new(RpcStatusCode::NotFound, "first")));
        assert!(!reg.set(StatusSource::Wire, RpcError::new(RpcStatusCode::Internal, "second")));
        let status = reg.get_final(true);
        assert_eq!(status.code, RpcStatusCode::NotFound);
        assert_eq!(status.details.as_deref(), Some("first"));
    }

    #[test]
    fn api_override_beats_wire() {
        let reg = StatusRegister::new();
        reg.set(StatusSource::Wire, RpcError::new(RpcStatusCode::NotFound, "wire"));
        reg.set(
            StatusSource::ApiOverride,
            RpcError::new(RpcStatusCode::DeadlineExceeded, "cancelled"),
        );
        let status = reg.get_final(true);
        assert_eq!(status.code, RpcStatusCode::DeadlineExceeded);
    }

    #[test]
    fn default_when_nothing_set() {
        let reg = StatusRegister::new();
        assert_eq!(reg.get_final(true).code, RpcStatusCode::Unknown);
        assert_eq!(reg.get_final(false).code, RpcStatusCode::Ok);
    }

    #[test]
    fn ok_status_used_only_if_nothing_else() {
        let reg = StatusRegister::new();
        reg.set(StatusSource::ServerStatus, RpcError::new(RpcStatusCode::Ok, ""));
        assert_eq!(reg.get_final(true).code, RpcStatusCode::Ok);
        let reg2 = StatusRegister::new();
        reg2.set(StatusSource::ServerStatus, RpcError::new(RpcStatusCode::Ok, ""));
        reg2.set(StatusSource::Core, RpcError::new(RpcStatusCode::Internal, "boom"));
        assert_eq!(reg2.get_final(true).code, RpcStatusCode::Internal);
    }
}
