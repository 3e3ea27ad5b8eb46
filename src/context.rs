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

//! Per-call key/value scratch (spec §6 `context_set`/`context_get`),
//! destroyed when the call tears down.

use std::any::Any;
use std::collections::HashMap;

/// A single scratch slot. Keyed by an arbitrary caller-chosen `u32` rather
/// than a `TypeId`, matching the C core's small fixed-size `grpc_context_index`
/// array of opaque `void*` slots -- the value's type is whatever the slot
/// owner agreed on out of band.
pub struct ContextScratch {
    slots: HashMap<u32, Box<dyn Any + Send>>,
}

impl ContextScratch {
    pub fn new() -> ContextScratch {
        ContextScratch {
            slots: HashMap::new(),
        }
    }

    pub fn set(&mut self, slot: u32, value: Box<dyn Any + Send>) {
        self.slots.insert(slot, value);
    }

    pub fn get(&self, slot: u32) -> Option<&(dyn Any + Send)> {
        self.slots.get(&slot).map(|b| b.as_ref())
    }

    pub fn get_downcast<T: 'static>(&self, slot: u32) -> Option<&T> {
        self.get(slot).and_then(|v| v.downcast_ref::<T>())
    }
}

impl Default for ContextScratch {
    fn default() -> ContextScratch {
        ContextScratch::new()
    }
}

// Dropping `slots` drops every boxed value, which is the "destroyed at Call
// teardown" contract; no explicit Drop impl is needed.

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_round_trip() {
        let mut ctx = ContextScratch::new();
        ctx.set(1, Box::new(42u32));
        assert_eq!(ctx.get_downcast::<u32>(1), Some(&42));
        assert_eq!(ctx.get_downcast::<u32>(2), None);
    }

    #[test]
    fn set_overwrites_previous_value() {
        let mut ctx = ContextScratch::new();
        ctx.set(1, Box::new(1u32));
        ctx.set(1, Box::new(2u32));
        assert_eq!(ctx.get_downcast::<u32>(1), Some(&2));
    }
}
