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

//! Parent/Child Call Tree (spec §4.8).
//!
//! A parent call's children are rarely iterated and frequently added and
//! removed, so an intrusive doubly-linked list is the natural C-core
//! representation; the spec's own design note allows "an arena+index
//! representation" as an equivalent, which is what this module is: each
//! child gets an index into the parent's `Vec`, and removal is an O(1)
//! swap-remove that fixes up the displaced child's stored index.
//!
//! Installing the parent-side link is lazy and racy by design (spec §4.8:
//! a child created concurrently with the parent's own cancellation must not
//! be lost): `ParentSide` is only allocated the first time a child actually
//! attaches.

use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// One entry in a parent's child list: the child itself, plus its current
/// index. The index cell is shared with the corresponding `ChildLink` so a
/// swap-remove that moves a *different* child is visible to that child's own
/// link without either side polling the other.
struct ChildEntry<T> {
    child: Arc<T>,
    index_cell: Arc<AtomicUsize>,
}

struct ParentSideInner<T> {
    children: Vec<ChildEntry<T>>,
}

/// Lazily-allocated parent-side bookkeeping. `None` (the `AtomicPtr` is
/// null) until the first child attaches.
pub struct ParentSide<T> {
    inner: AtomicPtr<Mutex<ParentSideInner<T>>>,
}

/// A handle a child keeps so it can detach itself in O(1) without asking the
/// parent to search for it.
pub struct ChildLink<T> {
    parent_inner: Arc<Mutex<ParentSideInner<T>>>,
    index_cell: Arc<AtomicUsize>,
    detached: AtomicBool,
}

impl<T> ParentSide<T> {
    pub fn new() -> ParentSide<T> {
        ParentSide {
            inner: AtomicPtr::new(std::ptr::null_mut()),
        }
    }

    fn inner(&self) -> Arc<Mutex<ParentSideInner<T>>> {
        let existing = self.inner.load(Ordering::Acquire);
        if !existing.is_null() {
            let arc = unsafe { Arc::from_raw(existing) };
            let cloned = arc.clone();
            std::mem::forget(arc); // we don't own this strong count, just borrowed it
            return cloned;
        }

        let fresh = Arc::new(Mutex::new(ParentSideInner { children: Vec::new() }));
        let fresh_ptr = Arc::into_raw(fresh.clone()) as *mut _;
        match self.inner.compare_exchange(
            std::ptr::null_mut(),
            fresh_ptr,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => fresh,
            Err(_) => {
                // Someone else installed it first; drop our extra allocation
                // and retry against whatever is there now.
                unsafe {
                    drop(Arc::from_raw(fresh_ptr));
                }
                self.inner()
            }
        }
    }

    /// Attach `child` to this parent, returning the link the child should
    /// hold onto to later call `detach`.
    pub fn attach(&self, child: Arc<T>) -> ChildLink<T> {
        let inner = self.inner();
        let index_cell = {
            let mut guard = inner.lock().unwrap();
            let idx = guard.children.len();
            let cell = Arc::new(AtomicUsize::new(idx));
            guard.children.push(ChildEntry {
                child,
                index_cell: cell.clone(),
            });
            cell
        };
        ChildLink {
            parent_inner: inner,
            index_cell,
            detached: AtomicBool::new(false),
        }
    }

    /// Snapshot the currently attached children (spec §4.7: propagating
    /// cancellation visits every child that is attached *at that moment*;
    /// children attached afterward are not retroactively cancelled).
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        let existing = self.inner.load(Ordering::Acquire);
        if existing.is_null() {
            return Vec::new();
        }
        let arc = unsafe { Arc::from_raw(existing) };
        let cloned = arc.clone();
        std::mem::forget(arc);
        let guard = cloned.lock().unwrap();
        guard.children.iter().map(|e| e.child.clone()).collect()
    }
}

impl<T> Default for ParentSide<T> {
    fn default() -> ParentSide<T> {
        ParentSide::new()
    }
}

impl<T> Drop for ParentSide<T> {
    fn drop(&mut self) {
        let ptr = self.inner.swap(std::ptr::null_mut(), Ordering::AcqRel);
        if !ptr.is_null() {
            unsafe {
                drop(Arc::from_raw(ptr));
            }
        }
    }
}

impl<T> Drop for ChildLink<T> {
    fn drop(&mut self) {
        self.detach();
    }
}

impl<T> ChildLink<T> {
    /// O(1) removal: swap the last child into this slot and fix up its
    /// stored index, instead of shifting the whole vector. Also called
    /// automatically when the link is dropped, so a call that finishes
    /// deregisters itself from its parent without the parent needing to
    /// notice.
    pub fn detach(&self) {
        if self.detached.swap(true, Ordering::AcqRel) {
            return; // already detached, e.g. called explicitly and then again on Drop
        }
        let mut guard = self.parent_inner.lock().unwrap();
        let idx = self.index_cell.load(Ordering::Acquire);
        let last = guard.children.len() - 1;
        guard.children.swap_remove(idx);
        if idx != last {
            guard.children[idx].index_cell.store(idx, Ordering::Release);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_and_snapshot() {
        let parent: ParentSide<u32> = ParentSide::new();
        let _a = parent.attach(Arc::new(1));
        let _b = parent.attach(Arc::new(2));
        let snap = parent.snapshot();
        assert_eq!(*snap[0], 1);
        assert_eq!(*snap[1], 2);
    }

    #[test]
    fn detach_swap_removes_without_disturbing_other_children() {
        let parent: ParentSide<u32> = ParentSide::new();
        let a = parent.attach(Arc::new(1));
        let _b = parent.attach(Arc::new(2));
        let c = parent.attach(Arc::new(3));

        a.detach();
        let snap = parent.snapshot();
        assert_eq!(snap.len(), 2);
        assert!(snap.iter().any(|v| **v == 2));
        assert!(snap.iter().any(|v| **v == 3));

        c.detach();
        let snap = parent.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(*snap[0], 2);
    }

    #[test]
    fn snapshot_on_untouched_parent_is_empty() {
        let parent: ParentSide<u32> = ParentSide::new();
        assert!(parent.snapshot().is_empty());
    }
}
