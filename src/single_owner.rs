// src/single_owner.rs
//! Debug-build guard that a cache is only driven from one thread at a time.

use std::thread::{self, ThreadId};

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct SingleOwner {
    // (owning thread, re-entrancy depth)
    state: Mutex<(Option<ThreadId>, u32)>,
}

impl SingleOwner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the current thread as inside the owned object until the guard drops.
    ///
    /// In debug builds, panics if another thread is already inside.
    pub fn enter(&self) -> OwnerGuard<'_> {
        if cfg!(debug_assertions) {
            let me = thread::current().id();
            let mut state = self.state.lock();
            match state.0 {
                Some(owner) if owner != me => {
                    panic!("single-owner object entered from {me:?} while {owner:?} is inside")
                }
                _ => {
                    state.0 = Some(me);
                    state.1 += 1;
                }
            }
        }
        OwnerGuard { owner: self }
    }

    /// Thread currently inside, if any (always `None` in release builds).
    pub fn current_owner(&self) -> Option<ThreadId> {
        self.state.lock().0
    }
}

pub struct OwnerGuard<'a> {
    owner: &'a SingleOwner,
}

impl Drop for OwnerGuard<'_> {
    fn drop(&mut self) {
        if cfg!(debug_assertions) {
            let mut state = self.owner.state.lock();
            state.1 = state.1.saturating_sub(1);
            if state.1 == 0 {
                state.0 = None;
            }
        }
    }
}
