//! # Reentrancy Guard
//!
//! Every mutating ledger entry point runs inside [`ReentrancyGuard::enter`].
//! The guard combines two things:
//!
//! - a reentrant mutex, so mutating calls from *other* threads wait their
//!   turn and the ledger behaves as one sequential state machine;
//! - a lock flag behind that mutex, so a *nested* call on the same thread
//!   (a gateway calling back into the ledger mid-transfer) sees the flag
//!   set and is refused instead of deadlocking.
//!
//! The flag is cleared when the returned [`Entered`] token drops, on every
//! exit path including `?` early returns and panics.
//!
//! A gateway that hands its callback to another thread and blocks on it will
//! deadlock: the other thread waits on the mutex the caller holds.

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::Cell;

/// Lock flag shared by every mutating operation of one ledger.
#[derive(Debug, Default)]
pub struct ReentrancyGuard {
    lock: ReentrantMutex<Cell<bool>>,
}

/// Proof that the current thread holds the guard. Releases it on drop.
#[derive(Debug)]
pub struct Entered<'a> {
    held: ReentrantMutexGuard<'a, Cell<bool>>,
}

impl ReentrancyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquires the guard, or returns `None` if this thread is already
    /// inside a guarded operation.
    ///
    /// Blocks while another thread holds the guard.
    pub fn enter(&self) -> Option<Entered<'_>> {
        let held = self.lock.lock();
        if held.get() {
            return None;
        }
        held.set(true);
        Some(Entered { held })
    }

    /// Whether some thread is currently inside a guarded operation.
    pub fn is_entered(&self) -> bool {
        self.lock.try_lock().map_or(true, |held| held.get())
    }
}

impl Drop for Entered<'_> {
    fn drop(&mut self) {
        self.held.set(false);
    }
}
