//! Per-position exclusive locks for the commit phase of a send.
//!
//! A send touches two positions: its source and its destination. Both are
//! acquired together in coordinate-key order, and the guard releases both on
//! drop. Two sends that share either position are serialized; sends between
//! unrelated positions proceed in parallel.

use std::collections::BTreeSet;
use std::sync::{Condvar, Mutex, PoisonError};
use warpline_core::CoordinateKey;

/// Table of currently held positions.
#[derive(Debug, Default)]
pub struct PositionLocks {
    held: Mutex<BTreeSet<CoordinateKey>>,
    released: Condvar,
}

impl PositionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until every key in `keys` is free, then hold all of them.
    ///
    /// Duplicates are collapsed, so locking a position against itself is
    /// fine.
    pub fn acquire<'k, I>(&self, keys: I) -> PositionGuard<'_>
    where
        I: IntoIterator<Item = &'k CoordinateKey>,
    {
        let wanted: BTreeSet<CoordinateKey> = keys.into_iter().cloned().collect();
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        while wanted.iter().any(|key| held.contains(key)) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(PoisonError::into_inner);
        }
        held.extend(wanted.iter().cloned());
        PositionGuard {
            locks: self,
            keys: wanted,
        }
    }

    /// Lock a send's source and destination.
    pub fn lock_pair(
        &self,
        source: &CoordinateKey,
        destination: &CoordinateKey,
    ) -> PositionGuard<'_> {
        self.acquire([source, destination])
    }

    pub fn is_held(&self, key: &CoordinateKey) -> bool {
        self.held
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }
}

/// Holds a set of positions until dropped.
#[derive(Debug)]
pub struct PositionGuard<'a> {
    locks: &'a PositionLocks,
    keys: BTreeSet<CoordinateKey>,
}

impl PositionGuard<'_> {
    /// Held keys, in coordinate-key order.
    pub fn keys(&self) -> impl Iterator<Item = &CoordinateKey> {
        self.keys.iter()
    }
}

impl Drop for PositionGuard<'_> {
    fn drop(&mut self) {
        let mut held = self
            .locks
            .held
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for key in &self.keys {
            held.remove(key);
        }
        self.locks.released.notify_all();
    }
}
