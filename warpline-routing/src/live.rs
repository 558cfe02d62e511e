//! Live transporter state that never reaches the store.
//!
//! The input slot and the key slot belong to the loaded block entity. They
//! are lost on unload the same way any other open container would be; the
//! receiving slots are the only persisted inventory.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use warpline_core::{CoordinateKey, ItemStack};

/// Unpersisted slots and flags of one transporter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTransporter {
    pub input: Option<ItemStack>,
    pub key_code: Option<String>,
    /// Set while the transporter is one half of a connected pair.
    pub key_locked: bool,
}

#[derive(Debug, Default)]
pub struct LiveState {
    transporters: Mutex<HashMap<CoordinateKey, LiveTransporter>>,
}

impl LiveState {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<CoordinateKey, LiveTransporter>> {
        self.transporters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, key: &CoordinateKey) -> Option<LiveTransporter> {
        self.entries().get(key).cloned()
    }

    /// Apply `f` to the entry of `key`, creating an empty one first if needed.
    pub fn update<R>(&self, key: &CoordinateKey, f: impl FnOnce(&mut LiveTransporter) -> R) -> R {
        f(self.entries().entry(key.clone()).or_default())
    }

    pub fn remove(&self, key: &CoordinateKey) -> Option<LiveTransporter> {
        self.entries().remove(key)
    }

    pub fn input(&self, key: &CoordinateKey) -> Option<ItemStack> {
        self.entries()
            .get(key)
            .and_then(|entry| entry.input.clone())
            .filter(|stack| !stack.is_empty())
    }

    /// Remove one unit from the input slot, clearing it when it runs out.
    pub fn take_one_input(&self, key: &CoordinateKey) -> Option<ItemStack> {
        let mut entries = self.entries();
        let entry = entries.get_mut(key)?;
        let stack = entry.input.as_mut()?;
        let taken = stack.take_one();
        if stack.is_empty() {
            entry.input = None;
        }
        taken
    }

    pub fn is_key_locked(&self, key: &CoordinateKey) -> bool {
        self.entries()
            .get(key)
            .is_some_and(|entry| entry.key_locked)
    }
}
