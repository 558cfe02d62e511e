//! Per-position send cooldowns.
//!
//! A cooldown is an expiry timestamp checked on each send attempt. Nothing
//! fires when it runs out.

use chrono::Utc;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use warpline_core::{CoordinateKey, Timestamp};

/// Source of the current time.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Expiry of one position's cooldown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cooldown {
    pub expires_at: Timestamp,
}

impl Cooldown {
    /// A cooldown of `duration` starting at `now`.
    pub fn starting(now: Timestamp, duration: Duration) -> Self {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        Self {
            expires_at: now.checked_add_signed(delta).unwrap_or(Timestamp::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining_duration(&self, now: Timestamp) -> Option<Duration> {
        if self.is_expired(now) {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}

/// Cooldowns of every position that has sent recently.
#[derive(Debug, Default)]
pub struct CooldownTracker {
    cooldowns: Mutex<HashMap<CoordinateKey, Cooldown>>,
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the cooldown of `key`. A zero duration clears it.
    pub fn start(&self, key: &CoordinateKey, now: Timestamp, duration: Duration) {
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(PoisonError::into_inner);
        if duration.is_zero() {
            cooldowns.remove(key);
        } else {
            cooldowns.insert(key.clone(), Cooldown::starting(now, duration));
        }
    }

    /// Time left before `key` may send again, or `None` if it may send now.
    pub fn remaining(&self, key: &CoordinateKey, now: Timestamp) -> Option<Duration> {
        let mut cooldowns = self.cooldowns.lock().unwrap_or_else(PoisonError::into_inner);
        match cooldowns.get(key).map(|c| c.remaining_duration(now)) {
            Some(Some(remaining)) => Some(remaining),
            Some(None) => {
                cooldowns.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn clear(&self, key: &CoordinateKey) {
        self.cooldowns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }
}
