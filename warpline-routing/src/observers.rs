//! Observers of individual positions.
//!
//! Each observer subscribes to one coordinate key and only receives events
//! that name that key. An event naming two positions (a delivery) reaches
//! the observers of both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::trace;
use warpline_core::{CoordinateKey, TransitEvent};

/// Receives events for the position it subscribed to.
///
/// Events raised while placing or removing a block are delivered while the
/// engine still holds that block's position, so an observer must not call
/// back into the engine for it.
pub trait TransitObserver: Send + Sync {
    fn on_event(&self, event: &TransitEvent);
}

/// Handle returned by [`ObserverRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscribers = Vec<(SubscriptionId, Arc<dyn TransitObserver>)>;

#[derive(Default)]
pub struct ObserverRegistry {
    subscribers: RwLock<HashMap<CoordinateKey, Subscribers>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let positions = self
            .subscribers
            .read()
            .map(|s| s.len())
            .unwrap_or_default();
        f.debug_struct("ObserverRegistry")
            .field("positions", &positions)
            .finish()
    }
}

impl ObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        position: &CoordinateKey,
        observer: Arc<dyn TransitObserver>,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(position.clone())
            .or_default()
            .push((id, observer));
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, position: &CoordinateKey, id: SubscriptionId) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(list) = subscribers.get_mut(position) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        let removed = list.len() != before;
        if list.is_empty() {
            subscribers.remove(position);
        }
        removed
    }

    /// Drop every observer of a position. Returns how many were dropped.
    pub fn remove_position(&self, position: &CoordinateKey) -> usize {
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(position)
            .map_or(0, |list| list.len())
    }

    pub fn observer_count(&self, position: &CoordinateKey) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(position)
            .map_or(0, Vec::len)
    }

    /// Deliver `event` to the observers of every position it names.
    ///
    /// Observers are collected first and called without the registry lock
    /// held, so an observer may subscribe or unsubscribe from its callback.
    pub fn emit(&self, event: &TransitEvent) {
        let mut targets: Vec<Arc<dyn TransitObserver>> = Vec::new();
        {
            let subscribers = self
                .subscribers
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let mut seen: Vec<&CoordinateKey> = Vec::new();
            for position in event.positions() {
                if seen.contains(&position) {
                    continue;
                }
                seen.push(position);
                if let Some(list) = subscribers.get(position) {
                    targets.extend(list.iter().map(|(_, observer)| Arc::clone(observer)));
                }
            }
        }

        trace!(event = event.event_type(), observers = targets.len(), "Emitting event");
        for observer in targets {
            observer.on_event(event);
        }
    }
}
