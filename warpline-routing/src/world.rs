//! Contract with the host world.
//!
//! The engine never renders, never looks up blocks itself and never talks to
//! clients. It asks the host through these traits.

use std::sync::Arc;
use warpline_core::{EffectKind, InventorySlot, Position};

/// The host world a set of registries belongs to.
pub trait WorldHost: Send + Sync {
    /// Live block entity at `position`, if the chunk is loaded and the block
    /// is one of ours.
    fn block_entity_at(&self, position: Position) -> Option<Arc<dyn BlockEntityHandle>>;

    /// Whether `position` has an unobstructed line to the sky.
    fn is_sky_visible(&self, position: Position) -> bool;

    /// Fire-and-forget visual/audio effect.
    fn play_effect(&self, kind: EffectKind, position: Position);
}

/// Live view of a placed transporter or interceptor.
pub trait BlockEntityHandle: Send + Sync {
    /// Replace the displayed receiving slots.
    fn refresh_inventory(&self, slots: &[InventorySlot]);

    /// Lock or unlock the key slot.
    fn set_key_locked(&self, locked: bool);

    /// Disable or enable the block (coverage).
    fn set_disabled(&self, disabled: bool);
}

/// Host with no loaded block entities and a clear sky everywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeadlessWorld;

impl WorldHost for HeadlessWorld {
    fn block_entity_at(&self, _position: Position) -> Option<Arc<dyn BlockEntityHandle>> {
        None
    }

    fn is_sky_visible(&self, _position: Position) -> bool {
        true
    }

    fn play_effect(&self, _kind: EffectKind, _position: Position) {}
}
