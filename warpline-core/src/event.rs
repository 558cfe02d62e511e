//! Events emitted to observers of a position.

use crate::coordinate::CoordinateKey;
use crate::entities::SlotId;
use serde::{Deserialize, Serialize};

/// Visual/audio effect the host world should play. Fire-and-forget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Item left the sender.
    SendBeam,
    /// Item landed at its destination.
    Arrival,
}

/// State change at one or more positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitEvent {
    /// Current charge of a position.
    ChargesSynced { position: CoordinateKey, count: u32 },

    /// Coverage flag changed. `covered == true` disables the position.
    CoverageChanged { position: CoordinateKey, covered: bool },

    /// A connection key is now held by exactly these two transporters.
    TransportersConnected { members: Vec<CoordinateKey> },

    /// The partner of `position` went away; its key slot is unlocked.
    TransportersDisconnected { position: CoordinateKey },

    /// An item landed in `slot_id` at `to`.
    ItemDelivered {
        from: CoordinateKey,
        to: CoordinateKey,
        slot_id: SlotId,
        intercepted: bool,
    },
}

impl TransitEvent {
    /// Short name for logging.
    pub fn event_type(&self) -> &'static str {
        match self {
            TransitEvent::ChargesSynced { .. } => "charges_synced",
            TransitEvent::CoverageChanged { .. } => "coverage_changed",
            TransitEvent::TransportersConnected { .. } => "transporters_connected",
            TransitEvent::TransportersDisconnected { .. } => "transporters_disconnected",
            TransitEvent::ItemDelivered { .. } => "item_delivered",
        }
    }

    /// Positions whose observers receive this event.
    pub fn positions(&self) -> Vec<&CoordinateKey> {
        match self {
            TransitEvent::ChargesSynced { position, .. }
            | TransitEvent::CoverageChanged { position, .. }
            | TransitEvent::TransportersDisconnected { position } => vec![position],
            TransitEvent::TransportersConnected { members } => members.iter().collect(),
            TransitEvent::ItemDelivered { from, to, .. } => vec![from, to],
        }
    }
}
