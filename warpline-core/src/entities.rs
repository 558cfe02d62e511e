//! Persisted entity rows.
//!
//! One row type per table. Rows carry their `CoordinateKey`; nothing here is
//! keyed by raw tuples.

use crate::coordinate::CoordinateKey;
use crate::identity::{ActorId, EntityId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Index of a receiving slot within one entity's inventory.
pub type SlotId = u8;

/// Receiving slots per transporter or interceptor.
pub const DEFAULT_RECEIVING_SLOTS: SlotId = 8;

// ============================================================================
// DISCRIMINATORS
// ============================================================================

/// Kind of placed block the engine tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Transporter,
    Interceptor,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Transporter => f.write_str("transporter"),
            EntityKind::Interceptor => f.write_str("interceptor"),
        }
    }
}

/// Persisted tables, one per entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Table {
    Transporters,
    Interceptors,
    InventoryItems,
    Charges,
    Covered,
    Transits,
}

impl Table {
    /// Every table, in schema creation order.
    pub const ALL: [Table; 6] = [
        Table::Transporters,
        Table::Interceptors,
        Table::InventoryItems,
        Table::Charges,
        Table::Covered,
        Table::Transits,
    ];

    /// Name of the table in the backing store.
    pub fn as_db_name(&self) -> &'static str {
        match self {
            Table::Transporters => "transporters",
            Table::Interceptors => "interceptors",
            Table::InventoryItems => "inventory_items",
            Table::Charges => "charges",
            Table::Covered => "covered",
            Table::Transits => "transits",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_db_name())
    }
}

// ============================================================================
// ROWS
// ============================================================================

/// A placed transporter block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transporter {
    pub coordinate_key: CoordinateKey,
    /// Set while a key item sits in the key slot. Never `Some("")`.
    pub connection_key: Option<String>,
}

impl Transporter {
    /// A freshly placed transporter with no key inserted.
    pub fn new(coordinate_key: CoordinateKey) -> Self {
        Self {
            coordinate_key,
            connection_key: None,
        }
    }

    pub fn with_connection_key(mut self, connection_key: impl Into<String>) -> Self {
        let connection_key = connection_key.into();
        self.connection_key = (!connection_key.is_empty()).then_some(connection_key);
        self
    }
}

/// A placed interceptor block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interceptor {
    pub coordinate_key: CoordinateKey,
}

impl Interceptor {
    pub fn new(coordinate_key: CoordinateKey) -> Self {
        Self { coordinate_key }
    }
}

/// One receiving slot of a transporter or interceptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventorySlot {
    pub coordinate_key: CoordinateKey,
    pub slot_id: SlotId,
    /// Opaque item payload. `None` or empty means the slot is free.
    pub item_blob: Option<Vec<u8>>,
}

impl InventorySlot {
    pub fn empty(coordinate_key: CoordinateKey, slot_id: SlotId) -> Self {
        Self {
            coordinate_key,
            slot_id,
            item_blob: None,
        }
    }

    pub fn is_free(&self) -> bool {
        self.item_blob.as_ref().map_or(true, |blob| blob.is_empty())
    }
}

/// Charge counter of one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub count: u32,
}

/// Coverage flag of one position. `true` means no sky access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Covered {
    pub is_covered: bool,
}

/// A completed delivery, kept as world history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitRecord {
    pub id: EntityId,
    pub from: CoordinateKey,
    pub to: CoordinateKey,
    /// True when an interceptor caught the item instead of the partner.
    pub intercepted: bool,
    pub item_blob: Vec<u8>,
    pub sent_at: Timestamp,
    pub actor: ActorId,
}
