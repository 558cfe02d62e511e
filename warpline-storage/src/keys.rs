//! Composite keys for per-slot inventory rows.
//!
//! Every other table is keyed by the coordinate key bytes alone. Inventory
//! rows need `(coordinate_key, slot_id)`, encoded as:
//!
//! - coordinate key bytes (ASCII, variable length)
//! - separator (0xFF)
//! - slot id (1 byte)
//!
//! 0xFF never occurs in an ASCII coordinate key, so the prefix
//! `coordinate key ‖ 0xFF` selects exactly one position's slots and
//! `"1:2:3"` can never match the slots of `"1:2:34"`.

use warpline_core::{CoordinateKey, SlotId};

/// Separator byte between the coordinate key and the slot id.
const SEPARATOR: u8 = 0xFF;

/// Key of one inventory slot row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotKey {
    inner: SlotKeyInner,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SlotKeyInner {
    coordinate_key: CoordinateKey,
    slot_id: SlotId,
}

impl SlotKey {
    pub fn new(coordinate_key: CoordinateKey, slot_id: SlotId) -> Self {
        Self {
            inner: SlotKeyInner {
                coordinate_key,
                slot_id,
            },
        }
    }

    pub fn coordinate_key(&self) -> &CoordinateKey {
        &self.inner.coordinate_key
    }

    pub fn slot_id(&self) -> SlotId {
        self.inner.slot_id
    }

    /// Format: [coordinate key bytes][0xFF][slot id]
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::position_prefix(&self.inner.coordinate_key);
        bytes.push(self.inner.slot_id);
        bytes
    }

    /// Decode a key from bytes.
    ///
    /// Returns `None` if the separator is missing or the coordinate part is
    /// not a valid coordinate key.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let (&slot_id, rest) = bytes.split_last()?;
        let (&separator, coordinate) = rest.split_last()?;
        if separator != SEPARATOR {
            return None;
        }
        let coordinate = std::str::from_utf8(coordinate).ok()?;
        let coordinate_key = CoordinateKey::parse(coordinate).ok()?;
        Some(Self::new(coordinate_key, slot_id))
    }

    /// Prefix shared by every slot of one position.
    pub fn position_prefix(coordinate_key: &CoordinateKey) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(coordinate_key.as_bytes().len() + 2);
        bytes.extend_from_slice(coordinate_key.as_bytes());
        bytes.push(SEPARATOR);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use warpline_core::Position;

    #[test]
    fn test_decode_rejects_missing_separator() {
        assert!(SlotKey::decode(b"1:2:3\x00\x01").is_none());
        assert!(SlotKey::decode(b"").is_none());
        assert!(SlotKey::decode(b"\x01").is_none());
    }

    #[test]
    fn test_prefix_does_not_match_longer_coordinate() {
        let short = Position::new(1, 2, 3).key();
        let long = Position::new(1, 2, 34).key();
        let long_slot = SlotKey::new(long, 0).encode();
        assert!(!long_slot.starts_with(&SlotKey::position_prefix(&short)));
    }

    proptest! {
        #[test]
        fn prop_slot_key_roundtrip(x in any::<i32>(), y in any::<i32>(), z in any::<i32>(), slot in any::<u8>()) {
            let key = SlotKey::new(Position::new(x, y, z).key(), slot);
            let decoded = SlotKey::decode(&key.encode());
            prop_assert_eq!(decoded, Some(key));
        }

        #[test]
        fn prop_slots_share_position_prefix(x in any::<i32>(), z in any::<i32>(), a in any::<u8>(), b in any::<u8>()) {
            let position = Position::new(x, 64, z).key();
            let prefix = SlotKey::position_prefix(&position);
            prop_assert!(SlotKey::new(position.clone(), a).encode().starts_with(&prefix));
            prop_assert!(SlotKey::new(position, b).encode().starts_with(&prefix));
        }
    }
}
