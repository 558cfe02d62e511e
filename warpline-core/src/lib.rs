//! Warpline Core - Entity Types
//!
//! Pure data structures shared by every other crate: positions and their
//! canonical coordinate keys, the persisted entity rows, item stacks and the
//! item codec contract, transit events, configuration and the error taxonomy.
//! This crate contains no storage and no routing logic.

pub mod config;
pub mod coordinate;
pub mod entities;
pub mod error;
pub mod event;
pub mod identity;
pub mod item;

pub use config::{StoreConfig, WarplineConfig};
pub use coordinate::{decode_key, encode_key, CoordinateKey, Position};
pub use entities::{
    Charge, Covered, EntityKind, Interceptor, InventorySlot, SlotId, Table, TransitRecord,
    Transporter, DEFAULT_RECEIVING_SLOTS,
};
pub use error::{
    CodecError, ConfigError, ConnectionError, CoordinateKeyError, SendError, StorageError,
    WarplineError, WarplineResult,
};
pub use event::{EffectKind, TransitEvent};
pub use identity::{new_entity_id, ActorId, EntityId, Timestamp};
pub use item::{
    generate_key_code, is_valid_key_code, ItemCodec, ItemStack, JsonItemCodec, KEY_CODE_ALPHABET,
    KEY_CODE_ATTRIBUTE, KEY_CODE_LENGTH, TRANSPORTER_KEY_ITEM,
};
