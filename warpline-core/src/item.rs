//! Item stacks, transporter key codes and the item codec contract.
//!
//! The engine never looks inside stored item payloads. It hands stacks to an
//! [`ItemCodec`] on the way into the store and back out when a live view is
//! hydrated. [`JsonItemCodec`] is the codec used when the host world does not
//! supply its own.

use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Item code of a transporter key.
pub const TRANSPORTER_KEY_ITEM: &str = "transporterkey";

/// Attribute holding a key's connection code.
pub const KEY_CODE_ATTRIBUTE: &str = "keycode";

/// Characters a key code is drawn from.
pub const KEY_CODE_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of a generated key code.
pub const KEY_CODE_LENGTH: usize = 7;

// ============================================================================
// ITEM STACK
// ============================================================================

/// A stack of identical items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemStack {
    pub code: String,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl ItemStack {
    pub fn new(code: impl Into<String>, quantity: u32) -> Self {
        Self {
            code: code.into(),
            quantity,
            attributes: BTreeMap::new(),
        }
    }

    /// A transporter key carrying `key_code`.
    pub fn transporter_key(key_code: impl Into<String>) -> Self {
        Self::new(TRANSPORTER_KEY_ITEM, 1).with_attribute(KEY_CODE_ATTRIBUTE, key_code)
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.quantity == 0
    }

    /// Connection code if this stack is a transporter key with a usable code.
    pub fn key_code(&self) -> Option<&str> {
        if self.code != TRANSPORTER_KEY_ITEM {
            return None;
        }
        self.attributes
            .get(KEY_CODE_ATTRIBUTE)
            .map(String::as_str)
            .filter(|code| !code.trim().is_empty())
    }

    /// Split one unit off this stack.
    ///
    /// Returns `None` on an empty stack. The remainder may be left at zero;
    /// callers clear the slot in that case.
    pub fn take_one(&mut self) -> Option<ItemStack> {
        if self.is_empty() {
            return None;
        }
        self.quantity -= 1;
        Some(ItemStack {
            code: self.code.clone(),
            quantity: 1,
            attributes: self.attributes.clone(),
        })
    }
}

// ============================================================================
// KEY CODES
// ============================================================================

/// Generate a fresh random key code for a newly crafted key.
pub fn generate_key_code() -> String {
    let mut code = String::with_capacity(KEY_CODE_LENGTH);
    while code.len() < KEY_CODE_LENGTH {
        let random = Uuid::new_v4();
        // Bytes 6 and 8 carry the version and variant bits.
        for (index, byte) in random.as_bytes().iter().enumerate() {
            if index == 6 || index == 8 || code.len() == KEY_CODE_LENGTH {
                continue;
            }
            if let Some(c) = key_code_char(*byte) {
                code.push(c);
            }
        }
    }
    code
}

/// Maps a random byte onto the alphabet, rejecting the top of the range so
/// every character is equally likely.
fn key_code_char(byte: u8) -> Option<char> {
    let len = KEY_CODE_ALPHABET.len();
    let limit = 256 / len * len;
    let byte = usize::from(byte);
    (byte < limit).then(|| KEY_CODE_ALPHABET[byte % len] as char)
}

/// Whether `code` could have come from [`generate_key_code`].
pub fn is_valid_key_code(code: &str) -> bool {
    code.len() == KEY_CODE_LENGTH && code.bytes().all(|b| KEY_CODE_ALPHABET.contains(&b))
}

// ============================================================================
// CODEC
// ============================================================================

/// Binary codec for item payloads stored in inventory slots.
pub trait ItemCodec: Send + Sync {
    fn encode(&self, item: &ItemStack) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, bytes: &[u8]) -> Result<ItemStack, CodecError>;
}

/// Stores stacks as JSON documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonItemCodec;

impl ItemCodec for JsonItemCodec {
    fn encode(&self, item: &ItemStack) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(item).map_err(|e| CodecError::Encode {
            code: item.code.clone(),
            reason: e.to_string(),
        })
    }

    fn decode(&self, bytes: &[u8]) -> Result<ItemStack, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode {
            len: bytes.len(),
            reason: e.to_string(),
        })
    }
}
