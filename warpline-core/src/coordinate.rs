//! Canonical coordinate keys for world positions.
//!
//! Every persisted row is keyed by the `x:y:z` encoding of the block position
//! it belongs to. `CoordinateKey` can only be built from a `Position` or by
//! parsing a string that decodes to one, so a key held in memory always
//! round-trips to exactly one integer triple.

use crate::error::CoordinateKeyError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Separator between the three components of a coordinate key.
const SEPARATOR: char = ':';

// ============================================================================
// POSITION
// ============================================================================

/// Integer block position in the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Canonical key for this position.
    pub fn key(&self) -> CoordinateKey {
        CoordinateKey::from_position(*self)
    }

    /// Projection onto the horizontal (X/Z) plane. Y is height.
    pub fn horizontal(&self) -> (f64, f64) {
        (f64::from(self.x), f64::from(self.z))
    }

    /// Straight-line distance to `other` in the horizontal plane.
    pub fn horizontal_distance(&self, other: &Position) -> f64 {
        let (ax, az) = self.horizontal();
        let (bx, bz) = other.horizontal();
        (bx - ax).hypot(bz - az)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

impl From<(i32, i32, i32)> for Position {
    fn from((x, y, z): (i32, i32, i32)) -> Self {
        Self::new(x, y, z)
    }
}

// ============================================================================
// COORDINATE KEY
// ============================================================================

/// Canonical string key for a position: `x:y:z` in base 10.
///
/// Ordering is the lexical ordering of the encoded string, which is what the
/// stores iterate in. It is stable but not numeric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CoordinateKey {
    /// Private so a key can only come from `from_position` or `parse`.
    encoded: String,
}

impl CoordinateKey {
    /// Encode a position.
    pub fn from_position(position: Position) -> Self {
        Self {
            encoded: format!(
                "{}{SEPARATOR}{}{SEPARATOR}{}",
                position.x, position.y, position.z
            ),
        }
    }

    /// Parse and validate an encoded key.
    ///
    /// The stored form is re-encoded from the decoded position, so inputs
    /// such as `+1:2:3` or `01:2:3` normalize to their canonical spelling.
    pub fn parse(encoded: &str) -> Result<Self, CoordinateKeyError> {
        decode_key(encoded).map(Self::from_position)
    }

    /// Decode back to the position. Infallible: keys are validated on creation.
    pub fn position(&self) -> Position {
        let mut parts = self
            .encoded
            .split(SEPARATOR)
            .map(|part| part.parse::<i32>().unwrap_or_default());
        Position::new(
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
        )
    }

    pub fn as_str(&self) -> &str {
        &self.encoded
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.encoded.as_bytes()
    }
}

impl fmt::Display for CoordinateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

impl FromStr for CoordinateKey {
    type Err = CoordinateKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for CoordinateKey {
    type Error = CoordinateKeyError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CoordinateKey> for String {
    fn from(key: CoordinateKey) -> Self {
        key.encoded
    }
}

impl From<Position> for CoordinateKey {
    fn from(position: Position) -> Self {
        Self::from_position(position)
    }
}

// ============================================================================
// FREE FUNCTIONS
// ============================================================================

/// Encode a position to its canonical key string.
pub fn encode_key(position: Position) -> String {
    CoordinateKey::from_position(position).encoded
}

/// Decode a key string into a position.
///
/// Fails unless the input splits on `:` into exactly three components that
/// each parse as `i32`.
pub fn decode_key(encoded: &str) -> Result<Position, CoordinateKeyError> {
    let parts: Vec<&str> = encoded.split(SEPARATOR).collect();
    if parts.len() != 3 {
        return Err(CoordinateKeyError::Malformed {
            key: encoded.to_string(),
            reason: format!("expected 3 components, found {}", parts.len()),
        });
    }

    let mut values = [0i32; 3];
    for (slot, part) in values.iter_mut().zip(&parts) {
        *slot = part.parse::<i32>().map_err(|e| CoordinateKeyError::Malformed {
            key: encoded.to_string(),
            reason: format!("component '{}' is not an integer: {}", part, e),
        })?;
    }

    Ok(Position::new(values[0], values[1], values[2]))
}
