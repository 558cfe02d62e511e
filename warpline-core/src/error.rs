//! Error types for Warpline operations

use crate::coordinate::CoordinateKey;
use crate::entities::Table;
use thiserror::Error;

/// Coordinate key decoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordinateKeyError {
    #[error("Malformed coordinate key '{key}': {reason}")]
    Malformed { key: String, reason: String },
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("{table} row already exists for {key}")]
    AlreadyExists { table: Table, key: CoordinateKey },

    #[error("{table} row not found for {key}")]
    NotFound { table: Table, key: CoordinateKey },

    #[error("Serialization failed for {table}: {reason}")]
    Serialization { table: Table, reason: String },

    #[error("Malformed key in {table}: {source}")]
    MalformedKey {
        table: Table,
        #[source]
        source: CoordinateKeyError,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Item payload encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Failed to encode item '{code}': {reason}")]
    Encode { code: String, reason: String },

    #[error("Failed to decode item payload ({len} bytes): {reason}")]
    Decode { len: usize, reason: String },
}

/// Reasons a send request is refused or fails.
///
/// Everything except `Store` is checked before any mutation, so the world is
/// unchanged when one of them is returned.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SendError {
    #[error("No transporter registered at {position}")]
    UnknownTransporter { position: CoordinateKey },

    #[error("Input slot is empty")]
    EmptyInputSlot,

    #[error("Transporter at {position} has no sky access")]
    SourceCovered { position: CoordinateKey },

    #[error("Transporter is cooling down for another {remaining_ms}ms")]
    OnCooldown { remaining_ms: i64 },

    #[error("Transporter at {position} has no charge left")]
    InsufficientCharge { position: CoordinateKey },

    #[error("No partner transporter for connection key {connection_key:?}")]
    NoPartner { connection_key: Option<String> },

    #[error("Destination {destination} has no sky access")]
    DestinationCovered { destination: CoordinateKey },

    #[error("Destination {destination} has no free slot")]
    DestinationFull { destination: CoordinateKey },

    #[error("Item codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Storage error: {0}")]
    Store(#[from] StorageError),
}

impl SendError {
    /// Translation key for the message shown to the requesting player.
    pub fn message_key(&self) -> &'static str {
        match self {
            SendError::UnknownTransporter { .. } => "warpline:error-unknown-transporter",
            SendError::EmptyInputSlot => "warpline:error-empty-input",
            SendError::SourceCovered { .. } => "warpline:error-source-covered",
            SendError::OnCooldown { .. } => "warpline:error-cooldown",
            SendError::InsufficientCharge { .. } => "warpline:error-no-charge",
            SendError::NoPartner { .. } => "warpline:error-no-partner",
            SendError::DestinationCovered { .. } => "warpline:error-destination-covered",
            SendError::DestinationFull { .. } => "warpline:error-destination-full",
            SendError::Codec(_) | SendError::Store(_) => "warpline:error-internal",
        }
    }

    /// True for refusals that leave every registry untouched.
    pub fn is_precondition(&self) -> bool {
        !matches!(self, SendError::Store(_) | SendError::Codec(_))
    }
}

/// Connection key pairing errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("Connection key {connection_key} is already paired by {members:?}")]
    ConnectionKeyClaimed {
        connection_key: String,
        members: Vec<CoordinateKey>,
    },

    #[error("Key slot at {position} is locked")]
    KeySlotLocked { position: CoordinateKey },

    #[error("No transporter registered at {position}")]
    NotATransporter { position: CoordinateKey },

    #[error("Invalid key code '{code}'")]
    InvalidKeyCode { code: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse configuration: {reason}")]
    Parse { reason: String },
}

/// Master error type for all Warpline errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WarplineError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Send error: {0}")]
    Send(#[from] SendError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Coordinate error: {0}")]
    Coordinate(#[from] CoordinateKeyError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Result type alias for Warpline operations.
pub type WarplineResult<T> = Result<T, WarplineError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Position;

    #[test]
    fn test_storage_error_display_not_found() {
        let err = StorageError::NotFound {
            table: Table::Charges,
            key: Position::new(1, 2, 3).key(),
        };
        let msg = err.to_string();
        assert!(msg.contains("charges"));
        assert!(msg.contains("1:2:3"));
    }

    #[test]
    fn test_send_error_display_destination_full() {
        let err = SendError::DestinationFull {
            destination: Position::new(10, 0, 0).key(),
        };
        assert!(err.to_string().contains("10:0:0"));
        assert_eq!(err.message_key(), "warpline:error-destination-full");
    }

    #[test]
    fn test_send_error_precondition_classification() {
        assert!(SendError::EmptyInputSlot.is_precondition());
        assert!(SendError::OnCooldown { remaining_ms: 5 }.is_precondition());
        assert!(!SendError::Store(StorageError::LockPoisoned).is_precondition());
    }

    #[test]
    fn test_connection_error_display_claimed() {
        let err = ConnectionError::ConnectionKeyClaimed {
            connection_key: "ABC1234".to_string(),
            members: vec![Position::new(0, 0, 0).key()],
        };
        let msg = err.to_string();
        assert!(msg.contains("ABC1234"));
        assert!(msg.contains("0:0:0"));
    }

    #[test]
    fn test_warpline_error_from_variants() {
        let storage = WarplineError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, WarplineError::Storage(_)));

        let send = WarplineError::from(SendError::EmptyInputSlot);
        assert!(matches!(send, WarplineError::Send(_)));

        let config = WarplineError::from(ConfigError::Parse {
            reason: "eof".to_string(),
        });
        assert!(matches!(config, WarplineError::Config(_)));

        let coordinate = WarplineError::from(CoordinateKeyError::Malformed {
            key: "x".to_string(),
            reason: "bad".to_string(),
        });
        assert!(matches!(coordinate, WarplineError::Coordinate(_)));
    }
}
