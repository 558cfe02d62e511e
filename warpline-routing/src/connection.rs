//! Connection-key pairing.
//!
//! A connection key is held by at most two transporters. The store is the
//! source of truth: a transporter is paired exactly when one other
//! registered transporter holds the same key.

use warpline_core::{CoordinateKey, StorageError};
use warpline_storage::{TransporterRegistry, WarplineStorage};

/// Pairing state of a transporter after its key changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pairing {
    /// Key recorded, no other transporter holds it yet.
    Waiting,
    /// Key recorded and shared with exactly one partner.
    Connected { partner: CoordinateKey },
}

/// Outcome of trying to record a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Claim {
    Recorded(Pairing),
    /// Two other transporters already hold the key. Nothing was written.
    Rejected { members: Vec<CoordinateKey> },
}

/// Other transporters holding `connection_key`, in key order.
fn holders_except(
    storage: &dyn WarplineStorage,
    connection_key: &str,
    key: &CoordinateKey,
) -> Result<Vec<CoordinateKey>, StorageError> {
    Ok(storage
        .transporter_get_by_connection_key(connection_key)?
        .into_iter()
        .map(|t| t.coordinate_key)
        .filter(|holder| holder != key)
        .collect())
}

/// Record `connection_key` on the transporter at `key` unless the key is
/// already paired elsewhere.
pub(crate) fn claim(
    storage: &dyn WarplineStorage,
    key: &CoordinateKey,
    connection_key: &str,
) -> Result<Claim, StorageError> {
    let others = holders_except(storage, connection_key, key)?;
    if others.len() >= 2 {
        return Ok(Claim::Rejected { members: others });
    }

    storage.transporter_set_connection_key(key, Some(connection_key))?;
    Ok(Claim::Recorded(match others.into_iter().next() {
        Some(partner) => Pairing::Connected { partner },
        None => Pairing::Waiting,
    }))
}

/// The transporter sharing `key`'s connection key, if any.
pub fn partner_of(
    storage: &dyn WarplineStorage,
    key: &CoordinateKey,
) -> Result<Option<CoordinateKey>, StorageError> {
    let Some(connection_key) = storage
        .transporter_get(key)?
        .and_then(|t| t.connection_key)
    else {
        return Ok(None);
    };
    Ok(holders_except(storage, &connection_key, key)?
        .into_iter()
        .next())
}

#[cfg(test)]
mod tests {
    use super::*;
    use warpline_core::{Position, Transporter};
    use warpline_storage::MockStorage;

    fn place(storage: &MockStorage, x: i32) -> CoordinateKey {
        let key = Position::new(x, 64, 0).key();
        storage.transporter_upsert(&Transporter::new(key.clone())).unwrap();
        key
    }

    #[test]
    fn test_pair_forms_on_second_claim() {
        let storage = MockStorage::new();
        let a = place(&storage, 0);
        let b = place(&storage, 10);

        assert_eq!(claim(&storage, &a, "ABC1234").unwrap(), Claim::Recorded(Pairing::Waiting));
        assert_eq!(
            claim(&storage, &b, "ABC1234").unwrap(),
            Claim::Recorded(Pairing::Connected { partner: a.clone() })
        );
        assert_eq!(partner_of(&storage, &a).unwrap(), Some(b.clone()));
        assert_eq!(partner_of(&storage, &b).unwrap(), Some(a));
    }

    #[test]
    fn test_third_claimant_rejected_without_write() {
        let storage = MockStorage::new();
        let a = place(&storage, 0);
        let b = place(&storage, 10);
        let c = place(&storage, 20);
        claim(&storage, &a, "ABC1234").unwrap();
        claim(&storage, &b, "ABC1234").unwrap();

        let outcome = claim(&storage, &c, "ABC1234").unwrap();
        assert!(matches!(outcome, Claim::Rejected { ref members } if members.len() == 2));
        assert_eq!(storage.transporter_get(&c).unwrap().unwrap().connection_key, None);
        assert_eq!(storage.transporter_get_by_connection_key("ABC1234").unwrap().len(), 2);
    }

    #[test]
    fn test_reclaiming_own_key_is_not_a_third_member() {
        let storage = MockStorage::new();
        let a = place(&storage, 0);
        let b = place(&storage, 10);
        claim(&storage, &a, "ABC1234").unwrap();
        claim(&storage, &b, "ABC1234").unwrap();

        assert_eq!(
            claim(&storage, &a, "ABC1234").unwrap(),
            Claim::Recorded(Pairing::Connected { partner: b })
        );
    }

    #[test]
    fn test_no_partner_without_key() {
        let storage = MockStorage::new();
        let a = place(&storage, 0);
        assert_eq!(partner_of(&storage, &a).unwrap(), None);
        assert_eq!(partner_of(&storage, &Position::new(9, 9, 9).key()).unwrap(), None);
    }
}
