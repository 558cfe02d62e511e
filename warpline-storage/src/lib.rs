//! Warpline Storage - Registry Traits and Implementations
//!
//! Defines one registry trait per persisted table and two implementations:
//! [`MockStorage`] keeps every table in memory, [`LmdbStorage`] keeps them in
//! a file-backed LMDB environment, one named database per table.
//!
//! Every mutating call commits before it returns. No call holds a lock or a
//! transaction open after returning, so registries can be shared freely
//! between callers.

pub mod keys;
pub mod lmdb;
pub mod mock;

pub use lmdb::{LmdbStorage, LmdbStorageError};
pub use mock::MockStorage;

use warpline_core::{
    CoordinateKey, Interceptor, InventorySlot, SlotId, StorageError, TransitRecord, Transporter,
};

/// Result type alias for registry calls.
pub type StorageResult<T> = Result<T, StorageError>;

// ============================================================================
// REGISTRY TRAITS
// ============================================================================

/// Placed transporters and their connection keys.
pub trait TransporterRegistry: Send + Sync {
    /// Insert a transporter, overwriting any existing row at the same key
    /// (including its connection key).
    fn transporter_upsert(&self, transporter: &Transporter) -> StorageResult<()>;

    /// Get a transporter by position.
    fn transporter_get(&self, key: &CoordinateKey) -> StorageResult<Option<Transporter>>;

    /// Delete a transporter. Returns whether a row was removed.
    fn transporter_delete(&self, key: &CoordinateKey) -> StorageResult<bool>;

    /// Set or clear (`None` or empty) the connection key.
    /// Fails with `NotFound` if no transporter is registered at `key`.
    fn transporter_set_connection_key(
        &self,
        key: &CoordinateKey,
        connection_key: Option<&str>,
    ) -> StorageResult<()>;

    /// All transporters currently holding `connection_key`, ordered by key.
    fn transporter_get_by_connection_key(
        &self,
        connection_key: &str,
    ) -> StorageResult<Vec<Transporter>>;

    /// Every registered transporter, ordered by key.
    fn transporter_all(&self) -> StorageResult<Vec<Transporter>>;
}

/// Placed interceptors.
pub trait InterceptorRegistry: Send + Sync {
    /// Insert an interceptor. Fails with `AlreadyExists` on a duplicate.
    fn interceptor_insert(&self, interceptor: &Interceptor) -> StorageResult<()>;

    /// Get an interceptor by position.
    fn interceptor_get(&self, key: &CoordinateKey) -> StorageResult<Option<Interceptor>>;

    /// Delete an interceptor. Returns whether a row was removed.
    fn interceptor_delete(&self, key: &CoordinateKey) -> StorageResult<bool>;

    /// Every registered interceptor, ordered by key.
    fn interceptor_all(&self) -> StorageResult<Vec<Interceptor>>;
}

/// Receiving slots of transporters and interceptors.
pub trait InventoryRegistry: Send + Sync {
    /// Create `slot_count` empty slots, replacing whatever was stored.
    fn inventory_initialize(&self, key: &CoordinateKey, slot_count: SlotId) -> StorageResult<()>;

    /// Overwrite one slot. `None` or an empty blob frees it.
    /// Fails with `NotFound` if the slot was never initialized.
    fn inventory_set_slot(
        &self,
        key: &CoordinateKey,
        slot_id: SlotId,
        item_blob: Option<&[u8]>,
    ) -> StorageResult<()>;

    /// All slots of a position, ordered by slot id.
    fn inventory_get_items(&self, key: &CoordinateKey) -> StorageResult<Vec<InventorySlot>>;

    /// Lowest free slot id, if any.
    fn inventory_first_free_slot(&self, key: &CoordinateKey) -> StorageResult<Option<SlotId>> {
        Ok(self
            .inventory_get_items(key)?
            .iter()
            .find(|slot| slot.is_free())
            .map(|slot| slot.slot_id))
    }

    /// Delete every slot of a position. Returns the number of rows removed.
    fn inventory_clear(&self, key: &CoordinateKey) -> StorageResult<usize>;
}

/// Charge counters.
pub trait ChargeRegistry: Send + Sync {
    /// Create or reset the counter to zero.
    fn charge_initialize(&self, key: &CoordinateKey) -> StorageResult<()>;

    /// Current count. A missing row reads as zero.
    fn charge_get(&self, key: &CoordinateKey) -> StorageResult<u32>;

    /// Add `delta` (saturating) and return the new count.
    fn charge_increment(&self, key: &CoordinateKey, delta: u32) -> StorageResult<u32>;

    /// Subtract one, clamped at zero, and return the new count. A missing
    /// counter is `NotFound` and is not created.
    fn charge_decrement(&self, key: &CoordinateKey) -> StorageResult<u32>;

    /// Delete the counter. Returns whether a row was removed.
    fn charge_delete(&self, key: &CoordinateKey) -> StorageResult<bool>;
}

/// Coverage flags.
pub trait CoveredRegistry: Send + Sync {
    /// Whether the position is covered. A missing row reads as `false`.
    fn covered_get(&self, key: &CoordinateKey) -> StorageResult<bool>;

    /// Upsert the flag.
    fn covered_set(&self, key: &CoordinateKey, covered: bool) -> StorageResult<()>;

    /// Delete the flag. Returns whether a row was removed.
    fn covered_delete(&self, key: &CoordinateKey) -> StorageResult<bool>;
}

/// Append-only history of deliveries.
pub trait TransitLog: Send + Sync {
    fn transit_record(&self, record: &TransitRecord) -> StorageResult<()>;

    /// Deliveries sent from `key`, oldest first.
    fn transit_by_source(&self, key: &CoordinateKey) -> StorageResult<Vec<TransitRecord>>;

    /// Deliveries that landed at `key`, oldest first.
    fn transit_by_destination(&self, key: &CoordinateKey) -> StorageResult<Vec<TransitRecord>>;
}

/// Every registry of one world save.
pub trait WarplineStorage:
    TransporterRegistry
    + InterceptorRegistry
    + InventoryRegistry
    + ChargeRegistry
    + CoveredRegistry
    + TransitLog
{
}

impl<T> WarplineStorage for T where
    T: TransporterRegistry
        + InterceptorRegistry
        + InventoryRegistry
        + ChargeRegistry
        + CoveredRegistry
        + TransitLog
{
}

/// Normalize a connection key argument: empty strings mean "no key".
pub(crate) fn normalize_connection_key(connection_key: Option<&str>) -> Option<String> {
    connection_key
        .filter(|k| !k.is_empty())
        .map(str::to_string)
}
