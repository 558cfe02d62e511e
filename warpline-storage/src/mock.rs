//! In-memory storage for tests and for hosts without a save directory.

use crate::{
    normalize_connection_key, ChargeRegistry, CoveredRegistry, InterceptorRegistry,
    InventoryRegistry, StorageResult, TransitLog, TransporterRegistry,
};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use warpline_core::{
    CoordinateKey, Interceptor, InventorySlot, SlotId, StorageError, Table, TransitRecord,
    Transporter,
};

type Slots = BTreeMap<SlotId, Option<Vec<u8>>>;

/// Mock storage backed by ordered maps.
///
/// Clones share the same tables, so a clone behaves like a second handle on
/// the same save.
#[derive(Debug, Clone, Default)]
pub struct MockStorage {
    transporters: Arc<RwLock<BTreeMap<CoordinateKey, Transporter>>>,
    interceptors: Arc<RwLock<BTreeMap<CoordinateKey, Interceptor>>>,
    inventory: Arc<RwLock<BTreeMap<CoordinateKey, Slots>>>,
    charges: Arc<RwLock<BTreeMap<CoordinateKey, u32>>>,
    covered: Arc<RwLock<BTreeMap<CoordinateKey, bool>>>,
    transits: Arc<RwLock<Vec<TransitRecord>>>,
    unavailable: Arc<AtomicBool>,
    failing_tables: Arc<RwLock<HashSet<Table>>>,
    writes: Arc<AtomicU64>,
}

fn read<T>(lock: &RwLock<T>) -> StorageResult<RwLockReadGuard<'_, T>> {
    lock.read().map_err(|_| StorageError::LockPoisoned)
}

fn write<T>(lock: &RwLock<T>) -> StorageResult<RwLockWriteGuard<'_, T>> {
    lock.write().map_err(|_| StorageError::LockPoisoned)
}

impl MockStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `Unavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make mutating calls on `table` fail with `Unavailable`. Reads and the
    /// other tables keep working.
    pub fn fail_writes_to(&self, table: Table, failing: bool) {
        let mut tables = self
            .failing_tables
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if failing {
            tables.insert(table);
        } else {
            tables.remove(&table);
        }
    }

    /// Number of successful mutating calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn transporter_count(&self) -> usize {
        self.transporters.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn interceptor_count(&self) -> usize {
        self.interceptors.read().map(|t| t.len()).unwrap_or(0)
    }

    pub fn transit_count(&self) -> usize {
        self.transits.read().map(|t| t.len()).unwrap_or(0)
    }

    fn check_available(&self) -> StorageResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "mock storage marked unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn check_writable(&self, table: Table) -> StorageResult<()> {
        self.check_available()?;
        if read(&self.failing_tables)?.contains(&table) {
            return Err(StorageError::Unavailable {
                reason: format!("writes to {table} disabled"),
            });
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

impl TransporterRegistry for MockStorage {
    fn transporter_upsert(&self, transporter: &Transporter) -> StorageResult<()> {
        self.check_writable(Table::Transporters)?;
        let mut row = transporter.clone();
        row.connection_key = normalize_connection_key(row.connection_key.as_deref());
        write(&self.transporters)?.insert(row.coordinate_key.clone(), row);
        self.record_write();
        Ok(())
    }

    fn transporter_get(&self, key: &CoordinateKey) -> StorageResult<Option<Transporter>> {
        self.check_available()?;
        Ok(read(&self.transporters)?.get(key).cloned())
    }

    fn transporter_delete(&self, key: &CoordinateKey) -> StorageResult<bool> {
        self.check_writable(Table::Transporters)?;
        let removed = write(&self.transporters)?.remove(key).is_some();
        self.record_write();
        Ok(removed)
    }

    fn transporter_set_connection_key(
        &self,
        key: &CoordinateKey,
        connection_key: Option<&str>,
    ) -> StorageResult<()> {
        self.check_writable(Table::Transporters)?;
        let mut transporters = write(&self.transporters)?;
        let row = transporters.get_mut(key).ok_or_else(|| StorageError::NotFound {
            table: Table::Transporters,
            key: key.clone(),
        })?;
        row.connection_key = normalize_connection_key(connection_key);
        self.record_write();
        Ok(())
    }

    fn transporter_get_by_connection_key(
        &self,
        connection_key: &str,
    ) -> StorageResult<Vec<Transporter>> {
        self.check_available()?;
        if connection_key.is_empty() {
            return Ok(Vec::new());
        }
        Ok(read(&self.transporters)?
            .values()
            .filter(|t| t.connection_key.as_deref() == Some(connection_key))
            .cloned()
            .collect())
    }

    fn transporter_all(&self) -> StorageResult<Vec<Transporter>> {
        self.check_available()?;
        Ok(read(&self.transporters)?.values().cloned().collect())
    }
}

impl InterceptorRegistry for MockStorage {
    fn interceptor_insert(&self, interceptor: &Interceptor) -> StorageResult<()> {
        self.check_writable(Table::Interceptors)?;
        let mut interceptors = write(&self.interceptors)?;
        if interceptors.contains_key(&interceptor.coordinate_key) {
            return Err(StorageError::AlreadyExists {
                table: Table::Interceptors,
                key: interceptor.coordinate_key.clone(),
            });
        }
        interceptors.insert(interceptor.coordinate_key.clone(), interceptor.clone());
        self.record_write();
        Ok(())
    }

    fn interceptor_get(&self, key: &CoordinateKey) -> StorageResult<Option<Interceptor>> {
        self.check_available()?;
        Ok(read(&self.interceptors)?.get(key).cloned())
    }

    fn interceptor_delete(&self, key: &CoordinateKey) -> StorageResult<bool> {
        self.check_writable(Table::Interceptors)?;
        let removed = write(&self.interceptors)?.remove(key).is_some();
        self.record_write();
        Ok(removed)
    }

    fn interceptor_all(&self) -> StorageResult<Vec<Interceptor>> {
        self.check_available()?;
        Ok(read(&self.interceptors)?.values().cloned().collect())
    }
}

impl InventoryRegistry for MockStorage {
    fn inventory_initialize(&self, key: &CoordinateKey, slot_count: SlotId) -> StorageResult<()> {
        self.check_writable(Table::InventoryItems)?;
        let slots = (0..slot_count).map(|slot_id| (slot_id, None)).collect();
        write(&self.inventory)?.insert(key.clone(), slots);
        self.record_write();
        Ok(())
    }

    fn inventory_set_slot(
        &self,
        key: &CoordinateKey,
        slot_id: SlotId,
        item_blob: Option<&[u8]>,
    ) -> StorageResult<()> {
        self.check_writable(Table::InventoryItems)?;
        let mut inventory = write(&self.inventory)?;
        let slot = inventory
            .get_mut(key)
            .and_then(|slots| slots.get_mut(&slot_id))
            .ok_or_else(|| StorageError::NotFound {
                table: Table::InventoryItems,
                key: key.clone(),
            })?;
        *slot = item_blob.filter(|blob| !blob.is_empty()).map(<[u8]>::to_vec);
        self.record_write();
        Ok(())
    }

    fn inventory_get_items(&self, key: &CoordinateKey) -> StorageResult<Vec<InventorySlot>> {
        self.check_available()?;
        let inventory = read(&self.inventory)?;
        let Some(slots) = inventory.get(key) else {
            return Ok(Vec::new());
        };
        Ok(slots
            .iter()
            .map(|(slot_id, blob)| InventorySlot {
                coordinate_key: key.clone(),
                slot_id: *slot_id,
                item_blob: blob.clone(),
            })
            .collect())
    }

    fn inventory_clear(&self, key: &CoordinateKey) -> StorageResult<usize> {
        self.check_writable(Table::InventoryItems)?;
        let removed = write(&self.inventory)?
            .remove(key)
            .map_or(0, |slots| slots.len());
        self.record_write();
        Ok(removed)
    }
}

impl ChargeRegistry for MockStorage {
    fn charge_initialize(&self, key: &CoordinateKey) -> StorageResult<()> {
        self.check_writable(Table::Charges)?;
        write(&self.charges)?.insert(key.clone(), 0);
        self.record_write();
        Ok(())
    }

    fn charge_get(&self, key: &CoordinateKey) -> StorageResult<u32> {
        self.check_available()?;
        Ok(read(&self.charges)?.get(key).copied().unwrap_or(0))
    }

    fn charge_increment(&self, key: &CoordinateKey, delta: u32) -> StorageResult<u32> {
        self.check_writable(Table::Charges)?;
        let mut charges = write(&self.charges)?;
        let count = charges.entry(key.clone()).or_insert(0);
        *count = count.saturating_add(delta);
        self.record_write();
        Ok(*count)
    }

    fn charge_decrement(&self, key: &CoordinateKey) -> StorageResult<u32> {
        self.check_writable(Table::Charges)?;
        let mut charges = write(&self.charges)?;
        let count = charges.get_mut(key).ok_or_else(|| StorageError::NotFound {
            table: Table::Charges,
            key: key.clone(),
        })?;
        *count = count.saturating_sub(1);
        self.record_write();
        Ok(*count)
    }

    fn charge_delete(&self, key: &CoordinateKey) -> StorageResult<bool> {
        self.check_writable(Table::Charges)?;
        let removed = write(&self.charges)?.remove(key).is_some();
        self.record_write();
        Ok(removed)
    }
}

impl CoveredRegistry for MockStorage {
    fn covered_get(&self, key: &CoordinateKey) -> StorageResult<bool> {
        self.check_available()?;
        Ok(read(&self.covered)?.get(key).copied().unwrap_or(false))
    }

    fn covered_set(&self, key: &CoordinateKey, covered: bool) -> StorageResult<()> {
        self.check_writable(Table::Covered)?;
        write(&self.covered)?.insert(key.clone(), covered);
        self.record_write();
        Ok(())
    }

    fn covered_delete(&self, key: &CoordinateKey) -> StorageResult<bool> {
        self.check_writable(Table::Covered)?;
        let removed = write(&self.covered)?.remove(key).is_some();
        self.record_write();
        Ok(removed)
    }
}

impl TransitLog for MockStorage {
    fn transit_record(&self, record: &TransitRecord) -> StorageResult<()> {
        self.check_writable(Table::Transits)?;
        write(&self.transits)?.push(record.clone());
        self.record_write();
        Ok(())
    }

    fn transit_by_source(&self, key: &CoordinateKey) -> StorageResult<Vec<TransitRecord>> {
        self.check_available()?;
        Ok(read(&self.transits)?
            .iter()
            .filter(|r| &r.from == key)
            .cloned()
            .collect())
    }

    fn transit_by_destination(&self, key: &CoordinateKey) -> StorageResult<Vec<TransitRecord>> {
        self.check_available()?;
        Ok(read(&self.transits)?
            .iter()
            .filter(|r| &r.to == key)
            .cloned()
            .collect())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use warpline_core::{ActorId, Position};

    fn key(x: i32, z: i32) -> CoordinateKey {
        Position::new(x, 64, z).key()
    }

    #[test]
    fn test_transporter_upsert_overwrites_connection_key() {
        let storage = MockStorage::new();
        let a = key(0, 0);
        storage
            .transporter_upsert(&Transporter::new(a.clone()).with_connection_key("ABC1234"))
            .unwrap();
        storage.transporter_upsert(&Transporter::new(a.clone())).unwrap();

        let row = storage.transporter_get(&a).unwrap().expect("row exists");
        assert_eq!(row.connection_key, None);
        assert_eq!(storage.transporter_count(), 1);
    }

    #[test]
    fn test_connection_key_lookup() {
        let storage = MockStorage::new();
        for (x, code) in [(0, "ABC1234"), (10, "ABC1234"), (20, "ZZZ0000")] {
            storage.transporter_upsert(&Transporter::new(key(x, 0))).unwrap();
            storage
                .transporter_set_connection_key(&key(x, 0), Some(code))
                .unwrap();
        }

        let pair = storage.transporter_get_by_connection_key("ABC1234").unwrap();
        assert_eq!(pair.len(), 2);
        assert!(storage.transporter_get_by_connection_key("").unwrap().is_empty());

        storage.transporter_set_connection_key(&key(10, 0), Some("")).unwrap();
        assert_eq!(storage.transporter_get_by_connection_key("ABC1234").unwrap().len(), 1);
    }

    #[test]
    fn test_set_connection_key_on_missing_transporter() {
        let storage = MockStorage::new();
        let err = storage
            .transporter_set_connection_key(&key(0, 0), Some("ABC1234"))
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { table: Table::Transporters, .. }));
    }

    #[test]
    fn test_interceptor_insert_duplicate() {
        let storage = MockStorage::new();
        let interceptor = Interceptor::new(key(5, 5));
        storage.interceptor_insert(&interceptor).unwrap();
        let err = storage.interceptor_insert(&interceptor).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { table: Table::Interceptors, .. }));
        assert_eq!(storage.interceptor_count(), 1);
    }

    #[test]
    fn test_inventory_first_free_slot() {
        let storage = MockStorage::new();
        let a = key(0, 0);
        storage.inventory_initialize(&a, 3).unwrap();
        assert_eq!(storage.inventory_first_free_slot(&a).unwrap(), Some(0));

        storage.inventory_set_slot(&a, 0, Some(b"one")).unwrap();
        storage.inventory_set_slot(&a, 1, Some(b"two")).unwrap();
        assert_eq!(storage.inventory_first_free_slot(&a).unwrap(), Some(2));

        storage.inventory_set_slot(&a, 2, Some(b"three")).unwrap();
        assert_eq!(storage.inventory_first_free_slot(&a).unwrap(), None);

        storage.inventory_set_slot(&a, 1, None).unwrap();
        assert_eq!(storage.inventory_first_free_slot(&a).unwrap(), Some(1));
    }

    #[test]
    fn test_inventory_set_slot_out_of_range() {
        let storage = MockStorage::new();
        let a = key(0, 0);
        assert!(storage.inventory_set_slot(&a, 0, Some(b"x")).is_err());

        storage.inventory_initialize(&a, 2).unwrap();
        assert!(storage.inventory_set_slot(&a, 2, Some(b"x")).is_err());
    }

    #[test]
    fn test_inventory_clear() {
        let storage = MockStorage::new();
        let a = key(0, 0);
        storage.inventory_initialize(&a, 8).unwrap();
        assert_eq!(storage.inventory_clear(&a).unwrap(), 8);
        assert!(storage.inventory_get_items(&a).unwrap().is_empty());
        assert_eq!(storage.inventory_first_free_slot(&a).unwrap(), None);
    }

    #[test]
    fn test_charge_decrement_clamps_at_zero() {
        let storage = MockStorage::new();
        let a = key(0, 0);
        storage.charge_initialize(&a).unwrap();
        assert_eq!(storage.charge_decrement(&a).unwrap(), 0);
        assert_eq!(storage.charge_increment(&a, 2).unwrap(), 2);
        assert_eq!(storage.charge_decrement(&a).unwrap(), 1);
    }

    #[test]
    fn test_missing_rows_read_as_defaults() {
        let storage = MockStorage::new();
        let a = key(0, 0);
        assert_eq!(storage.charge_get(&a).unwrap(), 0);
        assert!(!storage.covered_get(&a).unwrap());
        assert!(!storage.charge_delete(&a).unwrap());
    }

    #[test]
    fn test_unavailable_fails_every_call() {
        let storage = MockStorage::new();
        storage.set_unavailable(true);
        let err = storage.charge_get(&key(0, 0)).unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
        assert_eq!(storage.write_count(), 0);

        storage.set_unavailable(false);
        assert!(storage.charge_get(&key(0, 0)).is_ok());
    }

    #[test]
    fn test_charge_decrement_requires_row() {
        let storage = MockStorage::new();
        let a = key(0, 0);
        let err = storage.charge_decrement(&a).unwrap_err();
        assert!(matches!(err, StorageError::NotFound { table: Table::Charges, .. }));
        assert!(!storage.charge_delete(&a).unwrap());
    }

    #[test]
    fn test_failing_table_rejects_writes_only() {
        let storage = MockStorage::new();
        let a = key(0, 0);
        storage.charge_initialize(&a).unwrap();
        storage.fail_writes_to(Table::Charges, true);

        let err = storage.charge_increment(&a, 1).unwrap_err();
        assert!(matches!(err, StorageError::Unavailable { .. }));
        assert_eq!(storage.charge_get(&a).unwrap(), 0);
        storage.covered_set(&a, true).unwrap();

        storage.fail_writes_to(Table::Charges, false);
        assert_eq!(storage.charge_increment(&a, 1).unwrap(), 1);
    }

    #[test]
    fn test_transit_log_filters() {
        let storage = MockStorage::new();
        let record = TransitRecord {
            id: warpline_core::new_entity_id(),
            from: key(0, 0),
            to: key(10, 0),
            intercepted: false,
            item_blob: b"item".to_vec(),
            sent_at: chrono::Utc::now(),
            actor: ActorId::system(),
        };
        storage.transit_record(&record).unwrap();

        assert_eq!(storage.transit_by_source(&key(0, 0)).unwrap(), vec![record.clone()]);
        assert_eq!(storage.transit_by_destination(&key(10, 0)).unwrap(), vec![record]);
        assert!(storage.transit_by_source(&key(10, 0)).unwrap().is_empty());
    }

    #[test]
    fn test_clones_share_tables() {
        let storage = MockStorage::new();
        let handle = storage.clone();
        storage.covered_set(&key(1, 1), true).unwrap();
        assert!(handle.covered_get(&key(1, 1)).unwrap());
    }

    mod prop_tests {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum ChargeOp {
            Increment(u32),
            Decrement,
        }

        fn charge_op() -> impl Strategy<Value = ChargeOp> {
            prop_oneof![
                (0u32..5).prop_map(ChargeOp::Increment),
                Just(ChargeOp::Decrement),
            ]
        }

        proptest! {
            #[test]
            fn prop_charge_matches_saturating_model(ops in prop::collection::vec(charge_op(), 0..64)) {
                let storage = MockStorage::new();
                let a = key(0, 0);
                storage.charge_initialize(&a).unwrap();

                let mut model: u32 = 0;
                for op in ops {
                    let count = match op {
                        ChargeOp::Increment(n) => {
                            model = model.saturating_add(n);
                            storage.charge_increment(&a, n).unwrap()
                        }
                        ChargeOp::Decrement => {
                            model = model.saturating_sub(1);
                            storage.charge_decrement(&a).unwrap()
                        }
                    };
                    prop_assert_eq!(count, model);
                }
                prop_assert_eq!(storage.charge_get(&a).unwrap(), model);
            }

            #[test]
            fn prop_first_free_slot_is_lowest_free(filled in prop::collection::vec(any::<bool>(), 1..16)) {
                let storage = MockStorage::new();
                let a = key(3, 3);
                storage.inventory_initialize(&a, filled.len() as u8).unwrap();
                for (slot_id, full) in filled.iter().enumerate() {
                    if *full {
                        storage.inventory_set_slot(&a, slot_id as u8, Some(b"item")).unwrap();
                    }
                }
                let expected = filled.iter().position(|full| !full).map(|i| i as u8);
                prop_assert_eq!(storage.inventory_first_free_slot(&a).unwrap(), expected);
            }
        }
    }
}
