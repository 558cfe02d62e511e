//! LMDB-backed storage, one named database per table.
//!
//! Uses the heed crate (Rust bindings for LMDB). Opening a save creates any
//! missing table inside a single write transaction, so opening is idempotent
//! and a fresh directory comes up with an empty schema.
//!
//! # Layout
//!
//! | table           | key                           | value                 |
//! |-----------------|-------------------------------|-----------------------|
//! | transporters    | coordinate key                | JSON `Transporter`    |
//! | interceptors    | coordinate key                | JSON `Interceptor`    |
//! | inventory_items | coordinate key, 0xFF, slot id | raw item blob         |
//! | charges         | coordinate key                | `u32` little endian   |
//! | covered         | coordinate key                | one byte, 0 or 1      |
//! | transits        | record id (UUIDv7 bytes)      | JSON `TransitRecord`  |
//!
//! An empty inventory value means the slot is free.
//!
//! # Thread Safety
//!
//! LMDB serializes write transactions. Every read-modify-write below
//! (charge counters, slot writes) runs inside one write transaction, so
//! concurrent callers never lose an update.

use crate::keys::SlotKey;
use crate::{
    normalize_connection_key, ChargeRegistry, CoveredRegistry, InterceptorRegistry,
    InventoryRegistry, StorageResult, TransitLog, TransporterRegistry,
};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{debug, info};
use warpline_core::{
    CoordinateKey, Interceptor, InventorySlot, SlotId, StoreConfig, StorageError, Table,
    TransitRecord, Transporter,
};

/// Error type for opening and driving the LMDB environment.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStorageError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a named database within the environment.
    #[error("Failed to open database '{name}': {reason}")]
    DbOpen { name: &'static str, reason: String },

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStorageError> for StorageError {
    fn from(e: LmdbStorageError) -> Self {
        StorageError::Unavailable {
            reason: e.to_string(),
        }
    }
}

fn txn_err(e: heed::Error) -> StorageError {
    LmdbStorageError::Transaction(e.to_string()).into()
}

fn serialization_err(table: Table) -> impl Fn(serde_json::Error) -> StorageError {
    move |e| StorageError::Serialization {
        table,
        reason: e.to_string(),
    }
}

fn decode_count(bytes: &[u8]) -> StorageResult<u32> {
    let raw: [u8; 4] = bytes.try_into().map_err(|_| StorageError::Serialization {
        table: Table::Charges,
        reason: format!("expected 4 bytes, found {}", bytes.len()),
    })?;
    Ok(u32::from_le_bytes(raw))
}

/// LMDB-backed storage for one world save.
#[derive(Clone)]
pub struct LmdbStorage {
    env: Env,
    transporters: Database<Bytes, Bytes>,
    interceptors: Database<Bytes, Bytes>,
    inventory: Database<Bytes, Bytes>,
    charges: Database<Bytes, Bytes>,
    covered: Database<Bytes, Bytes>,
    transits: Database<Bytes, Bytes>,
}

impl fmt::Debug for LmdbStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LmdbStorage")
            .field("path", &self.env.path())
            .finish_non_exhaustive()
    }
}

impl LmdbStorage {
    /// Open the save described by `config`.
    pub fn open(config: &StoreConfig) -> Result<Self, LmdbStorageError> {
        Self::new(&config.path, config.map_size_mb)
    }

    /// Open or create a save.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the memory map in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - A table cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStorageError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(Table::ALL.len() as u32)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStorageError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbStorageError::Transaction(e.to_string()))?;

        let mut create = |table: Table| -> Result<Database<Bytes, Bytes>, LmdbStorageError> {
            env.create_database(&mut wtxn, Some(table.as_db_name()))
                .map_err(|e| LmdbStorageError::DbOpen {
                    name: table.as_db_name(),
                    reason: e.to_string(),
                })
        };

        let transporters = create(Table::Transporters)?;
        let interceptors = create(Table::Interceptors)?;
        let inventory = create(Table::InventoryItems)?;
        let charges = create(Table::Charges)?;
        let covered = create(Table::Covered)?;
        let transits = create(Table::Transits)?;

        wtxn.commit()
            .map_err(|e| LmdbStorageError::Transaction(e.to_string()))?;

        info!(path = %path.as_ref().display(), max_size_mb, "Opened warpline store");

        Ok(Self {
            env,
            transporters,
            interceptors,
            inventory,
            charges,
            covered,
            transits,
        })
    }

    // ========================================================================
    // GENERIC HELPERS
    // ========================================================================

    fn get_json<T: DeserializeOwned>(
        &self,
        db: Database<Bytes, Bytes>,
        table: Table,
        key: &[u8],
    ) -> StorageResult<Option<T>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match db.get(&rtxn, key).map_err(txn_err)? {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(serialization_err(table)),
            None => Ok(None),
        }
    }

    fn put_json<T: Serialize>(
        &self,
        db: Database<Bytes, Bytes>,
        table: Table,
        key: &[u8],
        value: &T,
    ) -> StorageResult<()> {
        let bytes = serde_json::to_vec(value).map_err(serialization_err(table))?;
        self.put_raw(db, key, &bytes)
    }

    fn put_raw(&self, db: Database<Bytes, Bytes>, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        db.put(&mut wtxn, key, value).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    fn delete_key(&self, db: Database<Bytes, Bytes>, key: &[u8]) -> StorageResult<bool> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let deleted = db.delete(&mut wtxn, key).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(deleted)
    }

    fn all_json<T: DeserializeOwned>(
        &self,
        db: Database<Bytes, Bytes>,
        table: Table,
    ) -> StorageResult<Vec<T>> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut rows = Vec::new();
        for result in db.iter(&rtxn).map_err(txn_err)? {
            let (_, bytes) = result.map_err(txn_err)?;
            rows.push(serde_json::from_slice(bytes).map_err(serialization_err(table))?);
        }
        Ok(rows)
    }

    /// Keys of every inventory row belonging to `key`.
    fn slot_keys(&self, txn: &RoTxn, key: &CoordinateKey) -> StorageResult<Vec<Vec<u8>>> {
        let prefix = SlotKey::position_prefix(key);
        let mut keys = Vec::new();
        for result in self
            .inventory
            .prefix_iter(txn, prefix.as_slice())
            .map_err(txn_err)?
        {
            let (k, _) = result.map_err(txn_err)?;
            keys.push(k.to_vec());
        }
        Ok(keys)
    }

    /// Read-modify-write of one charge counter inside a single transaction.
    fn update_charge(
        &self,
        key: &CoordinateKey,
        update: impl FnOnce(u32) -> u32,
    ) -> StorageResult<u32> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let current = match self.charges.get(&wtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => decode_count(bytes)?,
            None => 0,
        };
        let next = update(current);
        self.charges
            .put(&mut wtxn, key.as_bytes(), &next.to_le_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(next)
    }

    fn transits_where(
        &self,
        predicate: impl Fn(&TransitRecord) -> bool,
    ) -> StorageResult<Vec<TransitRecord>> {
        Ok(self
            .all_json::<TransitRecord>(self.transits, Table::Transits)?
            .into_iter()
            .filter(|r| predicate(r))
            .collect())
    }
}

impl TransporterRegistry for LmdbStorage {
    fn transporter_upsert(&self, transporter: &Transporter) -> StorageResult<()> {
        let mut row = transporter.clone();
        row.connection_key = normalize_connection_key(row.connection_key.as_deref());
        self.put_json(
            self.transporters,
            Table::Transporters,
            row.coordinate_key.as_bytes(),
            &row,
        )
    }

    fn transporter_get(&self, key: &CoordinateKey) -> StorageResult<Option<Transporter>> {
        self.get_json(self.transporters, Table::Transporters, key.as_bytes())
    }

    fn transporter_delete(&self, key: &CoordinateKey) -> StorageResult<bool> {
        self.delete_key(self.transporters, key.as_bytes())
    }

    fn transporter_set_connection_key(
        &self,
        key: &CoordinateKey,
        connection_key: Option<&str>,
    ) -> StorageResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let mut row: Transporter = match self
            .transporters
            .get(&wtxn, key.as_bytes())
            .map_err(txn_err)?
        {
            Some(bytes) => {
                serde_json::from_slice(bytes).map_err(serialization_err(Table::Transporters))?
            }
            None => {
                return Err(StorageError::NotFound {
                    table: Table::Transporters,
                    key: key.clone(),
                })
            }
        };
        row.connection_key = normalize_connection_key(connection_key);
        let bytes = serde_json::to_vec(&row).map_err(serialization_err(Table::Transporters))?;
        self.transporters
            .put(&mut wtxn, key.as_bytes(), &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    fn transporter_get_by_connection_key(
        &self,
        connection_key: &str,
    ) -> StorageResult<Vec<Transporter>> {
        if connection_key.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .transporter_all()?
            .into_iter()
            .filter(|t| t.connection_key.as_deref() == Some(connection_key))
            .collect())
    }

    fn transporter_all(&self) -> StorageResult<Vec<Transporter>> {
        self.all_json(self.transporters, Table::Transporters)
    }
}

impl InterceptorRegistry for LmdbStorage {
    fn interceptor_insert(&self, interceptor: &Interceptor) -> StorageResult<()> {
        let key = interceptor.coordinate_key.as_bytes();
        let bytes =
            serde_json::to_vec(interceptor).map_err(serialization_err(Table::Interceptors))?;

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        if self.interceptors.get(&wtxn, key).map_err(txn_err)?.is_some() {
            return Err(StorageError::AlreadyExists {
                table: Table::Interceptors,
                key: interceptor.coordinate_key.clone(),
            });
        }
        self.interceptors
            .put(&mut wtxn, key, &bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    fn interceptor_get(&self, key: &CoordinateKey) -> StorageResult<Option<Interceptor>> {
        self.get_json(self.interceptors, Table::Interceptors, key.as_bytes())
    }

    fn interceptor_delete(&self, key: &CoordinateKey) -> StorageResult<bool> {
        self.delete_key(self.interceptors, key.as_bytes())
    }

    fn interceptor_all(&self) -> StorageResult<Vec<Interceptor>> {
        self.all_json(self.interceptors, Table::Interceptors)
    }
}

impl InventoryRegistry for LmdbStorage {
    fn inventory_initialize(&self, key: &CoordinateKey, slot_count: SlotId) -> StorageResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let stale = self.slot_keys(&wtxn, key)?;
        for k in &stale {
            self.inventory.delete(&mut wtxn, k).map_err(txn_err)?;
        }
        for slot_id in 0..slot_count {
            let slot_key = SlotKey::new(key.clone(), slot_id).encode();
            self.inventory
                .put(&mut wtxn, &slot_key, b"")
                .map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        debug!(position = %key, slot_count, replaced = stale.len(), "Initialized inventory");
        Ok(())
    }

    fn inventory_set_slot(
        &self,
        key: &CoordinateKey,
        slot_id: SlotId,
        item_blob: Option<&[u8]>,
    ) -> StorageResult<()> {
        let slot_key = SlotKey::new(key.clone(), slot_id).encode();
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        if self.inventory.get(&wtxn, &slot_key).map_err(txn_err)?.is_none() {
            return Err(StorageError::NotFound {
                table: Table::InventoryItems,
                key: key.clone(),
            });
        }
        self.inventory
            .put(&mut wtxn, &slot_key, item_blob.unwrap_or_default())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)
    }

    fn inventory_get_items(&self, key: &CoordinateKey) -> StorageResult<Vec<InventorySlot>> {
        let prefix = SlotKey::position_prefix(key);
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        let mut slots = Vec::new();
        // One-byte slot ids sort numerically, so the scan is in slot order.
        for result in self
            .inventory
            .prefix_iter(&rtxn, prefix.as_slice())
            .map_err(txn_err)?
        {
            let (k, blob) = result.map_err(txn_err)?;
            let Some(slot_key) = SlotKey::decode(k) else {
                continue;
            };
            slots.push(InventorySlot {
                coordinate_key: key.clone(),
                slot_id: slot_key.slot_id(),
                item_blob: (!blob.is_empty()).then(|| blob.to_vec()),
            });
        }
        Ok(slots)
    }

    fn inventory_clear(&self, key: &CoordinateKey) -> StorageResult<usize> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let keys = self.slot_keys(&wtxn, key)?;
        for k in &keys {
            self.inventory.delete(&mut wtxn, k).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)?;
        debug!(position = %key, removed = keys.len(), "Cleared inventory");
        Ok(keys.len())
    }
}

impl ChargeRegistry for LmdbStorage {
    fn charge_initialize(&self, key: &CoordinateKey) -> StorageResult<()> {
        self.put_raw(self.charges, key.as_bytes(), &0u32.to_le_bytes())
    }

    fn charge_get(&self, key: &CoordinateKey) -> StorageResult<u32> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        match self.charges.get(&rtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => decode_count(bytes),
            None => Ok(0),
        }
    }

    fn charge_increment(&self, key: &CoordinateKey, delta: u32) -> StorageResult<u32> {
        self.update_charge(key, |count| count.saturating_add(delta))
    }

    fn charge_decrement(&self, key: &CoordinateKey) -> StorageResult<u32> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let current = match self.charges.get(&wtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => decode_count(bytes)?,
            None => {
                return Err(StorageError::NotFound {
                    table: Table::Charges,
                    key: key.clone(),
                })
            }
        };
        let next = current.saturating_sub(1);
        self.charges
            .put(&mut wtxn, key.as_bytes(), &next.to_le_bytes())
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(next)
    }

    fn charge_delete(&self, key: &CoordinateKey) -> StorageResult<bool> {
        self.delete_key(self.charges, key.as_bytes())
    }
}

impl CoveredRegistry for LmdbStorage {
    fn covered_get(&self, key: &CoordinateKey) -> StorageResult<bool> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        Ok(self
            .covered
            .get(&rtxn, key.as_bytes())
            .map_err(txn_err)?
            .is_some_and(|bytes| bytes.first() == Some(&1)))
    }

    fn covered_set(&self, key: &CoordinateKey, covered: bool) -> StorageResult<()> {
        self.put_raw(self.covered, key.as_bytes(), &[u8::from(covered)])
    }

    fn covered_delete(&self, key: &CoordinateKey) -> StorageResult<bool> {
        self.delete_key(self.covered, key.as_bytes())
    }
}

impl TransitLog for LmdbStorage {
    fn transit_record(&self, record: &TransitRecord) -> StorageResult<()> {
        self.put_json(self.transits, Table::Transits, record.id.as_bytes(), record)
    }

    fn transit_by_source(&self, key: &CoordinateKey) -> StorageResult<Vec<TransitRecord>> {
        self.transits_where(|r| &r.from == key)
    }

    fn transit_by_destination(&self, key: &CoordinateKey) -> StorageResult<Vec<TransitRecord>> {
        self.transits_where(|r| &r.to == key)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use warpline_core::{new_entity_id, ActorId, Position};

    fn open_temp() -> (TempDir, LmdbStorage) {
        let dir = TempDir::new().expect("tempdir");
        let storage = LmdbStorage::new(dir.path(), 16).expect("open store");
        (dir, storage)
    }

    fn key(x: i32, y: i32, z: i32) -> CoordinateKey {
        Position::new(x, y, z).key()
    }

    #[test]
    fn test_open_creates_schema_idempotently() {
        let dir = TempDir::new().unwrap();
        {
            let storage = LmdbStorage::new(dir.path(), 16).unwrap();
            assert!(storage.transporter_all().unwrap().is_empty());
        }
        let storage = LmdbStorage::new(dir.path(), 16).unwrap();
        assert!(storage.interceptor_all().unwrap().is_empty());
    }

    #[test]
    fn test_open_from_config() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig {
            path: dir.path().join("world"),
            map_size_mb: 8,
        };
        let storage = LmdbStorage::open(&config).unwrap();
        storage.covered_set(&key(0, 70, 0), true).unwrap();
        assert!(storage.covered_get(&key(0, 70, 0)).unwrap());
    }

    #[test]
    fn test_rows_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let a = key(0, 70, 0);
        let b = key(100, 70, 0);
        {
            let storage = LmdbStorage::new(dir.path(), 16).unwrap();
            storage
                .transporter_upsert(&Transporter::new(a.clone()).with_connection_key("ABC1234"))
                .unwrap();
            storage.interceptor_insert(&Interceptor::new(b.clone())).unwrap();
            storage.inventory_initialize(&b, 8).unwrap();
            storage.inventory_set_slot(&b, 3, Some(b"payload")).unwrap();
            storage.charge_increment(&a, 5).unwrap();
            storage.covered_set(&b, true).unwrap();
        }

        let storage = LmdbStorage::new(dir.path(), 16).unwrap();
        let transporter = storage.transporter_get(&a).unwrap().expect("persisted");
        assert_eq!(transporter.connection_key.as_deref(), Some("ABC1234"));
        assert!(storage.interceptor_get(&b).unwrap().is_some());
        assert_eq!(storage.charge_get(&a).unwrap(), 5);
        assert!(storage.covered_get(&b).unwrap());

        let items = storage.inventory_get_items(&b).unwrap();
        assert_eq!(items.len(), 8);
        assert_eq!(items[3].item_blob.as_deref(), Some(&b"payload"[..]));
        assert!(items[0].is_free());
    }

    #[test]
    fn test_interceptor_insert_duplicate() {
        let (_dir, storage) = open_temp();
        let interceptor = Interceptor::new(key(5, 70, 5));
        storage.interceptor_insert(&interceptor).unwrap();
        let err = storage.interceptor_insert(&interceptor).unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists { .. }));
    }

    #[test]
    fn test_inventory_is_scoped_per_position() {
        let (_dir, storage) = open_temp();
        let short = key(1, 2, 3);
        let long = key(1, 2, 34);
        storage.inventory_initialize(&short, 2).unwrap();
        storage.inventory_initialize(&long, 4).unwrap();

        assert_eq!(storage.inventory_get_items(&short).unwrap().len(), 2);
        assert_eq!(storage.inventory_clear(&short).unwrap(), 2);
        assert_eq!(storage.inventory_get_items(&long).unwrap().len(), 4);
    }

    #[test]
    fn test_inventory_scan_returns_only_own_slots_in_order() {
        let (_dir, storage) = open_temp();
        let neighbours = [key(1, 2, 3), key(1, 2, 34), key(1, 2, -3), key(0, 0, 0)];
        for (i, position) in neighbours.iter().enumerate() {
            storage.inventory_initialize(position, 20 + i as SlotId).unwrap();
        }
        let target = &neighbours[0];
        storage.inventory_set_slot(target, 11, Some(b"x")).unwrap();

        let items = storage.inventory_get_items(target).unwrap();
        let ids: Vec<SlotId> = items.iter().map(|slot| slot.slot_id).collect();
        assert_eq!(ids, (0..20).collect::<Vec<SlotId>>());
        assert!(items.iter().all(|slot| &slot.coordinate_key == target));
        assert_eq!(items[11].item_blob.as_deref(), Some(&b"x"[..]));
        assert_eq!(storage.inventory_first_free_slot(target).unwrap(), Some(0));

        assert_eq!(storage.inventory_clear(target).unwrap(), 20);
        assert_eq!(storage.inventory_get_items(&neighbours[1]).unwrap().len(), 21);
        assert_eq!(storage.inventory_get_items(&neighbours[2]).unwrap().len(), 22);
    }

    #[test]
    fn test_inventory_reinitialize_replaces_slots() {
        let (_dir, storage) = open_temp();
        let a = key(0, 70, 0);
        storage.inventory_initialize(&a, 8).unwrap();
        storage.inventory_set_slot(&a, 7, Some(b"x")).unwrap();
        storage.inventory_initialize(&a, 2).unwrap();

        let items = storage.inventory_get_items(&a).unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().all(InventorySlot::is_free));
    }

    #[test]
    fn test_inventory_set_slot_requires_initialized_slot() {
        let (_dir, storage) = open_temp();
        let a = key(0, 70, 0);
        let err = storage.inventory_set_slot(&a, 0, Some(b"x")).unwrap_err();
        assert!(matches!(err, StorageError::NotFound { table: Table::InventoryItems, .. }));
    }

    #[test]
    fn test_first_free_slot_uses_ascending_order() {
        let (_dir, storage) = open_temp();
        let a = key(0, 70, 0);
        storage.inventory_initialize(&a, 3).unwrap();
        storage.inventory_set_slot(&a, 0, Some(b"x")).unwrap();
        storage.inventory_set_slot(&a, 2, Some(b"y")).unwrap();
        assert_eq!(storage.inventory_first_free_slot(&a).unwrap(), Some(1));

        storage.inventory_set_slot(&a, 1, Some(b"z")).unwrap();
        assert_eq!(storage.inventory_first_free_slot(&a).unwrap(), None);
    }

    #[test]
    fn test_charge_counter() {
        let (_dir, storage) = open_temp();
        let a = key(0, 70, 0);
        storage.charge_initialize(&a).unwrap();
        assert_eq!(storage.charge_decrement(&a).unwrap(), 0);
        assert_eq!(storage.charge_increment(&a, 3).unwrap(), 3);
        assert_eq!(storage.charge_decrement(&a).unwrap(), 2);
        assert!(storage.charge_delete(&a).unwrap());
        assert_eq!(storage.charge_get(&a).unwrap(), 0);
    }

    #[test]
    fn test_charge_decrement_does_not_create_rows() {
        let (_dir, storage) = open_temp();
        let a = key(0, 70, 0);
        let err = storage.charge_decrement(&a).unwrap_err();
        assert!(matches!(err, StorageError::NotFound { table: Table::Charges, .. }));
        assert!(!storage.charge_delete(&a).unwrap());
    }

    #[test]
    fn test_connection_key_updates() {
        let (_dir, storage) = open_temp();
        let a = key(0, 70, 0);
        let b = key(10, 70, 0);
        storage.transporter_upsert(&Transporter::new(a.clone())).unwrap();
        storage.transporter_upsert(&Transporter::new(b.clone())).unwrap();
        storage.transporter_set_connection_key(&a, Some("ABC1234")).unwrap();
        storage.transporter_set_connection_key(&b, Some("ABC1234")).unwrap();

        let pair = storage.transporter_get_by_connection_key("ABC1234").unwrap();
        assert_eq!(pair.len(), 2);

        storage.transporter_set_connection_key(&a, None).unwrap();
        let remaining = storage.transporter_get_by_connection_key("ABC1234").unwrap();
        assert_eq!(remaining, vec![Transporter::new(b).with_connection_key("ABC1234")]);

        let missing = storage.transporter_set_connection_key(&key(99, 0, 0), Some("X"));
        assert!(missing.is_err());
    }

    #[test]
    fn test_transits_are_ordered_oldest_first() {
        let (_dir, storage) = open_temp();
        let from = key(0, 70, 0);
        let to = key(10, 70, 0);
        let mut ids = Vec::new();
        for n in 0..3u8 {
            let record = TransitRecord {
                id: new_entity_id(),
                from: from.clone(),
                to: to.clone(),
                intercepted: false,
                item_blob: vec![n],
                sent_at: chrono::Utc::now(),
                actor: ActorId::system(),
            };
            ids.push(record.id);
            storage.transit_record(&record).unwrap();
        }

        let by_source: Vec<_> = storage
            .transit_by_source(&from)
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(by_source, sorted);
        assert_eq!(storage.transit_by_destination(&to).unwrap().len(), 3);
        assert!(storage.transit_by_destination(&from).unwrap().is_empty());
    }
}
