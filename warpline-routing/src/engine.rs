//! The transport engine: the single authority over one world's transporters.
//!
//! Every entry point is synchronous and runs to completion before returning.
//! Sends are validated without holding any lock, then committed while the
//! source and the chosen destination are held in the position lock table.
//! Everything that could have changed in between is checked again under the
//! locks before the first write.

use crate::connection::{self, Claim, Pairing};
use crate::context::WorldContext;
use crate::cooldown::CooldownTracker;
use crate::geometry::beam_candidates;
use crate::live::{LiveState, LiveTransporter};
use crate::locks::PositionLocks;
use crate::observers::{ObserverRegistry, SubscriptionId, TransitObserver};
use crate::state::{fuel_charges, is_covered, CoverageTransition};
use crate::world::BlockEntityHandle;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use warpline_core::{
    is_valid_key_code, new_entity_id, ActorId, ConnectionError, CoordinateKey, EffectKind,
    EntityId, EntityKind, Interceptor, ItemStack, Position, SendError, SlotId, StorageError,
    Table, Timestamp, TransitEvent, TransitRecord, Transporter, WarplineResult,
};
use warpline_storage::{
    ChargeRegistry, CoveredRegistry, InterceptorRegistry, InventoryRegistry, TransitLog,
    TransporterRegistry,
};

// ============================================================================
// RESULT TYPES
// ============================================================================

/// A completed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub transit_id: EntityId,
    pub from: CoordinateKey,
    pub to: CoordinateKey,
    pub slot_id: SlotId,
    /// True when an interceptor caught the item instead of the partner.
    pub intercepted: bool,
    /// Source charge after the send.
    pub source_charge: u32,
    /// Interceptor charge after the send, when intercepted.
    pub interceptor_charge: Option<u32>,
}

/// Rebuilt view of one placed entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveView {
    pub position: CoordinateKey,
    pub kind: EntityKind,
    pub connection_key: Option<String>,
    pub key_locked: bool,
    pub charge: u32,
    pub covered: bool,
    /// Input slot. Always `None` for interceptors.
    pub input: Option<ItemStack>,
    /// Receiving slots, indexed by slot id.
    pub slots: Vec<Option<ItemStack>>,
}

/// Deliveries sent from and received at one position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransitHistory {
    pub sent: Vec<TransitRecord>,
    pub received: Vec<TransitRecord>,
}

/// Where a send will land.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Route {
    destination: CoordinateKey,
    intercepted: bool,
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Debug)]
pub struct TransportEngine {
    ctx: WorldContext,
    cooldowns: CooldownTracker,
    locks: PositionLocks,
    observers: ObserverRegistry,
    live: LiveState,
    /// Serializes key insertion, key removal and transporter removal.
    pairing: Mutex<()>,
    last_sweep: Mutex<Option<Timestamp>>,
}

impl TransportEngine {
    pub fn new(ctx: WorldContext) -> Self {
        Self {
            ctx,
            cooldowns: CooldownTracker::new(),
            locks: PositionLocks::new(),
            observers: ObserverRegistry::new(),
            live: LiveState::new(),
            pairing: Mutex::new(()),
            last_sweep: Mutex::new(None),
        }
    }

    pub fn context(&self) -> &WorldContext {
        &self.ctx
    }

    pub fn observers(&self) -> &ObserverRegistry {
        &self.observers
    }

    pub fn subscribe(
        &self,
        position: Position,
        observer: Arc<dyn TransitObserver>,
    ) -> SubscriptionId {
        self.observers.subscribe(&position.key(), observer)
    }

    fn with_handle(&self, key: &CoordinateKey, f: impl FnOnce(&dyn BlockEntityHandle)) {
        if let Some(handle) = self.ctx.world.block_entity_at(key.position()) {
            f(handle.as_ref());
        }
    }

    fn now(&self) -> Timestamp {
        self.ctx.clock.now()
    }

    // ========================================================================
    // SENDING
    // ========================================================================

    /// Move one unit from the input slot of the transporter at `position`
    /// to its partner, or to the first interceptor on the way.
    ///
    /// Every error except `Store` and `Codec` is returned before anything is
    /// written.
    pub fn on_send_requested(
        &self,
        position: Position,
        actor: ActorId,
    ) -> Result<Delivery, SendError> {
        let source = position.key();
        let result = self.send(&source, actor);
        match &result {
            Ok(delivery) => info!(
                from = %delivery.from,
                to = %delivery.to,
                slot_id = delivery.slot_id,
                intercepted = delivery.intercepted,
                actor = %actor,
                "Item delivered"
            ),
            Err(e) if e.is_precondition() => {
                debug!(position = %source, reason = %e, "Send refused")
            }
            Err(e) => warn!(position = %source, error = %e, "Send failed"),
        }
        result
    }

    fn send(&self, source: &CoordinateKey, actor: ActorId) -> Result<Delivery, SendError> {
        let storage = &self.ctx.storage;
        let transporter =
            storage
                .transporter_get(source)?
                .ok_or_else(|| SendError::UnknownTransporter {
                    position: source.clone(),
                })?;

        self.check_source(source)?;
        let partner = self.resolve_partner(&transporter)?;
        let route = self.resolve_route(source, &partner)?;
        self.check_destination(&route)?;

        let guard = self.locks.lock_pair(source, &route.destination);

        // Another send or a coverage sweep may have run since the checks above.
        self.check_source(source)?;
        let slot_id = self.check_destination(&route)?;

        // The input slot only changes under the source lock, so the unit
        // encoded here is the one `commit` removes.
        let unit = self
            .live
            .input(source)
            .and_then(|mut input| input.take_one())
            .ok_or(SendError::EmptyInputSlot)?;
        let blob = self.ctx.codec.encode(&unit)?;

        let delivery = self.commit(source, &route, slot_id, blob, actor)?;
        drop(guard);

        self.notify_delivery(&delivery);
        Ok(delivery)
    }

    /// Source preconditions, in the order they are reported.
    fn check_source(&self, source: &CoordinateKey) -> Result<(), SendError> {
        let storage = &self.ctx.storage;
        if self.live.input(source).is_none() {
            return Err(SendError::EmptyInputSlot);
        }
        if storage.covered_get(source)? {
            return Err(SendError::SourceCovered {
                position: source.clone(),
            });
        }
        if let Some(remaining) = self.cooldowns.remaining(source, self.now()) {
            let remaining_ms = i64::try_from(remaining.as_millis()).unwrap_or(i64::MAX);
            return Err(SendError::OnCooldown {
                remaining_ms: remaining_ms.max(1),
            });
        }
        if storage.charge_get(source)? == 0 {
            return Err(SendError::InsufficientCharge {
                position: source.clone(),
            });
        }
        Ok(())
    }

    fn resolve_partner(&self, transporter: &Transporter) -> Result<CoordinateKey, SendError> {
        let Some(connection_key) = transporter.connection_key.as_deref() else {
            return Err(SendError::NoPartner {
                connection_key: None,
            });
        };
        self.ctx
            .storage
            .transporter_get_by_connection_key(connection_key)?
            .into_iter()
            .map(|t| t.coordinate_key)
            .find(|key| key != &transporter.coordinate_key)
            .ok_or_else(|| SendError::NoPartner {
                connection_key: Some(connection_key.to_string()),
            })
    }

    /// Nearest interceptor on the beam that can take the item, else the
    /// partner.
    fn resolve_route(
        &self,
        source: &CoordinateKey,
        partner: &CoordinateKey,
    ) -> Result<Route, SendError> {
        let interceptors: Vec<CoordinateKey> = self
            .ctx
            .storage
            .interceptor_all()?
            .into_iter()
            .map(|i| i.coordinate_key)
            .collect();

        let candidates = beam_candidates(
            source.position(),
            partner.position(),
            self.ctx.config.interceptor_radius,
            &interceptors,
        );
        for candidate in candidates {
            if self.can_intercept(&candidate)? {
                return Ok(Route {
                    destination: candidate,
                    intercepted: true,
                });
            }
        }

        Ok(Route {
            destination: partner.clone(),
            intercepted: false,
        })
    }

    fn can_intercept(&self, interceptor: &CoordinateKey) -> Result<bool, StorageError> {
        let storage = &self.ctx.storage;
        Ok(!storage.covered_get(interceptor)?
            && storage.charge_get(interceptor)? > 0
            && storage.inventory_first_free_slot(interceptor)?.is_some())
    }

    /// Destination checks. Returns the slot the item will land in.
    fn check_destination(&self, route: &Route) -> Result<SlotId, SendError> {
        let storage = &self.ctx.storage;
        if storage.covered_get(&route.destination)? {
            return Err(SendError::DestinationCovered {
                destination: route.destination.clone(),
            });
        }
        if route.intercepted && storage.charge_get(&route.destination)? == 0 {
            return Err(SendError::InsufficientCharge {
                position: route.destination.clone(),
            });
        }
        storage
            .inventory_first_free_slot(&route.destination)?
            .ok_or_else(|| SendError::DestinationFull {
                destination: route.destination.clone(),
            })
    }

    /// Apply a validated send. Caller holds both positions.
    ///
    /// The destination slot is written first; if that fails nothing has
    /// changed. A failure after it leaves the item in both places, with the
    /// input slot untouched and no cooldown started.
    fn commit(
        &self,
        source: &CoordinateKey,
        route: &Route,
        slot_id: SlotId,
        blob: Vec<u8>,
        actor: ActorId,
    ) -> Result<Delivery, SendError> {
        let storage = &self.ctx.storage;
        storage.inventory_set_slot(&route.destination, slot_id, Some(&blob))?;

        let source_charge =
            self.commit_step(source, "decrement source charge", storage.charge_decrement(source))?;
        let interceptor_charge = if route.intercepted {
            Some(self.commit_step(
                source,
                "decrement interceptor charge",
                storage.charge_decrement(&route.destination),
            )?)
        } else {
            None
        };

        self.live.take_one_input(source);
        let now = self.now();
        self.cooldowns
            .start(source, now, self.ctx.config.send_cooldown());

        let record = TransitRecord {
            id: new_entity_id(),
            from: source.clone(),
            to: route.destination.clone(),
            intercepted: route.intercepted,
            item_blob: blob,
            sent_at: now,
            actor,
        };
        // The item has moved; a missing history row does not undo that.
        if let Err(e) = storage.transit_record(&record) {
            error!(position = %source, transit_id = %record.id, error = %e, "Failed to record transit");
        }

        Ok(Delivery {
            transit_id: record.id,
            from: source.clone(),
            to: route.destination.clone(),
            slot_id,
            intercepted: route.intercepted,
            source_charge,
            interceptor_charge,
        })
    }

    fn commit_step<T>(
        &self,
        source: &CoordinateKey,
        step: &'static str,
        result: Result<T, StorageError>,
    ) -> Result<T, SendError> {
        result.map_err(|e| {
            error!(
                position = %source,
                step,
                error = %e,
                "Store failed mid-commit; delivery is partially applied"
            );
            SendError::Store(e)
        })
    }

    fn notify_delivery(&self, delivery: &Delivery) {
        self.refresh_inventory(&delivery.to);

        self.observers.emit(&TransitEvent::ChargesSynced {
            position: delivery.from.clone(),
            count: delivery.source_charge,
        });
        if let Some(count) = delivery.interceptor_charge {
            self.observers.emit(&TransitEvent::ChargesSynced {
                position: delivery.to.clone(),
                count,
            });
        }
        self.observers.emit(&TransitEvent::ItemDelivered {
            from: delivery.from.clone(),
            to: delivery.to.clone(),
            slot_id: delivery.slot_id,
            intercepted: delivery.intercepted,
        });

        self.ctx
            .world
            .play_effect(EffectKind::SendBeam, delivery.from.position());
        self.ctx
            .world
            .play_effect(EffectKind::Arrival, delivery.to.position());
    }

    /// Push the stored receiving slots of `key` to its live entity.
    fn refresh_inventory(&self, key: &CoordinateKey) {
        let Some(handle) = self.ctx.world.block_entity_at(key.position()) else {
            return;
        };
        match self.ctx.storage.inventory_get_items(key) {
            Ok(slots) => handle.refresh_inventory(&slots),
            Err(e) => warn!(position = %key, error = %e, "Failed to refresh live inventory"),
        }
    }

    // ========================================================================
    // PLACEMENT AND REMOVAL
    // ========================================================================

    /// Register a freshly placed block with empty slots, zero charge and a
    /// coverage flag computed from the world.
    pub fn on_entity_placed(&self, position: Position, kind: EntityKind) -> WarplineResult<()> {
        let key = position.key();
        let storage = &self.ctx.storage;
        let _guard = self.locks.acquire([&key]);
        match kind {
            EntityKind::Transporter => {
                let _pairing = self.pairing.lock().unwrap_or_else(PoisonError::into_inner);
                // Re-placing drops the stored key, which breaks an existing pair.
                let partner = connection::partner_of(storage.as_ref(), &key)?;
                storage.transporter_upsert(&Transporter::new(key.clone()))?;
                if let Some(partner) = partner {
                    self.disconnect(&partner);
                }
                self.live.update(&key, |entry| *entry = LiveTransporter::default());
                self.cooldowns.clear(&key);
            }
            EntityKind::Interceptor => {
                storage.interceptor_insert(&Interceptor::new(key.clone()))?;
            }
        }
        storage.inventory_initialize(&key, self.ctx.config.receiving_slots)?;
        storage.charge_initialize(&key)?;
        self.recheck_coverage(position)?;

        info!(position = %key, kind = %kind, "Entity placed");
        Ok(())
    }

    /// Forget a removed block and every row keyed by its position.
    ///
    /// Removing one half of a connected pair unlocks and disconnects the
    /// other half. Store failures are logged and do not stop the cascade.
    pub fn on_entity_removed(&self, position: Position, kind: EntityKind) {
        let key = position.key();
        let storage = &self.ctx.storage;
        // Waits for an in-flight send into or out of this position.
        let _guard = self.locks.acquire([&key]);

        match kind {
            EntityKind::Transporter => {
                let _pairing = self.pairing.lock().unwrap_or_else(PoisonError::into_inner);
                let partner = connection::partner_of(storage.as_ref(), &key).unwrap_or_else(|e| {
                    warn!(position = %key, error = %e, "Failed to look up partner during removal");
                    None
                });
                if let Err(e) = storage.transporter_delete(&key) {
                    warn!(position = %key, error = %e, "Failed to delete transporter row");
                }
                if let Some(partner) = partner {
                    self.disconnect(&partner);
                }
                self.live.remove(&key);
                self.cooldowns.clear(&key);
            }
            EntityKind::Interceptor => {
                if let Err(e) = storage.interceptor_delete(&key) {
                    warn!(position = %key, error = %e, "Failed to delete interceptor row");
                }
            }
        }

        if let Err(e) = storage.inventory_clear(&key) {
            warn!(position = %key, table = %Table::InventoryItems, error = %e, "Cleanup failed");
        }
        if let Err(e) = storage.charge_delete(&key) {
            warn!(position = %key, table = %Table::Charges, error = %e, "Cleanup failed");
        }
        if let Err(e) = storage.covered_delete(&key) {
            warn!(position = %key, table = %Table::Covered, error = %e, "Cleanup failed");
        }
        self.observers.remove_position(&key);

        info!(position = %key, kind = %kind, "Entity removed");
    }

    // ========================================================================
    // CONNECTION KEYS
    // ========================================================================

    /// A key item carrying `connection_key` went into the key slot.
    ///
    /// When this completes a pair, both key slots lock and both positions
    /// receive `TransportersConnected`. A key already held by a pair is
    /// rejected; the pair is told again that it is connected.
    pub fn on_key_item_inserted(
        &self,
        position: Position,
        connection_key: &str,
    ) -> WarplineResult<Pairing> {
        let key = position.key();
        if !is_valid_key_code(connection_key) {
            return Err(ConnectionError::InvalidKeyCode {
                code: connection_key.to_string(),
            }
            .into());
        }

        let _pairing = self.pairing.lock().unwrap_or_else(PoisonError::into_inner);
        let storage = self.ctx.storage.as_ref();
        let transporter = storage
            .transporter_get(&key)?
            .ok_or_else(|| ConnectionError::NotATransporter {
                position: key.clone(),
            })?;

        if transporter.connection_key.as_deref() != Some(connection_key)
            && connection::partner_of(storage, &key)?.is_some()
        {
            return Err(ConnectionError::KeySlotLocked { position: key }.into());
        }

        match connection::claim(storage, &key, connection_key)? {
            Claim::Rejected { members } => {
                warn!(
                    position = %key,
                    connection_key,
                    "Connection key already paired; rejecting third claimant"
                );
                self.connect(&members);
                Err(ConnectionError::ConnectionKeyClaimed {
                    connection_key: connection_key.to_string(),
                    members,
                }
                .into())
            }
            Claim::Recorded(Pairing::Waiting) => {
                self.live.update(&key, |entry| {
                    entry.key_code = Some(connection_key.to_string());
                    entry.key_locked = false;
                });
                debug!(position = %key, "Connection key recorded, waiting for partner");
                Ok(Pairing::Waiting)
            }
            Claim::Recorded(Pairing::Connected { partner }) => {
                self.live.update(&key, |entry| {
                    entry.key_code = Some(connection_key.to_string());
                });
                let mut members = vec![key.clone(), partner.clone()];
                members.sort();
                self.connect(&members);
                info!(position = %key, partner = %partner, "Transporters connected");
                Ok(Pairing::Connected { partner })
            }
        }
    }

    /// The key item was taken out of the key slot.
    pub fn on_key_item_removed(&self, position: Position) -> WarplineResult<()> {
        let key = position.key();
        let _pairing = self.pairing.lock().unwrap_or_else(PoisonError::into_inner);
        let storage = self.ctx.storage.as_ref();
        if storage.transporter_get(&key)?.is_none() {
            return Err(ConnectionError::NotATransporter { position: key }.into());
        }
        if connection::partner_of(storage, &key)?.is_some() {
            return Err(ConnectionError::KeySlotLocked { position: key }.into());
        }

        storage.transporter_set_connection_key(&key, None)?;
        self.live.update(&key, |entry| {
            entry.key_code = None;
            entry.key_locked = false;
        });
        debug!(position = %key, "Connection key cleared");
        Ok(())
    }

    fn connect(&self, members: &[CoordinateKey]) {
        for member in members {
            self.live.update(member, |entry| entry.key_locked = true);
            self.with_handle(member, |handle| handle.set_key_locked(true));
        }
        self.observers.emit(&TransitEvent::TransportersConnected {
            members: members.to_vec(),
        });
    }

    fn disconnect(&self, partner: &CoordinateKey) {
        self.live.update(partner, |entry| entry.key_locked = false);
        self.with_handle(partner, |handle| handle.set_key_locked(false));
        self.observers.emit(&TransitEvent::TransportersDisconnected {
            position: partner.clone(),
        });
        info!(position = %partner, "Transporter disconnected from its partner");
    }

    // ========================================================================
    // COVERAGE
    // ========================================================================

    /// Store a coverage flag computed by the host.
    pub fn on_coverage_recheck(
        &self,
        position: Position,
        covered: bool,
    ) -> WarplineResult<CoverageTransition> {
        let key = position.key();
        let storage = &self.ctx.storage;
        let previous = storage.covered_get(&key)?;
        storage.covered_set(&key, covered)?;

        let transition = CoverageTransition::between(previous, covered);
        if transition.is_change() {
            self.with_handle(&key, |handle| handle.set_disabled(covered));
            self.observers.emit(&TransitEvent::CoverageChanged {
                position: key.clone(),
                covered,
            });
            debug!(position = %key, covered, "Coverage changed");
        }
        Ok(transition)
    }

    /// Recompute the coverage of one position from the world.
    pub fn recheck_coverage(&self, position: Position) -> WarplineResult<CoverageTransition> {
        let covered = is_covered(
            position,
            self.ctx.world.is_sky_visible(position),
            self.ctx.config.min_usable_y,
        );
        self.on_coverage_recheck(position, covered)
    }

    /// Recompute coverage of every registered transporter and interceptor.
    /// Returns how many flags changed.
    pub fn recheck_all_coverage(&self) -> WarplineResult<usize> {
        let storage = &self.ctx.storage;
        let positions: Vec<CoordinateKey> = storage
            .transporter_all()?
            .into_iter()
            .map(|t| t.coordinate_key)
            .chain(storage.interceptor_all()?.into_iter().map(|i| i.coordinate_key))
            .collect();

        let mut changed = 0;
        for key in &positions {
            if self.recheck_coverage(key.position())?.is_change() {
                changed += 1;
            }
        }
        debug!(checked = positions.len(), changed, "Coverage sweep finished");
        Ok(changed)
    }

    /// Run the coverage sweep if the configured interval has elapsed since
    /// the previous one. Returns the number of changes when it ran.
    pub fn tick(&self) -> WarplineResult<Option<usize>> {
        let now = self.now();
        let interval = chrono::Duration::from_std(self.ctx.config.coverage_recheck_interval())
            .unwrap_or(chrono::Duration::MAX);
        {
            let mut last = self.last_sweep.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(previous) = *last {
                if now.signed_duration_since(previous) < interval {
                    return Ok(None);
                }
            }
            *last = Some(now);
        }
        self.recheck_all_coverage().map(Some)
    }

    // ========================================================================
    // CHARGES AND SLOTS
    // ========================================================================

    /// Fuel was burned at `position`. Returns the new charge.
    pub fn on_fueled(&self, position: Position, fuel_items: u32) -> WarplineResult<u32> {
        let key = position.key();
        let storage = &self.ctx.storage;
        let guard = self.locks.acquire([&key]);
        if storage.transporter_get(&key)?.is_none() && storage.interceptor_get(&key)?.is_none() {
            return Err(StorageError::NotFound {
                table: Table::Charges,
                key,
            }
            .into());
        }

        let count = storage.charge_increment(&key, fuel_charges(&self.ctx.config, fuel_items))?;
        drop(guard);
        self.observers.emit(&TransitEvent::ChargesSynced {
            position: key.clone(),
            count,
        });
        debug!(position = %key, fuel_items, count, "Charges added");
        Ok(count)
    }

    /// Replace the contents of a transporter's input slot. Waits for a send
    /// from `position` to finish.
    pub fn set_input_item(&self, position: Position, item: Option<ItemStack>) -> WarplineResult<()> {
        let key = position.key();
        let _guard = self.locks.acquire([&key]);
        if self.ctx.storage.transporter_get(&key)?.is_none() {
            return Err(ConnectionError::NotATransporter { position: key }.into());
        }
        self.live.update(&key, |entry| {
            entry.input = item.filter(|stack| !stack.is_empty());
        });
        Ok(())
    }

    pub fn input_item(&self, position: Position) -> Option<ItemStack> {
        self.live.input(&position.key())
    }

    /// Take the item out of a receiving slot, freeing it.
    pub fn take_received(
        &self,
        position: Position,
        slot_id: SlotId,
    ) -> WarplineResult<Option<ItemStack>> {
        let key = position.key();
        let storage = &self.ctx.storage;
        let item = {
            let _guard = self.locks.acquire([&key]);
            let slot = storage
                .inventory_get_items(&key)?
                .into_iter()
                .find(|slot| slot.slot_id == slot_id)
                .ok_or_else(|| StorageError::NotFound {
                    table: Table::InventoryItems,
                    key: key.clone(),
                })?;
            let Some(blob) = slot.item_blob.filter(|blob| !blob.is_empty()) else {
                return Ok(None);
            };
            let item = self.ctx.codec.decode(&blob)?;
            storage.inventory_set_slot(&key, slot_id, None)?;
            item
        };

        self.refresh_inventory(&key);
        Ok(Some(item))
    }

    // ========================================================================
    // LIVE VIEWS AND QUERIES
    // ========================================================================

    /// Rebuild the live view of a placed entity from the store and push it to
    /// the host's block entity.
    pub fn hydrate(&self, position: Position) -> WarplineResult<LiveView> {
        let key = position.key();
        let storage = self.ctx.storage.as_ref();

        let (kind, connection_key) = if let Some(transporter) = storage.transporter_get(&key)? {
            (EntityKind::Transporter, transporter.connection_key)
        } else if storage.interceptor_get(&key)?.is_some() {
            (EntityKind::Interceptor, None)
        } else {
            return Err(StorageError::NotFound {
                table: Table::Transporters,
                key,
            }
            .into());
        };

        let key_locked =
            kind == EntityKind::Transporter && connection::partner_of(storage, &key)?.is_some();
        let charge = storage.charge_get(&key)?;
        let covered = storage.covered_get(&key)?;
        let stored = storage.inventory_get_items(&key)?;
        let slots = stored
            .iter()
            .map(|slot| {
                slot.item_blob
                    .as_deref()
                    .filter(|blob| !blob.is_empty())
                    .map(|blob| self.ctx.codec.decode(blob))
                    .transpose()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let input = match kind {
            EntityKind::Transporter => {
                self.live.update(&key, |entry| {
                    entry.key_code = connection_key.clone();
                    entry.key_locked = key_locked;
                });
                self.live.input(&key)
            }
            EntityKind::Interceptor => None,
        };

        self.with_handle(&key, |handle| {
            handle.refresh_inventory(&stored);
            handle.set_key_locked(key_locked);
            handle.set_disabled(covered);
        });

        Ok(LiveView {
            position: key,
            kind,
            connection_key,
            key_locked,
            charge,
            covered,
            input,
            slots,
        })
    }

    /// Hydrate every registered entity. Returns how many were hydrated.
    pub fn hydrate_all(&self) -> WarplineResult<usize> {
        let storage = &self.ctx.storage;
        let positions: Vec<CoordinateKey> = storage
            .transporter_all()?
            .into_iter()
            .map(|t| t.coordinate_key)
            .chain(storage.interceptor_all()?.into_iter().map(|i| i.coordinate_key))
            .collect();
        for key in &positions {
            self.hydrate(key.position())?;
        }
        info!(entities = positions.len(), "Hydrated world");
        Ok(positions.len())
    }

    pub fn charge_of(&self, position: Position) -> WarplineResult<u32> {
        Ok(self.ctx.storage.charge_get(&position.key())?)
    }

    pub fn is_covered(&self, position: Position) -> WarplineResult<bool> {
        Ok(self.ctx.storage.covered_get(&position.key())?)
    }

    /// Time left before the transporter at `position` may send again.
    pub fn cooldown_remaining(&self, position: Position) -> Option<Duration> {
        self.cooldowns.remaining(&position.key(), self.now())
    }

    pub fn transit_history(&self, position: Position) -> WarplineResult<TransitHistory> {
        let key = position.key();
        Ok(TransitHistory {
            sent: self.ctx.storage.transit_by_source(&key)?,
            received: self.ctx.storage.transit_by_destination(&key)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::HeadlessWorld;
    use warpline_core::{WarplineConfig, WarplineError};
    use warpline_storage::MockStorage;

    fn engine() -> (MockStorage, TransportEngine) {
        let storage = MockStorage::new();
        let ctx = WorldContext::new(
            Arc::new(storage.clone()),
            Arc::new(HeadlessWorld),
            WarplineConfig::default(),
        );
        (storage, TransportEngine::new(ctx))
    }

    const A: Position = Position::new(0, 64, 0);
    const B: Position = Position::new(10, 64, 0);

    #[test]
    fn test_placement_initializes_rows() {
        let (storage, engine) = engine();
        engine.on_entity_placed(A, EntityKind::Transporter).unwrap();

        assert!(storage.transporter_get(&A.key()).unwrap().is_some());
        assert_eq!(storage.inventory_get_items(&A.key()).unwrap().len(), 8);
        assert_eq!(engine.charge_of(A).unwrap(), 0);
        assert!(!engine.is_covered(A).unwrap());
    }

    #[test]
    fn test_placement_below_min_height_is_covered() {
        let (_storage, engine) = engine();
        let deep = Position::new(0, 10, 0);
        engine.on_entity_placed(deep, EntityKind::Interceptor).unwrap();
        assert!(engine.is_covered(deep).unwrap());
    }

    #[test]
    fn test_duplicate_interceptor_rejected() {
        let (_storage, engine) = engine();
        engine.on_entity_placed(B, EntityKind::Interceptor).unwrap();
        let err = engine.on_entity_placed(B, EntityKind::Interceptor).unwrap_err();
        assert!(matches!(
            err,
            WarplineError::Storage(StorageError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_send_from_unknown_position() {
        let (_storage, engine) = engine();
        let err = engine.on_send_requested(A, ActorId::system()).unwrap_err();
        assert!(matches!(err, SendError::UnknownTransporter { .. }));
    }

    #[test]
    fn test_send_without_key_has_no_partner() {
        let (_storage, engine) = engine();
        engine.on_entity_placed(A, EntityKind::Transporter).unwrap();
        engine.on_fueled(A, 1).unwrap();
        engine
            .set_input_item(A, Some(ItemStack::new("paper", 1)))
            .unwrap();

        let err = engine.on_send_requested(A, ActorId::system()).unwrap_err();
        assert_eq!(err, SendError::NoPartner { connection_key: None });
        assert_eq!(engine.charge_of(A).unwrap(), 1);
        assert!(engine.input_item(A).is_some());
    }

    #[test]
    fn test_invalid_key_code_rejected() {
        let (_storage, engine) = engine();
        engine.on_entity_placed(A, EntityKind::Transporter).unwrap();
        let err = engine.on_key_item_inserted(A, "not a key").unwrap_err();
        assert!(matches!(
            err,
            WarplineError::Connection(ConnectionError::InvalidKeyCode { .. })
        ));
    }

    #[test]
    fn test_key_on_unregistered_position() {
        let (_storage, engine) = engine();
        let err = engine.on_key_item_inserted(A, "ABC1234").unwrap_err();
        assert!(matches!(
            err,
            WarplineError::Connection(ConnectionError::NotATransporter { .. })
        ));
    }

    #[test]
    fn test_unpaired_key_can_be_removed() {
        let (storage, engine) = engine();
        engine.on_entity_placed(A, EntityKind::Transporter).unwrap();
        assert_eq!(engine.on_key_item_inserted(A, "ABC1234").unwrap(), Pairing::Waiting);
        engine.on_key_item_removed(A).unwrap();
        assert_eq!(storage.transporter_get(&A.key()).unwrap().unwrap().connection_key, None);
    }

    #[test]
    fn test_fueling_unregistered_position_fails() {
        let (_storage, engine) = engine();
        assert!(engine.on_fueled(A, 1).is_err());
    }

    #[test]
    fn test_fuel_uses_charges_per_fuel() {
        let storage = MockStorage::new();
        let config = WarplineConfig {
            charges_per_fuel: 4,
            ..WarplineConfig::default()
        };
        let engine = TransportEngine::new(WorldContext::new(
            Arc::new(storage),
            Arc::new(HeadlessWorld),
            config,
        ));
        engine.on_entity_placed(A, EntityKind::Transporter).unwrap();
        assert_eq!(engine.on_fueled(A, 2).unwrap(), 8);
    }

    #[test]
    fn test_tick_respects_interval() {
        let (_storage, engine) = engine();
        engine.on_entity_placed(A, EntityKind::Transporter).unwrap();
        assert_eq!(engine.tick().unwrap(), Some(0));
        assert_eq!(engine.tick().unwrap(), None);
    }

    #[test]
    fn test_take_received_frees_slot() {
        let (storage, engine) = engine();
        engine.on_entity_placed(A, EntityKind::Transporter).unwrap();
        let stack = ItemStack::new("paper", 1);
        let blob = engine.context().codec.encode(&stack).unwrap();
        storage.inventory_set_slot(&A.key(), 2, Some(&blob)).unwrap();

        assert_eq!(engine.take_received(A, 2).unwrap(), Some(stack));
        assert_eq!(engine.take_received(A, 2).unwrap(), None);
        assert_eq!(storage.inventory_first_free_slot(&A.key()).unwrap(), Some(0));
        assert!(engine.take_received(A, 99).is_err());
    }

    #[test]
    fn test_hydrate_unknown_position() {
        let (_storage, engine) = engine();
        assert!(engine.hydrate(A).is_err());
    }
}
