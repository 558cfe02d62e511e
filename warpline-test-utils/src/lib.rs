//! Warpline Test Utilities
//!
//! Centralized test infrastructure for the Warpline workspace:
//! - Mock host world, block entities, observer and clock
//! - Proptest generators for positions, key codes and item stacks
//! - Test fixtures for common scenarios
//! - Custom assertions for send outcomes

// Re-export mock storage from its source crate
pub use warpline_storage::MockStorage;

// Re-export core types for convenience
pub use warpline_core::{
    ActorId, CoordinateKey, EffectKind, EntityKind, InventorySlot, ItemStack, Position, SendError,
    SlotId, Timestamp, TransitEvent, WarplineConfig, WarplineError, WarplineResult,
};
pub use warpline_routing::{
    BlockEntityHandle, Clock, Delivery, TransitObserver, TransportEngine, WorldContext, WorldHost,
};

use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Install a fmt subscriber filtered by `RUST_LOG` that writes through the
/// test harness. Safe to call from every test.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// MOCK CLOCK
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        let mut now = self.now.lock().unwrap();
        *now = now.checked_add_signed(delta).unwrap_or(Timestamp::MAX_UTC);
    }

    pub fn set(&self, to: Timestamp) {
        *self.now.lock().unwrap() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

// ============================================================================
// MOCK WORLD
// ============================================================================

/// Block entity that records what the engine pushed to it.
#[derive(Debug, Default)]
pub struct MockBlockEntity {
    inventory: Mutex<Vec<InventorySlot>>,
    refreshes: AtomicUsize,
    key_locked: AtomicBool,
    disabled: AtomicBool,
}

impl MockBlockEntity {
    pub fn inventory(&self) -> Vec<InventorySlot> {
        self.inventory.lock().unwrap().clone()
    }

    pub fn refresh_count(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn is_key_locked(&self) -> bool {
        self.key_locked.load(Ordering::SeqCst)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }
}

impl BlockEntityHandle for MockBlockEntity {
    fn refresh_inventory(&self, slots: &[InventorySlot]) {
        *self.inventory.lock().unwrap() = slots.to_vec();
        self.refreshes.fetch_add(1, Ordering::SeqCst);
    }

    fn set_key_locked(&self, locked: bool) {
        self.key_locked.store(locked, Ordering::SeqCst);
    }

    fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }
}

/// Host world with a controllable sky and recorded effects.
#[derive(Debug, Default)]
pub struct MockWorld {
    roofed: Mutex<HashSet<Position>>,
    entities: Mutex<HashMap<Position, Arc<MockBlockEntity>>>,
    effects: Mutex<Vec<(EffectKind, Position)>>,
}

impl MockWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put a roof over `position`.
    pub fn cover(&self, position: Position) {
        self.roofed.lock().unwrap().insert(position);
    }

    pub fn uncover(&self, position: Position) {
        self.roofed.lock().unwrap().remove(&position);
    }

    /// Load a block entity at `position` and return it.
    pub fn spawn_entity(&self, position: Position) -> Arc<MockBlockEntity> {
        let entity = Arc::new(MockBlockEntity::default());
        self.entities
            .lock()
            .unwrap()
            .insert(position, Arc::clone(&entity));
        entity
    }

    pub fn entity(&self, position: Position) -> Option<Arc<MockBlockEntity>> {
        self.entities.lock().unwrap().get(&position).cloned()
    }

    pub fn effects(&self) -> Vec<(EffectKind, Position)> {
        self.effects.lock().unwrap().clone()
    }
}

impl WorldHost for MockWorld {
    fn block_entity_at(&self, position: Position) -> Option<Arc<dyn BlockEntityHandle>> {
        self.entities
            .lock()
            .unwrap()
            .get(&position)
            .map(|entity| Arc::clone(entity) as Arc<dyn BlockEntityHandle>)
    }

    fn is_sky_visible(&self, position: Position) -> bool {
        !self.roofed.lock().unwrap().contains(&position)
    }

    fn play_effect(&self, kind: EffectKind, position: Position) {
        self.effects.lock().unwrap().push((kind, position));
    }
}

// ============================================================================
// MOCK OBSERVER
// ============================================================================

/// Observer that keeps every event it receives.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<TransitEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<TransitEvent> {
        self.events.lock().unwrap().clone()
    }

    /// Number of received events with the given `event_type()`.
    pub fn count_of(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.event_type() == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

impl TransitObserver for RecordingObserver {
    fn on_event(&self, event: &TransitEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating Warpline values.

    use super::*;
    use proptest::prelude::*;
    use warpline_core::{KEY_CODE_ALPHABET, KEY_CODE_LENGTH};

    /// Any position in the full `i32` range.
    pub fn arb_position() -> impl Strategy<Value = Position> {
        (any::<i32>(), any::<i32>(), any::<i32>()).prop_map(|(x, y, z)| Position::new(x, y, z))
    }

    /// A position at height `y` within `extent` blocks of the origin.
    pub fn arb_position_at(y: i32, extent: i32) -> impl Strategy<Value = Position> {
        (-extent..=extent, -extent..=extent).prop_map(move |(x, z)| Position::new(x, y, z))
    }

    /// A well-formed key code.
    pub fn arb_key_code() -> impl Strategy<Value = String> {
        prop::collection::vec(prop::sample::select(KEY_CODE_ALPHABET.to_vec()), KEY_CODE_LENGTH)
            .prop_map(|bytes| bytes.into_iter().map(char::from).collect())
    }

    /// A small stack with a few attributes.
    pub fn arb_item_stack() -> impl Strategy<Value = ItemStack> {
        (
            "[a-z]{3,12}",
            1u32..64,
            prop::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,16}", 0..4),
        )
            .prop_map(|(code, quantity, attributes)| ItemStack {
                code,
                quantity,
                attributes,
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built worlds for common testing scenarios.

    use super::*;

    /// Config with the coverage height floor disabled, so scenarios can use
    /// `y = 0`.
    pub fn test_config() -> WarplineConfig {
        WarplineConfig {
            min_usable_y: i32::MIN,
            ..WarplineConfig::default()
        }
    }

    /// An engine over mock storage, a mock world and a manual clock.
    pub struct TestWorld {
        pub storage: MockStorage,
        pub world: Arc<MockWorld>,
        pub clock: Arc<ManualClock>,
        pub engine: TransportEngine,
    }

    impl TestWorld {
        pub fn new() -> Self {
            Self::with_config(test_config())
        }

        pub fn with_config(config: WarplineConfig) -> Self {
            init_test_tracing();
            let storage = MockStorage::new();
            let world = Arc::new(MockWorld::new());
            let clock = Arc::new(ManualClock::default());
            let ctx = WorldContext::new(Arc::new(storage.clone()), world.clone(), config)
                .with_clock(clock.clone());
            Self {
                storage,
                world,
                clock,
                engine: TransportEngine::new(ctx),
            }
        }

        pub fn place_transporter(&self, position: Position) {
            self.engine
                .on_entity_placed(position, EntityKind::Transporter)
                .unwrap();
        }

        pub fn place_interceptor(&self, position: Position) {
            self.engine
                .on_entity_placed(position, EntityKind::Interceptor)
                .unwrap();
        }

        /// Place two transporters and pair them with `code`.
        pub fn pair(&self, a: Position, b: Position, code: &str) {
            self.place_transporter(a);
            self.place_transporter(b);
            self.engine.on_key_item_inserted(a, code).unwrap();
            self.engine.on_key_item_inserted(b, code).unwrap();
        }

        pub fn fuel(&self, position: Position, fuel_items: u32) -> u32 {
            self.engine.on_fueled(position, fuel_items).unwrap()
        }

        pub fn load_input(&self, position: Position, stack: ItemStack) {
            self.engine.set_input_item(position, Some(stack)).unwrap();
        }

        /// Occupy every receiving slot of `position`.
        pub fn fill_slots(&self, position: Position) {
            use warpline_storage::InventoryRegistry;
            let key = position.key();
            for slot in self.storage.inventory_get_items(&key).unwrap() {
                self.storage
                    .inventory_set_slot(&key, slot.slot_id, Some(b"occupied"))
                    .unwrap();
            }
        }

        pub fn send(&self, position: Position) -> Result<Delivery, SendError> {
            self.engine.on_send_requested(position, ActorId::system())
        }
    }

    impl Default for TestWorld {
        fn default() -> Self {
            Self::new()
        }
    }

    /// A single sheet of paper.
    pub fn paper() -> ItemStack {
        ItemStack::new("paper-parchment", 1)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for send outcomes.

    use super::*;

    /// Assert that a send was refused with `expected`.
    #[track_caller]
    pub fn assert_refused(result: &Result<Delivery, SendError>, expected: &SendError) {
        match result {
            Err(actual) => assert_eq!(actual, expected, "Wrong refusal reason"),
            Ok(delivery) => panic!("Expected refusal {:?}, got delivery {:?}", expected, delivery),
        }
    }

    /// Assert that a send was delivered to `to`.
    #[track_caller]
    pub fn assert_delivered_to(result: &Result<Delivery, SendError>, to: Position) -> Delivery {
        match result {
            Ok(delivery) => {
                assert_eq!(delivery.to, to.key(), "Delivered to the wrong position");
                delivery.clone()
            }
            Err(e) => panic!("Expected delivery to {}, got error: {:?}", to, e),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::generators::*;
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::default();
        let start = clock.now();
        clock.advance(Duration::from_secs(3));
        assert_eq!(clock.now() - start, chrono::Duration::seconds(3));
    }

    #[test]
    fn test_mock_world_sky() {
        let world = MockWorld::new();
        let p = Position::new(1, 70, 1);
        assert!(world.is_sky_visible(p));
        world.cover(p);
        assert!(!world.is_sky_visible(p));
        world.uncover(p);
        assert!(world.is_sky_visible(p));
    }

    #[test]
    fn test_spawned_entity_is_visible_to_engine_side() {
        let world = MockWorld::new();
        let p = Position::new(0, 0, 0);
        assert!(world.block_entity_at(p).is_none());
        let entity = world.spawn_entity(p);
        world
            .block_entity_at(p)
            .expect("spawned")
            .set_key_locked(true);
        assert!(entity.is_key_locked());
    }

    proptest! {
        #[test]
        fn prop_generated_key_codes_are_valid(code in arb_key_code()) {
            prop_assert!(warpline_core::is_valid_key_code(&code));
        }

        #[test]
        fn prop_generated_stacks_are_non_empty(stack in arb_item_stack()) {
            prop_assert!(!stack.is_empty());
        }
    }
}
