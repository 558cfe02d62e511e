//! Warpline Routing - Transport Engine
//!
//! Decides where a sent item lands and applies the move:
//!
//! - [`geometry`]: horizontal beam distance and interceptor ordering
//! - [`connection`]: pairwise connection keys
//! - [`state`]: charge and coverage rules
//! - [`cooldown`]: per-position send cooldowns and the injectable clock
//! - [`locks`]: per-position locks held while a send commits
//! - [`observers`]: per-position event subscribers
//! - [`world`]: traits the host world implements
//! - [`engine`]: [`TransportEngine`], the entry point for every world event

pub mod connection;
pub mod context;
pub mod cooldown;
pub mod engine;
pub mod geometry;
pub mod live;
pub mod locks;
pub mod observers;
pub mod state;
pub mod world;

pub use connection::Pairing;
pub use context::WorldContext;
pub use cooldown::{Clock, CooldownTracker, SystemClock};
pub use engine::{Delivery, LiveView, TransitHistory, TransportEngine};
pub use geometry::{beam_candidates, catches_beam, distance_to_segment};
pub use live::LiveTransporter;
pub use observers::{ObserverRegistry, SubscriptionId, TransitObserver};
pub use state::CoverageTransition;
pub use world::{BlockEntityHandle, HeadlessWorld, WorldHost};
