//! Everything the engine needs from one loaded world, built once at load.

use crate::cooldown::{Clock, SystemClock};
use crate::world::WorldHost;
use std::sync::Arc;
use tracing::info;
use warpline_core::{ItemCodec, JsonItemCodec, StorageError, WarplineConfig, WarplineResult};
use warpline_storage::{LmdbStorage, WarplineStorage};

/// Handles to the store, the host world and the ambient services.
#[derive(Clone)]
pub struct WorldContext {
    pub storage: Arc<dyn WarplineStorage>,
    pub world: Arc<dyn WorldHost>,
    pub codec: Arc<dyn ItemCodec>,
    pub clock: Arc<dyn Clock>,
    pub config: WarplineConfig,
}

impl std::fmt::Debug for WorldContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorldContext")
            .field("clock", &self.clock)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorldContext {
    /// Context with the JSON item codec and the system clock.
    pub fn new(
        storage: Arc<dyn WarplineStorage>,
        world: Arc<dyn WorldHost>,
        config: WarplineConfig,
    ) -> Self {
        Self {
            storage,
            world,
            codec: Arc::new(JsonItemCodec),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    /// Validate `config` and open its LMDB save.
    pub fn open(config: WarplineConfig, world: Arc<dyn WorldHost>) -> WarplineResult<Self> {
        config.validate()?;
        let storage = LmdbStorage::open(&config.store).map_err(StorageError::from)?;
        info!(path = %config.store.path.display(), "World context ready");
        Ok(Self::new(Arc::new(storage), world, config))
    }

    pub fn with_codec(mut self, codec: Arc<dyn ItemCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}
