//! Shared application wiring for CLI commands.

use anyhow::Context;
use engram_core::entity::EntityResolver;
use engram_core::hot::HotTierRecorder;
use engram_core::store::MemoryStore;
use engram_core::transition::{TransitionConfig, TransitionManager};
use engram_core::warm::WarmTierRecorder;
use engram_core::Config;
use std::sync::Arc;

/// One wired-up engine instance over the configured store.
///
/// The backing store is in-process; the document-store contract keeps an
/// external database backend swappable without touching the recorders.
pub struct App {
    pub config: Config,
    pub store: Arc<MemoryStore>,
    pub resolver: Arc<EntityResolver>,
    pub hot: Arc<HotTierRecorder>,
    pub warm: Arc<WarmTierRecorder>,
}

impl App {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let store = Arc::new(MemoryStore::new());
        let store_dyn: Arc<dyn engram_core::DocumentStore> = store.clone();

        // Resolver and recorder setup failures are fatal: a half-wired
        // pipeline silently corrupts the data model.
        let resolver =
            Arc::new(EntityResolver::new(store_dyn.clone()).context("entity resolver setup")?);
        let hot = Arc::new(
            HotTierRecorder::new(store_dyn.clone(), resolver.clone(), config.tiers.hot_ttl_days)
                .context("hot tier setup")?,
        );
        let warm = Arc::new(
            WarmTierRecorder::new(
                store_dyn,
                resolver.clone(),
                config.tiers.warm_ttl_days,
                config.tiers.aggregation_window_hours,
            )
            .context("warm tier setup")?,
        );

        Ok(App {
            config,
            store,
            resolver,
            hot,
            warm,
        })
    }

    /// Build a transition manager from the loaded configuration.
    pub fn transition_manager(&self, snapshots: bool) -> anyhow::Result<TransitionManager> {
        let snapshot_dir = if snapshots || self.config.tiers.snapshots {
            Some(self.config.snapshot_dir()?)
        } else {
            None
        };

        let mut tiers = self.config.tiers.clone();
        tiers.snapshots = snapshot_dir.is_some();

        Ok(TransitionManager::new(
            self.hot.clone(),
            self.warm.clone(),
            TransitionConfig::from_tier_config(&tiers, snapshot_dir),
        ))
    }

    /// Cursor file location for this collector instance.
    pub fn cursor_path(&self) -> anyhow::Result<std::path::PathBuf> {
        Ok(self.config.data_dir()?.join("cursor.json"))
    }
}
