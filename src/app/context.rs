use std::path::PathBuf;
use std::sync::Arc;

use crate::app::error::{EstuaryError, Result};
use crate::assets::AssetCache;
use crate::config::Config;
use crate::events::ChangeNotifier;
use crate::fetcher::http_fetcher::HttpFetcher;
use crate::fetcher::Fetcher;
use crate::normalizer::Normalizer;
use crate::readability::{spawn_background_enricher, EnricherHandle};
use crate::store::sqlite::SqliteStore;

/// Composition root: owns every long-lived component and the process-wide
/// lifecycle. Must be constructed inside a tokio runtime (the background
/// enricher is spawned here).
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub fetcher: Arc<dyn Fetcher + Send + Sync>,
    pub normalizer: Normalizer,
    pub assets: Arc<AssetCache>,
    pub notifier: ChangeNotifier,
    pub enricher: Option<EnricherHandle>,
}

impl AppContext {
    pub fn new(config: Config, db_path: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };
        let store = Arc::new(SqliteStore::new(&db_path)?);
        let assets = Arc::new(AssetCache::new(Self::default_asset_dir()?)?);
        Self::assemble(config, store, assets)
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let dir = std::env::temp_dir().join("estuary-assets");
        let assets = Arc::new(AssetCache::new(dir)?);
        Self::assemble(config, store, assets)
    }

    fn assemble(
        config: Config,
        store: Arc<SqliteStore>,
        assets: Arc<AssetCache>,
    ) -> Result<Self> {
        let fetcher: Arc<dyn Fetcher + Send + Sync> = Arc::new(HttpFetcher::new(
            &config.transport.to_transport_config(),
        ));

        let enricher = config.enrichment.enabled.then(|| {
            spawn_background_enricher(fetcher.clone(), store.clone(), assets.clone())
        });

        Ok(Self {
            config,
            store,
            fetcher,
            normalizer: Normalizer::new(),
            assets,
            notifier: ChangeNotifier::new(),
            enricher,
        })
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| EstuaryError::Config("Could not find data directory".into()))?;
        let estuary_dir = data_dir.join("estuary");
        std::fs::create_dir_all(&estuary_dir)?;
        Ok(estuary_dir.join("estuary.db"))
    }

    fn default_asset_dir() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| EstuaryError::Config("Could not find data directory".into()))?;
        Ok(data_dir.join("estuary").join("assets"))
    }
}
