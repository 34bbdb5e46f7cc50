//! Decides which clip plays before an item and registers it in the catalog.
//!
//! Sources are tried in order: a genre-specific local source, the global local
//! source, then a remote clip served through the cache. Whatever path wins is
//! registered as a virtual catalog video so the host can play it by id.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{error, info, warn};
use parking_lot::Mutex;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    cache::CacheStore,
    catalog::{Catalog, CatalogItem, DeleteOptions, PROVIDER_KEY},
    error::PrerollError,
    fetcher::ClipSource,
    local::resolve_local,
    settings::{GenreConfig, PluginConfiguration, SettingsHandle},
};

/// Clips picked from when `random` is enabled.
pub const BUILTIN_CLIPS: [u64; 39] = [
    459725398, 440978154, 440793415, 440978850, 462141918, 442118203, 456990827, 442744420,
    459723868, 464974136, 464989433, 443076423, 443381251, 484072189, 483691239, 483129067,
    483129129, 442179153, 443404430, 443082153, 443076524, 443076432, 443081703, 443076518,
    441615803, 443076406, 443076410, 443081835, 443081756, 443404417, 443081683, 443076427,
    443404395, 443081932, 440785270, 440791181, 443125346, 443076495, 445012069,
];

/// A resolved preroll: the catalog item to play and the file behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IntroInfo {
    pub item_id: Uuid,
    pub path: PathBuf,
}

pub struct PrerollSelector<C, S> {
    catalog: Arc<C>,
    settings: Arc<SettingsHandle>,
    cache: Arc<CacheStore<S>>,
    rng: Mutex<StdRng>,
    // Lookup and create must not interleave, or two callers can both miss
    // and register the same file twice.
    register_lock: tokio::sync::Mutex<()>,
}

impl<C: Catalog, S: ClipSource> PrerollSelector<C, S> {
    pub fn new(catalog: Arc<C>, settings: Arc<SettingsHandle>, cache: Arc<CacheStore<S>>) -> Self {
        Self {
            catalog,
            settings,
            cache,
            rng: Mutex::new(StdRng::from_entropy()),
            register_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replaces the entropy-seeded generator with a reproducible one.
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Zero or one intro. Failures are logged and yield an empty list; a
    /// missing preroll never blocks playback.
    pub async fn get(&self, genre_configs: Option<&[GenreConfig]>) -> Vec<IntroInfo> {
        match self.resolve(genre_configs).await {
            Ok(intro) => vec![intro],
            Err(err) => {
                error!("{err}");
                Vec::new()
            }
        }
    }

    pub async fn resolve(
        &self,
        genre_configs: Option<&[GenreConfig]>,
    ) -> Result<IntroInfo, PrerollError> {
        let config = self.settings.snapshot();

        let path = match genre_configs.filter(|configs| !configs.is_empty()) {
            Some(configs) => self.genre_source(configs)?,
            None => match config.local_path() {
                Some(local) => self.local_source(local)?,
                None => self.remote_source(&config).await?,
            },
        };

        if !path.exists() {
            return Err(PrerollError::MissingFile(path));
        }

        let item_id = self.register(&path).await?;
        Ok(IntroInfo { item_id, path })
    }

    fn genre_source(&self, configs: &[GenreConfig]) -> Result<PathBuf, PrerollError> {
        if let Some(invalid) = configs.iter().find(|genre| genre.local_source().is_none()) {
            return Err(PrerollError::InvalidGenreConfig {
                name: invalid.name.clone(),
            });
        }

        let mut rng = self.rng.lock();
        let genre = configs.choose(&mut *rng).ok_or(PrerollError::NoSource)?;
        let source = genre
            .local_source()
            .ok_or_else(|| PrerollError::InvalidGenreConfig {
                name: genre.name.clone(),
            })?;
        resolve_local(source, &mut *rng)
    }

    fn local_source(&self, source: &Path) -> Result<PathBuf, PrerollError> {
        let mut rng = self.rng.lock();
        resolve_local(source, &mut *rng)
    }

    async fn remote_source(&self, config: &PluginConfiguration) -> Result<PathBuf, PrerollError> {
        let clip = self.choose_clip(config).ok_or(PrerollError::NoSource)?;
        self.cache.ensure_cached(clip, config.resolution).await
    }

    /// Configured ids first, then the built-in pool, then the default clip.
    fn choose_clip(&self, config: &PluginConfiguration) -> Option<u64> {
        let mut rng = self.rng.lock();

        let configured: Vec<u64> = config
            .vimeo_entries()
            .into_iter()
            .filter_map(|entry| match entry.parse::<u64>() {
                Ok(id) if id > 0 => Some(id),
                _ => {
                    warn!("Ignoring invalid Vimeo id '{entry}'");
                    None
                }
            })
            .collect();
        if let Some(id) = configured.choose(&mut *rng) {
            return Some(*id);
        }

        if config.random {
            return BUILTIN_CLIPS.choose(&mut *rng).copied();
        }

        (config.preroll != 0).then_some(config.preroll)
    }

    /// Finds or creates the catalog entry for `path`, keyed by file name. An
    /// entry whose file is gone, or that points elsewhere, is dropped from the
    /// catalog (the file itself is left alone) and replaced.
    pub async fn register(&self, path: &Path) -> Result<Uuid, PrerollError> {
        let _guard = self.register_lock.lock().await;
        let file_name = path
            .file_name()
            .unwrap_or(path.as_os_str())
            .to_string_lossy()
            .into_owned();

        let existing = self
            .catalog
            .find_items_by_provider_tag(PROVIDER_KEY, &file_name)
            .await
            .map_err(PrerollError::Catalog)?;

        if let Some(item) = existing.into_iter().next() {
            if item.path == path && path.exists() {
                return Ok(item.id);
            }
            if item.path.exists() {
                info!(
                    "Preroll '{file_name}' moved from {} to {}",
                    item.path.display(),
                    path.display()
                );
            } else {
                error!(
                    "File '{}' for database preroll does not exist.",
                    item.path.display()
                );
            }
            self.catalog
                .delete_item(&item, DeleteOptions { delete_file: false })
                .await
                .map_err(PrerollError::Catalog)?;
        }

        let item = CatalogItem::preroll(path, &file_name);
        self.catalog
            .create_item(&item)
            .await
            .map_err(PrerollError::Catalog)?;
        info!("Registered preroll {} as {}", path.display(), item.id);
        Ok(item.id)
    }
}
