#![forbid(unsafe_code)]

//! Command-line front end: refresh the genre list, pick an intro for an item,
//! pre-fill the clip cache or seed the catalog.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use log::info;
use prerolls_tools::{
    CatalogItem, CatalogStore, PrerollSelector, SettingsHandle,
    cache::CacheStore,
    catalog::ItemKind,
    config::{RuntimeOverrides, RuntimePaths, resolve_runtime_paths},
    fetcher::{REQUEST_TIMEOUT, VimeoFetcher},
    intro::IntroProvider,
    logging,
    registry::GenreRegistry,
    settings::{DEFAULT_RESOLUTION, JsonConfigStore},
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Preroll selection and caching", long_about = None)]
struct Cli {
    /// Directory holding the `prerolls/` clip cache
    #[arg(long, global = true)]
    cache_root: Option<PathBuf>,

    /// Plugin configuration JSON file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Catalog database file
    #[arg(long, global = true)]
    catalog_db: Option<PathBuf>,

    /// `.env` file consulted for unset paths
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Per-request timeout for remote fetches, in seconds
    #[arg(long, global = true, default_value_t = REQUEST_TIMEOUT.as_secs())]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Append newly seen library genres to the configuration
    UpdateGenres,
    /// Pick the intro for an item with the given genres and print it as JSON
    Intro {
        #[arg(long = "genre")]
        genres: Vec<String>,
    },
    /// Download a remote clip into the cache
    Cache {
        id: u64,
        #[arg(long, default_value_t = DEFAULT_RESOLUTION)]
        resolution: u32,
    },
    /// Add a movie or series to the catalog
    AddMedia {
        #[arg(long, value_enum)]
        kind: MediaKind,
        #[arg(long)]
        name: String,
        path: PathBuf,
        #[arg(long = "genre")]
        genres: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum MediaKind {
    Movie,
    Series,
}

impl From<MediaKind> for ItemKind {
    fn from(kind: MediaKind) -> Self {
        match kind {
            MediaKind::Movie => ItemKind::Movie,
            MediaKind::Series => ItemKind::Series,
        }
    }
}

impl Cli {
    fn overrides(&self) -> RuntimeOverrides {
        RuntimeOverrides {
            cache_root: self.cache_root.clone(),
            config_path: self.config.clone(),
            catalog_db: self.catalog_db.clone(),
            env_path: self.env_file.clone(),
        }
    }
}

struct Engine {
    catalog: Arc<CatalogStore>,
    settings: Arc<SettingsHandle>,
    cache: Arc<CacheStore<VimeoFetcher>>,
}

impl Engine {
    async fn open(paths: &RuntimePaths, timeout: Duration) -> Result<Self> {
        let settings = SettingsHandle::open(JsonConfigStore::new(&paths.config_path))
            .with_context(|| format!("loading {}", paths.config_path.display()))?;
        let catalog = CatalogStore::open(&paths.catalog_db)
            .await
            .with_context(|| format!("opening catalog {}", paths.catalog_db.display()))?;
        let fetcher = VimeoFetcher::default().with_timeout(timeout);
        Ok(Self {
            catalog: Arc::new(catalog),
            settings: Arc::new(settings),
            cache: Arc::new(CacheStore::new(&paths.cache_root, fetcher)),
        })
    }

    fn selector(&self) -> PrerollSelector<CatalogStore, VimeoFetcher> {
        PrerollSelector::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.settings),
            Arc::clone(&self.cache),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();
    let cli = Cli::parse();

    let paths = resolve_runtime_paths(cli.overrides())?;
    logging::log_runtime_paths(&paths);
    let engine = Engine::open(&paths, Duration::from_secs(cli.timeout)).await?;

    match cli.command {
        Command::UpdateGenres => {
            let registry = GenreRegistry::new(
                Arc::clone(&engine.catalog),
                Arc::clone(&engine.settings),
            );
            let update = registry.update_genres().await?;
            println!(
                "{} genre(s) added, {} configured",
                update.added.len(),
                update.total
            );
        }
        Command::Intro { genres } => {
            logging::log_configuration(&engine.settings.snapshot());
            let provider = IntroProvider::new(Arc::new(engine.selector()));
            let intros = provider.intros(&genres).await;
            let rendered =
                serde_json::to_string_pretty(&intros).context("serializing intro list")?;
            println!("{rendered}");
        }
        Command::Cache { id, resolution } => {
            let path = engine.cache.ensure_cached(id, resolution).await?;
            println!("{}", path.display());
        }
        Command::AddMedia {
            kind,
            name,
            path,
            genres,
        } => {
            let genre_refs: Vec<&str> = genres.iter().map(String::as_str).collect();
            let item = CatalogItem::media(kind.into(), &name, &path, &genre_refs);
            engine.catalog.upsert_media(&item).await?;
            info!("Added {} '{}' as {}", item.kind.as_str(), name, item.id);
            println!("{}", item.id);
        }
    }

    Ok(())
}
