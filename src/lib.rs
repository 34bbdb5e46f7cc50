#![forbid(unsafe_code)]

//! Preroll selection, caching and genre bookkeeping for a media library.

pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod intro;
pub mod local;
pub mod logging;
pub mod registry;
pub mod retry;
pub mod selector;
pub mod settings;

pub use catalog::{Catalog, CatalogItem, CatalogStore, DeleteOptions, GenreFilter, PROVIDER_KEY};
pub use error::{FetchError, PrerollError};
pub use selector::{IntroInfo, PrerollSelector};
pub use settings::{GenreConfig, PluginConfiguration, SettingsHandle};
