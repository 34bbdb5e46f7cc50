//! The persisted plugin configuration record.
//!
//! The record is always written as a whole. [`SettingsHandle`] keeps the
//! in-memory copy and the on-disk copy in step: readers get a cloned snapshot,
//! writers hold the write lock for the entire save so no reader can observe a
//! half-applied update.

use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Default remote clip shown when nothing else is configured.
pub const DEFAULT_PREROLL: u64 = 443404335;
pub const DEFAULT_RESOLUTION: u32 = 1080;

/// Per-genre override. `name` matches catalog genre names exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenreConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_source: Option<PathBuf>,
}

impl GenreConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            local_source: None,
        }
    }

    pub fn with_local_source(name: impl Into<String>, source: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            local_source: Some(source.into()),
        }
    }

    /// The configured source, ignoring blank values left behind by a form.
    pub fn local_source(&self) -> Option<&Path> {
        self.local_source
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PluginConfiguration {
    /// Global fallback file or directory; empty means unset.
    pub local: String,
    /// Comma-separated remote clip ids; empty means unset.
    pub vimeo_ids: String,
    /// Default remote clip id; `0` disables the default.
    pub preroll: u64,
    pub resolution: u32,
    pub random: bool,
    pub use_genres: bool,
    pub genres: Vec<GenreConfig>,
}

impl Default for PluginConfiguration {
    fn default() -> Self {
        Self {
            local: String::new(),
            vimeo_ids: String::new(),
            preroll: DEFAULT_PREROLL,
            resolution: DEFAULT_RESOLUTION,
            random: false,
            use_genres: false,
            genres: Vec::new(),
        }
    }
}

impl PluginConfiguration {
    pub fn local_path(&self) -> Option<&Path> {
        let trimmed = self.local.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Path::new(trimmed))
        }
    }

    /// Raw entries of `vimeo_ids`, trimmed, blanks dropped. Parsing into ids is
    /// left to the caller so it can report bad entries.
    pub fn vimeo_entries(&self) -> Vec<&str> {
        self.vimeo_ids
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .collect()
    }
}

/// Persistence for the configuration record. No partial updates.
pub trait ConfigStore: Send + Sync {
    fn load(&self) -> Result<PluginConfiguration>;
    fn save_whole(&self, config: &PluginConfiguration) -> Result<()>;
}

/// Stores the record as pretty JSON, replaced atomically on every save.
#[derive(Debug, Clone)]
pub struct JsonConfigStore {
    path: PathBuf,
}

impl JsonConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigStore for JsonConfigStore {
    fn load(&self) -> Result<PluginConfiguration> {
        if !self.path.exists() {
            debug!(
                "No configuration at {}; using defaults",
                self.path.display()
            );
            return Ok(PluginConfiguration::default());
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", self.path.display()))
    }

    fn save_whole(&self, config: &PluginConfiguration) -> Result<()> {
        write_json_atomic(&self.path, config)
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("creating {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("tmp");
    let payload = serde_json::to_vec_pretty(value)?;
    fs::write(&tmp_path, payload).with_context(|| format!("writing {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

/// Shared, injectable access to the configuration record.
pub struct SettingsHandle {
    store: Box<dyn ConfigStore>,
    current: RwLock<PluginConfiguration>,
}

impl SettingsHandle {
    /// Loads the record once; later reads are served from memory.
    pub fn open(store: impl ConfigStore + 'static) -> Result<Self> {
        let current = store.load()?;
        Ok(Self {
            store: Box::new(store),
            current: RwLock::new(current),
        })
    }

    pub fn snapshot(&self) -> PluginConfiguration {
        self.current.read().clone()
    }

    /// Applies `edit` to a copy of the record. When it returns `Some`, the copy
    /// is saved in full and only then becomes current; `None` means nothing
    /// changed and nothing is written.
    pub fn update_with<T>(
        &self,
        edit: impl FnOnce(&mut PluginConfiguration) -> Option<T>,
    ) -> Result<Option<T>> {
        let mut current = self.current.write();
        let mut next = current.clone();
        let Some(outcome) = edit(&mut next) else {
            return Ok(None);
        };
        self.store.save_whole(&next)?;
        *current = next;
        Ok(Some(outcome))
    }
}
