//! Single-slot on-disk cache for remote prerolls.
//!
//! Layout: `<cache_root>/prerolls/<clip>-<resolution>.mp4`. At most one clip is
//! kept; filling the slot clears the directory first. Downloads land in a
//! temporary file next to the target and are renamed into place only once
//! complete, so a failed transfer never leaves a truncated clip behind.

use std::{
    fs,
    io::{self, Seek, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};

use log::{debug, info};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::{
    error::{FetchError, PrerollError},
    fetcher::ClipSource,
    retry::RetryPolicy,
};

pub const CACHE_DIR_NAME: &str = "prerolls";

pub struct CacheStore<S> {
    dir: PathBuf,
    source: Arc<S>,
    retry: RetryPolicy,
    // Held for the whole miss path so only one fill runs at a time.
    fill_lock: Mutex<()>,
}

impl<S: ClipSource> CacheStore<S> {
    pub fn new(cache_root: &Path, source: S) -> Self {
        Self {
            dir: cache_root.join(CACHE_DIR_NAME),
            source: Arc::new(source),
            retry: RetryPolicy::default(),
            fill_lock: Mutex::new(()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn preroll_path(&self, clip: u64, resolution: u32) -> PathBuf {
        self.dir.join(format!("{clip}-{resolution}.mp4"))
    }

    /// Returns the canonical path for `clip`, downloading it first on a miss.
    /// Callers that queue behind an in-flight fill for the same clip get the
    /// freshly written file without fetching again.
    pub async fn ensure_cached(&self, clip: u64, resolution: u32) -> Result<PathBuf, PrerollError> {
        let target = self.preroll_path(clip, resolution);
        if target.is_file() {
            return Ok(target);
        }

        let _guard = self.fill_lock.lock().await;
        if target.is_file() {
            debug!("{} was filled while waiting", target.display());
            return Ok(target);
        }

        let source = Arc::clone(&self.source);
        let retry = self.retry;
        let dir = self.dir.clone();
        let dest = target.clone();
        tokio::task::spawn_blocking(move || fill(source.as_ref(), &retry, &dir, clip, resolution, &dest))
            .await
            .map_err(|err| PrerollError::Cache(io::Error::other(err)))??;
        Ok(target)
    }
}

fn fill<S: ClipSource + ?Sized>(
    source: &S,
    retry: &RetryPolicy,
    dir: &Path,
    clip: u64,
    resolution: u32,
    dest: &Path,
) -> Result<(), PrerollError> {
    let manifest = retry.run(&format!("resolving clip {clip}"), || {
        source.resolve_stream(clip)
    })?;
    let stream = manifest
        .best_stream(resolution)
        .ok_or(FetchError::NoStreams { clip })?;
    info!(
        "Caching clip {clip} '{}' using the {}p stream",
        manifest.title, stream.height
    );

    fs::create_dir_all(dir).map_err(PrerollError::Cache)?;
    clear_dir(dir).map_err(PrerollError::Cache)?;

    let mut staging = NamedTempFile::new_in(dir).map_err(PrerollError::Cache)?;
    let bytes = retry.run(&format!("downloading clip {clip}"), || {
        let file = staging.as_file_mut();
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        source.download(&stream.url, file)
    })?;
    staging.as_file().sync_all().map_err(PrerollError::Cache)?;
    staging
        .persist(dest)
        .map_err(|err| PrerollError::Cache(err.error))?;

    info!("Cached {bytes} bytes at {}", dest.display());
    Ok(())
}

fn clear_dir(dir: &Path) -> io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            debug!("Evicting {}", entry.path().display());
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}
