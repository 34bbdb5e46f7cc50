//! Keeps the configured genre list in step with the library.
//!
//! Genres are only ever appended. Entries the user already configured, and
//! their local sources, are never touched, even when a genre disappears from
//! the library.

use std::{collections::HashSet, sync::Arc};

use anyhow::{Context, Result};
use log::{debug, info};

use crate::{
    catalog::{Catalog, GenreFilter},
    settings::{GenreConfig, SettingsHandle},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreUpdate {
    pub added: Vec<String>,
    pub total: usize,
}

pub struct GenreRegistry<C> {
    catalog: Arc<C>,
    settings: Arc<SettingsHandle>,
}

impl<C: Catalog> GenreRegistry<C> {
    pub fn new(catalog: Arc<C>, settings: Arc<SettingsHandle>) -> Self {
        Self { catalog, settings }
    }

    /// Adds any movie or series genre not yet configured and saves the whole
    /// configuration. Writes nothing when every genre is already known.
    pub async fn update_genres(&self) -> Result<GenreUpdate> {
        let movies = self
            .catalog
            .query_genres(GenreFilter::Movies)
            .await
            .context("querying movie genres")?;
        let series = self
            .catalog
            .query_genres(GenreFilter::Series)
            .await
            .context("querying series genres")?;

        let movie_names: Vec<String> = movies.into_iter().map(|genre| genre.name).collect();
        let series_names: Vec<String> = series.into_iter().map(|genre| genre.name).collect();
        let observed = union_genres(&movie_names, &series_names);

        // The save is blocking file I/O done under the settings write lock.
        let settings = Arc::clone(&self.settings);
        let saved = tokio::task::spawn_blocking(move || {
            settings.update_with(|config| {
                let added = new_genres(&config.genres, &observed);
                if added.is_empty() {
                    return None;
                }
                config
                    .genres
                    .extend(added.iter().map(|name| GenreConfig::new(name.as_str())));
                Some(GenreUpdate {
                    added,
                    total: config.genres.len(),
                })
            })
        })
        .await
        .context("genre update task failed")??;

        match saved {
            Some(update) => {
                info!(
                    "Added {} new genre(s): {}",
                    update.added.len(),
                    update.added.join(", ")
                );
                Ok(update)
            }
            None => {
                let total = self.settings.snapshot().genres.len();
                debug!("Genre list already up to date ({total} genres)");
                Ok(GenreUpdate {
                    added: Vec::new(),
                    total,
                })
            }
        }
    }
}

/// Genres shared by movies and series come first (in movie order), then
/// movie-only, then series-only. Repeats collapse to the first occurrence.
pub fn union_genres(movies: &[String], series: &[String]) -> Vec<String> {
    let movie_set: HashSet<&str> = movies.iter().map(String::as_str).collect();
    let series_set: HashSet<&str> = series.iter().map(String::as_str).collect();

    let common = movies
        .iter()
        .filter(|name| series_set.contains(name.as_str()));
    let movie_only = movies
        .iter()
        .filter(|name| !series_set.contains(name.as_str()));
    let series_only = series
        .iter()
        .filter(|name| !movie_set.contains(name.as_str()));

    let mut seen = HashSet::new();
    common
        .chain(movie_only)
        .chain(series_only)
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

/// Observed names that have no configured entry yet, in observed order.
pub fn new_genres(existing: &[GenreConfig], observed: &[String]) -> Vec<String> {
    let known: HashSet<&str> = existing.iter().map(|genre| genre.name.as_str()).collect();
    observed
        .iter()
        .filter(|name| !known.contains(name.as_str()))
        .cloned()
        .collect()
}
