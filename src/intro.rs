//! Entry point the host calls when an item is about to play.

use std::sync::Arc;

use crate::{
    catalog::Catalog,
    fetcher::ClipSource,
    selector::{IntroInfo, PrerollSelector},
    settings::{GenreConfig, PluginConfiguration},
};

pub struct IntroProvider<C, S> {
    selector: Arc<PrerollSelector<C, S>>,
}

impl<C: Catalog, S: ClipSource> IntroProvider<C, S> {
    pub fn new(selector: Arc<PrerollSelector<C, S>>) -> Self {
        Self { selector }
    }

    /// Intros for an item tagged with `item_genres`.
    pub async fn intros(&self, item_genres: &[String]) -> Vec<IntroInfo> {
        let config = self.selector.settings().snapshot();
        let genres = genre_candidates(&config, item_genres);
        self.selector.get(genres.as_deref()).await
    }
}

/// Genre overrides that apply to an item: enabled, matching one of the item's
/// genres and carrying a local source. `None` when nothing applies, which
/// sends selection to the global sources.
pub fn genre_candidates(
    config: &PluginConfiguration,
    item_genres: &[String],
) -> Option<Vec<GenreConfig>> {
    if !config.use_genres || config.genres.is_empty() || item_genres.is_empty() {
        return None;
    }

    let matched: Vec<GenreConfig> = config
        .genres
        .iter()
        .filter(|genre| item_genres.contains(&genre.name) && genre.local_source().is_some())
        .cloned()
        .collect();
    (!matched.is_empty()).then_some(matched)
}
