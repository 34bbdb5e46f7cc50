use env_logger::{Env, Target};
use log::info;

use crate::{config::RuntimePaths, settings::PluginConfiguration};

/// Logs go to stderr so stdout stays clean for command output. `RUST_LOG`
/// overrides the default `info` filter. Safe to call more than once.
pub fn init() {
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .target(Target::Stderr)
        .try_init();
}

pub fn log_runtime_paths(paths: &RuntimePaths) {
    info!("Cache root: {}", paths.cache_root.display());
    info!("Configuration: {}", paths.config_path.display());
    info!("Catalog database: {}", paths.catalog_db.display());
}

pub fn log_configuration(config: &PluginConfiguration) {
    for line in describe_configuration(config) {
        info!("  {line}");
    }
}

fn describe_configuration(config: &PluginConfiguration) -> Vec<String> {
    let configured_genres = config
        .genres
        .iter()
        .filter(|genre| genre.local_source().is_some())
        .count();
    vec![
        format!("local = {}", display_or_unset(&config.local)),
        format!("vimeo ids = {}", display_or_unset(&config.vimeo_ids)),
        match config.preroll {
            0 => "default clip = <unset>".to_string(),
            id => format!("default clip = {id}"),
        },
        format!("resolution = {}p", config.resolution),
        format!("random = {}", config.random),
        format!(
            "genres = {} known, {configured_genres} with a source{}",
            config.genres.len(),
            if config.use_genres { "" } else { " (disabled)" }
        ),
    ]
}

fn display_or_unset(value: &str) -> &str {
    let trimmed = value.trim();
    if trimmed.is_empty() { "<unset>" } else { trimmed }
}
