#![forbid(unsafe_code)]

//! Runtime locations for the preroll tools: where clips are cached, where the
//! plugin configuration lives and which catalog database to open.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_CACHE_ROOT: &str = "cache";
pub const DEFAULT_CONFIG_PATH: &str = "prerolls.json";
pub const DEFAULT_CATALOG_DB: &str = "catalog.db";

const CACHE_ROOT_KEY: &str = "PREROLLS_CACHE_ROOT";
const CONFIG_PATH_KEY: &str = "PREROLLS_CONFIG";
const CATALOG_DB_KEY: &str = "PREROLLS_CATALOG_DB";

#[derive(Debug, Clone)]
pub struct RuntimePaths {
    /// Parent of the `prerolls/` cache directory.
    pub cache_root: PathBuf,
    pub config_path: PathBuf,
    pub catalog_db: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub cache_root: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
    pub catalog_db: Option<PathBuf>,
    pub env_path: Option<PathBuf>,
}

/// Precedence per value: explicit override, process environment, `.env`
/// file, built-in default.
pub fn resolve_runtime_paths(overrides: RuntimeOverrides) -> Result<RuntimePaths> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    Ok(build_runtime_paths(&file_vars, env_var_string, overrides))
}

fn build_runtime_paths(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> RuntimePaths {
    let pick = |value: Option<PathBuf>, key: &str, default: &str| {
        value
            .filter(|path| !path.as_os_str().is_empty())
            .or_else(|| lookup_value(key, file_vars, &env_lookup).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(default))
    };

    RuntimePaths {
        cache_root: pick(overrides.cache_root, CACHE_ROOT_KEY, DEFAULT_CACHE_ROOT),
        config_path: pick(overrides.config_path, CONFIG_PATH_KEY, DEFAULT_CONFIG_PATH),
        catalog_db: pick(overrides.catalog_db, CATALOG_DB_KEY, DEFAULT_CATALOG_DB),
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok().and_then(non_blank)
}

fn non_blank(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

/// Parses a dotenv-style file. A missing file yields no variables.
pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = unquote(value_raw.trim());
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|value| value.strip_suffix('"'))
        .or_else(|| {
            value
                .strip_prefix('\'')
                .and_then(|value| value.strip_suffix('\''))
        })
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_env(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let paths = build_runtime_paths(&HashMap::new(), |_| None, RuntimeOverrides::default());
        assert_eq!(paths.cache_root, PathBuf::from(DEFAULT_CACHE_ROOT));
        assert_eq!(paths.config_path, PathBuf::from(DEFAULT_CONFIG_PATH));
        assert_eq!(paths.catalog_db, PathBuf::from(DEFAULT_CATALOG_DB));
    }

    #[test]
    fn env_file_values_are_used() {
        let env = make_env(
            "PREROLLS_CACHE_ROOT=\"/var/cache/jf\"\nexport PREROLLS_CONFIG='/etc/prerolls.json'\n",
        );
        let vars = read_env_file(env.path()).unwrap();
        let paths = build_runtime_paths(&vars, |_| None, RuntimeOverrides::default());
        assert_eq!(paths.cache_root, PathBuf::from("/var/cache/jf"));
        assert_eq!(paths.config_path, PathBuf::from("/etc/prerolls.json"));
        assert_eq!(paths.catalog_db, PathBuf::from(DEFAULT_CATALOG_DB));
    }

    #[test]
    fn process_env_beats_file_and_override_beats_both() {
        let env = make_env("PREROLLS_CACHE_ROOT=/file\nPREROLLS_CATALOG_DB=/file.db\n");
        let vars = read_env_file(env.path()).unwrap();
        let paths = build_runtime_paths(
            &vars,
            |key| match key {
                "PREROLLS_CACHE_ROOT" => Some("/env".to_string()),
                "PREROLLS_CATALOG_DB" => Some("/env.db".to_string()),
                _ => None,
            },
            RuntimeOverrides {
                catalog_db: Some(PathBuf::from("/override.db")),
                ..RuntimeOverrides::default()
            },
        );
        assert_eq!(paths.cache_root, PathBuf::from("/env"));
        assert_eq!(paths.catalog_db, PathBuf::from("/override.db"));
    }

    #[test]
    fn read_env_file_skips_comments_and_junk() {
        let env = make_env(
            r#"
            # comment
            PREROLLS_CONFIG = "/x.json"
            NOT_A_PAIR
            =orphan
            "#,
        );
        let vars = read_env_file(env.path()).unwrap();
        assert_eq!(vars.len(), 1);
        assert_eq!(vars.get("PREROLLS_CONFIG").unwrap(), "/x.json");
    }

    #[test]
    fn blank_file_values_fall_back_to_default() {
        let env = make_env("PREROLLS_CACHE_ROOT=\"  \"\n");
        let vars = read_env_file(env.path()).unwrap();
        let paths = build_runtime_paths(&vars, |_| None, RuntimeOverrides::default());
        assert_eq!(paths.cache_root, PathBuf::from(DEFAULT_CACHE_ROOT));
    }

    #[test]
    fn missing_env_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
