//! Media catalog access.
//!
//! [`Catalog`] is the narrow capability the preroll engine needs from the
//! host's media library. [`CatalogStore`] implements it on top of a local
//! SQLite-compatible database so the tools can run without a host.

use std::{
    collections::BTreeMap,
    future::Future,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use libsql::{Builder, Connection, Row, params};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Provider key attached to every clip registered by the preroll engine. The
/// value is the clip's file name.
pub const PROVIDER_KEY: &str = "prerolls.video";

/// Which part of the library a genre aggregation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenreFilter {
    Movies,
    Series,
}

impl GenreFilter {
    fn kind(self) -> ItemKind {
        match self {
            GenreFilter::Movies => ItemKind::Movie,
            GenreFilter::Series => ItemKind::Series,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenreCount {
    pub name: String,
    pub item_count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Movie,
    Series,
    Video,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Movie => "movie",
            ItemKind::Series => "series",
            ItemKind::Video => "video",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "movie" => Some(ItemKind::Movie),
            "series" => Some(ItemKind::Series),
            "video" => Some(ItemKind::Video),
            _ => None,
        }
    }
}

/// A library record. Preroll clips are virtual `Video` items so the host does
/// not surface them as newly added media.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    pub id: Uuid,
    pub path: PathBuf,
    pub name: String,
    pub kind: ItemKind,
    pub is_virtual: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub provider_ids: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl CatalogItem {
    /// Builds the entity that represents a preroll clip on disk, tagged so it
    /// can be found again by file name.
    pub fn preroll(path: &Path, file_name: &str) -> Self {
        let id = Uuid::new_v4();
        let mut provider_ids = BTreeMap::new();
        provider_ids.insert(PROVIDER_KEY.to_string(), file_name.to_string());
        Self {
            id,
            path: path.to_path_buf(),
            name: format!("preroll-{id}"),
            kind: ItemKind::Video,
            is_virtual: true,
            tags: vec![PROVIDER_KEY.to_string()],
            genres: Vec::new(),
            provider_ids,
            created_at: Utc::now(),
        }
    }

    /// A regular library entry, used when importing or seeding a catalog.
    pub fn media(kind: ItemKind, name: &str, path: &Path, genres: &[&str]) -> Self {
        Self {
            id: Uuid::new_v4(),
            path: path.to_path_buf(),
            name: name.to_string(),
            kind,
            is_virtual: false,
            tags: Vec::new(),
            genres: genres.iter().map(|genre| genre.to_string()).collect(),
            provider_ids: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Also remove the backing file. Preroll clean-up never sets this.
    pub delete_file: bool,
}

/// What the preroll engine may ask of the media library, and nothing more.
pub trait Catalog: Send + Sync {
    fn query_genres(
        &self,
        filter: GenreFilter,
    ) -> impl Future<Output = Result<Vec<GenreCount>>> + Send;

    fn find_items_by_provider_tag(
        &self,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<Vec<CatalogItem>>> + Send;

    fn create_item(&self, item: &CatalogItem) -> impl Future<Output = Result<()>> + Send;

    fn delete_item(
        &self,
        item: &CatalogItem,
        options: DeleteOptions,
    ) -> impl Future<Output = Result<()>> + Send;
}

async fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode=WAL;
        PRAGMA synchronous=NORMAL;
        PRAGMA foreign_keys=ON;
        "#,
    )
    .await?;
    Ok(())
}

async fn ensure_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            is_virtual INTEGER NOT NULL DEFAULT 0,
            tags_json TEXT NOT NULL DEFAULT '[]',
            genres_json TEXT NOT NULL DEFAULT '[]',
            provider_ids_json TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS item_genres (
            item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
            genre TEXT NOT NULL,
            PRIMARY KEY (item_id, genre)
        );

        CREATE TABLE IF NOT EXISTS item_providers (
            item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
            key TEXT NOT NULL,
            value TEXT NOT NULL,
            PRIMARY KEY (item_id, key)
        );

        CREATE INDEX IF NOT EXISTS idx_item_providers_lookup ON item_providers(key, value);
        CREATE INDEX IF NOT EXISTS idx_item_genres_genre ON item_genres(genre);
        "#,
    )
    .await?;
    Ok(())
}

/// SQLite-backed catalog.
#[derive(Debug)]
pub struct CatalogStore {
    conn: Connection,
}

impl CatalogStore {
    /// Opens (and if necessary creates) the database and its schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating catalog directory {}", parent.display()))?;
        }

        let db = Builder::new_local(path)
            .build()
            .await
            .with_context(|| format!("opening catalog DB {}", path.display()))?;

        let conn = db.connect()?;
        configure_connection(&conn).await?;
        ensure_schema(&conn).await?;
        Ok(Self { conn })
    }

    /// Inserts or replaces an item together with its genre and provider rows.
    pub async fn upsert_media(&self, item: &CatalogItem) -> Result<()> {
        self.write_item(item, true).await
    }

    async fn write_item(&self, item: &CatalogItem, replace: bool) -> Result<()> {
        let id = item.id.to_string();
        let tags_json = serde_json::to_string(&item.tags).context("serializing tags")?;
        let genres_json = serde_json::to_string(&item.genres).context("serializing genres")?;
        let provider_ids_json =
            serde_json::to_string(&item.provider_ids).context("serializing provider ids")?;
        let verb = if replace {
            "INSERT OR REPLACE"
        } else {
            "INSERT"
        };

        let tx = self.conn.transaction().await?;
        tx.execute(
            &format!(
                r#"
                {verb} INTO items (
                    id, path, name, kind, is_virtual,
                    tags_json, genres_json, provider_ids_json, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#
            ),
            params![
                id.as_str(),
                item.path.to_string_lossy().into_owned(),
                item.name.as_str(),
                item.kind.as_str(),
                item.is_virtual as i64,
                tags_json,
                genres_json,
                provider_ids_json,
                item.created_at.to_rfc3339(),
            ],
        )
        .await?;

        tx.execute("DELETE FROM item_genres WHERE item_id = ?1", params![id.as_str()])
            .await?;
        for genre in &item.genres {
            tx.execute(
                "INSERT OR IGNORE INTO item_genres (item_id, genre) VALUES (?1, ?2)",
                params![id.as_str(), genre.as_str()],
            )
            .await?;
        }

        tx.execute(
            "DELETE FROM item_providers WHERE item_id = ?1",
            params![id.as_str()],
        )
        .await?;
        for (key, value) in &item.provider_ids {
            tx.execute(
                "INSERT INTO item_providers (item_id, key, value) VALUES (?1, ?2, ?3)",
                params![id.as_str(), key.as_str(), value.as_str()],
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_item(&self, id: Uuid) -> Result<Option<CatalogItem>> {
        let stmt = self
            .conn
            .prepare(
                r#"
                SELECT id, path, name, kind, is_virtual,
                       tags_json, genres_json, provider_ids_json, created_at
                FROM items
                WHERE id = ?1
                "#,
            )
            .await?;

        let mut rows = stmt.query([id.to_string()]).await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_item(&row)?)),
            None => Ok(None),
        }
    }
}

impl Catalog for CatalogStore {
    async fn query_genres(&self, filter: GenreFilter) -> Result<Vec<GenreCount>> {
        let stmt = self
            .conn
            .prepare(
                r#"
                SELECT g.genre, COUNT(*)
                FROM item_genres g
                JOIN items i ON i.id = g.item_id
                WHERE i.kind = ?1
                GROUP BY g.genre
                ORDER BY g.genre ASC
                "#,
            )
            .await?;

        let mut rows = stmt.query([filter.kind().as_str()]).await?;
        let mut genres = Vec::new();
        while let Some(row) = rows.next().await? {
            let name: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            genres.push(GenreCount {
                name,
                item_count: u64::try_from(count).unwrap_or_default(),
            });
        }
        Ok(genres)
    }

    async fn find_items_by_provider_tag(&self, key: &str, value: &str) -> Result<Vec<CatalogItem>> {
        let stmt = self
            .conn
            .prepare(
                r#"
                SELECT i.id, i.path, i.name, i.kind, i.is_virtual,
                       i.tags_json, i.genres_json, i.provider_ids_json, i.created_at
                FROM items i
                JOIN item_providers p ON p.item_id = i.id
                WHERE p.key = ?1 AND p.value = ?2
                ORDER BY i.created_at ASC, i.rowid ASC
                "#,
            )
            .await?;

        let mut rows = stmt.query(params![key, value]).await?;
        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(row_to_item(&row)?);
        }
        Ok(items)
    }

    async fn create_item(&self, item: &CatalogItem) -> Result<()> {
        debug!("Creating catalog item {} for {}", item.id, item.path.display());
        self.write_item(item, false).await
    }

    async fn delete_item(&self, item: &CatalogItem, options: DeleteOptions) -> Result<()> {
        let id = item.id.to_string();
        let tx = self.conn.transaction().await?;
        tx.execute("DELETE FROM item_genres WHERE item_id = ?1", params![id.as_str()])
            .await?;
        tx.execute(
            "DELETE FROM item_providers WHERE item_id = ?1",
            params![id.as_str()],
        )
        .await?;
        tx.execute("DELETE FROM items WHERE id = ?1", params![id.as_str()])
            .await?;
        tx.commit().await?;

        if options.delete_file {
            match std::fs::remove_file(&item.path) {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    warn!("Backing file {} already gone", item.path.display());
                }
                Err(err) => {
                    return Err(err)
                        .with_context(|| format!("removing {}", item.path.display()));
                }
            }
        }
        Ok(())
    }
}

/// Column order must match the SELECT statements above.
fn row_to_item(row: &Row) -> Result<CatalogItem> {
    let id: String = row.get(0)?;
    let path: String = row.get(1)?;
    let kind: String = row.get(3)?;
    let is_virtual: i64 = row.get(4)?;
    let tags_json: String = row.get(5)?;
    let genres_json: String = row.get(6)?;
    let provider_ids_json: String = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(CatalogItem {
        id: Uuid::parse_str(&id).with_context(|| format!("parsing item id {id}"))?,
        path: PathBuf::from(path),
        name: row.get(2)?,
        kind: ItemKind::parse(&kind).ok_or_else(|| anyhow!("unknown item kind '{kind}'"))?,
        is_virtual: is_virtual != 0,
        tags: serde_json::from_str(&tags_json).context("parsing stored tags JSON")?,
        genres: serde_json::from_str(&genres_json).context("parsing stored genres JSON")?,
        provider_ids: serde_json::from_str(&provider_ids_json)
            .context("parsing stored provider ids JSON")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .with_context(|| format!("parsing created_at '{created_at}'"))?
            .with_timezone(&Utc),
    })
}
