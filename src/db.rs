use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use tracing::warn;

use crate::cache::FeedCache;
use crate::config::SeedFolder;
use crate::models::{slugify, Feed, Folder, Settings, SyncCredential};
use crate::state::{normalize_folders, FolderSelection, ReaderState, View};

pub const KEY_FOLDERS: &str = "orbit_folders";
pub const KEY_ACTIVE_FOLDER: &str = "orbit_active_folder";
pub const KEY_ACTIVE_SOURCE: &str = "orbit_active_source";
pub const KEY_READ_ARTICLES: &str = "orbit_read_articles";
pub const KEY_HIDE_READ: &str = "orbit_hide_read";
pub const KEY_SETTINGS: &str = "orbit_settings";
pub const KEY_FEED_CACHE: &str = "orbit_feed_cache";
pub const KEY_SYNC_TOKEN: &str = "orbit_gh_token";
pub const KEY_SYNC_DOCUMENT: &str = "orbit_gist_id";
pub const KEY_LAST_SYNC: &str = "orbit_last_sync";

/// Flat key-value store backed by SQLite.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // every connection to an in-memory database opens a fresh one
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(value,)| value))
    }

    pub async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let json = serde_json::to_string(value)?;
        self.set(key, &json).await
    }

    /// Read and parse a JSON value. Missing keys yield `None`; unreadable or
    /// malformed values are logged and also yield `None`.
    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.get(key).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, error = %e, "failed to read stored value");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, error = %e, "malformed stored value, using default");
                None
            }
        }
    }

    /// Load the full application state. Absent or malformed entries fall
    /// back to defaults; `seed` provides folders when none were ever stored.
    pub async fn load_state(&self, seed: &[SeedFolder]) -> ReaderState {
        let folders = match self.get_json::<Vec<Folder>>(KEY_FOLDERS).await {
            Some(folders) => normalize_folders(folders),
            None => seed_folders(seed),
        };

        let folder = self
            .get(KEY_ACTIVE_FOLDER)
            .await
            .ok()
            .flatten()
            .map(FolderSelection::from)
            .unwrap_or_default();
        let source = self.get(KEY_ACTIVE_SOURCE).await.ok().flatten();

        let read_articles: BTreeSet<String> = self
            .get_json::<Vec<String>>(KEY_READ_ARTICLES)
            .await
            .unwrap_or_default()
            .into_iter()
            .collect();

        let hide_read = matches!(
            self.get(KEY_HIDE_READ).await.ok().flatten().as_deref(),
            Some("true")
        );

        let settings: Settings = self.get_json(KEY_SETTINGS).await.unwrap_or_default();
        let feed_cache: FeedCache = self.get_json(KEY_FEED_CACHE).await.unwrap_or_default();

        ReaderState {
            folders,
            view: View { folder, source },
            read_articles,
            hide_read,
            settings,
            feed_cache,
        }
    }

    /// Persist the synced subset: folders, settings and read articles.
    pub async fn save_library(&self, state: &ReaderState) -> anyhow::Result<()> {
        self.set_json(KEY_FOLDERS, &state.folders).await?;
        self.set_json(KEY_SETTINGS, &state.settings).await?;
        self.set_json(KEY_READ_ARTICLES, &state.read_articles).await?;
        Ok(())
    }

    /// Persist device-local view state.
    pub async fn save_view(&self, state: &ReaderState) -> anyhow::Result<()> {
        let folder: String = state.view.folder.clone().into();
        self.set(KEY_ACTIVE_FOLDER, &folder).await?;
        match &state.view.source {
            Some(source) => self.set(KEY_ACTIVE_SOURCE, source).await?,
            None => self.remove(KEY_ACTIVE_SOURCE).await?,
        }
        self.set(KEY_HIDE_READ, if state.hide_read { "true" } else { "false" })
            .await?;
        Ok(())
    }

    pub async fn save_feed_cache(&self, cache: &FeedCache) -> anyhow::Result<()> {
        self.set_json(KEY_FEED_CACHE, cache).await
    }

    pub async fn load_credential(&self) -> SyncCredential {
        let token = self.get(KEY_SYNC_TOKEN).await.ok().flatten();
        let document_id = self.get(KEY_SYNC_DOCUMENT).await.ok().flatten();
        let last_synced_at = self
            .get(KEY_LAST_SYNC)
            .await
            .ok()
            .flatten()
            .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
            .map(|dt| dt.with_timezone(&Utc));

        SyncCredential {
            token,
            document_id,
            last_synced_at,
        }
    }

    /// Write the credential, removing keys whose value is unset.
    pub async fn save_credential(&self, credential: &SyncCredential) -> anyhow::Result<()> {
        self.set_or_remove(KEY_SYNC_TOKEN, credential.token.as_deref())
            .await?;
        self.set_or_remove(KEY_SYNC_DOCUMENT, credential.document_id.as_deref())
            .await?;
        let last = credential.last_synced_at.map(|at| at.to_rfc3339());
        self.set_or_remove(KEY_LAST_SYNC, last.as_deref()).await?;
        Ok(())
    }

    async fn set_or_remove(&self, key: &str, value: Option<&str>) -> anyhow::Result<()> {
        match value {
            Some(value) => self.set(key, value).await,
            None => self.remove(key).await,
        }
    }
}

fn seed_folders(seed: &[SeedFolder]) -> Vec<Folder> {
    let folders = seed
        .iter()
        .map(|folder| Folder {
            id: slugify(&folder.name),
            name: folder.name.clone(),
            feeds: folder
                .feeds
                .iter()
                .map(|url| Feed::new(url.clone(), None))
                .collect(),
        })
        .filter(|folder| !folder.id.is_empty())
        .collect();
    normalize_folders(folders)
}
