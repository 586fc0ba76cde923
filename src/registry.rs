// Plugin and server entities, plus per-server plugin activity used for ranking.

use sqlx::Row;
use sqlx::SqlitePool;
use tracing::instrument;

use crate::error::StoreError;
use crate::models::{Entity, EntityId, EntityKind};

const ENTITY_COLUMNS: &str = "id, kind, name, author, hidden, global_hits";

pub struct PluginRegistry {
    pool: SqlitePool,
}

impl PluginRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entity (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                kind TEXT NOT NULL,
                name TEXT NOT NULL,
                author TEXT NOT NULL DEFAULT '',
                hidden INTEGER NOT NULL DEFAULT 0,
                global_hits INTEGER NOT NULL DEFAULT 0,
                UNIQUE (kind, name)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS server_plugin (
                server_id INTEGER NOT NULL,
                plugin_id INTEGER NOT NULL,
                updated INTEGER NOT NULL,
                PRIMARY KEY (server_id, plugin_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_server_plugin_plugin_updated ON server_plugin(plugin_id, updated)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Plugins ordered by distinct servers reporting them since `now - since_secs`, descending.
    /// Ties keep insertion order. Hidden plugins are included.
    #[instrument(skip(self), fields(repo = "registry", operation = "list_ranked"))]
    pub async fn list_ranked(&self, since_secs: i64, now: i64) -> Result<Vec<Entity>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entity
             WHERE kind = 'plugin'
             ORDER BY (SELECT COUNT(*) FROM server_plugin sp
                       WHERE sp.plugin_id = entity.id AND sp.updated >= $1) DESC,
                      id ASC"
        ))
        .bind(now - since_secs)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(parse_entity_row).collect()
    }

    /// Exact, case-sensitive name match. `None` when no such plugin exists.
    pub async fn load_by_name(&self, name: &str) -> Result<Option<Entity>, StoreError> {
        self.load(EntityKind::Plugin, name).await
    }

    pub async fn load_server(&self, guid: &str) -> Result<Option<Entity>, StoreError> {
        self.load(EntityKind::Server, guid).await
    }

    pub async fn load_by_id(&self, id: EntityId) -> Result<Option<Entity>, StoreError> {
        let row = sqlx::query(&format!("SELECT {ENTITY_COLUMNS} FROM entity WHERE id = $1"))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(parse_entity_row).transpose()
    }

    /// Get-or-create. An existing plugin keeps its author.
    #[instrument(skip(self), fields(repo = "registry", operation = "register_plugin"))]
    pub async fn register_plugin(&self, name: &str, author: &str) -> Result<Entity, StoreError> {
        self.register(EntityKind::Plugin, name, author).await
    }

    /// Get-or-create a server entity keyed by its GUID.
    pub async fn register_server(&self, guid: &str) -> Result<Entity, StoreError> {
        self.register(EntityKind::Server, guid, "").await
    }

    pub async fn record_server_plugin(
        &self,
        server_id: EntityId,
        plugin_id: EntityId,
        now: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO server_plugin (server_id, plugin_id, updated) VALUES ($1, $2, $3)
             ON CONFLICT(server_id, plugin_id) DO UPDATE SET updated = excluded.updated",
        )
        .bind(server_id.0)
        .bind(plugin_id.0)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn increment_global_hits(&self, plugin_id: EntityId) -> Result<(), StoreError> {
        sqlx::query("UPDATE entity SET global_hits = global_hits + 1 WHERE id = $1")
            .bind(plugin_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_hidden(&self, plugin_id: EntityId, hidden: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE entity SET hidden = $1 WHERE id = $2")
            .bind(hidden)
            .bind(plugin_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn load(&self, kind: EntityKind, name: &str) -> Result<Option<Entity>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ENTITY_COLUMNS} FROM entity WHERE kind = $1 AND name = $2"
        ))
        .bind(kind.as_str())
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(parse_entity_row).transpose()
    }

    async fn register(
        &self,
        kind: EntityKind,
        name: &str,
        author: &str,
    ) -> Result<Entity, StoreError> {
        sqlx::query(
            "INSERT INTO entity (kind, name, author) VALUES ($1, $2, $3)
             ON CONFLICT(kind, name) DO NOTHING",
        )
        .bind(kind.as_str())
        .bind(name)
        .bind(author)
        .execute(&self.pool)
        .await?;

        self.load(kind, name)
            .await?
            .ok_or_else(|| StoreError::Database(sqlx::Error::RowNotFound))
    }
}

fn parse_entity_row(row: &sqlx::sqlite::SqliteRow) -> Result<Entity, StoreError> {
    let kind: String = row.try_get("kind")?;
    Ok(Entity {
        id: EntityId(row.try_get("id")?),
        kind: EntityKind::from_db(&kind),
        name: row.try_get("name")?,
        author: row.try_get("author")?,
        hidden: row.try_get("hidden")?,
        global_hits: row.try_get("global_hits")?,
    })
}
