// persistence/sqlite.rs - SQLite-backed LocalPersistence (spec.md §4.6)
//
// Grounded on the teacher's `db/mod.rs` (WAL mode, foreign keys, pooled
// connections) and `db/migrations.rs` (idempotent numbered migrations
// tracked in `_migrations`). A `kv_store` table holds the single-row
// streak/xp aggregates under `current_streak_<streakKey>` /
// `current_xp_<experienceKey>`. Progress items live in their own
// `progress_items` table keyed on `(progress_key, id)` columns rather than
// a `<progressKey>_<id>` string prefix, so a `progressKey` that itself
// contains `_` (or a LIKE metacharacter) can never bleed into another
// key's scan — the same typed-column separation the teacher's `db` tables
// use instead of string-prefix scans.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::model::{CurrentStreakData, CurrentXPData, ProgressItem};
use crate::persistence::LocalPersistence;

pub struct SqliteLocalPersistence {
    pool: SqlitePool,
}

impl SqliteLocalPersistence {
    pub async fn new(db_path: &Path) -> Result<Self> {
        let db_url = format!("sqlite:{}", db_path.display());
        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| Error::Database(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        run_migrations(&pool).await?;

        Ok(Self { pool })
    }

    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| Error::Database(e.to_string()))?;
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn get_json(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<String, _>("value")))
    }

    async fn put_json(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS _migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    run_if_needed(pool, 1, "create_kv_store_table").await?;
    run_if_needed(pool, 2, "create_progress_items_table").await?;

    Ok(())
}

async fn run_if_needed(pool: &SqlitePool, id: i32, name: &str) -> Result<()> {
    let exists: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM _migrations WHERE id = ?")
        .bind(id)
        .fetch_one(pool)
        .await?;

    if exists.0 == 0 {
        tracing::info!(id, name, "running local persistence migration");

        match id {
            1 => create_kv_store_table(pool).await?,
            2 => create_progress_items_table(pool).await?,
            _ => return Err(Error::Database(format!("unknown migration id: {id}"))),
        }

        sqlx::query("INSERT INTO _migrations (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(pool)
            .await?;
    }

    Ok(())
}

async fn create_kv_store_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE kv_store (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX idx_kv_store_key_prefix ON kv_store(key)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_progress_items_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE progress_items (
            progress_key TEXT NOT NULL,
            id TEXT NOT NULL,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (progress_key, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX idx_progress_items_progress_key ON progress_items(progress_key)")
        .execute(pool)
        .await?;

    Ok(())
}

#[async_trait]
impl LocalPersistence for SqliteLocalPersistence {
    async fn get_saved_streak_data(&self, streak_key: &str) -> Result<Option<CurrentStreakData>> {
        let key = format!("current_streak_{streak_key}");
        match self.get_json(&key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save_current_streak_data(&self, data: &CurrentStreakData) -> Result<()> {
        let key = format!("current_streak_{}", data.streak_key);
        let json = serde_json::to_string(data)?;
        self.put_json(&key, &json).await
    }

    async fn get_saved_xp_data(&self, experience_key: &str) -> Result<Option<CurrentXPData>> {
        let key = format!("current_xp_{experience_key}");
        match self.get_json(&key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn save_current_xp_data(&self, data: &CurrentXPData) -> Result<()> {
        let key = format!("current_xp_{}", data.experience_key);
        let json = serde_json::to_string(data)?;
        self.put_json(&key, &json).await
    }

    async fn get_all_progress_items(&self, progress_key: &str) -> Result<Vec<ProgressItem>> {
        let rows = sqlx::query("SELECT value FROM progress_items WHERE progress_key = ?")
            .bind(progress_key)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter()
            .map(|r| {
                let json: String = r.get("value");
                serde_json::from_str(&json).map_err(Error::from)
            })
            .collect()
    }

    async fn get_progress_item(&self, progress_key: &str, id: &str) -> Result<Option<ProgressItem>> {
        let row = sqlx::query("SELECT value FROM progress_items WHERE progress_key = ? AND id = ?")
            .bind(progress_key)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let json: String = r.get("value");
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn save_progress_item(&self, item: &ProgressItem) -> Result<()> {
        let json = serde_json::to_string(item)?;
        sqlx::query(
            r#"
            INSERT INTO progress_items (progress_key, id, value, updated_at)
            VALUES (?, ?, ?, datetime('now'))
            ON CONFLICT(progress_key, id) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(&item.progress_key)
        .bind(&item.id)
        .bind(&json)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_progress_items(&self, items: &[ProgressItem]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for item in items {
            let json = serde_json::to_string(item)?;
            sqlx::query(
                r#"
                INSERT INTO progress_items (progress_key, id, value, updated_at)
                VALUES (?, ?, ?, datetime('now'))
                ON CONFLICT(progress_key, id) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
                "#,
            )
            .bind(&item.progress_key)
            .bind(&item.id)
            .bind(&json)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_progress_item(&self, progress_key: &str, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM progress_items WHERE progress_key = ? AND id = ?")
            .bind(progress_key)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_all_progress_items(&self, progress_key: &str) -> Result<()> {
        sqlx::query("DELETE FROM progress_items WHERE progress_key = ?")
            .bind(progress_key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Metadata;
    use chrono::Utc;

    async fn store() -> SqliteLocalPersistence {
        SqliteLocalPersistence::in_memory().await.expect("in-memory sqlite")
    }

    #[tokio::test]
    async fn streak_round_trips_through_json() {
        let store = store().await;
        let data = CurrentStreakData::blank("reading");
        store.save_current_streak_data(&data).await.unwrap();

        let loaded = store.get_saved_streak_data("reading").await.unwrap().unwrap();
        assert_eq!(loaded.streak_key, "reading");
        assert_eq!(loaded.current_streak, Some(0));
    }

    #[tokio::test]
    async fn missing_streak_key_returns_none() {
        let store = store().await;
        assert!(store.get_saved_streak_data("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn progress_items_scope_by_progress_key_column() {
        let store = store().await;
        let now = Utc::now();
        let a = ProgressItem {
            id: "1".to_string(),
            progress_key: "lessons".to_string(),
            value: 0.5,
            date_created: now,
            date_modified: now,
            metadata: Metadata::new(),
        };
        let b = ProgressItem {
            id: "1".to_string(),
            progress_key: "quizzes".to_string(),
            value: 0.2,
            date_created: now,
            date_modified: now,
            metadata: Metadata::new(),
        };
        store.save_progress_item(&a).await.unwrap();
        store.save_progress_item(&b).await.unwrap();

        let lessons = store.get_all_progress_items("lessons").await.unwrap();
        assert_eq!(lessons.len(), 1);
        assert_eq!(lessons[0].id, "1");
        assert_eq!(lessons[0].progress_key, "lessons");
    }

    #[tokio::test]
    async fn progress_key_containing_underscore_does_not_bleed_into_another_key() {
        let store = store().await;
        let now = Utc::now();
        // Without equality-on-columns this would also match a
        // `daily_quest_extra` item under a LIKE 'daily_quest_%' scan.
        store
            .save_progress_item(&ProgressItem {
                id: "1".to_string(),
                progress_key: "daily_quest".to_string(),
                value: 0.4,
                date_created: now,
                date_modified: now,
                metadata: Metadata::new(),
            })
            .await
            .unwrap();
        store
            .save_progress_item(&ProgressItem {
                id: "extra".to_string(),
                progress_key: "daily_quest_bonus".to_string(),
                value: 0.9,
                date_created: now,
                date_modified: now,
                metadata: Metadata::new(),
            })
            .await
            .unwrap();

        let daily_quest = store.get_all_progress_items("daily_quest").await.unwrap();
        assert_eq!(daily_quest.len(), 1);
        assert_eq!(daily_quest[0].progress_key, "daily_quest");

        store.delete_all_progress_items("daily_quest").await.unwrap();
        assert!(store.get_all_progress_items("daily_quest").await.unwrap().is_empty());
        assert_eq!(store.get_all_progress_items("daily_quest_bonus").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_all_progress_items_clears_only_that_key() {
        let store = store().await;
        let now = Utc::now();
        for id in ["1", "2"] {
            store
                .save_progress_item(&ProgressItem {
                    id: id.to_string(),
                    progress_key: "lessons".to_string(),
                    value: 0.1,
                    date_created: now,
                    date_modified: now,
                    metadata: Metadata::new(),
                })
                .await
                .unwrap();
        }
        store.delete_all_progress_items("lessons").await.unwrap();
        assert!(store.get_all_progress_items("lessons").await.unwrap().is_empty());
    }
}
