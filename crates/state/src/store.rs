//! SQLite-backed [`KeyValueStore`].

use crate::error::{ErrorKind, Result};
use crate::{Database, KeyValueStore};
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}
impl From<&Database> for SqliteStore {
    fn from(db: &Database) -> Self {
        Self { pool: db.pool().clone() }
    }
}
impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(include_str!("../queries/get_setting.sql"))
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let updated_at =
            OffsetDateTime::now_utc().format(&Rfc3339).or_raise(|| ErrorKind::InvalidData(key.to_string()))?;
        sqlx::query(include_str!("../queries/set_setting.sql"))
            .bind(key)
            .bind(value)
            .bind(updated_at)
            .execute(&self.pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        tracing::debug!(key, "stored setting");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys;

    async fn store() -> SqliteStore {
        SqliteStore::from(&Database::connect_in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_missing_key() {
        let store = store().await;
        assert_eq!(store.get(keys::PACKAGES_SELECTED).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_then_overwrite() {
        let store = store().await;
        store.set(keys::PACKAGES_SELECTED, r#"{"Tanakh":true}"#).await.unwrap();
        store.set(keys::PACKAGES_SELECTED, "{}").await.unwrap();
        store.set(keys::LAST_UPDATE_SCHEMA, "7").await.unwrap();
        assert_eq!(store.get(keys::PACKAGES_SELECTED).await.unwrap().as_deref(), Some("{}"));
        assert_eq!(store.get(keys::LAST_UPDATE_SCHEMA).await.unwrap().as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn test_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.sqlite");
        let db = Database::connect(&path).await.unwrap();
        SqliteStore::from(&db).set(keys::LAST_UPDATE_CHECK, "2024-05-01T00:00:00Z").await.unwrap();
        db.close().await;

        let db = Database::connect(&path).await.unwrap();
        let value = SqliteStore::from(&db).get(keys::LAST_UPDATE_CHECK).await.unwrap();
        assert_eq!(value.as_deref(), Some("2024-05-01T00:00:00Z"));
    }
}
