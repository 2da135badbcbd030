use std::str::FromStr as _;

use tracing::error;

use super::Client;

/// Cache documents kept in a single sqlite table.
pub struct SqliteStore {
    pool: sqlx::SqlitePool,
}

impl SqliteStore {
    pub async fn open(url: &str) -> Result<Self, sqlx::Error> {
        let options = sqlx::sqlite::SqliteConnectOptions::from_str(url)
            .inspect_err(|error| error!(%error, %url, "Failed to open cache db"))?
            .create_if_missing(true);
        let pool = sqlx::pool::PoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .inspect_err(|error| error!(%error, %url, "Failed to open cache db"))?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache(
                key TEXT NOT NULL PRIMARY KEY,
                value TEXT NOT NULL
            );
        "#,
        )
        .execute(&pool)
        .await
        .inspect_err(|error| error!(%error, %url, "Failed to execute DDL to cache db"))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &sqlx::SqlitePool {
        &self.pool
    }
}

impl Client for SqliteStore {
    type Error = sqlx::Error;

    async fn read(&self, key: &str) -> Result<Option<serde_json::Value>, Self::Error> {
        let row = sqlx::query_scalar::<_, String>("SELECT value FROM cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|value| serde_json::from_str(&value))
            .transpose()
            .map_err(|error| sqlx::Error::Decode(Box::new(error)))
    }

    async fn write(&self, key: &str, value: &serde_json::Value) -> Result<(), Self::Error> {
        sqlx::query(
            r#"
            INSERT INTO cache(key, value)
            VALUES (?, ?)
            ON CONFLICT(key)
            DO UPDATE SET
                value = EXCLUDED.value
        "#,
        )
        .bind(key)
        .bind(value.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool, Self::Error> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM cache WHERE key = ?")
                .bind(key)
                .fetch_one(&self.pool)
                .await?;
        Ok(count > 0)
    }
}
