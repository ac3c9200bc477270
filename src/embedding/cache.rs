//! Content-hash keyed embedding cache.
//!
//! One row per `(content_hash, model)`. Rows are only ever replaced by an
//! identical recomputation and are never evicted.

use sqlx::SqlitePool;

use super::{blob_to_vec, vec_to_blob};

#[derive(Clone)]
pub struct EmbeddingCache {
    pool: SqlitePool,
}

impl EmbeddingCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, content_hash: &str, model: &str) -> Result<Option<Vec<f32>>, sqlx::Error> {
        let blob: Option<Vec<u8>> = sqlx::query_scalar(
            "SELECT vector FROM embedding_cache WHERE content_hash = ? AND model = ?",
        )
        .bind(content_hash)
        .bind(model)
        .fetch_optional(&self.pool)
        .await?;

        Ok(blob
            .filter(|b| !b.is_empty() && b.len() % 4 == 0)
            .map(|b| blob_to_vec(&b)))
    }

    pub async fn put(&self, content_hash: &str, model: &str, vector: &[f32]) -> Result<(), sqlx::Error> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO embedding_cache (content_hash, model, dims, vector, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(content_hash, model) DO UPDATE SET
                dims = excluded.dims,
                vector = excluded.vector
            "#,
        )
        .bind(content_hash)
        .bind(model)
        .bind(vector.len() as i64)
        .bind(vec_to_blob(vector))
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn count(&self) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(&self.pool)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db, migrate};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_cache_is_model_scoped() {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("cache.sqlite")).await.unwrap();
        migrate::run_migrations(&pool).await.unwrap();
        let cache = EmbeddingCache::new(pool);

        assert!(cache.get("h1", "m1").await.unwrap().is_none());
        cache.put("h1", "m1", &[1.0, 2.0]).await.unwrap();
        assert_eq!(cache.get("h1", "m1").await.unwrap(), Some(vec![1.0, 2.0]));
        assert!(cache.get("h1", "m2").await.unwrap().is_none());

        // Recomputation replaces in place rather than adding a row.
        cache.put("h1", "m1", &[1.0, 2.0]).await.unwrap();
        assert_eq!(cache.count().await.unwrap(), 1);
    }
}
