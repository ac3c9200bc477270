//! SQLite-backed persistent store.
//!
//! Owns the `files` and `chunks` tables and writes lexical entries through
//! the selected [`LexicalIndex`]. Every per-file mutation
//! ([`replace_file`](SqliteStore::replace_file),
//! [`remove_path`](SqliteStore::remove_path)) runs in one transaction, so a
//! crash mid-update leaves either the old chunks or the new ones, never a mix.

use anyhow::Result;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::embedding::vec_to_blob;
use crate::lexical::LexicalIndex;
use crate::models::{Chunk, ChunkVector, FileRecord, StoredChunk};

pub struct SqliteStore {
    pool: SqlitePool,
    lexical: Arc<dyn LexicalIndex>,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool, lexical: Arc<dyn LexicalIndex>) -> Self {
        Self { pool, lexical }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn lexical(&self) -> &dyn LexicalIndex {
        self.lexical.as_ref()
    }

    pub async fn file_records(&self) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query("SELECT path, content_hash, size FROM files ORDER BY path")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(FileRecord::from_row).collect()
    }

    pub async fn file_paths(&self) -> Result<Vec<String>> {
        Ok(sqlx::query_scalar("SELECT path FROM files ORDER BY path")
            .fetch_all(&self.pool)
            .await?)
    }

    /// Every stored chunk with its vector, in storage (insertion) order.
    pub async fn all_chunks(&self) -> Result<Vec<StoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, path, text, start_line, end_line, content_hash, embedding
            FROM chunks
            ORDER BY rowid
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(StoredChunk::from_row).collect()
    }

    pub async fn chunk_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn embedded_chunk_count(&self) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE embedding IS NOT NULL")
                .fetch_one(&self.pool)
                .await?,
        )
    }

    pub async fn file_count(&self) -> Result<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&self.pool)
            .await?)
    }

    pub async fn last_indexed_at(&self) -> Result<Option<i64>> {
        Ok(sqlx::query_scalar("SELECT MAX(indexed_at) FROM files")
            .fetch_one(&self.pool)
            .await?)
    }

    /// Delete a file and all of its chunks and lexical entries.
    pub async fn remove_path(&self, path: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        self.lexical.remove_path(&mut *tx, path).await?;

        sqlx::query("DELETE FROM chunks WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM files WHERE path = ?")
            .bind(path)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Replace everything stored for `file.path` with `chunks`.
    pub async fn replace_file(
        &self,
        file: &FileRecord,
        chunks: &[(Chunk, ChunkVector)],
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        let mut tx = self.pool.begin().await?;

        self.lexical.remove_path(&mut *tx, &file.path).await?;

        sqlx::query("DELETE FROM chunks WHERE path = ?")
            .bind(&file.path)
            .execute(&mut *tx)
            .await?;

        for (chunk, vector) in chunks {
            let blob = vector.as_slice().map(vec_to_blob);
            sqlx::query(
                r#"
                INSERT INTO chunks (id, path, text, start_line, end_line, content_hash, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.path)
            .bind(&chunk.text)
            .bind(chunk.start_line)
            .bind(chunk.end_line)
            .bind(&chunk.content_hash)
            .bind(blob)
            .execute(&mut *tx)
            .await?;

            self.lexical.insert(&mut *tx, chunk).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO files (path, content_hash, size, indexed_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(path) DO UPDATE SET
                content_hash = excluded.content_hash,
                size = excluded.size,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&file.path)
        .bind(&file.content_hash)
        .bind(file.size)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Attach a recomputed vector to an existing chunk.
    pub async fn set_chunk_embedding(&self, chunk_id: &str, vector: &[f32]) -> Result<()> {
        sqlx::query("UPDATE chunks SET embedding = ? WHERE id = ?")
            .bind(vec_to_blob(vector))
            .bind(chunk_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
