//! Lexical (keyword) ranking strategies.
//!
//! Two implementations of [`LexicalIndex`], chosen once by [`select`]
//! when the engine opens:
//!
//! - **[`Fts5Index`]**: a SQLite FTS5 table (`chunks_fts`) ranked with BM25.
//! - **[`SubstringIndex`]**: no extra table; scores each stored chunk by the
//!   fraction of query tokens it contains as a substring.
//!
//! Both return scores in `[0, 1]`, higher is better, keyed by chunk id.
//! Chunks that do not match are absent from the map.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::HashMap;
use std::sync::Arc;

use crate::config::LexicalMode;
use crate::models::{Chunk, StoredChunk};

#[async_trait]
pub trait LexicalIndex: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drop every entry for `path`. Runs inside the caller's transaction.
    async fn remove_path(&self, conn: &mut SqliteConnection, path: &str) -> Result<()>;

    /// Add an entry for `chunk`. Runs inside the caller's transaction.
    async fn insert(&self, conn: &mut SqliteConnection, chunk: &Chunk) -> Result<()>;

    /// Score chunks against `query`.
    async fn rank(
        &self,
        pool: &SqlitePool,
        query: &str,
        chunks: &[StoredChunk],
    ) -> Result<HashMap<String, f64>>;

    /// Number of entries, optionally restricted to one path.
    async fn entry_count(&self, pool: &SqlitePool, path: Option<&str>) -> Result<i64>;
}

/// Pick the lexical backend for `mode`, creating its table if needed.
///
/// Choosing FTS5 also reconciles `chunks_fts` with `chunks`, so a database
/// last written under the substring backend gets its keyword entries back.
pub async fn select(pool: &SqlitePool, mode: LexicalMode) -> Result<Arc<dyn LexicalIndex>> {
    match mode {
        LexicalMode::Substring => Ok(Arc::new(SubstringIndex)),
        LexicalMode::Fts5 => {
            Fts5Index::install(pool).await?;
            Fts5Index::reconcile(pool).await?;
            Ok(Arc::new(Fts5Index))
        }
        LexicalMode::Auto => match Fts5Index::install(pool).await {
            Ok(()) => {
                Fts5Index::reconcile(pool).await?;
                Ok(Arc::new(Fts5Index))
            }
            Err(e) => {
                tracing::warn!(error = %e, "FTS5 unavailable, falling back to substring matching");
                Ok(Arc::new(SubstringIndex))
            }
        },
    }
}

/// Lowercase alphanumeric runs longer than one character, deduplicated
/// in first-seen order.
pub fn query_tokens(query: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for raw in query.split(|c: char| !c.is_alphanumeric()) {
        let token = raw.to_lowercase();
        if token.chars().count() > 1 && !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

// ============ FTS5 ============

pub struct Fts5Index;

impl Fts5Index {
    /// Create the FTS5 table. Fails when the SQLite build lacks FTS5.
    pub async fn install(pool: &SqlitePool) -> Result<()> {
        // FTS5 CREATE is not idempotent natively, so we check first
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='chunks_fts'",
        )
        .fetch_one(pool)
        .await?;

        if !exists {
            sqlx::query(
                r#"
                CREATE VIRTUAL TABLE chunks_fts USING fts5(
                    chunk_id UNINDEXED,
                    path UNINDEXED,
                    text,
                    tokenize='porter unicode61'
                )
                "#,
            )
            .execute(pool)
            .await?;
        }
        Ok(())
    }

    /// Make `chunks_fts` hold exactly one entry per stored chunk, with the
    /// chunk's current text. Returns `(removed, added)`.
    pub async fn reconcile(pool: &SqlitePool) -> Result<(u64, u64)> {
        let mut tx = pool.begin().await?;

        // Orphans, and entries whose chunk was rewritten under the same id
        let removed = sqlx::query(
            r#"
            DELETE FROM chunks_fts WHERE rowid IN (
                SELECT f.rowid
                FROM chunks_fts f
                LEFT JOIN chunks c ON c.id = f.chunk_id
                WHERE c.id IS NULL OR c.text <> f.text OR c.path <> f.path
            )
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let added = sqlx::query(
            r#"
            INSERT INTO chunks_fts (chunk_id, path, text)
            SELECT id, path, text FROM chunks
            WHERE id NOT IN (SELECT chunk_id FROM chunks_fts)
            ORDER BY rowid
            "#,
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if removed > 0 || added > 0 {
            tracing::info!(removed, added, "reconciled FTS5 entries with stored chunks");
        }
        Ok((removed, added))
    }
}

/// `"tok1" OR "tok2"`. Tokens are alphanumeric, so quoting is safe.
fn fts_match_expr(tokens: &[String]) -> String {
    tokens
        .iter()
        .map(|t| format!("\"{}\"", t))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Scale positive scores by the best one, so the top match scores 1.0.
fn normalize_by_max(raw: Vec<(String, f64)>) -> HashMap<String, f64> {
    let max = raw.iter().map(|(_, s)| *s).fold(0.0f64, f64::max);
    raw.into_iter()
        .map(|(id, s)| {
            let norm = if max <= f64::EPSILON {
                1.0
            } else {
                (s / max).clamp(0.0, 1.0)
            };
            (id, norm)
        })
        .collect()
}

#[async_trait]
impl LexicalIndex for Fts5Index {
    fn name(&self) -> &'static str {
        "fts5"
    }

    async fn remove_path(&self, conn: &mut SqliteConnection, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM chunks_fts WHERE path = ?")
            .bind(path)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn insert(&self, conn: &mut SqliteConnection, chunk: &Chunk) -> Result<()> {
        sqlx::query("INSERT INTO chunks_fts (chunk_id, path, text) VALUES (?, ?, ?)")
            .bind(&chunk.id)
            .bind(&chunk.path)
            .bind(&chunk.text)
            .execute(conn)
            .await?;
        Ok(())
    }

    async fn rank(
        &self,
        pool: &SqlitePool,
        query: &str,
        _chunks: &[StoredChunk],
    ) -> Result<HashMap<String, f64>> {
        let tokens = query_tokens(query);
        if tokens.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT chunk_id, bm25(chunks_fts) AS rank
            FROM chunks_fts
            WHERE chunks_fts MATCH ?
            ORDER BY rank
            "#,
        )
        .bind(fts_match_expr(&tokens))
        .fetch_all(pool)
        .await?;

        let mut raw = Vec::with_capacity(rows.len());
        for row in &rows {
            let rank: f64 = row.try_get("rank")?;
            // bm25() is lower-is-better and negative for matches
            raw.push((row.try_get::<String, _>("chunk_id")?, (-rank).max(0.0)));
        }

        Ok(normalize_by_max(raw))
    }

    async fn entry_count(&self, pool: &SqlitePool, path: Option<&str>) -> Result<i64> {
        let count = match path {
            Some(p) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts WHERE path = ?")
                    .bind(p)
                    .fetch_one(pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks_fts")
                    .fetch_one(pool)
                    .await?
            }
        };
        Ok(count)
    }
}

// ============ Substring fallback ============

/// Scores chunk text directly; the chunk row is its own lexical entry.
pub struct SubstringIndex;

/// Fraction of `tokens` that occur in `text` (case-insensitive).
pub fn substring_score(tokens: &[String], text: &str) -> f64 {
    if tokens.is_empty() {
        return 0.0;
    }
    let haystack = text.to_lowercase();
    let hits = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
    hits as f64 / tokens.len() as f64
}

#[async_trait]
impl LexicalIndex for SubstringIndex {
    fn name(&self) -> &'static str {
        "substring"
    }

    async fn remove_path(&self, _conn: &mut SqliteConnection, _path: &str) -> Result<()> {
        Ok(())
    }

    async fn insert(&self, _conn: &mut SqliteConnection, _chunk: &Chunk) -> Result<()> {
        Ok(())
    }

    async fn rank(
        &self,
        _pool: &SqlitePool,
        query: &str,
        chunks: &[StoredChunk],
    ) -> Result<HashMap<String, f64>> {
        let tokens = query_tokens(query);
        Ok(chunks
            .iter()
            .filter_map(|sc| {
                let score = substring_score(&tokens, &sc.chunk.text);
                (score > 0.0).then(|| (sc.chunk.id.clone(), score))
            })
            .collect())
    }

    async fn entry_count(&self, pool: &SqlitePool, path: Option<&str>) -> Result<i64> {
        let count = match path {
            Some(p) => {
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE path = ?")
                    .bind(p)
                    .fetch_one(pool)
                    .await?
            }
            None => {
                sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
                    .fetch_one(pool)
                    .await?
            }
        };
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_tokens() {
        assert_eq!(query_tokens("Budget approval!"), vec!["budget", "approval"]);
        assert_eq!(query_tokens("a I x"), Vec::<String>::new());
        assert_eq!(query_tokens("milk MILK milk"), vec!["milk"]);
        assert_eq!(query_tokens("c++ \"quoted\" OR"), vec!["quoted", "or"]);
    }

    #[test]
    fn test_fts_expr_quotes_tokens() {
        let tokens = query_tokens("budget (approval)");
        assert_eq!(fts_match_expr(&tokens), "\"budget\" OR \"approval\"");
    }

    #[test]
    fn test_substring_score_fraction() {
        let tokens = query_tokens("milk bread");
        assert_eq!(substring_score(&tokens, "Grocery list: Milk, eggs."), 0.5);
        assert_eq!(substring_score(&tokens, "milk and bread"), 1.0);
        assert_eq!(substring_score(&tokens, "nothing here"), 0.0);
        assert_eq!(substring_score(&[], "anything"), 0.0);
    }

    #[test]
    fn test_normalize_by_max() {
        let scores = normalize_by_max(vec![
            ("a".to_string(), 4.0),
            ("b".to_string(), 1.0),
        ]);
        assert!((scores["a"] - 1.0).abs() < 1e-9);
        assert!((scores["b"] - 0.25).abs() < 1e-9);

        let flat = normalize_by_max(vec![("c".to_string(), 0.0)]);
        assert_eq!(flat["c"], 1.0);
    }
}
