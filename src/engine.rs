//! The memory engine facade.
//!
//! [`MemoryEngine`] wires configuration, storage, the lexical backend and the
//! embedding client together and exposes the operations hosts call:
//! indexing, search, prompt context, stats and embedding backfill.
//!
//! Search refreshes a stale index first. "Stale" means no pass has completed
//! in this process yet, or the last one finished more than
//! `retrieval.stale_after_secs` ago. The refresh is best-effort: if it fails
//! or another pass is already running, search proceeds on what is stored.

use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::context;
use crate::embedding::cache::EmbeddingCache;
use crate::embedding::client::{Embedder, RetryPolicy};
use crate::embedding::{self, EmbeddingProvider};
use crate::indexer::{self, IndexGate, IndexReport};
use crate::models::{IndexStats, SearchHit};
use crate::search::{self, SearchParams};
use crate::store::SqliteStore;
use crate::{db, lexical, migrate, stats};

pub struct MemoryEngine {
    config: Config,
    store: SqliteStore,
    embedder: Embedder,
    gate: IndexGate,
    last_pass: Mutex<Option<Instant>>,
}

impl MemoryEngine {
    /// Open (creating if needed) the database and build the configured provider.
    pub async fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let provider = embedding::create_provider(&config.embedding)?;
        Self::open_with_provider(config, provider).await
    }

    /// Like [`open`](Self::open), with a caller-supplied embedding provider.
    pub async fn open_with_provider(
        config: Config,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        config.validate()?;

        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;
        let lexical = lexical::select(&pool, config.retrieval.lexical).await?;

        let embedder = Embedder::new(
            provider,
            EmbeddingCache::new(pool.clone()),
            RetryPolicy::from_config(&config.embedding),
        );

        tracing::debug!(
            db = %config.db.path.display(),
            lexical = lexical.name(),
            model = embedder.model_name(),
            "memory engine opened"
        );

        Ok(Self {
            store: SqliteStore::new(pool, lexical),
            embedder,
            gate: IndexGate::default(),
            last_pass: Mutex::new(None),
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn embedder(&self) -> &Embedder {
        &self.embedder
    }

    /// Bring the index up to date with the workspace; returns the total
    /// chunk count afterwards.
    pub async fn index(&self) -> Result<i64> {
        Ok(self.index_with_report().await?.chunk_count)
    }

    /// Run an incremental pass and report what it did.
    ///
    /// When a pass is already in flight this returns immediately with
    /// `skipped_busy` set and the currently stored chunk count.
    pub async fn index_with_report(&self) -> Result<IndexReport> {
        let Some(_pass) = self.gate.try_begin() else {
            tracing::debug!("index pass already running, skipping");
            return Ok(IndexReport::busy(self.store.chunk_count().await?));
        };

        let report = indexer::run_pass(&self.store, &self.embedder, &self.config).await?;
        *self.last_pass.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        Ok(report)
    }

    /// Retry embeddings for chunks stored without a vector.
    ///
    /// Returns `(embedded, still_missing)`; `None` when an index pass holds
    /// the gate.
    pub async fn embed_pending(&self) -> Result<Option<(u64, u64)>> {
        let Some(_pass) = self.gate.try_begin() else {
            return Ok(None);
        };
        indexer::embed_missing(&self.store, &self.embedder)
            .await
            .map(Some)
    }

    /// Hybrid search with explicit `top_k` and `min_score`.
    pub async fn search(&self, query: &str, top_k: usize, min_score: f64) -> Result<Vec<SearchHit>> {
        self.refresh_if_stale().await;

        let params = SearchParams {
            top_k,
            min_score,
            ..SearchParams::from_config(&self.config.retrieval)
        };
        search::hybrid_search(&self.store, &self.embedder, query, &params).await
    }

    /// Search with the configured defaults.
    pub async fn search_default(&self, query: &str) -> Result<Vec<SearchHit>> {
        let r = &self.config.retrieval;
        self.search(query, r.top_k, r.min_score).await
    }

    /// A delimited context block for prompt injection, or `""` when nothing
    /// relevant is stored. Never fails: retrieval errors yield `""`.
    pub async fn get_context_for_prompt(&self, query: &str, max_snippets: usize) -> String {
        let r = &self.config.retrieval;
        match self.search(query, max_snippets, r.context_min_score).await {
            Ok(hits) => context::format_context(&hits, r.excerpt_chars),
            Err(e) => {
                tracing::warn!(error = %e, "context retrieval failed");
                String::new()
            }
        }
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        stats::collect_stats(&self.store, &self.embedder).await
    }

    pub fn is_stale(&self) -> bool {
        let last = *self.last_pass.lock().unwrap_or_else(|e| e.into_inner());
        match last {
            None => true,
            Some(at) => {
                at.elapsed() > Duration::from_secs(self.config.retrieval.stale_after_secs)
            }
        }
    }

    async fn refresh_if_stale(&self) {
        if !self.is_stale() {
            return;
        }
        if let Err(e) = self.index_with_report().await {
            tracing::warn!(error = %e, "background refresh failed, searching existing index");
        }
    }

    pub async fn close(self) {
        self.store.pool().close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_busy_gate_reports_stored_count_without_writing() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("workspace");
        fs::create_dir_all(&root).unwrap();
        fs::write(root.join("first.md"), "first note").unwrap();

        let config = Config::for_workspace(&root, tmp.path().join("recall.sqlite"));
        let engine = MemoryEngine::open(config).await.unwrap();
        assert_eq!(engine.index().await.unwrap(), 1);

        fs::write(root.join("second.md"), "second note").unwrap();
        let pass = engine.gate.try_begin().unwrap();

        let report = engine.index_with_report().await.unwrap();
        assert!(report.skipped_busy);
        assert_eq!(report.chunk_count, 1);
        assert_eq!(report.files_scanned, 0);
        assert_eq!(report.files_changed, 0);
        assert_eq!(engine.index().await.unwrap(), 1);
        assert_eq!(engine.embed_pending().await.unwrap(), None);
        assert_eq!(engine.store().chunk_count().await.unwrap(), 1);

        drop(pass);
        assert_eq!(engine.index().await.unwrap(), 2);
    }
}
