//! Record types for the three durable tables and the search surface.
//!
//! Rows coming out of SQLite are converted into these types at the store
//! boundary (see [`FileRecord::from_row`] and [`StoredChunk::from_row`]),
//! so the rest of the crate never touches untyped rows.

use anyhow::{bail, Result};
use serde::Serialize;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::embedding::blob_to_vec;

/// One indexed file. Keyed by its workspace-relative path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub path: String,
    pub content_hash: String,
    pub size: i64,
}

impl FileRecord {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let record = Self {
            path: row.try_get("path")?,
            content_hash: row.try_get("content_hash")?,
            size: row.try_get("size")?,
        };
        if record.size < 0 {
            bail!("files row {} has negative size {}", record.path, record.size);
        }
        Ok(record)
    }
}

/// A chunk produced by the chunker, before it is embedded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub path: String,
    pub text: String,
    pub start_line: i64,
    pub end_line: i64,
    pub content_hash: String,
}

/// The vector attached to a stored chunk.
///
/// A chunk whose embedding failed is still stored (and still searchable
/// lexically) with [`ChunkVector::Missing`].
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkVector {
    Embedded(Vec<f32>),
    Missing,
}

impl ChunkVector {
    pub fn as_slice(&self) -> Option<&[f32]> {
        match self {
            ChunkVector::Embedded(v) => Some(v),
            ChunkVector::Missing => None,
        }
    }

    pub fn is_embedded(&self) -> bool {
        matches!(self, ChunkVector::Embedded(_))
    }
}

impl From<Option<Vec<f32>>> for ChunkVector {
    fn from(v: Option<Vec<f32>>) -> Self {
        match v {
            Some(v) => ChunkVector::Embedded(v),
            None => ChunkVector::Missing,
        }
    }
}

/// A chunk as read back from the store, with its vector.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: Chunk,
    pub vector: ChunkVector,
}

impl StoredChunk {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let chunk = Chunk {
            id: row.try_get("id")?,
            path: row.try_get("path")?,
            text: row.try_get("text")?,
            start_line: row.try_get("start_line")?,
            end_line: row.try_get("end_line")?,
            content_hash: row.try_get("content_hash")?,
        };
        if chunk.start_line < 1 || chunk.start_line > chunk.end_line {
            bail!(
                "chunk {} has invalid line range {}..{}",
                chunk.id,
                chunk.start_line,
                chunk.end_line
            );
        }

        let blob: Option<Vec<u8>> = row.try_get("embedding")?;
        let vector = match blob {
            Some(b) if b.len() % 4 != 0 => {
                bail!("chunk {} has a corrupt embedding ({} bytes)", chunk.id, b.len())
            }
            Some(b) if b.is_empty() => ChunkVector::Missing,
            Some(b) => ChunkVector::Embedded(blob_to_vec(&b)),
            None => ChunkVector::Missing,
        };

        Ok(Self { chunk, vector })
    }
}

/// A ranked search result.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub path: String,
    pub text: String,
    /// Blended relevance score in `[0.0, 1.0]`.
    pub score: f64,
    pub start_line: i64,
    pub end_line: i64,
    /// `max(0, cosine)` between query and chunk vectors, 0 when either is absent.
    pub vector_score: f64,
    /// Normalized lexical score, 0 when the chunk did not match.
    pub keyword_score: f64,
}

/// Index summary returned by [`stats`](crate::stats::collect_stats).
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub chunk_count: i64,
    pub file_count: i64,
    pub cached_embedding_count: i64,
    pub file_paths: Vec<String>,
    pub embedded_chunk_count: i64,
    pub lexical_backend: String,
    pub last_indexed_at: Option<i64>,
}
