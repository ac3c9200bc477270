//! Index statistics and health overview.
//!
//! [`collect_stats`] gathers counts for hosts; [`print_stats`] renders them
//! for `recall stats` together with database size and embedding coverage.

use anyhow::Result;
use std::path::Path;

use crate::embedding::client::Embedder;
use crate::models::IndexStats;
use crate::store::SqliteStore;

/// Gather chunk, file, cache and coverage counts.
pub async fn collect_stats(store: &SqliteStore, embedder: &Embedder) -> Result<IndexStats> {
    Ok(IndexStats {
        chunk_count: store.chunk_count().await?,
        file_count: store.file_count().await?,
        cached_embedding_count: embedder.cache().count().await?,
        file_paths: store.file_paths().await?,
        embedded_chunk_count: store.embedded_chunk_count().await?,
        lexical_backend: store.lexical().name().to_string(),
        last_indexed_at: store.last_indexed_at().await?,
    })
}

/// Print a stats summary for the CLI.
pub fn print_stats(stats: &IndexStats, db_path: &Path, model: &str) {
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);

    println!("Workspace Recall — Index Stats");
    println!("==============================");
    println!();
    println!("  Database:    {}", db_path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Lexical:     {}", stats.lexical_backend);
    println!("  Model:       {}", model);
    println!();
    println!("  Files:       {}", stats.file_count);
    println!("  Chunks:      {}", stats.chunk_count);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded_chunk_count,
        stats.chunk_count,
        coverage_percent(stats.embedded_chunk_count, stats.chunk_count)
    );
    println!("  Cached:      {}", stats.cached_embedding_count);
    let now = chrono::Utc::now().timestamp();
    println!(
        "  Indexed:     {}",
        stats
            .last_indexed_at
            .map(|ts| format_indexed_at(ts, now))
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.file_paths.is_empty() {
        println!();
        println!("  Files:");
        for path in &stats.file_paths {
            println!("    {}", path);
        }
    }
    println!();
}

fn coverage_percent(embedded: i64, total: i64) -> i64 {
    if total > 0 {
        (embedded * 100) / total
    } else {
        0
    }
}

fn format_bytes(bytes: u64) -> String {
    let mut size = bytes as f64;
    let mut unit = "B";
    for next in ["KB", "MB", "GB"] {
        if size < 1024.0 {
            break;
        }
        size /= 1024.0;
        unit = next;
    }
    if unit == "B" {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", size, unit)
    }
}

/// `2024-05-01 09:30 UTC (3h ago)`; the age is omitted for future stamps.
fn format_indexed_at(ts: i64, now: i64) -> String {
    let Some(stamp) = chrono::DateTime::from_timestamp(ts, 0) else {
        return ts.to_string();
    };
    let stamp = stamp.format("%Y-%m-%d %H:%M UTC");
    let age = now - ts;
    match age {
        a if a < 0 => stamp.to_string(),
        a if a < 3600 => format!("{} ({}m ago)", stamp, a / 60),
        a if a < 86400 => format!("{} ({}h ago)", stamp, a / 3600),
        a => format!("{} ({}d ago)", stamp, a / 86400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.0 GB");
    }

    #[test]
    fn test_coverage_percent() {
        assert_eq!(coverage_percent(0, 0), 0);
        assert_eq!(coverage_percent(1, 3), 33);
        assert_eq!(coverage_percent(4, 4), 100);
    }

    #[test]
    fn test_indexed_at_shows_stamp_and_age() {
        assert_eq!(format_indexed_at(0, 90), "1970-01-01 00:00 UTC (1m ago)");
        assert_eq!(format_indexed_at(0, 7200), "1970-01-01 00:00 UTC (2h ago)");
        assert_eq!(format_indexed_at(0, 3 * 86400), "1970-01-01 00:00 UTC (3d ago)");
        assert_eq!(format_indexed_at(60, 0), "1970-01-01 00:01 UTC");
    }
}
