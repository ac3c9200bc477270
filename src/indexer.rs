//! Incremental workspace indexing.
//!
//! A pass walks the workspace, compares each eligible file's content hash
//! with the stored one, re-chunks and re-embeds only what changed, and drops
//! files that disappeared. An unchanged workspace produces no writes at all.
//!
//! # Eligibility
//!
//! A file is indexed when all of the following hold:
//! - no path component starts with `.` (dotfiles and dot-directories are pruned)
//! - no directory component is in `deny_dirs`, and the name is not in `deny_files`
//! - the relative path matches none of `exclude_globs`
//! - the extension is in the allow-list (case-insensitive)
//! - the file is non-empty, at most `max_file_bytes`, and valid UTF-8
//!
//! Anything else, including unreadable entries, is skipped silently.
//!
//! # Concurrency
//!
//! [`IndexGate`] admits one pass at a time. A caller that finds a pass in
//! flight gets `None` back immediately instead of queueing.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use walkdir::{DirEntry, WalkDir};

use crate::chunk::{chunk_text, content_hash};
use crate::config::{Config, WorkspaceConfig};
use crate::embedding::client::Embedder;
use crate::embedding::EmbedError;
use crate::models::{ChunkVector, FileRecord};
use crate::store::SqliteStore;

/// An eligible file read from the workspace.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    /// Path relative to the workspace root, `/`-separated.
    pub path: String,
    pub text: String,
    pub content_hash: String,
    pub size: i64,
}

/// Outcome of one indexing pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub files_scanned: usize,
    pub files_changed: usize,
    pub files_deleted: usize,
    pub chunks_written: usize,
    pub embeddings_missing: usize,
    /// Total chunks stored after the pass.
    pub chunk_count: i64,
    /// True when another pass was already running and this one did nothing.
    pub skipped_busy: bool,
}

impl IndexReport {
    pub fn busy(chunk_count: i64) -> Self {
        Self {
            chunk_count,
            skipped_busy: true,
            ..Self::default()
        }
    }
}

// ============ Scan ============

/// Walk the workspace and return every eligible file, sorted by path.
pub fn scan_workspace(workspace: &WorkspaceConfig) -> Result<Vec<ScannedFile>> {
    let root = &workspace.root;
    if !root.is_dir() {
        bail!("Workspace root does not exist: {}", root.display());
    }

    let exclude_set = build_globset(&workspace.exclude_globs)?;
    let extensions: HashSet<String> = workspace
        .extensions
        .iter()
        .map(|e| e.trim_start_matches('.').to_lowercase())
        .collect();

    let mut files = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(workspace.follow_symlinks)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_pruned(e, workspace));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) {
            continue;
        }
        if !has_allowed_extension(path, &extensions) {
            continue;
        }

        match read_eligible(path, workspace.max_file_bytes) {
            Some((text, size)) => files.push(ScannedFile {
                content_hash: content_hash(&text),
                path: rel_str,
                text,
                size,
            }),
            None => tracing::debug!(path = %rel_str, "skipping ineligible file"),
        }
    }

    files.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(files)
}

/// Dot-entries, denied directories and denied file names.
fn is_pruned(entry: &DirEntry, workspace: &WorkspaceConfig) -> bool {
    let name = entry.file_name().to_string_lossy();
    if name.starts_with('.') {
        return true;
    }
    if entry.file_type().is_dir() {
        workspace.deny_dirs.iter().any(|d| d.as_str() == name)
    } else {
        workspace.deny_files.iter().any(|f| f.as_str() == name)
    }
}

fn has_allowed_extension(path: &Path, extensions: &HashSet<String>) -> bool {
    path.extension()
        .map(|ext| extensions.contains(&ext.to_string_lossy().to_lowercase()))
        .unwrap_or(false)
}

/// Read a file if it is non-empty, within the size ceiling and valid UTF-8.
fn read_eligible(path: &Path, max_bytes: u64) -> Option<(String, i64)> {
    let len = std::fs::metadata(path).ok()?.len();
    if len == 0 || len > max_bytes {
        return None;
    }
    let bytes = std::fs::read(path).ok()?;
    let size = bytes.len() as i64;
    String::from_utf8(bytes).ok().map(|text| (text, size))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Split the scan against stored hashes into (changed, deleted).
///
/// `changed` holds files that are new or whose hash differs; `deleted`
/// holds stored paths that no longer appear in the scan.
pub fn diff<'a>(
    stored: &HashMap<String, String>,
    scanned: &'a [ScannedFile],
) -> (Vec<&'a ScannedFile>, Vec<String>) {
    let changed = scanned
        .iter()
        .filter(|f| stored.get(&f.path) != Some(&f.content_hash))
        .collect();

    let on_disk: HashSet<&str> = scanned.iter().map(|f| f.path.as_str()).collect();
    let mut deleted: Vec<String> = stored
        .keys()
        .filter(|p| !on_disk.contains(p.as_str()))
        .cloned()
        .collect();
    deleted.sort();

    (changed, deleted)
}

// ============ Gate ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    Idle,
    Indexing,
}

/// Admits at most one indexing pass at a time.
#[derive(Debug)]
pub struct IndexGate {
    phase: Mutex<IndexPhase>,
}

impl Default for IndexGate {
    fn default() -> Self {
        Self {
            phase: Mutex::new(IndexPhase::Idle),
        }
    }
}

impl IndexGate {
    /// Enter `Indexing` if idle. The gate returns to `Idle` when the
    /// returned guard drops, including on error or panic.
    pub fn try_begin(&self) -> Option<IndexPass<'_>> {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        match *phase {
            IndexPhase::Indexing => None,
            IndexPhase::Idle => {
                *phase = IndexPhase::Indexing;
                Some(IndexPass { gate: self })
            }
        }
    }

    pub fn phase(&self) -> IndexPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub struct IndexPass<'a> {
    gate: &'a IndexGate,
}

impl Drop for IndexPass<'_> {
    fn drop(&mut self) {
        *self.gate.phase.lock().unwrap_or_else(|e| e.into_inner()) = IndexPhase::Idle;
    }
}

// ============ Pass ============

/// Run one incremental pass. The caller must hold an [`IndexPass`].
pub async fn run_pass(
    store: &SqliteStore,
    embedder: &Embedder,
    config: &Config,
) -> Result<IndexReport> {
    let scanned = scan_workspace(&config.workspace)?;
    let stored: HashMap<String, String> = store
        .file_records()
        .await?
        .into_iter()
        .map(|f| (f.path, f.content_hash))
        .collect();

    let (changed, deleted) = diff(&stored, &scanned);

    let mut report = IndexReport {
        files_scanned: scanned.len(),
        ..IndexReport::default()
    };

    for path in &deleted {
        store.remove_path(path).await?;
        tracing::debug!(path = %path, "removed deleted file");
    }
    report.files_deleted = deleted.len();

    for file in changed {
        let chunks = chunk_text(&file.path, &file.text, &config.chunking);
        let mut rows = Vec::with_capacity(chunks.len());

        for chunk in chunks {
            let vector = match embedder.embed(&chunk.text).await {
                Ok(v) => ChunkVector::Embedded(v),
                Err(EmbedError::Disabled) => ChunkVector::Missing,
                Err(EmbedError::Storage(e)) => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(
                        path = %chunk.path,
                        start_line = chunk.start_line,
                        error = %e,
                        "storing chunk without embedding"
                    );
                    ChunkVector::Missing
                }
            };
            if !vector.is_embedded() {
                report.embeddings_missing += 1;
            }
            rows.push((chunk, vector));
        }

        let record = FileRecord {
            path: file.path.clone(),
            content_hash: file.content_hash.clone(),
            size: file.size,
        };
        store.replace_file(&record, &rows).await?;

        report.files_changed += 1;
        report.chunks_written += rows.len();
    }

    report.chunk_count = store.chunk_count().await?;

    if report.files_changed > 0 || report.files_deleted > 0 {
        tracing::info!(
            scanned = report.files_scanned,
            changed = report.files_changed,
            deleted = report.files_deleted,
            chunks = report.chunk_count,
            missing_embeddings = report.embeddings_missing,
            "index pass complete"
        );
    } else {
        tracing::debug!(scanned = report.files_scanned, "index pass found no changes");
    }

    Ok(report)
}

/// Retry embedding for every chunk stored without a vector.
///
/// Returns `(embedded, still_missing)`.
pub async fn embed_missing(store: &SqliteStore, embedder: &Embedder) -> Result<(u64, u64)> {
    let pending: Vec<_> = store
        .all_chunks()
        .await?
        .into_iter()
        .filter(|sc| !sc.vector.is_embedded())
        .collect();

    if !embedder.is_enabled() {
        return Ok((0, pending.len() as u64));
    }

    let mut embedded = 0u64;
    let mut missing = 0u64;

    for sc in &pending {
        match embedder.embed(&sc.chunk.text).await {
            Ok(vector) => {
                store.set_chunk_embedding(&sc.chunk.id, &vector).await?;
                embedded += 1;
            }
            Err(EmbedError::Storage(e)) => return Err(e.into()),
            Err(e) => {
                tracing::warn!(chunk_id = %sc.chunk.id, error = %e, "embedding still unavailable");
                missing += 1;
            }
        }
    }

    Ok((embedded, missing))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, body: &[u8]) {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, body).unwrap();
    }

    fn paths(files: &[ScannedFile]) -> Vec<&str> {
        files.iter().map(|f| f.path.as_str()).collect()
    }

    #[test]
    fn test_scan_applies_eligibility_rules() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "notes.md", b"# Notes\nkept");
        write(root, "docs/guide.TXT", b"upper-case extension is fine");
        write(root, ".hidden.md", b"dotfile");
        write(root, ".cache/inner.md", b"inside dot dir");
        write(root, "node_modules/pkg/readme.md", b"denied dir");
        write(root, "sub/logs/today.md", b"nested denied dir");
        write(root, "package-lock.json", b"{}");
        write(root, "image.png", b"not text");
        write(root, "empty.md", b"");
        write(root, "binary.txt", &[0xff, 0xfe, 0x00, 0x80]);
        write(root, "big.md", &vec![b'a'; 2048]);
        write(root, "drafts/skip.md", b"excluded by glob");

        let mut ws = WorkspaceConfig::new(root);
        ws.max_file_bytes = 1024;
        ws.exclude_globs = vec!["drafts/**".to_string()];

        let files = scan_workspace(&ws).unwrap();
        assert_eq!(paths(&files), vec!["docs/guide.TXT", "notes.md"]);
        assert_eq!(files[1].content_hash, content_hash("# Notes\nkept"));
        assert_eq!(files[1].size, 12);
    }

    #[test]
    fn test_scan_missing_root_fails() {
        let ws = WorkspaceConfig::new("/definitely/not/a/workspace");
        assert!(scan_workspace(&ws).is_err());
    }

    #[test]
    fn test_diff_changed_and_deleted() {
        let scanned = vec![
            ScannedFile {
                path: "a.md".into(),
                text: String::new(),
                content_hash: "same".into(),
                size: 1,
            },
            ScannedFile {
                path: "b.md".into(),
                text: String::new(),
                content_hash: "new".into(),
                size: 1,
            },
            ScannedFile {
                path: "c.md".into(),
                text: String::new(),
                content_hash: "fresh".into(),
                size: 1,
            },
        ];
        let stored: HashMap<String, String> = [
            ("a.md", "same"),
            ("b.md", "old"),
            ("gone.md", "x"),
        ]
        .into_iter()
        .map(|(p, h)| (p.to_string(), h.to_string()))
        .collect();

        let (changed, deleted) = diff(&stored, &scanned);
        assert_eq!(paths(&changed.into_iter().cloned().collect::<Vec<_>>()), vec!["b.md", "c.md"]);
        assert_eq!(deleted, vec!["gone.md".to_string()]);
    }

    #[test]
    fn test_gate_single_flight() {
        let gate = IndexGate::default();
        assert_eq!(gate.phase(), IndexPhase::Idle);

        let pass = gate.try_begin();
        assert!(pass.is_some());
        assert_eq!(gate.phase(), IndexPhase::Indexing);
        assert!(gate.try_begin().is_none());

        drop(pass);
        assert_eq!(gate.phase(), IndexPhase::Idle);
        assert!(gate.try_begin().is_some());
    }
}
