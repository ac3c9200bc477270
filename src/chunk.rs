//! Line-based text chunker with heading splits and line overlap.
//!
//! Lines accumulate into a buffer. The buffer is closed into a [`Chunk`]
//! when a markdown heading (`#`, `##`, `###`) arrives while it holds new
//! content, or when it grows past `max_chars` while holding more than
//! `overlap_lines + 1` lines. After each split the last `overlap_lines`
//! lines are carried into the next buffer, so consecutive chunks share
//! their boundary lines and no line range skips the overlapped tail.
//!
//! Chunk ids are UUIDv5 values derived from the path and line range, and
//! every chunk carries a SHA-256 hash of its text. Both are deterministic:
//! the same input always yields the same chunks.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::models::Chunk;

/// Hex SHA-256 of `text`. Keys file change detection and the embedding cache.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic chunk id for a path and 1-based line range.
pub fn chunk_id(path: &str, start_line: i64, end_line: i64) -> String {
    let key = format!("{}#L{}-L{}", path, start_line, end_line);
    Uuid::new_v5(&Uuid::NAMESPACE_URL, key.as_bytes()).to_string()
}

struct Line<'a> {
    number: i64,
    text: &'a str,
    chars: usize,
}

struct Buffer<'a> {
    lines: Vec<Line<'a>>,
    chars: usize,
    /// Lines at the tail of `lines` not yet emitted in any chunk.
    fresh: usize,
}

impl<'a> Buffer<'a> {
    fn push(&mut self, line: Line<'a>) {
        self.chars += line.chars + 1;
        self.lines.push(line);
        self.fresh += 1;
    }

    fn fresh_has_content(&self) -> bool {
        self.lines[self.lines.len() - self.fresh..]
            .iter()
            .any(|l| !l.text.trim().is_empty())
    }

    /// Drop everything but the last `keep` lines.
    fn retain_tail(&mut self, keep: usize) {
        let drop = self.lines.len() - keep;
        self.lines.drain(..drop);
        self.chars = self.lines.iter().map(|l| l.chars + 1).sum();
        self.fresh = 0;
    }
}

/// Split `text` into chunks for `path`.
pub fn chunk_text(path: &str, text: &str, config: &ChunkingConfig) -> Vec<Chunk> {
    let overlap = config.overlap_lines;
    let mut chunks = Vec::new();
    let mut buf = Buffer {
        lines: Vec::new(),
        chars: 0,
        fresh: 0,
    };

    for (i, line) in text.lines().enumerate() {
        if is_heading(line) && buf.fresh > 0 && buf.fresh_has_content() {
            emit(&mut chunks, path, &buf.lines, config.min_chars);
            // Always advance the start line, even when the buffer is shorter
            // than the overlap.
            let keep = overlap.min(buf.lines.len() - 1);
            buf.retain_tail(keep);
        }

        buf.push(Line {
            number: i as i64 + 1,
            text: line,
            chars: line.chars().count(),
        });

        if buf.chars > config.max_chars && buf.lines.len() > overlap + 1 && buf.fresh_has_content()
        {
            emit(&mut chunks, path, &buf.lines, config.min_chars);
            buf.retain_tail(overlap);
        }
    }

    if buf.fresh > 0 && buf.fresh_has_content() {
        emit(&mut chunks, path, &buf.lines, config.min_chars);
    }

    chunks
}

fn is_heading(line: &str) -> bool {
    ["# ", "## ", "### "].iter().any(|p| line.starts_with(p))
        || matches!(line.trim_end(), "#" | "##" | "###")
}

fn emit(chunks: &mut Vec<Chunk>, path: &str, lines: &[Line<'_>], min_chars: usize) {
    let (first, last) = match (lines.first(), lines.last()) {
        (Some(f), Some(l)) => (f, l),
        _ => return,
    };

    let text = lines.iter().map(|l| l.text).collect::<Vec<_>>().join("\n");
    let significant = text.chars().filter(|c| !c.is_whitespace()).count();
    if significant < min_chars {
        return;
    }

    chunks.push(Chunk {
        id: chunk_id(path, first.number, last.number),
        path: path.to_string(),
        content_hash: content_hash(&text),
        text,
        start_line: first.number,
        end_line: last.number,
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ChunkingConfig {
        ChunkingConfig::default()
    }

    #[test]
    fn test_short_file_single_chunk() {
        let chunks = chunk_text("a.md", "# Title\nThe quarterly budget was approved.", &cfg());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 2);
        assert_eq!(chunks[0].text, "# Title\nThe quarterly budget was approved.");
        assert_eq!(chunks[0].path, "a.md");
    }

    #[test]
    fn test_empty_and_whitespace() {
        assert!(chunk_text("a.md", "", &cfg()).is_empty());
        assert!(chunk_text("a.md", "\n   \n\t\n", &cfg()).is_empty());
    }

    #[test]
    fn test_tiny_chunks_discarded() {
        assert!(chunk_text("a.md", "ok then", &cfg()).is_empty());
        // 22 non-whitespace characters survives.
        assert_eq!(chunk_text("b.md", "Grocery list: milk, eggs.", &cfg()).len(), 1);
    }

    #[test]
    fn test_heading_splits_with_overlap() {
        let text = "# Alpha\nalpha body line that is long enough\n# Beta\nbeta body line that is long enough too";
        let chunks = chunk_text("n.md", text, &cfg());
        assert_eq!(chunks.len(), 2);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 2));
        // Seeded with the tail of the previous chunk, capped so the start advances.
        assert_eq!((chunks[1].start_line, chunks[1].end_line), (2, 4));
        assert!(chunks[1].text.contains("# Beta"));
    }

    #[test]
    fn test_size_split_overlap_continuity() {
        let text = (1..=60)
            .map(|i| format!("line {:02} with some filler text to take up room", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = chunk_text("long.txt", &text, &cfg());
        assert!(chunks.len() > 2);

        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks.last().unwrap().end_line, 60);
        for pair in chunks.windows(2) {
            assert_eq!(pair[1].start_line, pair[0].end_line - 2);
            assert!(pair[1].end_line > pair[0].end_line);
        }
        for c in &chunks[..chunks.len() - 1] {
            assert!(c.text.chars().count() <= 600 + 50, "chunk too large: {}", c.text.len());
            assert!(c.start_line <= c.end_line);
        }
    }

    #[test]
    fn test_no_duplicate_tail_chunk() {
        // The last line triggers a size split; the carried overlap alone must
        // not be flushed again as a trailing chunk.
        let line = "x".repeat(200);
        let text = vec![line.as_str(); 5].join("\n");
        let chunks = chunk_text("x.txt", &text, &cfg());
        assert_eq!(chunks.len(), 1);
        assert_eq!((chunks[0].start_line, chunks[0].end_line), (1, 5));
    }

    #[test]
    fn test_crlf_lines() {
        let chunks = chunk_text("w.md", "first line of text\r\nsecond line of text\r\n", &cfg());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].end_line, 2);
        assert!(!chunks[0].text.contains('\r'));
    }

    #[test]
    fn test_deterministic() {
        let text = "# One\nsome text for section one here\n## Two\nmore text in section two here\n### Three\nfinal section text goes here";
        let c1 = chunk_text("d.md", text, &cfg());
        let c2 = chunk_text("d.md", text, &cfg());
        assert_eq!(c1, c2);
        let ids: std::collections::HashSet<_> = c1.iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids.len(), c1.len());
    }

    #[test]
    fn test_ids_depend_on_path_and_range() {
        assert_eq!(chunk_id("a.md", 1, 4), chunk_id("a.md", 1, 4));
        assert_ne!(chunk_id("a.md", 1, 4), chunk_id("b.md", 1, 4));
        assert_ne!(chunk_id("a.md", 1, 4), chunk_id("a.md", 1, 5));
    }

    #[test]
    fn test_content_hash_stable() {
        assert_eq!(content_hash("hello"), content_hash("hello"));
        assert_ne!(content_hash("hello"), content_hash("hello "));
        assert_eq!(content_hash("").len(), 64);
    }
}
