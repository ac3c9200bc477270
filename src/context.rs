//! Prompt-ready context blocks.
//!
//! Turns search hits into a single delimited block a host can splice into a
//! model prompt. No hits yields the empty string, which hosts treat as
//! "no context".

use crate::models::SearchHit;

pub const CONTEXT_OPEN: &str = "<recalled_context>";
pub const CONTEXT_CLOSE: &str = "</recalled_context>";
const ENTRY_SEPARATOR: &str = "\n---\n";

/// Format `hits` as one delimited block, most relevant first.
///
/// Each entry names its source path and first line, followed by an excerpt
/// of at most `excerpt_chars` characters.
pub fn format_context(hits: &[SearchHit], excerpt_chars: usize) -> String {
    if hits.is_empty() {
        return String::new();
    }

    let entries: Vec<String> = hits
        .iter()
        .map(|hit| {
            format!(
                "[{} line {}]\n{}",
                hit.path,
                hit.start_line,
                excerpt(&hit.text, excerpt_chars)
            )
        })
        .collect();

    format!(
        "{}\n{}\n{}",
        CONTEXT_OPEN,
        entries.join(ENTRY_SEPARATOR),
        CONTEXT_CLOSE
    )
}

/// Trim `text` and cut it to `max_chars` characters, marking the cut with `...`.
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    match trimmed.char_indices().nth(max_chars) {
        None => trimmed.to_string(),
        Some((cut, _)) => format!("{}...", trimmed[..cut].trim_end()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(path: &str, start: i64, text: &str) -> SearchHit {
        SearchHit {
            path: path.to_string(),
            text: text.to_string(),
            score: 0.8,
            start_line: start,
            end_line: start + 1,
            vector_score: 0.8,
            keyword_score: 0.8,
        }
    }

    #[test]
    fn test_no_hits_is_empty_string() {
        assert_eq!(format_context(&[], 400), "");
    }

    #[test]
    fn test_block_is_delimited_and_ordered() {
        let out = format_context(
            &[
                hit("a.md", 1, "# Title\nThe quarterly budget was approved."),
                hit("notes/b.md", 12, "Grocery list: milk, eggs."),
            ],
            400,
        );
        assert!(out.starts_with(CONTEXT_OPEN));
        assert!(out.ends_with(CONTEXT_CLOSE));
        assert!(out.contains("[a.md line 1]\n# Title\nThe quarterly budget was approved."));
        assert!(out.contains("---\n[notes/b.md line 12]"));
        assert!(out.find("a.md").unwrap() < out.find("notes/b.md").unwrap());
    }

    #[test]
    fn test_excerpt_truncates_on_char_boundary() {
        assert_eq!(excerpt("  short  ", 10), "short");
        assert_eq!(excerpt("abcdef", 6), "abcdef");
        assert_eq!(excerpt("abcdefgh", 3), "abc...");
        // Multi-byte characters must not be split.
        assert_eq!(excerpt("héllo wörld", 4), "héll...");
        assert_eq!(excerpt("日本語テキスト", 2), "日本...");
    }
}
