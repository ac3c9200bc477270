//! TOML configuration for the recall engine.
//!
//! Every section has defaults, so a config file only has to name the
//! workspace root. [`load_config`] parses and validates a file;
//! [`Config::for_workspace`] builds the all-defaults config in code.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/recall.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_deny_dirs")]
    pub deny_dirs: Vec<String>,
    #[serde(default = "default_deny_files")]
    pub deny_files: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl WorkspaceConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extensions: default_extensions(),
            deny_dirs: default_deny_dirs(),
            deny_files: default_deny_files(),
            exclude_globs: Vec::new(),
            max_file_bytes: default_max_file_bytes(),
            follow_symlinks: false,
        }
    }
}

fn default_extensions() -> Vec<String> {
    [
        "md", "markdown", "txt", "text", "rst", "org", "html", "htm", "json", "jsonl", "csv",
        "tsv", "yaml", "yml", "toml", "xml",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_deny_dirs() -> Vec<String> {
    [
        ".git",
        ".hg",
        ".svn",
        "node_modules",
        "vendor",
        "target",
        "dist",
        "build",
        "out",
        "__pycache__",
        ".venv",
        "venv",
        "sessions",
        "logs",
        "tmp",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_deny_files() -> Vec<String> {
    [
        "package-lock.json",
        "yarn.lock",
        "pnpm-lock.yaml",
        "Cargo.lock",
        ".DS_Store",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_max_file_bytes() -> u64 {
    100 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chars")]
    pub max_chars: usize,
    #[serde(default = "default_overlap_lines")]
    pub overlap_lines: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: default_max_chars(),
            overlap_lines: default_overlap_lines(),
            min_chars: default_min_chars(),
        }
    }
}

fn default_max_chars() -> usize {
    600
}
fn default_overlap_lines() -> usize {
    3
}
fn default_min_chars() -> usize {
    20
}

/// Which lexical ranking backend to use.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LexicalMode {
    /// Use FTS5 when the SQLite build has it, otherwise substring matching.
    #[default]
    Auto,
    Fts5,
    Substring,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f64,
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f64,
    #[serde(default = "default_min_score")]
    pub min_score: f64,
    #[serde(default = "default_context_min_score")]
    pub context_min_score: f64,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_context_snippets")]
    pub context_snippets: usize,
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    #[serde(default)]
    pub lexical: LexicalMode,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
            min_score: default_min_score(),
            context_min_score: default_context_min_score(),
            top_k: default_top_k(),
            context_snippets: default_context_snippets(),
            excerpt_chars: default_excerpt_chars(),
            stale_after_secs: default_stale_after_secs(),
            lexical: LexicalMode::Auto,
        }
    }
}

fn default_vector_weight() -> f64 {
    0.7
}
fn default_keyword_weight() -> f64 {
    0.3
}
fn default_min_score() -> f64 {
    0.3
}
fn default_context_min_score() -> f64 {
    0.25
}
fn default_top_k() -> usize {
    5
}
fn default_context_snippets() -> usize {
    3
}
fn default_excerpt_chars() -> usize {
    400
}
fn default_stale_after_secs() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

impl Config {
    /// All-defaults config for a workspace, with embeddings disabled.
    pub fn for_workspace(root: impl Into<PathBuf>, db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            workspace: WorkspaceConfig::new(root),
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.max_chars == 0 {
            bail!("chunking.max_chars must be > 0");
        }

        let r = &self.retrieval;
        for (name, w) in [
            ("retrieval.vector_weight", r.vector_weight),
            ("retrieval.keyword_weight", r.keyword_weight),
            ("retrieval.min_score", r.min_score),
            ("retrieval.context_min_score", r.context_min_score),
        ] {
            if !(0.0..=1.0).contains(&w) {
                bail!("{} must be in [0.0, 1.0]", name);
            }
        }
        if r.vector_weight + r.keyword_weight > 1.0 + 1e-9 {
            bail!("retrieval.vector_weight + retrieval.keyword_weight must not exceed 1.0");
        }
        if r.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }
        if self.embedding.is_enabled() && self.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                self.embedding.provider
            );
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0 when set");
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_file_gets_defaults() {
        let config: Config = toml::from_str("[workspace]\nroot = \"/tmp/notes\"\n").unwrap();
        config.validate().unwrap();
        assert_eq!(config.chunking.max_chars, 600);
        assert_eq!(config.chunking.overlap_lines, 3);
        assert_eq!(config.retrieval.min_score, 0.3);
        assert_eq!(config.retrieval.context_min_score, 0.25);
        assert_eq!(config.retrieval.lexical, LexicalMode::Auto);
        assert_eq!(config.embedding.max_retries, 2);
        assert!(!config.embedding.is_enabled());
        assert!(config.workspace.extensions.iter().any(|e| e == "md"));
        assert_eq!(config.workspace.max_file_bytes, 100 * 1024);
    }

    #[test]
    fn test_weights_over_one_rejected() {
        let mut config = Config::for_workspace("/tmp/notes", "/tmp/db.sqlite");
        config.retrieval.vector_weight = 0.8;
        config.retrieval.keyword_weight = 0.3;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enabled_provider_needs_model() {
        let mut config = Config::for_workspace("/tmp/notes", "/tmp/db.sqlite");
        config.embedding.provider = "ollama".to_string();
        assert!(config.validate().is_err());
        config.embedding.model = Some("nomic-embed-text".to_string());
        config.validate().unwrap();
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let mut config = Config::for_workspace("/tmp/notes", "/tmp/db.sqlite");
        config.embedding.provider = "carrier-pigeon".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lexical_mode_parses_lowercase() {
        let config: Config = toml::from_str(
            "[workspace]\nroot = \"/tmp\"\n[retrieval]\nlexical = \"substring\"\n",
        )
        .unwrap();
        assert_eq!(config.retrieval.lexical, LexicalMode::Substring);
    }
}
