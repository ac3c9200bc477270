//! # Workspace Recall
//!
//! A local memory engine for AI assistants: it indexes the text files in a
//! workspace directory and answers natural-language queries with the most
//! relevant snippets, ready to splice into a model prompt.
//!
//! Files are chunked on line boundaries, embedded through a cached and
//! retrying provider client, and stored in SQLite next to a lexical index
//! (FTS5 when available, substring matching otherwise). Search blends
//! vector similarity with keyword relevance.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌──────────────────┐
//! │ Workspace │──▶│   Indexer    │──▶│      SQLite      │
//! │   files   │   │ Chunk+Embed  │   │ chunks+FTS5+cache│
//! └───────────┘   └──────────────┘   └────────┬─────────┘
//!                                             │
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                ┌───────────┐         ┌────────────┐
//!                │  search   │────────▶│  context   │
//!                │ (hybrid)  │         │  (prompt)  │
//!                └───────────┘         └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! recall init                       # create database
//! recall index                      # index the workspace
//! recall search "budget approval"   # ranked snippets
//! recall context "what did we decide about the budget"
//! recall embed pending              # backfill vectors after an outage
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunk`] | Line-based text chunking |
//! | [`embedding`] | Providers, embedding cache, retrying client |
//! | [`lexical`] | FTS5 and substring keyword ranking |
//! | [`store`] | Transactional chunk storage |
//! | [`indexer`] | Workspace scan and incremental passes |
//! | [`search`] | Hybrid vector + keyword ranking |
//! | [`context`] | Prompt context formatting |
//! | [`stats`] | Index statistics |
//! | [`engine`] | The [`MemoryEngine`] facade |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod chunk;
pub mod config;
pub mod context;
pub mod db;
pub mod embedding;
pub mod engine;
pub mod indexer;
pub mod lexical;
pub mod migrate;
pub mod models;
pub mod search;
pub mod stats;
pub mod store;

pub use engine::MemoryEngine;
