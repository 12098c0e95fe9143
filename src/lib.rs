//! # Journal Harness
//!
//! Ingestion and retrieval pipeline for a personal journal.
//!
//! Each saved entry is analysed by a language model, split into verbatim
//! type-tagged semantic chunks, stored, and folded into a corpus-wide
//! similarity index that grounds a conversational assistant.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────┐   ┌──────────────┐
//! │  entry   │──▶│ analyzer │──▶│ chunker │──▶│ SQLite store │
//! └──────────┘   └──────────┘   └─────────┘   └──────┬───────┘
//!                                                    ▼
//!                                 ┌─────────────────────────────┐
//!                                 │ corpus.jsonl → index rebuild│
//!                                 └──────────────┬──────────────┘
//!                        ┌───────────────────────┤
//!                        ▼                       ▼
//!                   ┌─────────┐            ┌──────────┐
//!                   │   CLI   │            │   HTTP   │
//!                   │(journal)│            │  (axum)  │
//!                   └─────────┘            └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! journal init
//! journal save --date 2025-12-15 --file 15-12-2025.md
//! journal search "¿cómo me siento con mi familia?"
//! journal chat
//! journal serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`llm`] | Chat-completions client with 429 backoff |
//! | [`analyzer`] | Entry-level structured analysis |
//! | [`chunker`] | Semantic chunking with validation and fallback |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama, local) |
//! | [`corpus`] | Cumulative chunk corpus file |
//! | [`indexer`] | Full index rebuild and persistence |
//! | [`query`] | Exact similarity search over the persisted index |
//! | [`ingest`] | Pipeline orchestration |
//! | [`chat`] | Conversational retrieval |
//! | [`import`] | Batch import of dated Markdown files |
//! | [`db`], [`migrate`], [`sqlite_store`] | SQLite persistence |
//! | [`server`] | HTTP API |
//!
//! The pure data model and algorithms live in `journal_harness_core`.

pub mod analyzer;
pub mod app;
pub mod chat;
pub mod chunker;
pub mod config;
pub mod corpus;
pub mod db;
pub mod embedding;
pub mod get;
pub mod import;
pub mod indexer;
pub mod ingest;
pub mod llm;
pub mod migrate;
pub mod query;
pub mod search;
pub mod server;
pub mod sqlite_store;
