//! # Journal Harness Core
//!
//! Shared logic for Journal Harness: data models, model-output decoding,
//! chunk validation and sanitization, the exact flat vector index, ranking,
//! and the entry store abstraction.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Everything
//! here is deterministic and testable without a language model or an
//! embedding backend.

pub mod analysis;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod models;
pub mod search;
pub mod store;

pub use error::PipelineError;
