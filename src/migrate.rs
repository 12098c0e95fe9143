//! Schema creation for the entry store.
//!
//! | Table | Key | Contents |
//! |-------|-----|----------|
//! | `entries` | `date` | raw text, counts, processing status |
//! | `entry_analysis` | `entry_date` | one analysis per entry |
//! | `entry_chunks` | `chunk_id` | chunks, unique per `(entry_date, chunk_index)` |
//!
//! Every statement is idempotent, so migrations run on each startup.

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Connect and create the schema, then close the pool (`journal init`).
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create any missing tables and indexes on an open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entries (
            date TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL UNIQUE,
            raw_text TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            char_count INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            last_error TEXT,
            updated_at INTEGER NOT NULL,
            processed_at INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entry_analysis (
            entry_date TEXT PRIMARY KEY,
            entry_id TEXT NOT NULL,
            summary TEXT NOT NULL,
            emotions_json TEXT NOT NULL DEFAULT '[]',
            topics_json TEXT NOT NULL DEFAULT '[]',
            people_json TEXT,
            intensity TEXT,
            chunk_count INTEGER NOT NULL,
            defaulted_json TEXT NOT NULL DEFAULT '[]',
            FOREIGN KEY (entry_date) REFERENCES entries(date) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS entry_chunks (
            chunk_id TEXT PRIMARY KEY,
            entry_date TEXT NOT NULL,
            entry_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            chunk_type TEXT NOT NULL,
            text TEXT NOT NULL,
            word_count INTEGER NOT NULL,
            char_count INTEGER NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            UNIQUE(entry_date, chunk_index),
            FOREIGN KEY (entry_date) REFERENCES entries(date) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entry_chunks_date ON entry_chunks(entry_date)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_status ON entries(status)")
        .execute(pool)
        .await?;

    Ok(())
}
