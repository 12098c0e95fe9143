//! SQLite-backed [`EntryStore`] implementation.
//!
//! Dates are stored as `YYYY-MM-DD` text, so lexical order is date order.
//! Timestamps are Unix seconds. List-valued fields and chunk metadata are
//! stored as JSON text.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use journal_harness_core::models::{
    char_count, entry_id_for_date, parse_date, word_count, ChunkMetadata, ChunkType,
    EntryAnalysis, EntryChunk, JournalEntry, ProcessingStatus, DATE_FORMAT,
};
use journal_harness_core::store::EntryStore;

/// SQLite implementation of the [`EntryStore`] trait.
///
/// Wraps a [`SqlitePool`]; the schema comes from [`crate::migrate`].
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn date_key(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn from_ts(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).ok_or_else(|| anyhow!("timestamp out of range: {}", ts))
}

fn to_usize(v: i64) -> usize {
    v.max(0) as usize
}

fn entry_from_row(row: &SqliteRow) -> Result<JournalEntry> {
    let date: String = row.get("date");
    let status: String = row.get("status");
    let processed_at: Option<i64> = row.get("processed_at");
    Ok(JournalEntry {
        date: parse_date(&date)?,
        entry_id: row.get("entry_id"),
        raw_text: row.get("raw_text"),
        word_count: to_usize(row.get("word_count")),
        char_count: to_usize(row.get("char_count")),
        status: ProcessingStatus::parse(&status)
            .ok_or_else(|| anyhow!("unknown status '{}' for {}", status, date))?,
        last_error: row.get("last_error"),
        updated_at: from_ts(row.get("updated_at"))?,
        processed_at: processed_at.map(from_ts).transpose()?,
    })
}

fn analysis_from_row(row: &SqliteRow) -> Result<EntryAnalysis> {
    let date: String = row.get("entry_date");
    let emotions: String = row.get("emotions_json");
    let topics: String = row.get("topics_json");
    let people: Option<String> = row.get("people_json");
    let defaulted: String = row.get("defaulted_json");
    Ok(EntryAnalysis {
        entry_id: row.get("entry_id"),
        date: parse_date(&date)?,
        summary: row.get("summary"),
        emotions: serde_json::from_str(&emotions).context("corrupt emotions_json")?,
        topics: serde_json::from_str(&topics).context("corrupt topics_json")?,
        people: people
            .map(|p| serde_json::from_str(&p))
            .transpose()
            .context("corrupt people_json")?,
        intensity: row.get("intensity"),
        chunk_count: to_usize(row.get("chunk_count")),
        defaulted_fields: serde_json::from_str(&defaulted).context("corrupt defaulted_json")?,
    })
}

fn chunk_from_row(row: &SqliteRow) -> Result<EntryChunk> {
    let date: String = row.get("entry_date");
    let chunk_type: String = row.get("chunk_type");
    let metadata: String = row.get("metadata_json");
    Ok(EntryChunk {
        chunk_id: row.get("chunk_id"),
        entry_id: row.get("entry_id"),
        date: parse_date(&date)?,
        index: to_usize(row.get("chunk_index")),
        chunk_type: ChunkType::parse(&chunk_type)
            .ok_or_else(|| anyhow!("unknown chunk type '{}'", chunk_type))?,
        text: row.get("text"),
        word_count: to_usize(row.get("word_count")),
        char_count: to_usize(row.get("char_count")),
        metadata: serde_json::from_str::<ChunkMetadata>(&metadata)
            .context("corrupt metadata_json")?,
    })
}

#[async_trait]
impl EntryStore for SqliteStore {
    async fn save_entry(&self, date: NaiveDate, raw_text: &str) -> Result<JournalEntry> {
        let key = date_key(date);
        sqlx::query(
            r#"
            INSERT INTO entries (date, entry_id, raw_text, word_count, char_count,
                                 status, last_error, updated_at, processed_at)
            VALUES (?, ?, ?, ?, ?, 'pending', NULL, ?, NULL)
            ON CONFLICT(date) DO UPDATE SET
                raw_text = excluded.raw_text,
                word_count = excluded.word_count,
                char_count = excluded.char_count,
                status = 'pending',
                last_error = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&key)
        .bind(entry_id_for_date(date))
        .bind(raw_text)
        .bind(word_count(raw_text) as i64)
        .bind(char_count(raw_text) as i64)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await?;

        self.get_entry(date)
            .await?
            .ok_or_else(|| anyhow!("entry {} vanished after save", key))
    }

    async fn get_entry(&self, date: NaiveDate) -> Result<Option<JournalEntry>> {
        let row = sqlx::query("SELECT * FROM entries WHERE date = ?")
            .bind(date_key(date))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    async fn list_entries(&self) -> Result<Vec<JournalEntry>> {
        let rows = sqlx::query("SELECT * FROM entries ORDER BY date DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    async fn list_dates(&self) -> Result<Vec<NaiveDate>> {
        let rows = sqlx::query("SELECT date FROM entries ORDER BY date DESC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|r| parse_date(&r.get::<String, _>("date")))
            .collect()
    }

    async fn set_status(
        &self,
        date: NaiveDate,
        raw_text: &str,
        status: ProcessingStatus,
        last_error: Option<&str>,
    ) -> Result<bool> {
        let processed_at = (status == ProcessingStatus::Done).then(|| Utc::now().timestamp());
        let result = sqlx::query(
            r#"
            UPDATE entries
            SET status = ?, last_error = ?, processed_at = COALESCE(?, processed_at)
            WHERE date = ? AND raw_text = ?
            "#,
        )
        .bind(status.as_str())
        .bind(last_error)
        .bind(processed_at)
        .bind(date_key(date))
        .bind(raw_text)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }
        let exists = sqlx::query("SELECT 1 FROM entries WHERE date = ?")
            .bind(date_key(date))
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            bail!("no entry for {}", date);
        }
        Ok(false)
    }

    async fn replace_enrichment(
        &self,
        analysis: &EntryAnalysis,
        chunks: &[EntryChunk],
        raw_text: &str,
    ) -> Result<bool> {
        let key = date_key(analysis.date);
        let mut tx = self.pool.begin().await?;

        // Write first: the transaction must hold the write lock before the
        // text comparison below.
        sqlx::query(
            r#"
            DELETE FROM entry_chunks
            WHERE entry_date = ?
              AND EXISTS (SELECT 1 FROM entries WHERE date = ? AND raw_text = ?)
            "#,
        )
        .bind(&key)
        .bind(&key)
        .bind(raw_text)
        .execute(&mut *tx)
        .await?;

        let stored: Option<String> =
            sqlx::query_scalar("SELECT raw_text FROM entries WHERE date = ?")
                .bind(&key)
                .fetch_optional(&mut *tx)
                .await?;
        match stored {
            None => bail!("no entry for {}", analysis.date),
            Some(text) if text != raw_text => return Ok(false),
            Some(_) => {}
        }

        sqlx::query(
            r#"
            INSERT INTO entry_analysis (entry_date, entry_id, summary, emotions_json,
                                        topics_json, people_json, intensity,
                                        chunk_count, defaulted_json)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(entry_date) DO UPDATE SET
                entry_id = excluded.entry_id,
                summary = excluded.summary,
                emotions_json = excluded.emotions_json,
                topics_json = excluded.topics_json,
                people_json = excluded.people_json,
                intensity = excluded.intensity,
                chunk_count = excluded.chunk_count,
                defaulted_json = excluded.defaulted_json
            "#,
        )
        .bind(&key)
        .bind(&analysis.entry_id)
        .bind(&analysis.summary)
        .bind(serde_json::to_string(&analysis.emotions)?)
        .bind(serde_json::to_string(&analysis.topics)?)
        .bind(analysis.people.as_ref().map(serde_json::to_string).transpose()?)
        .bind(&analysis.intensity)
        .bind(analysis.chunk_count as i64)
        .bind(serde_json::to_string(&analysis.defaulted_fields)?)
        .execute(&mut *tx)
        .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO entry_chunks (chunk_id, entry_date, entry_id, chunk_index,
                                          chunk_type, text, word_count, char_count,
                                          metadata_json)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&key)
            .bind(&chunk.entry_id)
            .bind(chunk.index as i64)
            .bind(chunk.chunk_type.as_str())
            .bind(&chunk.text)
            .bind(chunk.word_count as i64)
            .bind(chunk.char_count as i64)
            .bind(serde_json::to_string(&chunk.metadata)?)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn get_analysis(&self, date: NaiveDate) -> Result<Option<EntryAnalysis>> {
        let row = sqlx::query("SELECT * FROM entry_analysis WHERE entry_date = ?")
            .bind(date_key(date))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(analysis_from_row).transpose()
    }

    async fn get_chunks(&self, date: NaiveDate) -> Result<Vec<EntryChunk>> {
        let rows =
            sqlx::query("SELECT * FROM entry_chunks WHERE entry_date = ? ORDER BY chunk_index")
                .bind(date_key(date))
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(chunk_from_row).collect()
    }
}
