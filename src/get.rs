//! Entry listing and retrieval by date.
//!
//! Used by the `journal list` and `journal get` CLI commands; the HTTP
//! server calls [`entry_detail`] directly.

use anyhow::{bail, Result};
use chrono::NaiveDate;

use journal_harness_core::models::DATE_FORMAT;
use journal_harness_core::store::{entry_detail, Enrichment, EntryStore};

/// Print every entry, most recent first.
pub async fn run_list(store: &dyn EntryStore) -> Result<()> {
    let entries = store.list_entries().await?;
    if entries.is_empty() {
        println!("No entries.");
        return Ok(());
    }

    for e in &entries {
        println!(
            "{}  {:<8} {:>5} words{}",
            e.date.format(DATE_FORMAT),
            e.status.as_str(),
            e.word_count,
            e.last_error
                .as_deref()
                .map(|err| format!("  ({})", err))
                .unwrap_or_default()
        );
    }
    println!("{} entries", entries.len());
    Ok(())
}

/// Print one entry with its analysis and chunks.
pub async fn run_get(store: &dyn EntryStore, date: NaiveDate, json: bool) -> Result<()> {
    let Some(detail) = entry_detail(store, date).await? else {
        bail!("no entry for {}", date);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let entry = &detail.entry;
    println!("--- {} ({}) ---", entry.date.format(DATE_FORMAT), entry.entry_id);
    println!("status: {}", entry.status);
    println!("words: {}  chars: {}", entry.word_count, entry.char_count);
    println!();
    println!("{}", entry.raw_text.trim_end());

    match &detail.enrichment {
        Enrichment::NotProcessed { status, last_error } => {
            println!();
            println!("not processed ({})", status);
            if let Some(err) = last_error {
                println!("  last error: {}", err);
            }
        }
        Enrichment::Processed { analysis, chunks } => {
            println!();
            println!("summary: {}", analysis.summary);
            println!("emotions: {}", analysis.emotions.join(", "));
            println!("topics: {}", analysis.topics.join(", "));
            if let Some(people) = &analysis.people {
                println!("people: {}", people.join(", "));
            }
            if let Some(intensity) = &analysis.intensity {
                println!("intensity: {}", intensity);
            }
            println!();
            println!("chunks: {}", chunks.len());
            for c in chunks {
                println!("  [{}] {} ({} words)", c.index, c.chunk_type, c.word_count);
                println!("      {}", c.text);
            }
        }
    }
    Ok(())
}
