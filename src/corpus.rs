//! The cumulative chunk corpus (`corpus.jsonl`).
//!
//! One [`EntryChunk`] per line, in the order the index is built from.
//! Re-processing an entry replaces its chunks in place, so the positions of
//! other entries' chunks do not move. A new entry's chunks are appended.
//!
//! The file is rewritten through a temporary file and a rename, so readers
//! never see a half-written corpus.

use std::path::Path;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};

use journal_harness_core::models::EntryChunk;

/// Read the corpus. A missing file is an empty corpus.
pub fn load_corpus(path: &Path) -> Result<Vec<EntryChunk>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read corpus: {}", path.display()))?;

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("Corrupt corpus line {} in {}", n + 1, path.display()))
        })
        .collect()
}

/// Replace every chunk of `entry_id` with `chunks`.
///
/// The new chunks take the position of the first old one; when the entry
/// was not in the corpus they are appended.
pub fn merge_entry(corpus: Vec<EntryChunk>, entry_id: &str, chunks: &[EntryChunk]) -> Vec<EntryChunk> {
    let insert_at = corpus.iter().position(|c| c.entry_id == entry_id);
    let mut merged: Vec<EntryChunk> = corpus
        .into_iter()
        .filter(|c| c.entry_id != entry_id)
        .collect();
    let at = insert_at.unwrap_or(merged.len()).min(merged.len());
    merged.splice(at..at, chunks.iter().cloned());
    merged
}

/// Write the corpus atomically.
pub fn write_corpus(path: &Path, chunks: &[EntryChunk]) -> Result<()> {
    let mut out = String::new();
    for c in chunks {
        out.push_str(&serde_json::to_string(c)?);
        out.push('\n');
    }
    write_atomic(path, out.as_bytes())
}

/// SHA-256 over the corpus' chunk ids and texts, in order.
pub fn corpus_digest(chunks: &[EntryChunk]) -> String {
    let mut hasher = Sha256::new();
    for c in chunks {
        hasher.update(c.chunk_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(c.text.as_bytes());
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

/// Write `bytes` to `path` via a sibling temporary file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = std::path::PathBuf::from(tmp);

    std::fs::write(&tmp, bytes)
        .with_context(|| format!("Failed to write: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to move {} into place", path.display()))?;
    Ok(())
}
