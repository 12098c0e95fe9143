//! Ranking of index hits and assembly of the retrieval context block.
//!
//! The query engine embeds the question and asks the
//! [`FlatIndex`](crate::index::FlatIndex) for the top positions. This module
//! joins those positions back to their [`IndexRecord`]s and renders them as
//! the context passed to the chat model.
//!
//! # Context format
//!
//! ```text
//! [Date: 2025-12-14]
//! <chunk text>
//!
//! ---
//!
//! [Date: 2025-12-15]
//! <chunk text>
//! ```

use anyhow::{bail, Result};

use crate::models::{IndexRecord, RankedChunk};

/// Separator placed between chunks in the context block.
pub const CONTEXT_SEPARATOR: &str = "\n\n---\n\n";

/// Turn `(position, score)` hits into ranked chunks with 1-based ranks.
///
/// Hits must already be in descending score order. A position without a
/// record means the index and metadata are misaligned, which is an error.
pub fn rank_results(hits: &[(usize, f32)], records: &[IndexRecord]) -> Result<Vec<RankedChunk>> {
    hits.iter()
        .enumerate()
        .map(|(i, &(position, score))| {
            let Some(record) = records.get(position) else {
                bail!(
                    "index position {} has no metadata record ({} records)",
                    position,
                    records.len()
                );
            };
            Ok(RankedChunk {
                record: record.clone(),
                rank: i + 1,
                score,
            })
        })
        .collect()
}

/// Render ranked chunks as a dated context block, in rank order.
pub fn build_context(results: &[RankedChunk]) -> String {
    results
        .iter()
        .map(|r| format!("[Date: {}]\n{}", r.record.date, r.record.text))
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChunkMetadata, ChunkType};
    use chrono::NaiveDate;

    fn record(day: u32, text: &str) -> IndexRecord {
        let date = NaiveDate::from_ymd_opt(2025, 12, day).unwrap();
        IndexRecord {
            chunk_id: format!("entry_2025_12_{:02}_chunk_0", day),
            entry_id: format!("entry_2025_12_{:02}", day),
            date,
            index: 0,
            chunk_type: ChunkType::Facts,
            text: text.to_string(),
            metadata: ChunkMetadata::default(),
        }
    }

    #[test]
    fn test_rank_is_one_based() {
        let records = vec![record(1, "a"), record(2, "b")];
        let ranked = rank_results(&[(1, 0.9), (0, 0.2)], &records).unwrap();
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[0].record.text, "b");
        assert_eq!(ranked[1].rank, 2);
    }

    #[test]
    fn test_rank_rejects_missing_record() {
        assert!(rank_results(&[(5, 0.1)], &[record(1, "a")]).is_err());
    }

    #[test]
    fn test_build_context_format() {
        let records = vec![record(14, "Trabajé mucho."), record(15, "Cené con mi familia.")];
        let ranked = rank_results(&[(0, 0.5), (1, 0.4)], &records).unwrap();
        assert_eq!(
            build_context(&ranked),
            "[Date: 2025-12-14]\nTrabajé mucho.\n\n---\n\n[Date: 2025-12-15]\nCené con mi familia."
        );
    }

    #[test]
    fn test_build_context_empty() {
        assert_eq!(build_context(&[]), "");
    }
}
