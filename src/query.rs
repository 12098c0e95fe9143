//! Exact similarity search over the last successfully built index.
//!
//! The engine loads the index/metadata pair lazily and keeps it in memory.
//! Before each search it compares the metadata file's fingerprint
//! (modification time and length) with the loaded one and reloads on
//! change. Because the metadata file is renamed into place last, a reload
//! that finds mismatched generations has caught a rebuild between its two
//! renames; it waits briefly and tries once more before giving up with
//! `StaleIndex`.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{bail, Result};
use tokio::sync::RwLock;

use journal_harness_core::embedding::{normalize_l2, EmbeddingProvider};
use journal_harness_core::models::RankedChunk;
use journal_harness_core::search::rank_results;
pub use journal_harness_core::search::build_context;
use journal_harness_core::PipelineError;

use crate::indexer::{read_snapshot, ArtifactPaths, IndexSnapshot};

const STALE_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Fingerprint {
    modified: Option<SystemTime>,
    len: u64,
}

struct Loaded {
    fingerprint: Fingerprint,
    snapshot: Arc<IndexSnapshot>,
}

/// Query engine over the persisted index.
pub struct QueryEngine {
    provider: Arc<dyn EmbeddingProvider>,
    paths: ArtifactPaths,
    loaded: RwLock<Option<Loaded>>,
}

impl QueryEngine {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, paths: ArtifactPaths) -> Self {
        Self {
            provider,
            paths,
            loaded: RwLock::new(None),
        }
    }

    /// Top `k` chunks for `query`, best first, with 1-based ranks.
    ///
    /// An empty query, `k == 0`, or an index that has not been built yet
    /// yields no results.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<RankedChunk>> {
        if query.trim().is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let Some(snapshot) = self.current().await? else {
            return Ok(Vec::new());
        };
        if snapshot.is_empty() {
            return Ok(Vec::new());
        }

        if snapshot.metadata.model != self.provider.model_name() {
            tracing::warn!(
                index_model = %snapshot.metadata.model,
                query_model = %self.provider.model_name(),
                "index was built with a different embedding model"
            );
        }

        let mut vectors = self.provider.embed(&[query.to_string()]).await?;
        let Some(mut query_vec) = vectors.pop() else {
            bail!("embedding provider returned no vector for the query");
        };
        if query_vec.len() != snapshot.index.dims() {
            bail!(
                "query embedding has {} dimensions, index has {}",
                query_vec.len(),
                snapshot.index.dims()
            );
        }
        normalize_l2(&mut query_vec);

        let hits = snapshot.index.search(&query_vec, k)?;
        rank_results(&hits, &snapshot.metadata.records)
    }

    /// The loaded snapshot, reloading it if the metadata file changed.
    pub async fn current(&self) -> Result<Option<Arc<IndexSnapshot>>> {
        let Some(fingerprint) = self.fingerprint()? else {
            return Ok(None);
        };

        {
            let loaded = self.loaded.read().await;
            if let Some(l) = loaded.as_ref() {
                if l.fingerprint == fingerprint {
                    return Ok(Some(Arc::clone(&l.snapshot)));
                }
            }
        }

        let mut loaded = self.loaded.write().await;
        let snapshot = match self.load_once() {
            Err(e) if is_stale(&e) => {
                tracing::debug!("index pair mid-rebuild, retrying once");
                tokio::time::sleep(STALE_RETRY_DELAY).await;
                self.load_once()?
            }
            other => other?,
        };

        let Some(snapshot) = snapshot else {
            *loaded = None;
            return Ok(None);
        };
        let snapshot = Arc::new(snapshot);
        // cached under the pre-load fingerprint; a concurrent rebuild forces a reload
        tracing::debug!(
            generation = %snapshot.metadata.generation,
            vectors = snapshot.len(),
            "index loaded"
        );
        *loaded = Some(Loaded {
            fingerprint,
            snapshot: Arc::clone(&snapshot),
        });
        Ok(Some(snapshot))
    }

    fn load_once(&self) -> Result<Option<IndexSnapshot>> {
        read_snapshot(&self.paths)
    }

    fn fingerprint(&self) -> Result<Option<Fingerprint>> {
        match std::fs::metadata(self.paths.metadata()) {
            Ok(m) => Ok(Some(Fingerprint {
                modified: m.modified().ok(),
                len: m.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PipelineError::FileAccess(e.to_string()).into()),
        }
    }
}

fn is_stale(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<PipelineError>(),
        Some(PipelineError::StaleIndex { .. })
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indexer::Indexer;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use journal_harness_core::models::{chunk_id, ChunkMetadata, ChunkType, EntryChunk};
    use tempfile::TempDir;

    /// One dimension per keyword plus a constant bias.
    struct Keywords;

    #[async_trait]
    impl EmbeddingProvider for Keywords {
        fn model_name(&self) -> &str {
            "keywords"
        }
        fn dims(&self) -> usize {
            3
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let t = t.to_lowercase();
                    vec![
                        if t.contains("sol") { 1.0 } else { 0.0 },
                        if t.contains("lluvia") { 1.0 } else { 0.0 },
                        0.1,
                    ]
                })
                .collect())
        }
    }

    fn chunk(i: usize, text: &str) -> EntryChunk {
        EntryChunk {
            chunk_id: chunk_id("entry_2025_01_01", i),
            entry_id: "entry_2025_01_01".into(),
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            index: i,
            chunk_type: ChunkType::Facts,
            text: text.into(),
            word_count: 1,
            char_count: text.len(),
            metadata: ChunkMetadata::default(),
        }
    }

    #[tokio::test]
    async fn test_no_index_yet_is_empty() {
        let tmp = TempDir::new().unwrap();
        let engine = QueryEngine::new(Arc::new(Keywords), ArtifactPaths::new(tmp.path()));
        assert!(engine.search("sol", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_ranks_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let paths = ArtifactPaths::new(tmp.path());
        let indexer = Indexer::new(Arc::new(Keywords), paths.clone(), 8);
        let engine = QueryEngine::new(Arc::new(Keywords), paths);

        indexer
            .rebuild_from_corpus(&[chunk(0, "día de lluvia"), chunk(1, "mucho sol")])
            .await
            .unwrap();
        let hits = engine.search("¿hubo sol?", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].rank, 1);
        assert_eq!(hits[0].record.text, "mucho sol");
        assert!(hits[0].score > hits[1].score);

        indexer
            .rebuild_from_corpus(&[chunk(0, "día de lluvia")])
            .await
            .unwrap();
        // different content, so the metadata file length changes
        let hits = engine.search("sol", 5).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_k_zero_and_empty_query() {
        let tmp = TempDir::new().unwrap();
        let engine = QueryEngine::new(Arc::new(Keywords), ArtifactPaths::new(tmp.path()));
        assert!(engine.search("", 5).await.unwrap().is_empty());
        assert!(engine.search("sol", 0).await.unwrap().is_empty());
    }

    /// Writes an index file from one build next to the metadata of another.
    async fn write_mismatched_pair(indexer: &Indexer) -> IndexSnapshot {
        let first = indexer.build(&[chunk(0, "mucho sol")]).await.unwrap();
        let second = indexer.build(&[chunk(0, "mucho sol")]).await.unwrap();
        std::fs::write(
            indexer.paths().index(),
            first.index.to_bytes(&first.metadata.generation).unwrap(),
        )
        .unwrap();
        std::fs::write(
            indexer.paths().metadata(),
            serde_json::to_vec(&second.metadata).unwrap(),
        )
        .unwrap();
        second
    }

    #[tokio::test]
    async fn test_pair_completed_during_wait_is_loaded() {
        let tmp = TempDir::new().unwrap();
        let paths = ArtifactPaths::new(tmp.path());
        let indexer = Indexer::new(Arc::new(Keywords), paths.clone(), 8);
        let engine = QueryEngine::new(Arc::new(Keywords), paths);
        let second = write_mismatched_pair(&indexer).await;

        // the search polls first and parks in its retry delay; the second
        // future then writes the matching index
        let (hits, _) = tokio::join!(engine.search("sol", 5), async {
            std::fs::write(
                indexer.paths().index(),
                second.index.to_bytes(&second.metadata.generation).unwrap(),
            )
            .unwrap();
        });
        let hits = hits.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record.text, "mucho sol");

        let loaded = engine.current().await.unwrap().unwrap();
        assert_eq!(loaded.metadata.generation, second.metadata.generation);
    }

    #[tokio::test]
    async fn test_persistent_mismatch_is_stale_index() {
        let tmp = TempDir::new().unwrap();
        let paths = ArtifactPaths::new(tmp.path());
        let indexer = Indexer::new(Arc::new(Keywords), paths.clone(), 8);
        let engine = QueryEngine::new(Arc::new(Keywords), paths);
        write_mismatched_pair(&indexer).await;

        let err = engine.search("sol", 5).await.unwrap_err();
        let pipeline = err.downcast_ref::<PipelineError>().unwrap();
        assert_eq!(pipeline.code(), "stale_index");
    }
}
