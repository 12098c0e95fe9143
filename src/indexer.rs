//! Full rebuild of the similarity index from the chunk corpus.
//!
//! Every rebuild embeds every corpus chunk, L2-normalizes the vectors, and
//! writes a fresh index/metadata pair into `storage.dir`:
//!
//! | File | Contents |
//! |------|----------|
//! | `corpus.jsonl` | the chunk corpus (see [`crate::corpus`]) |
//! | `index.bin` | [`FlatIndex`] rows tagged with the generation id |
//! | `metadata.json` | generation id, model, dims, build time, corpus digest, records |
//!
//! Both index files carry the same freshly minted generation id (UUID v4).
//! The index file is renamed into place first and the metadata file last,
//! so a reader that finds matching generations has a complete pair.
//!
//! # Invariant
//!
//! `index.len() == records.len()`, and `records[i]` describes corpus
//! chunk `i`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use journal_harness_core::embedding::{normalize_l2, EmbeddingProvider};
use journal_harness_core::index::FlatIndex;
use journal_harness_core::models::{EntryChunk, IndexRecord};
use journal_harness_core::PipelineError;

use crate::corpus::{corpus_digest, write_atomic};

pub const CORPUS_FILE: &str = "corpus.jsonl";
pub const INDEX_FILE: &str = "index.bin";
pub const METADATA_FILE: &str = "metadata.json";

/// Locations of the corpus-wide artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactPaths {
    dir: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn corpus(&self) -> PathBuf {
        self.dir.join(CORPUS_FILE)
    }

    pub fn index(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    pub fn metadata(&self) -> PathBuf {
        self.dir.join(METADATA_FILE)
    }
}

/// Contents of `metadata.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    pub generation: String,
    pub model: String,
    pub dims: usize,
    pub built_at: DateTime<Utc>,
    pub corpus_sha256: String,
    pub records: Vec<IndexRecord>,
}

/// An index together with its parallel metadata.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    pub index: FlatIndex,
    pub metadata: IndexMetadata,
}

impl IndexSnapshot {
    pub fn len(&self) -> usize {
        self.metadata.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.records.is_empty()
    }
}

/// Embed `texts` in batches of `batch_size`, checking count and dimension.
pub async fn embed_batched(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let mut vectors = Vec::with_capacity(texts.len());
    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = provider.embed(batch).await?;
        if embedded.len() != batch.len() {
            bail!(
                "embedding provider returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            );
        }
        for v in embedded {
            if v.len() != provider.dims() {
                bail!(
                    "embedding has {} dimensions, provider '{}' declares {}",
                    v.len(),
                    provider.model_name(),
                    provider.dims()
                );
            }
            vectors.push(v);
        }
    }
    Ok(vectors)
}

/// Builds and persists index snapshots.
pub struct Indexer {
    provider: Arc<dyn EmbeddingProvider>,
    paths: ArtifactPaths,
    batch_size: usize,
}

impl Indexer {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, paths: ArtifactPaths, batch_size: usize) -> Self {
        Self {
            provider,
            paths,
            batch_size,
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Embed every chunk and build an in-memory snapshot under a new generation.
    pub async fn build(&self, chunks: &[EntryChunk]) -> Result<IndexSnapshot> {
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            embed_batched(self.provider.as_ref(), &texts, self.batch_size).await?
        };

        let mut index = FlatIndex::new(self.provider.dims());
        for mut v in vectors {
            normalize_l2(&mut v);
            index.add(&v)?;
        }

        let metadata = IndexMetadata {
            generation: Uuid::new_v4().to_string(),
            model: self.provider.model_name().to_string(),
            dims: self.provider.dims(),
            built_at: Utc::now(),
            corpus_sha256: corpus_digest(chunks),
            records: chunks.iter().map(IndexRecord::from).collect(),
        };

        if index.len() != metadata.records.len() {
            bail!(
                "index has {} vectors but {} records",
                index.len(),
                metadata.records.len()
            );
        }

        Ok(IndexSnapshot { index, metadata })
    }

    /// Write the pair: index first, metadata last.
    pub fn persist(&self, snapshot: &IndexSnapshot) -> Result<()> {
        let bytes = snapshot.index.to_bytes(&snapshot.metadata.generation)?;
        write_atomic(&self.paths.index(), &bytes)?;
        let json = serde_json::to_vec_pretty(&snapshot.metadata)?;
        write_atomic(&self.paths.metadata(), &json)?;
        Ok(())
    }

    /// Rebuild the whole index from `chunks` and persist it.
    pub async fn rebuild_from_corpus(&self, chunks: &[EntryChunk]) -> Result<IndexSnapshot> {
        let snapshot = self.build(chunks).await?;
        self.persist(&snapshot)?;
        tracing::info!(
            generation = %snapshot.metadata.generation,
            vectors = snapshot.len(),
            model = %snapshot.metadata.model,
            "index rebuilt"
        );
        Ok(snapshot)
    }
}

/// Read the persisted pair. `Ok(None)` when nothing has been built yet.
///
/// A generation mismatch between the two files is reported as
/// [`PipelineError::StaleIndex`].
pub fn read_snapshot(paths: &ArtifactPaths) -> Result<Option<IndexSnapshot>> {
    let meta_path = paths.metadata();
    if !meta_path.exists() {
        return Ok(None);
    }

    let meta_bytes = std::fs::read(&meta_path)
        .map_err(|e| PipelineError::FileAccess(format!("{}: {}", meta_path.display(), e)))?;
    let metadata: IndexMetadata = serde_json::from_slice(&meta_bytes)
        .with_context(|| format!("Corrupt index metadata: {}", meta_path.display()))?;

    let index_path = paths.index();
    let index_bytes = std::fs::read(&index_path)
        .map_err(|e| PipelineError::FileAccess(format!("{}: {}", index_path.display(), e)))?;
    let (generation, index) = FlatIndex::from_bytes(&index_bytes)
        .with_context(|| format!("Corrupt index file: {}", index_path.display()))?;

    if generation != metadata.generation {
        return Err(PipelineError::StaleIndex {
            index: generation,
            metadata: metadata.generation,
        }
        .into());
    }
    if index.len() != metadata.records.len() {
        bail!(
            "index has {} vectors but metadata lists {} records",
            index.len(),
            metadata.records.len()
        );
    }

    Ok(Some(IndexSnapshot { index, metadata }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use journal_harness_core::models::{chunk_id, ChunkMetadata, ChunkType};
    use tempfile::TempDir;

    /// Two-dimensional embedding: (length, 1).
    struct Lengths;

    #[async_trait]
    impl EmbeddingProvider for Lengths {
        fn model_name(&self) -> &str {
            "lengths"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
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

    fn indexer(dir: &Path, batch: usize) -> Indexer {
        Indexer::new(Arc::new(Lengths), ArtifactPaths::new(dir), batch)
    }

    #[tokio::test]
    async fn test_records_align_with_vectors() {
        let tmp = TempDir::new().unwrap();
        let chunks: Vec<_> = (0..5).map(|i| chunk(i, &"x".repeat(i + 1))).collect();
        let snap = indexer(tmp.path(), 2).rebuild_from_corpus(&chunks).await.unwrap();
        assert_eq!(snap.index.len(), 5);
        for (i, rec) in snap.metadata.records.iter().enumerate() {
            assert_eq!(rec.chunk_id, chunks[i].chunk_id);
        }
        let v = snap.index.vector(0).unwrap();
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_persisted_pair_reads_back() {
        let tmp = TempDir::new().unwrap();
        let idx = indexer(tmp.path(), 8);
        let snap = idx.rebuild_from_corpus(&[chunk(0, "hola")]).await.unwrap();
        let read = read_snapshot(idx.paths()).unwrap().unwrap();
        assert_eq!(read.metadata.generation, snap.metadata.generation);
        assert_eq!(read.index, snap.index);
    }

    #[tokio::test]
    async fn test_each_rebuild_has_new_generation() {
        let tmp = TempDir::new().unwrap();
        let idx = indexer(tmp.path(), 8);
        let a = idx.rebuild_from_corpus(&[chunk(0, "a")]).await.unwrap();
        let b = idx.rebuild_from_corpus(&[chunk(0, "a")]).await.unwrap();
        assert_ne!(a.metadata.generation, b.metadata.generation);
    }

    #[tokio::test]
    async fn test_generation_mismatch_is_stale() {
        let tmp = TempDir::new().unwrap();
        let idx = indexer(tmp.path(), 8);
        let first = idx.build(&[chunk(0, "a")]).await.unwrap();
        let second = idx.build(&[chunk(0, "a")]).await.unwrap();
        // index from one build, metadata from another
        std::fs::create_dir_all(tmp.path()).unwrap();
        std::fs::write(
            idx.paths().index(),
            first.index.to_bytes(&first.metadata.generation).unwrap(),
        )
        .unwrap();
        std::fs::write(
            idx.paths().metadata(),
            serde_json::to_vec(&second.metadata).unwrap(),
        )
        .unwrap();

        let err = read_snapshot(idx.paths()).unwrap_err();
        let pipeline = err.downcast_ref::<PipelineError>().unwrap();
        assert_eq!(pipeline.code(), "stale_index");
    }

    #[tokio::test]
    async fn test_empty_corpus_builds_empty_pair() {
        let tmp = TempDir::new().unwrap();
        let idx = indexer(tmp.path(), 8);
        let snap = idx.rebuild_from_corpus(&[]).await.unwrap();
        assert!(snap.is_empty());
        assert!(read_snapshot(idx.paths()).unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_nothing_built_yet() {
        let tmp = TempDir::new().unwrap();
        assert!(read_snapshot(&ArtifactPaths::new(tmp.path())).unwrap().is_none());
    }
}
