//! Exact flat inner-product index and its on-disk encoding.
//!
//! Vectors are stored row-major in one contiguous buffer and searched by
//! brute force. With normalized inputs the inner product is cosine
//! similarity. There is no approximate structure and no incremental
//! delete: the index is rebuilt wholesale from the corpus.
//!
//! # File layout (`index.bin`)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | magic `JHIX` |
//! | 4 | 4 | format version (u32 LE) |
//! | 8 | 2 | generation id length `g` (u16 LE) |
//! | 10 | g | generation id (UTF-8) |
//! | 10+g | 4 | dims (u32 LE) |
//! | 14+g | 8 | vector count (u64 LE) |
//! | 22+g | 4·dims·count | rows of f32 LE |
//!
//! The generation id ties the file to the `metadata.json` written by the
//! same rebuild.


use anyhow::{bail, Context, Result};

use crate::embedding::{blob_to_vec, dot, vec_to_blob};

pub const INDEX_MAGIC: &[u8; 4] = b"JHIX";
pub const INDEX_FORMAT_VERSION: u32 = 1;

/// Exact inner-product index over fixed-dimension vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatIndex {
    dims: usize,
    data: Vec<f32>,
}

impl FlatIndex {
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append one vector. Its position is the next free slot.
    pub fn add(&mut self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            bail!(
                "vector has {} dimensions, index expects {}",
                vector.len(),
                self.dims
            );
        }
        self.data.extend_from_slice(vector);
        Ok(())
    }

    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        let start = position * self.dims;
        Some(&self.data[start..start + self.dims])
    }

    /// Top `k` positions by descending inner product.
    ///
    /// Ties keep the lower position first and NaN scores rank last. `k`
    /// larger than the index is clamped; `k == 0` returns nothing.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dims {
            bail!(
                "query has {} dimensions, index expects {}",
                query.len(),
                self.dims
            );
        }
        let k = k.min(self.len());
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .data
            .chunks_exact(self.dims)
            .enumerate()
            .map(|(i, row)| (i, dot(row, query)))
            .collect();

        // sort_by is stable, so equal scores stay in position order
        scored.sort_by(|a, b| rank_key(b.1).total_cmp(&rank_key(a.1)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Encode the index tagged with `generation`.
    pub fn to_bytes(&self, generation: &str) -> Result<Vec<u8>> {
        let gen = generation.as_bytes();
        let gen_len = u16::try_from(gen.len()).context("generation id too long")?;
        let dims = u32::try_from(self.dims).context("dimension count too large")?;

        let mut out = Vec::with_capacity(22 + gen.len() + self.data.len() * 4);
        out.extend_from_slice(INDEX_MAGIC);
        out.extend_from_slice(&INDEX_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&gen_len.to_le_bytes());
        out.extend_from_slice(gen);
        out.extend_from_slice(&dims.to_le_bytes());
        out.extend_from_slice(&(self.len() as u64).to_le_bytes());
        out.extend_from_slice(&vec_to_blob(&self.data));
        Ok(out)
    }

    /// Decode an index file, returning its generation id and the index.
    pub fn from_bytes(bytes: &[u8]) -> Result<(String, FlatIndex)> {
        let mut r = Reader { bytes, pos: 0 };

        if r.take(4)? != INDEX_MAGIC {
            bail!("not an index file (bad magic)");
        }
        let version = u32::from_le_bytes(r.array()?);
        if version != INDEX_FORMAT_VERSION {
            bail!("unsupported index format version {}", version);
        }
        let gen_len = u16::from_le_bytes(r.array()?) as usize;
        let generation = std::str::from_utf8(r.take(gen_len)?)
            .context("generation id is not UTF-8")?
            .to_string();
        let dims = u32::from_le_bytes(r.array()?) as usize;
        let count = u64::from_le_bytes(r.array()?) as usize;

        let expected = dims
            .checked_mul(count)
            .and_then(|n| n.checked_mul(4))
            .context("index header overflows")?;
        let body = r.take(expected)?;
        if r.pos != bytes.len() {
            bail!(
                "index file has {} trailing bytes",
                bytes.len() - r.pos
            );
        }

        Ok((
            generation,
            FlatIndex {
                dims,
                data: blob_to_vec(body),
            },
        ))
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .context("index file is truncated")?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}
