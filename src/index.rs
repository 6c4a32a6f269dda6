//! In-memory cosine similarity index over pre-built JSONL embedding files.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::embedder::Embedder;
use crate::error::{PipelineError, Result};

/// One stored row: the embedded text, its payload, and its vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry<T> {
    /// Insertion order within the corpus; breaks score ties.
    pub position: usize,
    /// Text that was submitted to the embedding model.
    pub text: String,
    /// Payload returned on a hit.
    pub item: T,
    /// Model embedding vector.
    pub embedding: Vec<f32>,
}

/// A query hit with its cosine similarity.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    /// Stored payload.
    pub item: T,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
    /// Corpus insertion position of the hit.
    pub position: usize,
}

/// Top-k similarity search over one immutable corpus.
pub struct SimilarityIndex<T> {
    source: PathBuf,
    entries: Vec<IndexEntry<T>>,
    dimensions: usize,
    embedder: Arc<dyn Embedder>,
}

impl<T: Clone> SimilarityIndex<T> {
    /// Loads a JSONL index written by [`write_index`].
    ///
    /// Any problem with the file is reported as [`PipelineError::IndexUnavailable`]:
    /// it means the operator has not built (or has mis-built) the index.
    pub fn load(path: &Path, embedder: Arc<dyn Embedder>) -> Result<Self>
    where
        T: DeserializeOwned,
    {
        let unavailable = |reason: String| PipelineError::IndexUnavailable {
            path: path.to_path_buf(),
            reason,
        };
        let file = File::open(path).map_err(|err| match err.kind() {
            ErrorKind::NotFound => unavailable("index has not been built".to_string()),
            _ => unavailable(format!("failed to open: {err}")),
        })?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line =
                line.map_err(|err| unavailable(format!("failed to read line {}: {err}", line_no + 1)))?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: IndexEntry<T> = serde_json::from_str(&line)
                .map_err(|err| unavailable(format!("invalid entry at line {}: {err}", line_no + 1)))?;
            entries.push(entry);
        }
        let index = Self::from_entries(path, entries, embedder)?;
        info!(
            index = %path.display(),
            entries = index.len(),
            dimensions = index.dimensions,
            "loaded similarity index"
        );
        Ok(index)
    }

    /// Builds an index from entries already in memory.
    pub fn from_entries(
        source: &Path,
        mut entries: Vec<IndexEntry<T>>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let unavailable = |reason: String| PipelineError::IndexUnavailable {
            path: source.to_path_buf(),
            reason,
        };
        let dimensions = match entries.first() {
            Some(entry) => entry.embedding.len(),
            None => return Err(unavailable("index is empty".to_string())),
        };
        if dimensions == 0 {
            return Err(unavailable("entries carry no embedding".to_string()));
        }
        if let Some(bad) = entries.iter().find(|e| e.embedding.len() != dimensions) {
            return Err(unavailable(format!(
                "entry {} has {} dimensions, expected {}",
                bad.position,
                bad.embedding.len(),
                dimensions
            )));
        }
        entries.sort_by_key(|entry| entry.position);
        Ok(Self {
            source: source.to_path_buf(),
            entries,
            dimensions,
            embedder,
        })
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries (never true for a loaded index).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding width shared by every entry.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Embeds `text` and returns the `k` most similar entries.
    pub fn query(&self, text: &str, k: usize) -> Result<Vec<Scored<T>>> {
        let vector = self.embedder.embed(text)?;
        self.query_vector(&vector, k)
    }

    /// Returns the `k` entries most similar to `vector`, best first.
    ///
    /// Equal scores keep corpus insertion order.
    pub fn query_vector(&self, vector: &[f32], k: usize) -> Result<Vec<Scored<T>>> {
        if k == 0 {
            return Err(PipelineError::InvalidQuery(
                "top-k must be greater than zero".to_string(),
            ));
        }
        if vector.len() != self.dimensions {
            return Err(PipelineError::IndexUnavailable {
                path: self.source.clone(),
                reason: format!(
                    "query embedding has {} dimensions, index has {}; rebuild with the same model",
                    vector.len(),
                    self.dimensions
                ),
            });
        }
        let mut scored: Vec<(f32, &IndexEntry<T>)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(vector, &entry.embedding), entry))
            .collect();
        // Stable sort: ties stay in position order.
        scored.sort_by(|a, b| b.0.total_cmp(&a.0));
        let hits: Vec<Scored<T>> = scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| Scored {
                item: entry.item.clone(),
                score,
                position: entry.position,
            })
            .collect();
        debug!(
            index = %self.source.display(),
            k,
            hits = hits.len(),
            top_score = hits.first().map(|h| h.score),
            "similarity query"
        );
        Ok(hits)
    }
}

/// Cosine similarity clamped to `[-1, 1]`; zero-length vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let score = dot / (norm_a.sqrt() * norm_b.sqrt());
    if score.is_finite() {
        score.clamp(-1.0, 1.0) as f32
    } else {
        0.0
    }
}

/// Embeds `(text, item)` pairs in batches, assigning positions in input order.
pub fn build_entries<T, E>(
    embedder: &E,
    items: Vec<(String, T)>,
    batch_size: usize,
) -> Result<Vec<IndexEntry<T>>>
where
    E: Embedder + ?Sized,
{
    let batch_size = batch_size.max(1);
    let mut entries = Vec::with_capacity(items.len());
    let mut items = items.into_iter().enumerate().peekable();
    while items.peek().is_some() {
        let batch: Vec<(usize, (String, T))> = items.by_ref().take(batch_size).collect();
        let inputs: Vec<&str> = batch.iter().map(|(_, (text, _))| text.as_str()).collect();
        let vectors = embedder.embed_batch(&inputs)?;
        if vectors.len() != batch.len() {
            return Err(PipelineError::invocation(format!(
                "embedding count {} mismatched batch {}",
                vectors.len(),
                batch.len()
            )));
        }
        for ((position, (text, item)), embedding) in batch.into_iter().zip(vectors) {
            entries.push(IndexEntry {
                position,
                text,
                item,
                embedding,
            });
        }
    }
    Ok(entries)
}

/// Writes entries as JSON Lines, one entry per line.
pub fn write_index<T: Serialize, W: Write>(writer: W, entries: &[IndexEntry<T>]) -> std::io::Result<usize> {
    let mut writer = BufWriter::new(writer);
    for entry in entries {
        serde_json::to_writer(&mut writer, entry)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(entries.len())
}
