//! Persistent embedding cache.
//!
//! Embeddings are keyed by SHA256 of the embedding kind and the text, one
//! file per model. The cache is flushed to disk every `SAVE_INTERVAL` new
//! embeddings and after every batch.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::semantic::embeddings::{Embedder, EmbeddingError, EmbeddingKind};

/// Number of cache misses between automatic saves
const SAVE_INTERVAL: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct CacheFile {
    model: String,
    entries: HashMap<String, Vec<f32>>,
}

/// Snapshot of cache counters.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CacheStats {
    pub cache_size: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub hit_rate: f64,
    pub total_requests: u64,
    pub total_embedding_time_secs: f64,
}

pub struct EmbeddingCache {
    model_name: String,
    /// None keeps the cache in memory only
    path: Option<PathBuf>,
    entries: HashMap<String, Vec<f32>>,
    hits: u64,
    misses: u64,
    embedding_time: Duration,
}

impl EmbeddingCache {
    /// Cache file for a model inside `cache_dir`.
    pub fn file_for(cache_dir: &Path, model_name: &str) -> PathBuf {
        cache_dir.join(format!("{}_cache.json", model_name.replace('/', "_")))
    }

    /// Open the cache for `model_name`, starting empty when the file is
    /// missing or unreadable.
    pub fn open(cache_dir: &Path, model_name: &str) -> Self {
        let path = Self::file_for(cache_dir, model_name);
        let entries = match Self::read_entries(&path, model_name) {
            Ok(Some(entries)) => {
                log::info!("Loaded embedding cache with {} entries", entries.len());
                entries
            }
            Ok(None) => HashMap::new(),
            Err(err) => {
                log::warn!("Error loading embedding cache {}: {err}", path.display());
                HashMap::new()
            }
        };

        Self {
            model_name: model_name.to_string(),
            path: Some(path),
            entries,
            hits: 0,
            misses: 0,
            embedding_time: Duration::ZERO,
        }
    }

    #[cfg(test)]
    pub fn in_memory(model_name: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            path: None,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
            embedding_time: Duration::ZERO,
        }
    }

    fn read_entries(
        path: &Path,
        model_name: &str,
    ) -> Result<Option<HashMap<String, Vec<f32>>>, CacheError> {
        if !path.exists() {
            return Ok(None);
        }
        let file: CacheFile = serde_json::from_slice(&std::fs::read(path)?)?;
        if file.model != model_name {
            log::warn!(
                "Embedding cache {} belongs to model '{}', ignoring",
                path.display(),
                file.model
            );
            return Ok(None);
        }
        Ok(Some(file.entries))
    }

    fn key(kind: EmbeddingKind, text: &str) -> String {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        hasher.update([0u8]);
        hasher.update(text.as_bytes());
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embed a single text, serving repeats from the cache.
    ///
    /// Blank text yields a zero vector without touching the model.
    pub fn get_or_embed(
        &mut self,
        text: &str,
        kind: EmbeddingKind,
        embedder: &dyn Embedder,
    ) -> Result<Vec<f32>, EmbeddingError> {
        if text.trim().is_empty() {
            log::warn!("Empty text passed for embedding, using zero vector");
            return Ok(vec![0.0; embedder.dimensions()]);
        }

        let key = Self::key(kind, text);
        if let Some(embedding) = self.entries.get(&key) {
            self.hits += 1;
            return Ok(embedding.clone());
        }

        self.misses += 1;
        let started = Instant::now();
        let embedding = embedder.embed(text, kind)?;
        self.embedding_time += started.elapsed();

        self.entries.insert(key, embedding.clone());

        if self.misses % SAVE_INTERVAL == 0 {
            self.save_logged();
        }

        Ok(embedding)
    }

    /// Embed many texts, running only the uncached ones through the model in
    /// chunks of `batch_size`. Output order matches input order.
    pub fn get_or_embed_batch(
        &mut self,
        texts: &[String],
        kind: EmbeddingKind,
        embedder: &dyn Embedder,
        batch_size: usize,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut pending: Vec<(usize, String)> = Vec::new();

        for (idx, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                results.push(Some(vec![0.0; embedder.dimensions()]));
                continue;
            }
            let key = Self::key(kind, text);
            match self.entries.get(&key) {
                Some(embedding) => {
                    self.hits += 1;
                    results.push(Some(embedding.clone()));
                }
                None => {
                    results.push(None);
                    pending.push((idx, key));
                }
            }
        }

        if pending.is_empty() {
            return Ok(results.into_iter().flatten().collect());
        }

        self.misses += pending.len() as u64;

        for chunk in pending.chunks(batch_size.max(1)) {
            let chunk_texts: Vec<String> = chunk.iter().map(|(idx, _)| texts[*idx].clone()).collect();

            let started = Instant::now();
            let embeddings = embedder.embed_batch(&chunk_texts, kind)?;
            self.embedding_time += started.elapsed();

            if embeddings.len() != chunk.len() {
                return Err(EmbeddingError::EmbeddingFailed(format!(
                    "expected {} embeddings, model returned {}",
                    chunk.len(),
                    embeddings.len()
                )));
            }

            for ((idx, key), embedding) in chunk.iter().zip(embeddings) {
                self.entries.insert(key.clone(), embedding.clone());
                results[*idx] = Some(embedding);
            }
        }

        self.save_logged();

        Ok(results.into_iter().flatten().collect())
    }

    pub fn stats(&self) -> CacheStats {
        let total = self.hits + self.misses;
        CacheStats {
            cache_size: self.entries.len(),
            cache_hits: self.hits,
            cache_misses: self.misses,
            hit_rate: self.hits as f64 / total.max(1) as f64,
            total_requests: total,
            total_embedding_time_secs: self.embedding_time.as_secs_f64(),
        }
    }

    pub fn save(&self) -> Result<(), CacheError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let file = CacheFile {
            model: self.model_name.clone(),
            entries: self.entries.clone(),
        };
        crate::storage::write_atomic(path, &serde_json::to_vec(&file)?)?;
        log::info!("Saved {} entries to embedding cache", self.entries.len());
        Ok(())
    }

    fn save_logged(&self) {
        if let Err(err) = self.save() {
            log::warn!("Error saving embedding cache: {err}");
        }
    }

    /// Drop every entry and delete the cache file. Counters restart.
    pub fn clear(&mut self) -> Result<(), CacheError> {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
        self.embedding_time = Duration::ZERO;

        if let Some(path) = &self.path {
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        log::info!("Embedding cache cleared");
        Ok(())
    }
}
