//! Search service for one language.
//!
//! Owns the catalog, the embedding cache, the vector index and (lazily) the
//! embedding model. All state sits behind one mutex and is loaded on first
//! use.

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::catalog::{Catalog, CatalogError};
use crate::config::{Config, Language};
use crate::semantic::cache::{CacheError, EmbeddingCache};
use crate::semantic::embeddings::{
    model_id_hash, Embedder, EmbeddingError, EmbeddingKind, EmbeddingModel,
};
use crate::semantic::index::{IndexError, VectorIndex};
use crate::semantic::preprocess::{normalize_query, preprocess_passage};
use crate::semantic::ranking::{rank, ModeThresholds, SearchHit, SearchMode};
use crate::semantic::storage::{VectorStorage, VectorStorageError};

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Index not available: {0}")]
    IndexUnavailable(String),

    #[error("No documents with embeddings found in {0}")]
    NoEmbeddings(PathBuf),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(#[from] IndexError),

    #[error("Storage error: {0}")]
    Storage(#[from] VectorStorageError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Everything a service needs from the configuration, with paths resolved.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub language: Language,
    pub model: String,
    pub catalog_path: PathBuf,
    pub index_path: PathBuf,
    pub cache_dir: PathBuf,
    pub model_cache_dir: PathBuf,
    pub download_timeout: Duration,
    pub batch_size: usize,
    pub max_result_count: usize,
    pub thresholds: ModeThresholds,
}

impl ServiceSettings {
    pub fn from_config(config: &Config, language: Language) -> Self {
        let lang = config.languages.get(language);
        Self {
            language,
            model: lang.model.clone(),
            catalog_path: config.resolve(&lang.catalog),
            index_path: config.resolve(&lang.index),
            cache_dir: config.resolve(&config.cache_dir),
            model_cache_dir: config.resolve(&config.model_cache_dir),
            download_timeout: Duration::from_secs(config.download_timeout_secs),
            batch_size: config.embedding_batch_size,
            max_result_count: config.max_result_count,
            thresholds: config.thresholds.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub query: String,
    pub result_count: usize,
    pub search_mode: String,
    pub show_metrics: bool,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            query: String::new(),
            result_count: 10,
            search_mode: SearchMode::Standard.to_string(),
            show_metrics: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SearchMetrics {
    pub total_time_ms: f64,
    pub embedding_time_ms: f64,
    pub index_time_ms: f64,
    /// Raw candidates returned by the index before filtering
    pub results_count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<SearchMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub language: Language,
    pub model: String,
    pub vector_count: usize,
    pub index_type: &'static str,
    pub dimension: usize,
    pub index_file_exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_modified_at: Option<String>,
    pub id_map_size: usize,
    pub catalog_documents: usize,
    pub embedding_cache_size: usize,
    pub embedding_cache_hit_rate: String,
    pub embedding_requests: u64,
}

/// Outcome of [`SearchService::embed_documents`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EmbedReport {
    pub embedded: usize,
    pub skipped_existing: usize,
    pub skipped_without_text: usize,
    pub indexed: usize,
}

struct ServiceState {
    embedder: Option<Arc<dyn Embedder>>,
    cache: EmbeddingCache,
    catalog: Catalog,
    index: Option<VectorIndex>,
}

pub struct SearchService {
    settings: ServiceSettings,
    /// Preset embedder, used instead of loading the configured model
    embedder: Option<Arc<dyn Embedder>>,
    /// Uses Mutex<Option<_>> instead of OnceLock because get_or_try_init is
    /// unstable.
    state: Mutex<Option<ServiceState>>,
}

impl SearchService {
    /// Create an uninitialized service. Nothing is read from disk until the
    /// first call that needs it.
    pub fn new(settings: ServiceSettings) -> Self {
        Self {
            settings,
            embedder: None,
            state: Mutex::new(None),
        }
    }

    #[cfg(test)]
    /// Create a service that embeds with `embedder` instead of the
    /// configured model.
    pub fn with_embedder(settings: ServiceSettings, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            settings,
            embedder: Some(embedder),
            state: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.settings
    }

    pub fn language(&self) -> Language {
        self.settings.language
    }

    #[cfg(test)]
    pub fn is_initialized(&self) -> bool {
        self.state
            .lock()
            .ok()
            .map(|guard| guard.as_ref().is_some_and(|s| s.index.is_some()))
            .unwrap_or(false)
    }

    /// Load the catalog and the index, building the index when the file is
    /// missing or was written by a different model or format version.
    pub fn initialize(&self) -> Result<(), SearchError> {
        let mut guard = self.lock()?;
        let state = self.ensure_loaded(&mut guard)?;

        if state.index.is_some() {
            return Ok(());
        }

        let storage = self.storage();
        if storage.exists() {
            match self.read_index(&storage) {
                Ok(index) => {
                    self.check_dimensions(state.embedder.as_ref(), &index)?;
                    state.index = Some(index);
                    return Ok(());
                }
                Err(VectorStorageError::ModelMismatch) => {
                    log::warn!("Model changed, rebuilding index");
                }
                Err(VectorStorageError::VersionMismatch(file_ver, _)) => {
                    log::warn!("Index version {file_ver} unsupported, rebuilding index");
                }
                Err(VectorStorageError::Io(e)) => return Err(VectorStorageError::Io(e).into()),
                Err(e) => {
                    log::warn!("Failed to load index ({e}), rebuilding");
                }
            }
        } else {
            log::info!("No existing index at {}, building", storage.path().display());
        }

        let index = self.build_from_catalog(&state.catalog)?;
        self.check_dimensions(state.embedder.as_ref(), &index)?;
        state.index = Some(index);
        Ok(())
    }

    /// Build the index from catalog embeddings and save it.
    ///
    /// Without `force` an existing index file is loaded instead. Returns the
    /// number of indexed vectors.
    pub fn build_index(&self, force: bool) -> Result<usize, SearchError> {
        let mut guard = self.lock()?;
        let state = self.ensure_loaded(&mut guard)?;

        let storage = self.storage();
        if !force && storage.exists() {
            log::info!("Index file exists, loading instead of rebuilding");
            let index = self.read_index(&storage)?;
            self.check_dimensions(state.embedder.as_ref(), &index)?;
            let count = index.len();
            state.index = Some(index);
            return Ok(count);
        }

        let index = self.build_from_catalog(&state.catalog)?;
        self.check_dimensions(state.embedder.as_ref(), &index)?;
        let count = index.len();
        state.index = Some(index);
        Ok(count)
    }

    /// Replace the in-memory index with the one on disk.
    pub fn load_index(&self) -> Result<usize, SearchError> {
        let mut guard = self.lock()?;
        let state = self.ensure_loaded(&mut guard)?;

        let storage = self.storage();
        if !storage.exists() {
            return Err(SearchError::IndexUnavailable(format!(
                "index file {} not found",
                storage.path().display()
            )));
        }

        let index = self.read_index(&storage)?;
        self.check_dimensions(state.embedder.as_ref(), &index)?;
        let count = index.len();
        state.index = Some(index);
        Ok(count)
    }

    pub fn save_index(&self) -> Result<(), SearchError> {
        let guard = self.lock()?;
        let index = guard
            .as_ref()
            .and_then(|s| s.index.as_ref())
            .ok_or_else(|| SearchError::IndexUnavailable("index is not loaded".into()))?;

        self.storage()
            .save(index, &model_id_hash(&self.settings.model))?;
        Ok(())
    }

    pub fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let started = Instant::now();

        let query = normalize_query(&request.query);
        if query.is_empty() {
            return Err(SearchError::InvalidRequest("Query cannot be empty".into()));
        }
        let max = self.settings.max_result_count;
        if request.result_count == 0 || request.result_count > max {
            return Err(SearchError::InvalidRequest(format!(
                "result_count must be between 1 and {max}"
            )));
        }
        let mode: SearchMode = request
            .search_mode
            .parse()
            .map_err(SearchError::InvalidRequest)?;

        self.initialize()?;

        let mut guard = self.lock()?;
        let state = self.ensure_loaded(&mut guard)?;
        let embedder = self.embedder(state)?;
        if let Some(index) = &state.index {
            self.check_dimensions(Some(&embedder), index)?;
        }

        let embedding_started = Instant::now();
        let embedding = state
            .cache
            .get_or_embed(&query, EmbeddingKind::Query, embedder.as_ref())?;
        let embedding_time = embedding_started.elapsed();

        let index = state
            .index
            .as_ref()
            .ok_or_else(|| SearchError::IndexUnavailable("index is not loaded".into()))?;

        let index_started = Instant::now();
        let ranked = rank(
            index,
            &state.catalog,
            &embedding,
            request.result_count,
            mode,
            &self.settings.thresholds,
        )?;
        let index_time = index_started.elapsed();

        log::info!(
            "Search '{}' ({}, {}) returned {} of {} candidates",
            query,
            self.settings.language,
            mode,
            ranked.hits.len(),
            ranked.raw_count
        );

        let metrics = request.show_metrics.then(|| SearchMetrics {
            total_time_ms: millis(started.elapsed()),
            embedding_time_ms: millis(embedding_time),
            index_time_ms: millis(index_time),
            results_count: ranked.raw_count,
        });

        Ok(SearchResponse {
            count: ranked.hits.len(),
            results: ranked.hits,
            metrics,
        })
    }

    /// Index and cache statistics. Loads the index from disk when it is not
    /// in memory yet.
    pub fn stats(&self) -> Result<IndexStats, SearchError> {
        let mut guard = self.lock()?;
        let state = self.ensure_loaded(&mut guard)?;

        let storage = self.storage();
        if state.index.is_none() {
            if !storage.exists() {
                return Err(SearchError::IndexUnavailable(
                    "index not loaded and no index file on disk".into(),
                ));
            }
            state.index = Some(self.read_index(&storage)?);
        }
        let index = state
            .index
            .as_ref()
            .ok_or_else(|| SearchError::Internal("index missing after load".into()))?;

        let cache = state.cache.stats();
        let modified = std::fs::metadata(storage.path())
            .and_then(|m| m.modified())
            .ok()
            .map(|t| chrono::DateTime::<chrono::Local>::from(t).to_rfc3339());

        Ok(IndexStats {
            language: self.settings.language,
            model: self.settings.model.clone(),
            vector_count: index.len(),
            index_type: "Flat Inner Product (Cosine Similarity)",
            dimension: index.dimensions(),
            index_file_exists: storage.exists(),
            index_modified_at: modified,
            id_map_size: index.len(),
            catalog_documents: state.catalog.len(),
            embedding_cache_size: cache.cache_size,
            embedding_cache_hit_rate: format!("{:.2}%", cache.hit_rate * 100.0),
            embedding_requests: cache.total_requests,
        })
    }

    pub fn clear_embedding_cache(&self) -> Result<(), SearchError> {
        let mut guard = self.lock()?;
        match guard.as_mut() {
            Some(state) => state.cache.clear()?,
            None => {
                EmbeddingCache::open(&self.settings.cache_dir, &self.settings.model).clear()?
            }
        }
        Ok(())
    }

    /// Compute document embeddings with the configured model, write them back
    /// to the catalog file and rebuild the index.
    ///
    /// Without `overwrite` only documents lacking a usable embedding are
    /// embedded.
    pub fn embed_documents(&self, overwrite: bool) -> Result<EmbedReport, SearchError> {
        let mut guard = self.lock()?;
        let state = self.ensure_loaded(&mut guard)?;
        let embedder = self.embedder(state)?;

        let mut report = EmbedReport::default();
        let mut pending: Vec<(String, String)> = Vec::new();
        for doc in state.catalog.documents() {
            if !overwrite && doc.usable_embedding().is_some() {
                report.skipped_existing += 1;
                continue;
            }
            match doc.embedding_text().and_then(preprocess_passage) {
                Some(text) => pending.push((doc.id.clone(), text)),
                None => report.skipped_without_text += 1,
            }
        }

        log::info!(
            "Embedding {} documents with '{}'",
            pending.len(),
            embedder.name()
        );

        let progress = if std::io::stderr().is_terminal() {
            ProgressBar::new(pending.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) =
            ProgressStyle::default_bar().template("{bar:50.cyan/blue} {pos}/{len} {msg}")
        {
            progress.set_style(style.progress_chars("██░"));
        }

        let batch_size = self.settings.batch_size.max(1);
        for chunk in pending.chunks(batch_size) {
            let texts: Vec<String> = chunk.iter().map(|(_, text)| text.clone()).collect();
            let embeddings = state.cache.get_or_embed_batch(
                &texts,
                EmbeddingKind::Passage,
                embedder.as_ref(),
                batch_size,
            )?;

            for ((id, _), embedding) in chunk.iter().zip(embeddings) {
                if state.catalog.set_embedding(id, embedding) {
                    report.embedded += 1;
                }
            }
            progress.inc(chunk.len() as u64);
        }
        progress.finish_and_clear();

        if report.embedded > 0 {
            state.catalog.save(&self.settings.catalog_path)?;
            log::info!(
                "Saved {} embeddings to {}",
                report.embedded,
                self.settings.catalog_path.display()
            );
        }

        let index = self.build_from_catalog(&state.catalog)?;
        self.check_dimensions(Some(&embedder), &index)?;
        report.indexed = index.len();
        state.index = Some(index);

        Ok(report)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<ServiceState>>, SearchError> {
        self.state
            .lock()
            .map_err(|e| SearchError::Internal(format!("Lock poisoned: {}", e)))
    }

    fn storage(&self) -> VectorStorage {
        VectorStorage::new(self.settings.index_path.clone())
    }

    /// Load catalog and cache if this is the first call.
    fn ensure_loaded<'a>(
        &self,
        guard: &'a mut MutexGuard<'_, Option<ServiceState>>,
    ) -> Result<&'a mut ServiceState, SearchError> {
        if guard.is_none() {
            log::info!(
                "Loading {} catalog from {}",
                self.settings.language,
                self.settings.catalog_path.display()
            );
            let catalog = Catalog::load(&self.settings.catalog_path)?;
            let cache = EmbeddingCache::open(&self.settings.cache_dir, &self.settings.model);
            **guard = Some(ServiceState {
                embedder: self.embedder.clone(),
                cache,
                catalog,
                index: None,
            });
        }

        guard
            .as_mut()
            .ok_or_else(|| SearchError::Internal("service state missing".into()))
    }

    /// The embedding model, loading it on first use.
    fn embedder(&self, state: &mut ServiceState) -> Result<Arc<dyn Embedder>, SearchError> {
        if let Some(embedder) = &state.embedder {
            return Ok(embedder.clone());
        }

        log::info!(
            "Initializing {} embedding model '{}'",
            self.settings.language,
            self.settings.model
        );
        let model: Arc<dyn Embedder> = Arc::new(EmbeddingModel::new(
            &self.settings.model,
            self.settings.model_cache_dir.clone(),
            Some(self.settings.download_timeout),
        )?);
        state.embedder = Some(model.clone());
        Ok(model)
    }

    /// Queries embedded by `embedder` must have the index dimension.
    fn check_dimensions(
        &self,
        embedder: Option<&Arc<dyn Embedder>>,
        index: &VectorIndex,
    ) -> Result<(), SearchError> {
        let Some(embedder) = embedder else {
            return Ok(());
        };
        if embedder.dimensions() == index.dimensions() {
            return Ok(());
        }
        Err(SearchError::IndexUnavailable(format!(
            "{} index has {} dimensions but model '{}' produces {}; run `embed --overwrite` to regenerate the catalog embeddings",
            self.settings.language,
            index.dimensions(),
            embedder.name(),
            embedder.dimensions()
        )))
    }

    fn read_index(&self, storage: &VectorStorage) -> Result<VectorIndex, VectorStorageError> {
        let index = storage.load(&model_id_hash(&self.settings.model), None)?;
        log::info!(
            "Loaded index with {} vectors from {}",
            index.len(),
            storage.path().display()
        );
        Ok(index)
    }

    /// Index every usable catalog embedding and save the result. Documents
    /// whose dimension differs from the first one are skipped.
    fn build_from_catalog(&self, catalog: &Catalog) -> Result<VectorIndex, SearchError> {
        let mut embeddings = catalog.documents_with_embeddings().peekable();
        let dimensions = match embeddings.peek() {
            Some((_, first)) => first.len(),
            None => return Err(SearchError::NoEmbeddings(self.settings.catalog_path.clone())),
        };

        let mut index = VectorIndex::with_capacity(dimensions, catalog.len());
        let mut skipped = 0usize;
        for (id, embedding) in embeddings {
            match index.add(id, embedding) {
                Ok(_) => {}
                Err(e @ IndexError::DimensionMismatch { .. }) => {
                    log::warn!("Skipping document '{id}': {e}");
                    skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        let without = catalog.len() - index.len() - skipped;
        log::info!(
            "Built {} index with {} vectors ({} skipped, {} without embeddings)",
            self.settings.language,
            index.len(),
            skipped,
            without
        );

        self.storage()
            .save(&index, &model_id_hash(&self.settings.model))?;
        Ok(index)
    }
}

/// Milliseconds rounded to two decimals.
fn millis(duration: Duration) -> f64 {
    (duration.as_secs_f64() * 100_000.0).round() / 100.0
}
