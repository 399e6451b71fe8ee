//! Embedding model wrapper for fastembed.
//!
//! Provides a high-level interface for generating embeddings:
//! - Model loading with configurable cache directory
//! - Model download with timeout on first use
//! - Query/passage prefixes for models trained with them (E5 family)
//! - Batch embedding generation

use fastembed::{InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{mpsc, Mutex};
use std::time::Duration;

/// Default download timeout for model files (5 minutes)
const DEFAULT_DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(300);

/// Whether a text is a search query or a catalog entry. Some models embed the
/// two differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingKind {
    Query,
    Passage,
}

impl EmbeddingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbeddingKind::Query => "query",
            EmbeddingKind::Passage => "passage",
        }
    }
}

/// Anything that turns text into fixed-length vectors.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str, kind: EmbeddingKind) -> Result<Vec<f32>, EmbeddingError>;

    fn embed_batch(
        &self,
        texts: &[String],
        kind: EmbeddingKind,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model download timed out after {0} seconds")]
    DownloadTimeout(u64),

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// A supported fastembed model plus the prefixes it was trained with.
struct ModelSpec {
    model: fastembed::EmbeddingModel,
    query_prefix: &'static str,
    passage_prefix: &'static str,
}

impl ModelSpec {
    fn plain(model: fastembed::EmbeddingModel) -> Self {
        Self {
            model,
            query_prefix: "",
            passage_prefix: "",
        }
    }

    fn e5(model: fastembed::EmbeddingModel) -> Self {
        Self {
            model,
            query_prefix: "query: ",
            passage_prefix: "passage: ",
        }
    }
}

/// Wrapper around fastembed's TextEmbedding model.
/// Uses a Mutex because fastembed's embed() requires &mut self.
pub struct EmbeddingModel {
    model: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
    query_prefix: &'static str,
    passage_prefix: &'static str,
}

impl EmbeddingModel {
    /// Create a new embedding model with the given name.
    ///
    /// The model will be downloaded into `cache_dir` on first use if not
    /// cached there already.
    ///
    /// # Arguments
    /// * `model_name` - Name of the model (e.g., "all-MiniLM-L6-v2")
    /// * `cache_dir` - Directory to cache downloaded models
    /// * `download_timeout` - Optional timeout for model download
    pub fn new(
        model_name: &str,
        cache_dir: PathBuf,
        download_timeout: Option<Duration>,
    ) -> Result<Self, EmbeddingError> {
        let spec = Self::parse_model_name(model_name)?;
        let timeout = download_timeout.unwrap_or(DEFAULT_DOWNLOAD_TIMEOUT);

        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        // Loading may hit the network; give up waiting after the timeout. The
        // loader thread is left to finish in the background.
        let (tx, rx) = mpsc::channel();
        let fastembed_model = spec.model.clone();
        std::thread::spawn(move || {
            let options = InitOptions::new(fastembed_model)
                .with_cache_dir(cache_dir)
                .with_show_download_progress(true);
            let _ = tx.send(TextEmbedding::try_new(options));
        });
        let mut model = match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|e| EmbeddingError::InitFailed(e.to_string()))?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(EmbeddingError::DownloadTimeout(timeout.as_secs()))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(EmbeddingError::InitFailed(
                    "model loader thread panicked".to_string(),
                ))
            }
        };

        // Get model dimensions by embedding a test string
        let dimensions = Self::probe_dimensions(&mut model)?;

        log::info!("Loaded embedding model '{model_name}' ({dimensions} dimensions)");

        Ok(Self {
            model: Mutex::new(model),
            model_name: model_name.to_string(),
            dimensions,
            query_prefix: spec.query_prefix,
            passage_prefix: spec.passage_prefix,
        })
    }

    fn prefix(&self, kind: EmbeddingKind) -> &'static str {
        match kind {
            EmbeddingKind::Query => self.query_prefix,
            EmbeddingKind::Passage => self.passage_prefix,
        }
    }

    /// Parse model name string to fastembed enum.
    ///
    /// Hugging Face organisation prefixes ("sentence-transformers/",
    /// "intfloat/", "BAAI/") are ignored.
    fn parse_model_name(name: &str) -> Result<ModelSpec, EmbeddingError> {
        use fastembed::EmbeddingModel as M;

        let lowered = name.trim().to_lowercase();
        let short = lowered.rsplit('/').next().unwrap_or(&lowered);

        match short {
            "all-minilm-l6-v2" | "allminiml6v2" => Ok(ModelSpec::plain(M::AllMiniLML6V2)),
            "all-minilm-l6-v2-q" | "allminiml6v2q" => Ok(ModelSpec::plain(M::AllMiniLML6V2Q)),
            "bge-small-en-v1.5" | "bgesmallenv15" => Ok(ModelSpec::plain(M::BGESmallENV15)),
            "bge-base-en-v1.5" | "bgebaseenv15" => Ok(ModelSpec::plain(M::BGEBaseENV15)),
            "bge-large-en-v1.5" | "bgelargeenv15" => Ok(ModelSpec::plain(M::BGELargeENV15)),
            "paraphrase-multilingual-mpnet-base-v2" | "paraphrasemlmpnetbasev2" => {
                Ok(ModelSpec::plain(M::ParaphraseMLMpnetBaseV2))
            }
            "paraphrase-multilingual-minilm-l12-v2" | "paraphrasemlminilml12v2" => {
                Ok(ModelSpec::plain(M::ParaphraseMLMiniLML12V2))
            }
            "paraphrase-multilingual-minilm-l12-v2-q" | "paraphrasemlminilml12v2q" => {
                Ok(ModelSpec::plain(M::ParaphraseMLMiniLML12V2Q))
            }
            "multilingual-e5-small" => Ok(ModelSpec::e5(M::MultilingualE5Small)),
            "multilingual-e5-base" => Ok(ModelSpec::e5(M::MultilingualE5Base)),
            "multilingual-e5-large" => Ok(ModelSpec::e5(M::MultilingualE5Large)),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: all-MiniLM-L6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 paraphrase-multilingual-mpnet-base-v2, paraphrase-multilingual-minilm-l12-v2, multilingual-e5-small, \
                 multilingual-e5-base, multilingual-e5-large",
                name
            ))),
        }
    }

    /// Probe the model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let test_embeddings = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        test_embeddings
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Embedder for EmbeddingModel {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str, kind: EmbeddingKind) -> Result<Vec<f32>, EmbeddingError> {
        let input = format!("{}{}", self.prefix(kind), text);

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![input], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }

    fn embed_batch(
        &self,
        texts: &[String],
        kind: EmbeddingKind,
    ) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let prefix = self.prefix(kind);
        let inputs: Vec<String> = texts.iter().map(|t| format!("{prefix}{t}")).collect();

        let mut model = self.model.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed(inputs, None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }
}

/// SHA256 of the model name, stored in index files to detect model changes.
pub fn model_id_hash(model_name: &str) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(model_name.as_bytes());
    hasher.finalize().into()
}
