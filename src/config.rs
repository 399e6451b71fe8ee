use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

use crate::semantic::ModeThresholds;
use crate::storage::BackendLocal;

const CONFIG_FILE: &str = "config.yaml";

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8000";
const DEFAULT_CACHE_DIR: &str = "embedding_cache";
const DEFAULT_MODEL_CACHE_DIR: &str = "models";
/// Default model download timeout in seconds
const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 300;
const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 32;
const DEFAULT_MAX_RESULT_COUNT: usize = 100;

const DEFAULT_ENGLISH_MODEL: &str = "all-MiniLM-L6-v2";
const DEFAULT_HINDI_MODEL: &str = "paraphrase-multilingual-mpnet-base-v2";

/// Languages with their own catalog, model and index.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    English,
    Hindi,
}

impl Language {
    pub const ALL: [Language; 2] = [Language::English, Language::Hindi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::English => "english",
            Language::Hindi => "hindi",
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "english" | "en" => Ok(Language::English),
            "hindi" | "hi" => Ok(Language::Hindi),
            other => Err(format!(
                "unknown language '{other}', expected 'english' or 'hindi'"
            )),
        }
    }
}

/// Per-language data files and model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LanguageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Catalog JSON file, relative paths resolve against the base directory
    pub catalog: PathBuf,

    /// Index file holding vectors and the position -> document id map
    pub index: PathBuf,

    /// Model name for embeddings (e.g., "all-MiniLM-L6-v2")
    pub model: String,
}

impl LanguageConfig {
    fn english() -> Self {
        Self {
            enabled: true,
            catalog: PathBuf::from("output.json"),
            index: PathBuf::from("nic_index.bin"),
            model: DEFAULT_ENGLISH_MODEL.to_string(),
        }
    }

    fn hindi() -> Self {
        Self {
            enabled: true,
            catalog: PathBuf::from("output_hindi.json"),
            index: PathBuf::from("nic_index_hindi.bin"),
            model: DEFAULT_HINDI_MODEL.to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LanguagesConfig {
    #[serde(default = "LanguageConfig::english")]
    pub english: LanguageConfig,
    #[serde(default = "LanguageConfig::hindi")]
    pub hindi: LanguageConfig,
}

impl Default for LanguagesConfig {
    fn default() -> Self {
        Self {
            english: LanguageConfig::english(),
            hindi: LanguageConfig::hindi(),
        }
    }
}

impl LanguagesConfig {
    pub fn get(&self, language: Language) -> &LanguageConfig {
        match language {
            Language::English => &self.english,
            Language::Hindi => &self.hindi,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,

    /// Directory for per-model embedding caches
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory where downloaded model files are kept
    #[serde(default = "default_model_cache_dir")]
    pub model_cache_dir: PathBuf,

    /// Timeout for model download in seconds
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_embedding_batch_size")]
    pub embedding_batch_size: usize,

    #[serde(default = "default_max_result_count")]
    pub max_result_count: usize,

    #[serde(default)]
    pub thresholds: ModeThresholds,

    #[serde(default)]
    pub languages: LanguagesConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            cache_dir: default_cache_dir(),
            model_cache_dir: default_model_cache_dir(),
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            max_result_count: DEFAULT_MAX_RESULT_COUNT,
            thresholds: ModeThresholds::default(),
            languages: LanguagesConfig::default(),
            base_path: PathBuf::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_bind_address() -> String {
    DEFAULT_BIND_ADDRESS.to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_model_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_MODEL_CACHE_DIR)
}

fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

fn default_embedding_batch_size() -> usize {
    DEFAULT_EMBEDDING_BATCH_SIZE
}

fn default_max_result_count() -> usize {
    DEFAULT_MAX_RESULT_COUNT
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        let thresholds = [
            ("standard", self.thresholds.standard),
            ("strict", self.thresholds.strict),
            ("relaxed", self.thresholds.relaxed),
        ];
        for (mode, value) in thresholds {
            if !(-1.0..=1.0).contains(&value) {
                bail!("thresholds.{mode} must be between -1.0 and 1.0, got {value}");
            }
        }

        if self.embedding_batch_size == 0 {
            bail!("embedding_batch_size must be greater than 0");
        }

        if self.download_timeout_secs == 0 {
            bail!("download_timeout_secs must be greater than 0");
        }

        if self.max_result_count == 0 {
            bail!("max_result_count must be greater than 0");
        }

        if !Language::ALL
            .iter()
            .any(|lang| self.languages.get(*lang).enabled)
        {
            bail!("at least one language must be enabled");
        }

        for lang in Language::ALL {
            let lang_config = self.languages.get(lang);
            if lang_config.model.trim().is_empty() {
                bail!("languages.{lang}.model must not be empty");
            }
        }

        Ok(())
    }

    pub fn load_with(base_path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let base_path = base_path.as_ref();
        let store = BackendLocal::new(base_path)
            .with_context(|| format!("failed to create {}", base_path.display()))?;

        // create new if does not exist
        if !store.exists(CONFIG_FILE) {
            store
                .write(
                    CONFIG_FILE,
                    serde_yml::to_string(&Self::default())?.as_bytes(),
                )
                .context("failed to write default config")?;
        }

        let config_str = String::from_utf8(store.read(CONFIG_FILE)?)
            .context("config file is not valid utf8")?;
        let mut config: Self = serde_yml::from_str(&config_str).context("config is malformed")?;

        config.base_path = base_path.to_path_buf();

        config.validate()?;

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config)? {
            config.save()?;
        }

        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let store = BackendLocal::new(&self.base_path)?;

        let config_str = serde_yml::to_string(&self)?;
        store
            .write(CONFIG_FILE, config_str.as_bytes())
            .context("failed to save config")?;
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Resolve a configured path against the base directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_path.join(path)
        }
    }

    #[cfg(test)]
    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }
}
