//! Lightweight configuration loader and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`APP_SEARCH__MIN_SCORE=0.4` sets `search.min_score`). Every setting has a
//! default, so an empty environment yields a usable [`Settings`].

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    /// Wrap an already-assembled figment (tests, embedding in a host app).
    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to read settings: {}", e))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        match env {
            "prod" | "production" => {
                let provider: String = self.get("embedding.provider").unwrap_or_default();
                if provider == "fake" {
                    anyhow::bail!("embedding.provider = \"fake\" is not allowed in production");
                }
            }
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub search: SearchSettings,
    pub indexer: IndexerSettings,
    pub storage: StorageSettings,
    pub lifecycle: LifecycleSettings,
}

impl Settings {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(0.0..=1.0).contains(&self.search.min_score) {
            anyhow::bail!("search.min_score must be within [0, 1], got {}", self.search.min_score);
        }
        if self.search.max_results == 0 { anyhow::bail!("search.max_results must be > 0"); }
        if self.embedding.batch_size == 0 { anyhow::bail!("embedding.batch_size must be > 0"); }
        if self.indexer.batch_size == 0 { anyhow::bail!("indexer.batch_size must be > 0"); }
        if self.lifecycle.persist_attempts == 0 { anyhow::bail!("lifecycle.persist_attempts must be > 0"); }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Local,
    Remote,
    Fake,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub provider: ProviderKind,
    pub model: String,
    pub dim: usize,
    pub batch_size: usize,
    /// Local model directory; falls back to `APP_MODEL_DIR` / `models/bge-m3`.
    pub model_dir: Option<String>,
    pub api_url: String,
    /// Name of the env var holding the API key, never the key itself.
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_retries: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            model: "bge-m3".to_string(),
            dim: 1024,
            batch_size: 32,
            model_dir: None,
            api_url: "https://api.openai.com/v1/embeddings".to_string(),
            api_key_env: "EMBEDDING_API_KEY".to_string(),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    pub min_score: f32,
    pub max_results: usize,
    pub prefix_page_size: usize,
    pub semantic_oversample: usize,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self { min_score: 0.35, max_results: 10, prefix_page_size: 500, semantic_oversample: 3 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSettings {
    pub batch_size: usize,
    pub reclaim_every: usize,
    pub memory_threshold_mb: u64,
    pub reclaim_pause_ms: u64,
    pub pressure_pause_ms: u64,
    /// Page size used when copying collections during a swap.
    pub copy_page_size: usize,
}

impl Default for IndexerSettings {
    fn default() -> Self {
        Self {
            batch_size: 50,
            reclaim_every: 500,
            memory_threshold_mb: 1536,
            reclaim_pause_ms: 50,
            pressure_pause_ms: 1000,
            copy_page_size: 200,
        }
    }
}

impl IndexerSettings {
    pub fn reclaim_pause(&self) -> Duration { Duration::from_millis(self.reclaim_pause_ms) }
    pub fn pressure_pause(&self) -> Duration { Duration::from_millis(self.pressure_pause_ms) }
    pub fn memory_threshold_bytes(&self) -> u64 { self.memory_threshold_mb * 1024 * 1024 }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub index_dir: String,
    pub upload_dir: String,
    pub canonical_collection: String,
    pub versions_table: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            index_dir: "dev_data/indexes/lancedb".to_string(),
            upload_dir: "dev_data/uploads".to_string(),
            canonical_collection: "products".to_string(),
            versions_table: "catalog_versions".to_string(),
        }
    }
}

impl StorageSettings {
    pub fn index_path(&self, base: &Path) -> PathBuf { resolve_with_base(base, &self.index_dir) }
    pub fn upload_path(&self, base: &Path) -> PathBuf { resolve_with_base(base, &self.upload_dir) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleSettings {
    pub persist_attempts: usize,
    pub persist_backoff_ms: u64,
}

impl Default for LifecycleSettings {
    fn default() -> Self { Self { persist_attempts: 3, persist_backoff_ms: 200 } }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
