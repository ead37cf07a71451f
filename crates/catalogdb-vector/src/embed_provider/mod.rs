//! Embedding provider abstraction used by the indexer and the search engine.
//!
//! Implementations call an in-process model (see `local.rs`) or an
//! OpenAI-compatible HTTP endpoint (see `remote.rs`). Providers must return one
//! vector of `dim()` floats per input text, in input order.

use async_trait::async_trait;
use std::sync::Arc;

use catalogdb_core::config::{EmbeddingSettings, ProviderKind};
use catalogdb_core::error::{Error, Result};

pub mod local;
pub mod remote;

pub use local::{LocalProvider, SharedModel};
pub use remote::RemoteProvider;

#[async_trait]
pub trait EmbedProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g., `local:bge-m3:d1024`).
    fn embedder_id(&self) -> &str;
    /// Embedding dimensionality (D).
    fn dim(&self) -> usize;
    /// Compute embeddings for a batch of input texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        self.embed(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingFatal("provider returned no vector".into()))
    }
}

/// Build the provider selected by `settings.provider`. `APP_USE_FAKE_EMBEDDINGS=1`
/// forces the fake provider regardless of configuration.
pub fn provider_from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbedProvider>> {
    if catalogdb_embed::use_fake_embeddings() {
        return Ok(Arc::new(LocalProvider::fake(settings.dim, settings.batch_size)));
    }
    match settings.provider {
        ProviderKind::Fake => Ok(Arc::new(LocalProvider::fake(settings.dim, settings.batch_size))),
        ProviderKind::Local => {
            let model_dir = settings.model_dir.as_deref().map(catalogdb_core::config::expand_path);
            let model = SharedModel::bge_m3(model_dir, settings.dim);
            Ok(Arc::new(LocalProvider::new(Arc::new(model), &settings.model, settings.batch_size)))
        }
        ProviderKind::Remote => Ok(Arc::new(RemoteProvider::from_settings(settings)?)),
    }
}

/// Reject provider output that does not line up with the request.
pub(crate) fn check_output(expected: usize, dim: usize, vectors: &[Vec<f32>]) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::EmbeddingFatal(format!("expected {expected} vectors, got {}", vectors.len())));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dim) {
        return Err(Error::EmbeddingFatal(format!("expected {dim}-dim vectors, got {}", v.len())));
    }
    Ok(())
}
