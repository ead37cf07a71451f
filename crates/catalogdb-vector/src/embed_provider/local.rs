//! Local embedding provider using the crate `catalogdb-embed`.
//!
//! The model lives in a [`SharedModel`]: loaded lazily at most once, shared by
//! every provider clone, and releasable when the process wants the memory back.
//! Inference runs on the blocking pool.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use catalogdb_core::error::{Error, Result};
use catalogdb_core::traits::Embedder;
use catalogdb_embed::{BgeM3Embedder, FakeEmbedder};

use super::{check_output, EmbedProvider};

type Loader = Arc<dyn Fn() -> anyhow::Result<Arc<dyn Embedder>> + Send + Sync>;

/// Process-wide handle to an in-process model.
pub struct SharedModel {
    slot: Mutex<Option<Arc<dyn Embedder>>>,
    loader: Loader,
    dim: usize,
}

impl SharedModel {
    pub fn new(dim: usize, loader: impl Fn() -> anyhow::Result<Arc<dyn Embedder>> + Send + Sync + 'static) -> Self {
        Self { slot: Mutex::new(None), loader: Arc::new(loader), dim }
    }

    /// Handle around an already constructed model.
    pub fn preloaded(model: Arc<dyn Embedder>) -> Self {
        let dim = model.dim();
        let reload = model.clone();
        Self { slot: Mutex::new(Some(model)), loader: Arc::new(move || Ok(reload.clone())), dim }
    }

    pub fn bge_m3(model_dir: Option<PathBuf>, dim: usize) -> Self {
        Self::new(dim, move || {
            let model: Arc<dyn Embedder> = Arc::new(BgeM3Embedder::new(model_dir.as_deref())?);
            Ok(model)
        })
    }

    pub fn dim(&self) -> usize { self.dim }

    /// Return the loaded model, loading it on the blocking pool first if needed.
    /// Concurrent callers wait on the same load.
    pub async fn get_or_load(&self) -> Result<Arc<dyn Embedder>> {
        let mut slot = self.slot.lock().await;
        if let Some(model) = slot.as_ref() {
            return Ok(model.clone());
        }
        let loader = self.loader.clone();
        let model = tokio::task::spawn_blocking(move || loader())
            .await
            .map_err(|e| Error::EmbeddingFatal(format!("model loader panicked: {e}")))?
            .map_err(|e| Error::EmbeddingFatal(format!("failed to load embedding model: {e:#}")))?;
        if model.dim() != self.dim {
            return Err(Error::EmbeddingFatal(format!(
                "model produces {}-dim vectors but embedding.dim is {}",
                model.dim(),
                self.dim
            )));
        }
        info!(dim = self.dim, "embedding model ready");
        *slot = Some(model.clone());
        Ok(model)
    }

    pub async fn is_loaded(&self) -> bool { self.slot.lock().await.is_some() }

    /// Drop the cached model. In-flight calls keep their own `Arc`.
    pub async fn release(&self) {
        if self.slot.lock().await.take().is_some() {
            debug!("embedding model released");
        }
    }
}

#[derive(Clone)]
pub struct LocalProvider {
    model: Arc<SharedModel>,
    id: String,
    batch_size: usize,
}

impl LocalProvider {
    pub fn new(model: Arc<SharedModel>, model_name: &str, batch_size: usize) -> Self {
        let id = format!("local:{}:d{}", model_name, model.dim());
        Self { model, id, batch_size: batch_size.max(1) }
    }

    /// Deterministic hashed-token embeddings, no model files needed.
    pub fn fake(dim: usize, batch_size: usize) -> Self {
        let model = SharedModel::preloaded(Arc::new(FakeEmbedder::new(dim)));
        let id = format!("fake:hash:d{}", model.dim());
        Self { model: Arc::new(model), id, batch_size: batch_size.max(1) }
    }

    pub fn shared_model(&self) -> &Arc<SharedModel> { &self.model }
}

#[async_trait]
impl EmbedProvider for LocalProvider {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.model.dim() }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        let model = self.model.get_or_load().await?;
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let model = model.clone();
            let chunk = chunk.to_vec();
            let vectors = tokio::task::spawn_blocking(move || model.embed_batch(&chunk))
                .await
                .map_err(|e| Error::EmbeddingFatal(format!("inference task panicked: {e}")))?
                .map_err(|e| Error::EmbeddingRetryable(format!("local inference failed: {e:#}")))?;
            out.extend(vectors);
        }
        check_output(texts.len(), self.dim(), &out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn model_loads_once_and_reloads_after_release() {
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let model = Arc::new(SharedModel::new(8, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            let m: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new(8));
            Ok(m)
        }));
        let provider = LocalProvider::new(model.clone(), "test", 2);
        assert!(!model.is_loaded().await);

        let texts: Vec<String> = ["a b", "c", "d e f"].iter().map(|s| s.to_string()).collect();
        let v = provider.embed(&texts).await.unwrap();
        assert_eq!(v.len(), 3);
        provider.embed(&texts).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 1);

        model.release().await;
        assert!(!model.is_loaded().await);
        provider.embed(&texts).await.unwrap();
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn load_failure_is_fatal() {
        let model = Arc::new(SharedModel::new(8, || Err(anyhow::anyhow!("no weights"))));
        let provider = LocalProvider::new(model, "missing", 4);
        let err = provider.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn dim_mismatch_is_fatal() {
        let model = Arc::new(SharedModel::new(8, || {
            let m: Arc<dyn Embedder> = Arc::new(FakeEmbedder::new(4));
            Ok(m)
        }));
        let provider = LocalProvider::new(model, "bad", 4);
        assert!(provider.embed(&["x".to_string()]).await.unwrap_err().is_fatal());
    }
}
