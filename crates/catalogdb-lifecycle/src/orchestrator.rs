//! Catalog version lifecycle and the reindex job.
//!
//! `uploaded -> processing -> completed -> active`, or `failed` from
//! processing. Only one job (reindex, ad-hoc index, activation, delete) runs at
//! a time.
//! A reindex builds a temporary collection, swaps it into the canonical name,
//! and only then records the outcome; once the swap is live a metadata failure
//! is reported as critical instead of failing the version.

use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use catalogdb_core::config::{IndexerSettings, LifecycleSettings, Settings};
use catalogdb_core::error::{Error, Result};
use catalogdb_core::loader::CatalogLoader;
use catalogdb_core::types::{CatalogVersion, Product, UploadedFile, VersionId, VersionStatus, VersionStatusReport};
use catalogdb_vector::{
    swap_into_canonical, BatchIndexer, CanonicalHandle, EmbedProvider, MemoryProbe, ProcessMemory, ProgressSink, SwapRequest,
    VectorStore, CRITICAL_TARGET,
};

use crate::repository::VersionRepository;

const LOAD_DONE: u8 = 10;
const INDEX_DONE: u8 = 90;

pub struct CatalogOrchestrator {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbedProvider>,
    handle: Arc<CanonicalHandle>,
    repo: Arc<dyn VersionRepository>,
    loader: CatalogLoader,
    indexer: IndexerSettings,
    lifecycle: LifecycleSettings,
    canonical: String,
    probe: Arc<dyn MemoryProbe>,
    job_lock: Mutex<()>,
}

/// Maps indexer progress onto the 10-90% band of a version record.
struct VersionProgress {
    repo: Arc<dyn VersionRepository>,
    version: Mutex<CatalogVersion>,
}

#[async_trait]
impl ProgressSink for VersionProgress {
    async fn on_batch(&self, processed: usize, total: usize) {
        let span = usize::from(INDEX_DONE - LOAD_DONE);
        let pct = LOAD_DONE + (span * processed / total.max(1)) as u8;
        let mut version = self.version.lock().await;
        version.set_progress(pct, format!("Indexed {processed}/{total} products"));
        if let Err(e) = self.repo.update(&version).await {
            warn!(version = version.id, error = %e, "could not record progress");
        }
    }
}

fn not_found(id: VersionId) -> Error { Error::NotFound(format!("catalog version {id}")) }

impl CatalogOrchestrator {
    pub fn new(
        store: Arc<dyn VectorStore>,
        provider: Arc<dyn EmbedProvider>,
        handle: Arc<CanonicalHandle>,
        repo: Arc<dyn VersionRepository>,
        settings: &Settings,
    ) -> Self {
        Self {
            store,
            provider,
            handle,
            repo,
            loader: CatalogLoader::new(),
            indexer: settings.indexer.clone(),
            lifecycle: settings.lifecycle.clone(),
            canonical: settings.storage.canonical_collection.clone(),
            probe: Arc::new(ProcessMemory),
            job_lock: Mutex::new(()),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn handle(&self) -> &Arc<CanonicalHandle> { &self.handle }

    /// Copy `src` into `upload_dir` under a timestamped name.
    pub async fn stage_upload(src: &Path, upload_dir: &Path) -> Result<UploadedFile> {
        let filename = src
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Operation(format!("not a file path: {}", src.display())))?
            .to_string();
        tokio::fs::create_dir_all(upload_dir).await?;
        let path = upload_dir.join(format!("{}_{}", Utc::now().format("%Y%m%d%H%M%S%3f"), filename));
        let size_bytes = tokio::fs::copy(src, &path).await?;
        debug!(src = %src.display(), dest = %path.display(), size_bytes, "upload staged");
        Ok(UploadedFile { filename, path, size_bytes })
    }

    pub async fn create_version(&self, upload: &UploadedFile, uploaded_by: Option<String>) -> Result<VersionId> {
        let version = self.repo.insert(upload, uploaded_by).await?;
        info!(version = version.id, file = %version.filename, "catalog version created");
        Ok(version.id)
    }

    pub async fn get_status(&self, id: VersionId) -> Result<VersionStatusReport> {
        Ok(self.repo.get(id).await?.ok_or_else(|| not_found(id))?.status_report())
    }

    pub async fn list_versions(&self, limit: usize) -> Result<Vec<CatalogVersion>> {
        self.repo.list(limit).await
    }

    /// Rebuild the canonical collection from the version's source file.
    pub async fn reindex(&self, id: VersionId) -> Result<CatalogVersion> {
        let _job = self.job_lock.try_lock().map_err(|_| Error::ReindexInProgress)?;
        let mut version = self.repo.get(id).await?.ok_or_else(|| not_found(id))?;
        version.transition(VersionStatus::Processing)?;
        version.started_at = Some(Utc::now());
        version.completed_at = None;
        version.error_message = None;
        version.products_count = 0;
        version.set_progress(0, "Loading catalog file");
        self.repo.update(&version).await?;
        info!(version = id, file = %version.filename, "reindex started");

        let temp = format!("{}__tmp_{}_{}", self.canonical, id, Utc::now().format("%Y%m%d%H%M%S"));
        match self.run_reindex(&mut version, &temp).await {
            Ok(()) => {
                info!(version = id, products = version.products_count, "reindex finished");
                Ok(version)
            }
            Err(e @ Error::PersistenceUpdate(_)) => Err(e),
            Err(e) => {
                self.mark_failed(&mut version, &temp, &e).await;
                Err(e)
            }
        }
    }

    async fn run_reindex(&self, version: &mut CatalogVersion, temp: &str) -> Result<()> {
        let products = self.load(&version.file_path).await?;
        version.products_count = products.len();
        version.set_progress(LOAD_DONE, format!("Loaded {} products", products.len()));
        self.repo.update(version).await?;

        let sink = VersionProgress { repo: self.repo.clone(), version: Mutex::new(version.clone()) };
        self.build(&products, temp, Some(&sink)).await?;
        *version = sink.version.into_inner();
        version.set_progress(INDEX_DONE, "Swapping collections");
        self.repo.update(version).await?;

        let previous = self.other_active(Some(version.id)).await?;
        let retain = previous.first().map(|v| self.retained_name(v.id));
        let outcome = swap_into_canonical(
            self.store.as_ref(),
            &self.handle,
            SwapRequest {
                source: temp,
                canonical: &self.canonical,
                expected: products.len(),
                page_size: self.indexer.copy_page_size,
                retain_previous_as: retain.as_deref(),
            },
        )
        .await?;

        let now = Utc::now();
        version.transition(VersionStatus::Completed)?;
        version.completed_at = Some(now);
        version.transition(VersionStatus::Active)?;
        version.indexed_at = Some(now);
        version.collection_name = Some(self.canonical.clone());
        version.set_progress(100, format!("Indexed {} products", outcome.documents));
        self.finalize(Some(version), &previous, outcome.retained.as_deref()).await
    }

    async fn mark_failed(&self, version: &mut CatalogVersion, temp: &str, cause: &Error) {
        error!(version = version.id, error = %cause, "reindex failed");
        if let Err(e) = self.store.delete_collection(temp).await {
            warn!(collection = temp, error = %e, "could not drop temporary collection");
        }
        if let Err(e) = version.transition(VersionStatus::Failed) {
            warn!(version = version.id, error = %e, "unexpected state while failing job");
        }
        version.error_message = Some(cause.to_string());
        let pct = version.progress;
        version.set_progress(pct, "Failed");
        if let Err(e) = self.persist(version).await {
            error!(version = version.id, error = %e, "could not record job failure");
        }
    }

    /// Load, index, and swap `path` in without a version record. Returns the
    /// number of products now served.
    pub async fn index_catalog(&self, path: &Path, progress: Option<&dyn ProgressSink>) -> Result<usize> {
        let _job = self.job_lock.try_lock().map_err(|_| Error::ReindexInProgress)?;
        let products = self.load(path).await?;
        let temp = format!("{}__tmp_adhoc_{}", self.canonical, Utc::now().format("%Y%m%d%H%M%S"));
        let previous = self.other_active(None).await?;
        let retain = previous.first().map(|v| self.retained_name(v.id));

        let swapped = async {
            self.build(&products, &temp, progress).await?;
            swap_into_canonical(
                self.store.as_ref(),
                &self.handle,
                SwapRequest {
                    source: &temp,
                    canonical: &self.canonical,
                    expected: products.len(),
                    page_size: self.indexer.copy_page_size,
                    retain_previous_as: retain.as_deref(),
                },
            )
            .await
        }
        .await;
        let outcome = match swapped {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(drop_err) = self.store.delete_collection(&temp).await {
                    warn!(collection = %temp, error = %drop_err, "could not drop temporary collection");
                }
                return Err(e);
            }
        };
        self.finalize(None, &previous, outcome.retained.as_deref()).await?;
        info!(path = %path.display(), products = outcome.documents, "catalog indexed");
        Ok(outcome.documents)
    }

    /// Serve a completed version again. Its collection must still exist.
    pub async fn activate(&self, id: VersionId) -> Result<CatalogVersion> {
        let _job = self.job_lock.try_lock().map_err(|_| Error::ReindexInProgress)?;
        let mut version = self.repo.get(id).await?.ok_or_else(|| not_found(id))?;
        if !version.status.is_activatable() {
            return Err(Error::InvalidTransition { id, from: version.status, to: VersionStatus::Active });
        }
        let backing = version
            .collection_name
            .clone()
            .ok_or_else(|| Error::NotFound(format!("collection for catalog version {id}")))?;
        if !self.store.collection_exists(&backing).await? {
            return Err(Error::NotFound(format!("collection '{backing}' for catalog version {id}")));
        }

        let previous = self.other_active(Some(id)).await?;
        let retained = if backing == self.canonical {
            self.handle.publish(&self.canonical);
            None
        } else {
            let expected = self.store.count(&backing).await?;
            let retain = previous.first().map(|v| self.retained_name(v.id));
            let outcome = swap_into_canonical(
                self.store.as_ref(),
                &self.handle,
                SwapRequest {
                    source: &backing,
                    canonical: &self.canonical,
                    expected,
                    page_size: self.indexer.copy_page_size,
                    retain_previous_as: retain.as_deref(),
                },
            )
            .await?;
            outcome.retained
        };

        version.transition(VersionStatus::Active)?;
        version.collection_name = Some(self.canonical.clone());
        version.indexed_at = Some(Utc::now());
        version.set_progress(100, "Active");
        self.finalize(Some(&version), &previous, retained.as_deref()).await?;
        info!(version = id, "catalog version activated");
        Ok(version)
    }

    /// Remove a non-active version, its source file, and its collection.
    /// Rejected while another job holds the lock.
    pub async fn delete(&self, id: VersionId) -> Result<()> {
        let _job = self.job_lock.try_lock().map_err(|_| Error::ReindexInProgress)?;
        let version = self.repo.get(id).await?.ok_or_else(|| not_found(id))?;
        match version.status {
            VersionStatus::Active => return Err(Error::ActiveVersionDeletion(id)),
            VersionStatus::Processing => return Err(Error::Operation(format!("catalog version {id} is being processed"))),
            _ => {}
        }
        match tokio::fs::remove_file(&version.file_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %version.file_path.display(), "source file already gone");
            }
            Err(e) => return Err(e.into()),
        }
        if let Some(collection) = version.collection_name.as_deref().filter(|c| *c != self.canonical) {
            self.store.delete_collection(collection).await?;
        }
        self.repo.delete(id).await?;
        info!(version = id, "catalog version deleted");
        Ok(())
    }

    async fn load(&self, path: &Path) -> Result<Vec<Product>> {
        let loader = self.loader.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || loader.load(&path))
            .await
            .map_err(|e| Error::Operation(format!("catalog loader task failed: {e}")))?
    }

    async fn build(&self, products: &[Product], temp: &str, progress: Option<&dyn ProgressSink>) -> Result<()> {
        let indexer = BatchIndexer::new(self.store.clone(), self.provider.clone(), self.indexer.clone()).with_probe(self.probe.clone());
        let report = indexer.index(products, temp, progress).await?;
        if report.failed_batches > 0 {
            warn!(collection = temp, failed_batches = report.failed_batches, skipped = report.skipped, "some batches were not indexed");
        }
        Ok(())
    }

    fn retained_name(&self, id: VersionId) -> String { format!("{}__v{}", self.canonical, id) }

    async fn other_active(&self, except: Option<VersionId>) -> Result<Vec<CatalogVersion>> {
        Ok(self
            .repo
            .list(usize::MAX)
            .await?
            .into_iter()
            .filter(|v| v.status == VersionStatus::Active && Some(v.id) != except)
            .collect())
    }

    /// Record the new active version and demote the previous ones. The first
    /// previous version keeps the retained collection, if any.
    async fn finalize(&self, active: Option<&CatalogVersion>, previous: &[CatalogVersion], retained: Option<&str>) -> Result<()> {
        let mut outcome = match active {
            Some(v) => self.persist(v).await,
            None => Ok(()),
        };
        for (i, prev) in previous.iter().enumerate() {
            let mut prev = prev.clone();
            prev.transition(VersionStatus::Completed)?;
            prev.collection_name = if i == 0 { retained.map(str::to_string) } else { None };
            prev.set_progress(100, "Deactivated");
            if let Err(e) = self.persist(&prev).await {
                outcome = outcome.and(Err(e));
            }
        }
        outcome.map_err(|e| {
            error!(
                target: CRITICAL_TARGET,
                version = active.map(|v| v.id),
                error = %e,
                "catalog is live but version metadata could not be saved"
            );
            Error::PersistenceUpdate(e.to_string())
        })
    }

    async fn persist(&self, version: &CatalogVersion) -> Result<()> {
        let retries = self.lifecycle.persist_attempts.max(1) - 1;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(self.lifecycle.persist_backoff_ms))
            .with_max_times(retries);
        (|| async move { self.repo.update(version).await })
            .retry(backoff)
            .when(Error::is_retryable)
            .notify(|e, after| warn!(version = version.id, error = %e, retry_in_ms = after.as_millis() as u64, "version update failed, retrying"))
            .await
    }
}
