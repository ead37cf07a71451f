use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

use catalogdb_core::config::{IndexerSettings, LifecycleSettings, SearchSettings, Settings};
use catalogdb_core::error::{Error, Result};
use catalogdb_core::types::{CatalogVersion, Product, UploadedFile, VersionId, VersionStatus};
use catalogdb_hybrid::HybridSearchEngine;
use catalogdb_lifecycle::{CatalogOrchestrator, LanceVersionRepository, MemoryVersionRepository, VersionRepository};
use catalogdb_vector::table::open_db;
use catalogdb_vector::{
    CanonicalHandle, EmbedProvider, FixedMemory, IndexedDocument, LanceStore, LocalProvider, MemoryStore, Neighbour, VectorStore,
};

const DIM: usize = 32;

type Row<'a> = (&'a str, &'a str, &'a str, &'a str);

const TOOLS: &[Row] = &[("t1", "Cordless drill", "Tools", "T-1"), ("t2", "Claw hammer", "Tools", "T-2"), ("t3", "Hand saw", "Tools", "T-3")];
const GARDEN: &[Row] = &[("g1", "Garden hose", "Garden", "G-1"), ("g2", "Leaf rake", "Garden", "G-2")];
const POISONED: &[Row] = &[
    ("p1", "Garden hose", "Garden", "G-1"),
    ("p2", "Leaf rake", "Garden", "G-2"),
    ("p3", "Poison pill", "Garden", "G-3"),
    ("p4", "Watering can", "Garden", "G-4"),
    ("p5", "Shovel", "Garden", "G-5"),
    ("p6", "Wheelbarrow", "Garden", "G-6"),
];

fn settings() -> Settings {
    Settings {
        indexer: IndexerSettings { batch_size: 2, reclaim_every: 100, reclaim_pause_ms: 0, pressure_pause_ms: 0, ..Default::default() },
        lifecycle: LifecycleSettings { persist_attempts: 3, persist_backoff_ms: 1 },
        ..Default::default()
    }
}

fn csv_body(rows: &[Row]) -> String {
    let mut body = String::from("ID,Product Name,Category 1,Article\n");
    for (id, name, category, article) in rows {
        body.push_str(&format!("{id},{name},{category},{article}\n"));
    }
    body
}

fn write_catalog(dir: &Path, name: &str, rows: &[Row]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, csv_body(rows)).unwrap();
    path
}

/// Fails any batch containing a "Poison" product. A gated provider parks every
/// call until the test hands out permits.
struct TestProvider {
    inner: LocalProvider,
    entered: Notify,
    gate: Option<Semaphore>,
}

impl TestProvider {
    fn plain() -> Self { Self { inner: LocalProvider::fake(DIM, 8), entered: Notify::new(), gate: None } }
    fn gated() -> Self { Self { gate: Some(Semaphore::new(0)), ..Self::plain() } }
}

#[async_trait]
impl EmbedProvider for TestProvider {
    fn embedder_id(&self) -> &str { "test:provider" }
    fn dim(&self) -> usize { DIM }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.entered.notify_one();
        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(Error::operation)?.forget();
        }
        if texts.iter().any(|t| t.contains("Poison")) {
            return Err(Error::EmbeddingRetryable("upstream timeout".into()));
        }
        self.inner.embed(texts).await
    }
}

struct Harness {
    tmp: TempDir,
    store: Arc<MemoryStore>,
    provider: Arc<TestProvider>,
    repo: Arc<dyn VersionRepository>,
    orch: Arc<CatalogOrchestrator>,
}

impl Harness {
    fn new() -> Self { Self::with(TestProvider::plain(), Arc::new(MemoryVersionRepository::new())) }

    fn with(provider: TestProvider, repo: Arc<dyn VersionRepository>) -> Self {
        let store = Arc::new(MemoryStore::new());
        let provider = Arc::new(provider);
        let orch = CatalogOrchestrator::new(store.clone(), provider.clone(), Arc::new(CanonicalHandle::new()), repo.clone(), &settings())
            .with_probe(Arc::new(FixedMemory(None)));
        Self { tmp: TempDir::new().unwrap(), store, provider, repo, orch: Arc::new(orch) }
    }

    async fn upload(&self, name: &str, rows: &[Row<'_>]) -> anyhow::Result<VersionId> {
        let src = write_catalog(self.tmp.path(), name, rows);
        let staged = CatalogOrchestrator::stage_upload(&src, &self.tmp.path().join("uploads")).await?;
        Ok(self.orch.create_version(&staged, Some("tester".into())).await?)
    }

    async fn version(&self, id: VersionId) -> anyhow::Result<CatalogVersion> {
        Ok(self.repo.get(id).await?.expect("version exists"))
    }

    fn engine(&self) -> HybridSearchEngine {
        HybridSearchEngine::new(self.store.clone(), self.provider.clone(), self.orch.handle().clone(), SearchSettings::default())
    }
}

#[tokio::test]
async fn stage_upload_copies_under_timestamped_name() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let src = write_catalog(tmp.path(), "catalog.csv", TOOLS);
    let staged = CatalogOrchestrator::stage_upload(&src, &tmp.path().join("uploads")).await?;
    assert_eq!(staged.filename, "catalog.csv");
    assert_eq!(staged.path.parent(), Some(tmp.path().join("uploads").as_path()));
    assert!(staged.path.file_name().unwrap().to_string_lossy().ends_with("_catalog.csv"));
    assert_eq!(staged.size_bytes, std::fs::metadata(&src)?.len());
    assert!(src.exists());
    Ok(())
}

#[tokio::test]
async fn reindex_activates_new_catalog() -> anyhow::Result<()> {
    let h = Harness::new();
    let engine = h.engine();
    assert!(!engine.is_indexed().await);

    let id = h.upload("tools.csv", TOOLS).await?;
    assert_eq!(h.orch.get_status(id).await?.status, VersionStatus::Uploaded);

    let version = h.orch.reindex(id).await?;
    assert_eq!(version.status, VersionStatus::Active);
    assert_eq!(version.products_count, 3);
    assert_eq!(version.collection_name.as_deref(), Some("products"));

    let status = h.orch.get_status(id).await?;
    assert_eq!(status.status, VersionStatus::Active);
    assert_eq!(status.progress, 100);
    assert!(status.started_at.is_some() && status.completed_at.is_some() && status.indexed_at.is_some());

    assert!(engine.is_indexed().await);
    assert_eq!(engine.get_categories().await, vec!["Tools"]);
    assert_eq!(engine.search("T-2", None, 5).await[0].product.id, "t2");
    assert_eq!(h.store.collection_names().await?, vec!["products"]);

    // A second catalog replaces the first; the old one stays restorable.
    let next = h.upload("garden.csv", GARDEN).await?;
    h.orch.reindex(next).await?;
    assert_eq!(engine.get_categories().await, vec!["Garden"]);
    let first = h.version(id).await?;
    assert_eq!(first.status, VersionStatus::Completed);
    assert_eq!(first.collection_name.as_deref(), Some("products__v1"));
    assert_eq!(h.store.count("products__v1").await?, 3);
    assert_eq!(h.store.count("products").await?, 2);
    let listed: Vec<_> = h.orch.list_versions(10).await?.iter().map(|v| (v.id, v.status)).collect();
    assert_eq!(listed, vec![(next, VersionStatus::Active), (id, VersionStatus::Completed)]);
    Ok(())
}

#[tokio::test]
async fn failed_batch_leaves_canonical_untouched() -> anyhow::Result<()> {
    let h = Harness::new();
    let good = h.upload("tools.csv", TOOLS).await?;
    h.orch.reindex(good).await?;

    let bad = h.upload("poisoned.csv", POISONED).await?;
    let err = h.orch.reindex(bad).await.unwrap_err();
    assert!(matches!(err, Error::IndexConsistency { expected: 6, actual: 4, .. }), "{err:?}");

    let failed = h.version(bad).await?;
    assert_eq!(failed.status, VersionStatus::Failed);
    assert!(failed.error_message.is_some());
    assert_eq!(h.version(good).await?.status, VersionStatus::Active);
    assert_eq!(h.store.collection_names().await?, vec!["products"]);
    assert_eq!(h.store.count("products").await?, 3);
    assert_eq!(h.engine().get_categories().await, vec!["Tools"]);

    // Failed versions may be processed again once the file is fixed.
    std::fs::write(&failed.file_path, csv_body(GARDEN))?;
    let retried = h.orch.reindex(bad).await?;
    assert_eq!(retried.status, VersionStatus::Active);
    assert_eq!(retried.error_message, None);
    assert_eq!(h.engine().get_categories().await, vec!["Garden"]);
    Ok(())
}

#[tokio::test]
async fn missing_source_file_fails_the_version() -> anyhow::Result<()> {
    let h = Harness::new();
    let id = h.upload("tools.csv", TOOLS).await?;
    std::fs::remove_file(&h.version(id).await?.file_path)?;

    assert!(matches!(h.orch.reindex(id).await, Err(Error::Io(_))));
    assert_eq!(h.version(id).await?.status, VersionStatus::Failed);
    assert!(h.orch.handle().current().is_none());
    Ok(())
}

#[tokio::test]
async fn only_one_job_runs_at_a_time() -> anyhow::Result<()> {
    let h = Harness::with(TestProvider::gated(), Arc::new(MemoryVersionRepository::new()));
    let first = h.upload("tools.csv", TOOLS).await?;
    let second = h.upload("garden.csv", GARDEN).await?;

    let orch = h.orch.clone();
    let job = tokio::spawn(async move { orch.reindex(first).await });
    h.provider.entered.notified().await;

    assert!(matches!(h.orch.reindex(second).await, Err(Error::ReindexInProgress)));
    assert!(matches!(h.orch.index_catalog(Path::new("unused.csv"), None).await, Err(Error::ReindexInProgress)));
    assert_eq!(h.version(first).await?.status, VersionStatus::Processing);
    assert_eq!(h.version(second).await?.status, VersionStatus::Uploaded);

    h.provider.gate.as_ref().unwrap().add_permits(1_000);
    job.await??;
    assert_eq!(h.version(first).await?.status, VersionStatus::Active);
    h.orch.reindex(second).await?;
    Ok(())
}

/// Rejects every write that would record a version as active.
struct StaleRepo {
    inner: MemoryVersionRepository,
    active_updates: AtomicUsize,
}

#[async_trait]
impl VersionRepository for StaleRepo {
    async fn insert(&self, upload: &UploadedFile, uploaded_by: Option<String>) -> Result<CatalogVersion> {
        self.inner.insert(upload, uploaded_by).await
    }
    async fn get(&self, id: VersionId) -> Result<Option<CatalogVersion>> { self.inner.get(id).await }
    async fn update(&self, version: &CatalogVersion) -> Result<()> {
        if version.status == VersionStatus::Active {
            self.active_updates.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Store("metadata database unavailable".into()));
        }
        self.inner.update(version).await
    }
    async fn list(&self, limit: usize) -> Result<Vec<CatalogVersion>> { self.inner.list(limit).await }
    async fn delete(&self, id: VersionId) -> Result<()> { self.inner.delete(id).await }
}

#[tokio::test]
async fn metadata_failure_after_swap_is_reported_not_rolled_back() -> anyhow::Result<()> {
    let repo = Arc::new(StaleRepo { inner: MemoryVersionRepository::new(), active_updates: AtomicUsize::new(0) });
    let h = Harness::with(TestProvider::plain(), repo.clone());
    let id = h.upload("tools.csv", TOOLS).await?;

    let err = h.orch.reindex(id).await.unwrap_err();
    assert!(matches!(err, Error::PersistenceUpdate(_)), "{err:?}");
    assert_eq!(repo.active_updates.load(Ordering::SeqCst), 3);

    // The new catalog is live even though its record is stale.
    assert_eq!(h.orch.handle().current().unwrap().name, "products");
    assert_eq!(h.store.count("products").await?, 3);
    let stale = h.version(id).await?;
    assert_eq!(stale.status, VersionStatus::Processing);
    assert_eq!(stale.progress, 90);
    Ok(())
}

#[tokio::test]
async fn delete_rules() -> anyhow::Result<()> {
    let h = Harness::new();
    let old = h.upload("tools.csv", TOOLS).await?;
    h.orch.reindex(old).await?;
    let current = h.upload("garden.csv", GARDEN).await?;
    h.orch.reindex(current).await?;

    assert!(matches!(h.orch.delete(current).await, Err(Error::ActiveVersionDeletion(id)) if id == current));

    let retired = h.version(old).await?;
    assert!(retired.file_path.exists());
    assert!(h.store.collection_exists("products__v1").await?);
    h.orch.delete(old).await?;
    assert!(!retired.file_path.exists());
    assert!(!h.store.collection_exists("products__v1").await?);
    assert!(h.repo.get(old).await?.is_none());
    assert_eq!(h.store.count("products").await?, 2);

    // A missing source file does not block deletion.
    let orphan = h.upload("orphan.csv", TOOLS).await?;
    std::fs::remove_file(&h.version(orphan).await?.file_path)?;
    h.orch.delete(orphan).await?;
    assert!(matches!(h.orch.delete(orphan).await, Err(Error::NotFound(_))));
    Ok(())
}

/// Once armed, parks every page scan until the test hands out permits.
struct GatedStore {
    inner: MemoryStore,
    armed: AtomicBool,
    entered: Notify,
    gate: Semaphore,
}

#[async_trait]
impl VectorStore for GatedStore {
    async fn collection_names(&self) -> Result<Vec<String>> { self.inner.collection_names().await }
    async fn create_collection(&self, name: &str, dim: usize) -> Result<()> { self.inner.create_collection(name, dim).await }
    async fn delete_collection(&self, name: &str) -> Result<()> { self.inner.delete_collection(name).await }
    async fn add(&self, name: &str, docs: &[IndexedDocument]) -> Result<()> { self.inner.add(name, docs).await }
    async fn count(&self, name: &str) -> Result<usize> { self.inner.count(name).await }
    async fn scan_page(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<IndexedDocument>> {
        if self.armed.load(Ordering::SeqCst) {
            self.entered.notify_one();
            self.gate.acquire().await.map_err(Error::operation)?.forget();
        }
        self.inner.scan_page(name, offset, limit).await
    }
    async fn find_by_article(&self, name: &str, article_lower: &str, category: Option<&str>) -> Result<Vec<Product>> {
        self.inner.find_by_article(name, article_lower, category).await
    }
    async fn query(&self, name: &str, vector: &[f32], k: usize, category: Option<&str>) -> Result<Vec<Neighbour>> {
        self.inner.query(name, vector, k, category).await
    }
    async fn dim(&self, name: &str) -> Result<usize> { self.inner.dim(name).await }
}

#[tokio::test]
async fn delete_waits_for_running_activation() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = Arc::new(GatedStore { inner: MemoryStore::new(), armed: AtomicBool::new(false), entered: Notify::new(), gate: Semaphore::new(0) });
    let repo = Arc::new(MemoryVersionRepository::new());
    let orch = Arc::new(
        CatalogOrchestrator::new(store.clone(), Arc::new(LocalProvider::fake(DIM, 8)), Arc::new(CanonicalHandle::new()), repo.clone(), &settings())
            .with_probe(Arc::new(FixedMemory(None))),
    );
    let mut ids = Vec::new();
    for (name, rows) in [("tools.csv", TOOLS), ("garden.csv", GARDEN)] {
        let src = write_catalog(tmp.path(), name, rows);
        let staged = CatalogOrchestrator::stage_upload(&src, &tmp.path().join("uploads")).await?;
        let id = orch.create_version(&staged, None).await?;
        orch.reindex(id).await?;
        ids.push(id);
    }
    let tools = ids[0];

    // Activation copies the retained `products__v1`; deleting that version
    // underneath it must be refused.
    store.armed.store(true, Ordering::SeqCst);
    let job = {
        let orch = orch.clone();
        tokio::spawn(async move { orch.activate(tools).await })
    };
    store.entered.notified().await;
    assert!(matches!(orch.delete(tools).await, Err(Error::ReindexInProgress)));
    assert!(repo.get(tools).await?.is_some());

    store.armed.store(false, Ordering::SeqCst);
    store.gate.add_permits(1_000);
    let activated = job.await??;
    assert_eq!(activated.status, VersionStatus::Active);
    assert_eq!(store.count("products").await?, 3);
    assert!(matches!(orch.delete(tools).await, Err(Error::ActiveVersionDeletion(_))));
    Ok(())
}

#[tokio::test]
async fn activate_restores_retained_version() -> anyhow::Result<()> {
    let h = Harness::new();
    let engine = h.engine();
    let tools = h.upload("tools.csv", TOOLS).await?;
    h.orch.reindex(tools).await?;
    let garden = h.upload("garden.csv", GARDEN).await?;
    h.orch.reindex(garden).await?;
    assert_eq!(engine.get_categories().await, vec!["Garden"]);

    let activated = h.orch.activate(tools).await?;
    assert_eq!(activated.status, VersionStatus::Active);
    assert_eq!(activated.collection_name.as_deref(), Some("products"));
    assert_eq!(engine.get_categories().await, vec!["Tools"]);
    assert_eq!(h.store.count("products").await?, 3);
    assert!(!h.store.collection_exists("products__v1").await?);

    let demoted = h.version(garden).await?;
    assert_eq!(demoted.status, VersionStatus::Completed);
    assert_eq!(demoted.collection_name.as_deref(), Some("products__v2"));
    assert_eq!(h.store.count("products__v2").await?, 2);

    // Re-activating the live version just republishes it.
    let generation = h.orch.handle().generation();
    h.orch.activate(tools).await?;
    assert!(h.orch.handle().generation() > generation);

    let pending = h.upload("pending.csv", GARDEN).await?;
    assert!(matches!(
        h.orch.activate(pending).await,
        Err(Error::InvalidTransition { from: VersionStatus::Uploaded, to: VersionStatus::Active, .. })
    ));
    Ok(())
}

#[tokio::test]
async fn index_catalog_without_version_record() -> anyhow::Result<()> {
    let h = Harness::new();
    let tracked = h.upload("tools.csv", TOOLS).await?;
    h.orch.reindex(tracked).await?;

    let path = write_catalog(h.tmp.path(), "adhoc.csv", GARDEN);
    assert_eq!(h.orch.index_catalog(&path, None).await?, 2);
    let engine = h.engine();
    assert!(engine.is_indexed().await);
    assert_eq!(engine.get_categories().await, vec!["Garden"]);
    let demoted = h.version(tracked).await?;
    assert_eq!(demoted.status, VersionStatus::Completed);
    assert_eq!(demoted.collection_name.as_deref(), Some("products__v1"));
    Ok(())
}

#[tokio::test]
async fn lance_version_repository_round_trip() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let uri = tmp.path().to_string_lossy().to_string();
    let repo = LanceVersionRepository::new(open_db(&uri).await?, "catalog_versions");
    let upload = UploadedFile { filename: "a.csv".into(), path: tmp.path().join("a.csv"), size_bytes: 10 };

    let a = repo.insert(&upload, None).await?;
    let b = repo.insert(&upload, Some("ops".into())).await?;
    assert_eq!((a.id, b.id), (1, 2));

    let mut updated = a.clone();
    updated.transition(VersionStatus::Processing)?;
    updated.set_progress(40, "Indexed 20/50 products");
    repo.update(&updated).await?;
    assert_eq!(repo.get(1).await?, Some(updated));

    let ids: Vec<_> = repo.list(10).await?.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![2, 1]);
    assert_eq!(repo.list(1).await?.len(), 1);

    repo.delete(2).await?;
    assert!(repo.get(2).await?.is_none());
    assert_eq!(repo.insert(&upload, None).await?.id, 3);

    let mut ghost = b.clone();
    ghost.id = 99;
    assert!(matches!(repo.update(&ghost).await, Err(Error::NotFound(_))));

    let reopened = LanceVersionRepository::new(open_db(&uri).await?, "catalog_versions");
    let ids: Vec<_> = reopened.list(10).await?.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![3, 1]);
    Ok(())
}

#[tokio::test]
async fn lancedb_reindex_and_activate() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let uri = tmp.path().join("db").to_string_lossy().to_string();
    let store = Arc::new(LanceStore::open(&uri).await?);
    let repo = Arc::new(LanceVersionRepository::new(store.connection().clone(), "catalog_versions"));
    let provider = Arc::new(LocalProvider::fake(DIM, 8));
    let orch = CatalogOrchestrator::new(store.clone(), provider, Arc::new(CanonicalHandle::new()), repo.clone(), &settings())
        .with_probe(Arc::new(FixedMemory(None)));

    let mut ids = Vec::new();
    for (name, rows) in [("tools.csv", TOOLS), ("garden.csv", GARDEN)] {
        let src = write_catalog(tmp.path(), name, rows);
        let staged = CatalogOrchestrator::stage_upload(&src, &tmp.path().join("uploads")).await?;
        let id = orch.create_version(&staged, None).await?;
        orch.reindex(id).await?;
        ids.push(id);
    }
    assert_eq!(store.count("products").await?, 2);
    assert_eq!(store.count("products__v1").await?, 3);

    orch.activate(ids[0]).await?;
    assert_eq!(store.count("products").await?, 3);
    assert_eq!(repo.get(ids[1]).await?.unwrap().collection_name.as_deref(), Some("products__v2"));
    assert_eq!(repo.get(ids[0]).await?.unwrap().status, VersionStatus::Active);
    Ok(())
}
