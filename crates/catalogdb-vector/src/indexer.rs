//! Memory-aware batch indexer.
//!
//! Products are embedded and written in strictly sequential batches. A failing
//! batch is skipped so one bad slice cannot sink a whole catalog; a fatal
//! embedding error (bad credentials, missing model) aborts the run. Every
//! `reclaim_every` records the indexer yields, pauses, and samples resident
//! memory, pausing longer while the process is above the threshold.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use catalogdb_core::config::IndexerSettings;
use catalogdb_core::error::Result;
use catalogdb_core::types::Product;

use crate::embed_provider::EmbedProvider;
use crate::memory::{MemoryProbe, ProcessMemory};
use crate::store::{IndexedDocument, VectorStore};

#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Called after every batch with the number of records processed so far.
    async fn on_batch(&self, processed: usize, total: usize);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: usize,
    pub failed_batches: usize,
    /// Records dropped together with their failed batch.
    pub skipped: usize,
    pub pressure_pauses: usize,
}

pub struct BatchIndexer {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbedProvider>,
    settings: IndexerSettings,
    probe: Arc<dyn MemoryProbe>,
}

impl BatchIndexer {
    pub fn new(store: Arc<dyn VectorStore>, provider: Arc<dyn EmbedProvider>, settings: IndexerSettings) -> Self {
        Self { store, provider, settings, probe: Arc::new(ProcessMemory) }
    }

    pub fn with_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Index `products` into `collection`, creating it if needed.
    pub async fn index(&self, products: &[Product], collection: &str, progress: Option<&dyn ProgressSink>) -> Result<IndexReport> {
        let started = Instant::now();
        self.store.create_collection(collection, self.provider.dim()).await?;

        let total = products.len();
        let batch_size = self.settings.batch_size.max(1);
        let mut report = IndexReport::default();
        let mut processed = 0usize;
        let mut since_reclaim = 0usize;
        info!(collection, total, batch_size, provider = self.provider.embedder_id(), "indexing started");

        for (n, batch) in products.chunks(batch_size).enumerate() {
            match self.index_batch(batch, collection).await {
                Ok(()) => report.indexed += batch.len(),
                Err(e) if e.is_fatal() => {
                    error!(collection, batch = n, error = %e, "fatal embedding error, aborting");
                    return Err(e);
                }
                Err(e) => {
                    warn!(collection, batch = n, size = batch.len(), error = %e, "batch failed, skipping");
                    report.failed_batches += 1;
                    report.skipped += batch.len();
                    tokio::time::sleep(self.settings.reclaim_pause()).await;
                }
            }
            processed += batch.len();
            since_reclaim += batch.len();
            if let Some(p) = progress { p.on_batch(processed, total).await; }

            if self.settings.reclaim_every > 0 && since_reclaim >= self.settings.reclaim_every {
                since_reclaim = 0;
                if self.reclaim().await { report.pressure_pauses += 1; }
            }
        }

        info!(
            collection,
            indexed = report.indexed,
            failed_batches = report.failed_batches,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "indexing finished"
        );
        Ok(report)
    }

    async fn index_batch(&self, batch: &[Product], collection: &str) -> Result<()> {
        let texts: Vec<String> = batch.iter().map(Product::searchable_text).collect();
        let vectors = self.provider.embed(&texts).await?;
        let docs: Vec<IndexedDocument> = batch
            .iter()
            .zip(texts)
            .zip(vectors)
            .map(|((p, text), vector)| IndexedDocument { product: p.clone(), text, vector })
            .collect();
        self.store.add(collection, &docs).await
    }

    /// Yield, pause, and back off harder under memory pressure. Returns whether
    /// the pressure pause was taken.
    async fn reclaim(&self) -> bool {
        tokio::task::yield_now().await;
        tokio::time::sleep(self.settings.reclaim_pause()).await;
        match self.probe.resident_bytes() {
            Some(rss) if rss > self.settings.memory_threshold_bytes() => {
                warn!(rss_mb = rss / (1024 * 1024), threshold_mb = self.settings.memory_threshold_mb, "memory pressure, pausing");
                tokio::time::sleep(self.settings.pressure_pause()).await;
                true
            }
            Some(rss) => {
                debug!(rss_mb = rss / (1024 * 1024), "memory checkpoint");
                false
            }
            None => false,
        }
    }
}
