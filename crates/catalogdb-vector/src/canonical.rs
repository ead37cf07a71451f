//! The single indirection point between searches and the live collection.
//!
//! Readers take a cheap snapshot (`Arc`) and never hold the lock across I/O.
//! Every publish bumps the generation, which also invalidates per-generation
//! caches such as the category list.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;
use tracing::info;

use catalogdb_core::error::Result;

use crate::store::VectorStore;

#[derive(Debug)]
pub struct ActiveCollection {
    pub name: String,
    pub generation: u64,
    categories: OnceCell<Vec<String>>,
}

impl ActiveCollection {
    /// Categories of this generation, computed by `init` on first use.
    pub async fn categories_or_init<F, Fut>(&self, init: F) -> Result<&[String]>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Vec<String>>>,
    {
        self.categories.get_or_try_init(init).await.map(Vec::as_slice)
    }
}

#[derive(Debug, Default)]
pub struct CanonicalHandle {
    current: RwLock<Option<Arc<ActiveCollection>>>,
    generation: AtomicU64,
}

impl CanonicalHandle {
    pub fn new() -> Self { Self::default() }

    /// Handle that serves `name` if the store already has it.
    pub async fn bootstrap(store: &dyn VectorStore, name: &str) -> Result<Self> {
        let handle = Self::new();
        if store.collection_exists(name).await? {
            handle.publish(name);
        }
        Ok(handle)
    }

    pub fn current(&self) -> Option<Arc<ActiveCollection>> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn generation(&self) -> u64 { self.generation.load(Ordering::SeqCst) }

    /// Point readers at `name`. Returns the new generation.
    pub fn publish(&self, name: &str) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let next = Arc::new(ActiveCollection { name: name.to_string(), generation, categories: OnceCell::new() });
        match self.current.write() {
            Ok(mut guard) => *guard = Some(next),
            Err(poisoned) => *poisoned.into_inner() = Some(next),
        }
        info!(collection = name, generation, "published canonical collection");
        generation
    }
}
