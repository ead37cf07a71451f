//! Blue-green replacement of the canonical collection.
//!
//! The store has no native rename, so a rename is a paged copy followed by a
//! count check and only then deletion of the source. Readers are moved to the
//! backup before the canonical name is touched, and back once the new
//! canonical collection has been verified.

use chrono::Utc;
use tracing::{error, info, warn};

use catalogdb_core::error::{Error, Result};

use crate::canonical::CanonicalHandle;
use crate::store::VectorStore;

pub const CRITICAL_TARGET: &str = "catalogdb::critical";

/// Copy every document of `src` into a fresh `dst`. Any existing `dst` is
/// replaced. Returns the verified document count.
pub async fn copy_collection(store: &dyn VectorStore, src: &str, dst: &str, page_size: usize) -> Result<usize> {
    let page_size = page_size.max(1);
    let dim = store.dim(src).await?;
    store.delete_collection(dst).await?;
    store.create_collection(dst, dim).await?;

    let mut offset = 0usize;
    loop {
        let page = store.scan_page(src, offset, page_size).await?;
        if page.is_empty() { break; }
        store.add(dst, &page).await?;
        offset += page.len();
        if page.len() < page_size { break; }
    }

    let expected = store.count(src).await?;
    let actual = store.count(dst).await?;
    if actual != expected {
        return Err(Error::IndexConsistency { collection: dst.to_string(), expected, actual });
    }
    Ok(actual)
}

/// Copy, verify, then delete the source. A failed copy leaves `src` intact
/// and removes the partial destination.
pub async fn rename_collection(store: &dyn VectorStore, src: &str, dst: &str, page_size: usize) -> Result<usize> {
    let n = match copy_collection(store, src, dst, page_size).await {
        Ok(n) => n,
        Err(e) => {
            if let Err(cleanup) = store.delete_collection(dst).await {
                warn!(collection = dst, error = %cleanup, "could not drop partial copy");
            }
            return Err(e);
        }
    };
    store.delete_collection(src).await?;
    Ok(n)
}

#[derive(Debug, Clone)]
pub struct SwapRequest<'a> {
    /// Fully built collection to promote.
    pub source: &'a str,
    pub canonical: &'a str,
    /// Document count the promoted collection must have.
    pub expected: usize,
    pub page_size: usize,
    /// Keep the replaced canonical contents under this name instead of
    /// discarding them after a successful swap.
    pub retain_previous_as: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapOutcome {
    pub generation: u64,
    pub documents: usize,
    /// Where the previous canonical contents now live, if they were retained.
    pub retained: Option<String>,
}

pub async fn swap_into_canonical(store: &dyn VectorStore, handle: &CanonicalHandle, req: SwapRequest<'_>) -> Result<SwapOutcome> {
    let SwapRequest { source, canonical, expected, page_size, retain_previous_as } = req;

    let staged = store.count(source).await?;
    if staged != expected {
        return Err(Error::IndexConsistency { collection: source.to_string(), expected, actual: staged });
    }

    let backup = if store.collection_exists(canonical).await? {
        let name = retain_previous_as
            .map(str::to_string)
            .unwrap_or_else(|| format!("{canonical}__backup_{}", Utc::now().format("%Y%m%d%H%M%S%3f")));
        if let Err(e) = copy_collection(store, canonical, &name, page_size).await {
            drop_quietly(store, &name, "could not drop partial backup").await;
            return Err(e);
        }
        handle.publish(&name);
        if let Err(e) = store.delete_collection(canonical).await {
            // Canonical is still whole; point readers back at it.
            error!(canonical, error = %e, "could not clear canonical collection, swap abandoned");
            handle.publish(canonical);
            drop_quietly(store, &name, "could not drop swap backup").await;
            return Err(e);
        }
        Some(name)
    } else {
        None
    };

    match promote(store, source, canonical, expected, page_size).await {
        Ok(documents) => {
            let generation = handle.publish(canonical);
            let retained = match backup {
                Some(b) if retain_previous_as.is_some() => Some(b),
                Some(b) => {
                    drop_quietly(store, &b, "could not drop swap backup").await;
                    None
                }
                None => None,
            };
            info!(canonical, documents, generation, "canonical collection swapped");
            Ok(SwapOutcome { generation, documents, retained })
        }
        Err(e) => {
            error!(canonical, source, error = %e, "swap failed, rolling back");
            rollback(store, handle, canonical, backup.as_deref(), page_size).await;
            Err(e)
        }
    }
}

async fn promote(store: &dyn VectorStore, source: &str, canonical: &str, expected: usize, page_size: usize) -> Result<usize> {
    rename_collection(store, source, canonical, page_size).await?;
    let actual = store.count(canonical).await?;
    if actual != expected {
        return Err(Error::IndexConsistency { collection: canonical.to_string(), expected, actual });
    }
    Ok(actual)
}

async fn rollback(store: &dyn VectorStore, handle: &CanonicalHandle, canonical: &str, backup: Option<&str>, page_size: usize) {
    if let Err(e) = store.delete_collection(canonical).await {
        warn!(canonical, error = %e, "could not drop partial canonical collection");
    }
    let Some(backup) = backup else { return };
    match copy_collection(store, backup, canonical, page_size).await {
        Ok(n) => {
            handle.publish(canonical);
            drop_quietly(store, backup, "could not drop swap backup").await;
            warn!(canonical, documents = n, "previous canonical collection restored");
        }
        Err(e) => {
            error!(
                target: CRITICAL_TARGET,
                canonical,
                backup,
                error = %e,
                "rollback failed; searches keep serving the backup collection"
            );
        }
    }
}

async fn drop_quietly(store: &dyn VectorStore, collection: &str, msg: &'static str) {
    if let Err(e) = store.delete_collection(collection).await {
        warn!(collection, error = %e, "{msg}");
    }
}
