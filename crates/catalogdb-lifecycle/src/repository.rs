//! Persistence of catalog version records.

use async_trait::async_trait;
use lancedb::Connection;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use catalogdb_core::error::{Error, Result};
use catalogdb_core::types::{CatalogVersion, UploadedFile, VersionId};
use catalogdb_vector::table::{delete_meta, get_meta, list_meta, set_meta};

#[async_trait]
pub trait VersionRepository: Send + Sync {
    /// Record a new `uploaded` version and assign its id.
    async fn insert(&self, upload: &UploadedFile, uploaded_by: Option<String>) -> Result<CatalogVersion>;
    async fn get(&self, id: VersionId) -> Result<Option<CatalogVersion>>;
    /// Overwrite an existing record. Unknown ids are `NotFound`.
    async fn update(&self, version: &CatalogVersion) -> Result<()>;
    /// Newest first.
    async fn list(&self, limit: usize) -> Result<Vec<CatalogVersion>>;
    async fn delete(&self, id: VersionId) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryVersionRepository {
    records: Mutex<BTreeMap<VersionId, CatalogVersion>>,
    last_id: AtomicU64,
}

impl MemoryVersionRepository {
    pub fn new() -> Self { Self::default() }
}

#[async_trait]
impl VersionRepository for MemoryVersionRepository {
    async fn insert(&self, upload: &UploadedFile, uploaded_by: Option<String>) -> Result<CatalogVersion> {
        let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
        let version = CatalogVersion::new(id, upload, uploaded_by);
        self.records.lock().await.insert(id, version.clone());
        Ok(version)
    }

    async fn get(&self, id: VersionId) -> Result<Option<CatalogVersion>> {
        Ok(self.records.lock().await.get(&id).cloned())
    }

    async fn update(&self, version: &CatalogVersion) -> Result<()> {
        match self.records.lock().await.get_mut(&version.id) {
            Some(slot) => {
                *slot = version.clone();
                Ok(())
            }
            None => Err(Error::NotFound(format!("catalog version {}", version.id))),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<CatalogVersion>> {
        Ok(self.records.lock().await.values().rev().take(limit).cloned().collect())
    }

    async fn delete(&self, id: VersionId) -> Result<()> {
        self.records.lock().await.remove(&id);
        Ok(())
    }
}

const KEY_PREFIX: &str = "version:";
const SEQ_KEY: &str = "seq:version";

fn key(id: VersionId) -> String { format!("{KEY_PREFIX}{id}") }

/// Versions stored as JSON values in a LanceDB key/value table, next to the
/// product collections.
pub struct LanceVersionRepository {
    conn: Connection,
    table: String,
    // Serializes id allocation.
    insert_lock: Mutex<()>,
}

impl LanceVersionRepository {
    pub fn new(conn: Connection, table: impl Into<String>) -> Self {
        Self { conn, table: table.into(), insert_lock: Mutex::new(()) }
    }

    async fn all(&self) -> Result<Vec<CatalogVersion>> {
        let mut out = Vec::new();
        for (k, v) in list_meta(&self.conn, &self.table, KEY_PREFIX).await? {
            match serde_json::from_str::<CatalogVersion>(&v) {
                Ok(version) => out.push(version),
                Err(e) => tracing::warn!(key = %k, error = %e, "skipping unreadable version record"),
            }
        }
        Ok(out)
    }

    async fn write(&self, version: &CatalogVersion) -> Result<()> {
        let json = serde_json::to_string(version).map_err(Error::operation)?;
        set_meta(&self.conn, &self.table, &key(version.id), &json).await
    }
}

#[async_trait]
impl VersionRepository for LanceVersionRepository {
    async fn insert(&self, upload: &UploadedFile, uploaded_by: Option<String>) -> Result<CatalogVersion> {
        let _guard = self.insert_lock.lock().await;
        let last = match get_meta(&self.conn, &self.table, SEQ_KEY).await? {
            Some(s) => s.parse::<VersionId>().map_err(Error::operation)?,
            None => self.all().await?.iter().map(|v| v.id).max().unwrap_or(0),
        };
        let id = last + 1;
        set_meta(&self.conn, &self.table, SEQ_KEY, &id.to_string()).await?;
        let version = CatalogVersion::new(id, upload, uploaded_by);
        self.write(&version).await?;
        Ok(version)
    }

    async fn get(&self, id: VersionId) -> Result<Option<CatalogVersion>> {
        match get_meta(&self.conn, &self.table, &key(id)).await? {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(Error::operation),
            None => Ok(None),
        }
    }

    async fn update(&self, version: &CatalogVersion) -> Result<()> {
        if get_meta(&self.conn, &self.table, &key(version.id)).await?.is_none() {
            return Err(Error::NotFound(format!("catalog version {}", version.id)));
        }
        self.write(version).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<CatalogVersion>> {
        let mut all = self.all().await?;
        all.sort_by(|a, b| b.id.cmp(&a.id));
        all.truncate(limit);
        Ok(all)
    }

    async fn delete(&self, id: VersionId) -> Result<()> {
        delete_meta(&self.conn, &self.table, &key(id)).await
    }
}
