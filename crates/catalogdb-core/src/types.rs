//! Domain types shared by the loader, the index, search, and the version lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{Error, Result};

pub type ProductId = String;
pub type VersionId = u64;

/// One catalog entry. Built only through [`Product::new`], which enforces
/// that `id`, `product_name`, `category_1` and `article` are non-empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub product_name: String,
    pub description: Option<String>,
    pub category_1: String,
    pub category_2: Option<String>,
    pub category_3: Option<String>,
    pub article: String,
    pub photo_url: Option<String>,
    pub page_url: Option<String>,
}

impl Product {
    pub fn new(
        id: impl Into<String>,
        product_name: impl Into<String>,
        category_1: impl Into<String>,
        article: impl Into<String>,
    ) -> Result<Self> {
        let product = Self {
            id: id.into().trim().to_string(),
            product_name: product_name.into().trim().to_string(),
            description: None,
            category_1: category_1.into().trim().to_string(),
            category_2: None,
            category_3: None,
            article: article.into().trim().to_string(),
            photo_url: None,
            page_url: None,
        };
        product.validate()?;
        Ok(product)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = non_empty(description.into());
        self
    }

    pub fn with_subcategories(mut self, category_2: Option<String>, category_3: Option<String>) -> Self {
        self.category_2 = category_2.and_then(non_empty);
        self.category_3 = category_3.and_then(non_empty);
        self
    }

    pub fn with_urls(mut self, photo_url: Option<String>, page_url: Option<String>) -> Self {
        self.photo_url = photo_url.and_then(non_empty);
        self.page_url = page_url.and_then(non_empty);
        self
    }

    pub fn validate(&self) -> Result<()> {
        let missing: Vec<&str> = [
            ("id", &self.id),
            ("product_name", &self.product_name),
            ("category_1", &self.category_1),
            ("article", &self.article),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::InvalidProduct(format!("empty required field(s): {}", missing.join(", "))))
        }
    }

    /// Non-empty category levels, top-down.
    pub fn categories(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.category_1.as_str())
            .chain(self.category_2.as_deref())
            .chain(self.category_3.as_deref())
            .filter(|c| !c.is_empty())
    }

    pub fn in_category(&self, category: &str) -> bool {
        self.categories().any(|c| c == category)
    }

    pub fn article_lower(&self) -> String { self.article.to_lowercase() }

    /// Text used both for embedding and for keyword matching:
    /// name, article, description and every category level.
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = vec![&self.product_name, &self.article];
        if let Some(d) = self.description.as_deref() { parts.push(d); }
        parts.extend(self.categories());
        parts.join(" ")
    }
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim();
    if t.is_empty() { None } else { Some(t.to_string()) }
}

/// A ranked product. `score` always lies in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub product: Product,
    pub score: f32,
}

impl SearchResult {
    pub fn new(product: Product, score: f32) -> Result<Self> {
        if !(0.0..=1.0).contains(&score) {
            return Err(Error::ScoreOutOfRange(score));
        }
        Ok(Self { product, score })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Uploaded,
    Processing,
    Completed,
    Failed,
    Active,
}

impl VersionStatus {
    pub fn can_transition_to(self, next: VersionStatus) -> bool {
        use VersionStatus::*;
        matches!(
            (self, next),
            (Uploaded, Processing)
                | (Failed, Processing)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Completed, Active)
                | (Active, Completed)
                | (Active, Active)
        )
    }

    /// States from which a version may be (re)activated without reprocessing.
    pub fn is_activatable(self) -> bool {
        matches!(self, VersionStatus::Completed | VersionStatus::Active)
    }
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersionStatus::Uploaded => "uploaded",
            VersionStatus::Processing => "processing",
            VersionStatus::Completed => "completed",
            VersionStatus::Failed => "failed",
            VersionStatus::Active => "active",
        };
        f.write_str(s)
    }
}

/// Metadata record for one uploaded catalog file and its indexing lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogVersion {
    pub id: VersionId,
    pub filename: String,
    pub file_path: PathBuf,
    pub file_size: u64,
    pub status: VersionStatus,
    pub progress: u8,
    pub progress_message: String,
    pub products_count: usize,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub uploaded_by: Option<String>,
    /// Collection currently holding this version's documents, if any.
    pub collection_name: Option<String>,
}

impl CatalogVersion {
    pub fn new(id: VersionId, upload: &UploadedFile, uploaded_by: Option<String>) -> Self {
        Self {
            id,
            filename: upload.filename.clone(),
            file_path: upload.path.clone(),
            file_size: upload.size_bytes,
            status: VersionStatus::Uploaded,
            progress: 0,
            progress_message: "Uploaded".to_string(),
            products_count: 0,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            indexed_at: None,
            uploaded_by,
            collection_name: None,
        }
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow.
    pub fn transition(&mut self, next: VersionStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition { id: self.id, from: self.status, to: next });
        }
        self.status = next;
        Ok(())
    }

    pub fn set_progress(&mut self, percent: u8, message: impl Into<String>) {
        self.progress = percent.min(100);
        self.progress_message = message.into();
    }

    pub fn status_report(&self) -> VersionStatusReport {
        VersionStatusReport {
            id: self.id,
            status: self.status,
            progress: self.progress,
            message: self.progress_message.clone(),
            products_count: self.products_count,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            indexed_at: self.indexed_at,
            error: self.error_message.clone(),
        }
    }
}

/// Snapshot returned by the version status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionStatusReport {
    pub id: VersionId,
    pub status: VersionStatus,
    pub progress: u8,
    pub message: String,
    pub products_count: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub indexed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

/// A source file accepted into upload storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub filename: String,
    pub path: PathBuf,
    pub size_bytes: u64,
}
