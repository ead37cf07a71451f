//! Vector index store abstraction.
//!
//! A store holds named collections of embedded products. Similarity search and
//! metadata filtering are delegated to the backend; callers never compute
//! distances themselves. [`LanceStore`] is the production backend,
//! [`MemoryStore`] backs tests and throwaway runs.

use async_trait::async_trait;

use catalogdb_core::error::Result;
use catalogdb_core::types::Product;

pub mod lance;
pub mod memory;

pub use lance::LanceStore;
pub use memory::MemoryStore;

/// A product together with the text that was embedded and its vector.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedDocument {
    pub product: Product,
    pub text: String,
    pub vector: Vec<f32>,
}

impl IndexedDocument {
    pub fn new(product: Product, vector: Vec<f32>) -> Self {
        let text = product.searchable_text();
        Self { product, text, vector }
    }
}

/// Nearest-neighbour hit. `distance` is cosine distance in `[0, 2]`.
#[derive(Debug, Clone)]
pub struct Neighbour {
    pub product: Product,
    pub distance: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn collection_names(&self) -> Result<Vec<String>>;

    async fn collection_exists(&self, name: &str) -> Result<bool> {
        Ok(self.collection_names().await?.iter().any(|n| n == name))
    }

    /// Create an empty collection for vectors of `dim` floats. Existing
    /// collections are left as they are.
    async fn create_collection(&self, name: &str, dim: usize) -> Result<()>;

    /// Drop a collection. Missing collections are not an error.
    async fn delete_collection(&self, name: &str) -> Result<()>;

    async fn add(&self, name: &str, docs: &[IndexedDocument]) -> Result<()>;

    async fn count(&self, name: &str) -> Result<usize>;

    /// Stable page of documents ordered by insertion.
    async fn scan_page(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<IndexedDocument>>;

    /// Products whose lowercase article equals `article_lower`.
    async fn find_by_article(&self, name: &str, article_lower: &str, category: Option<&str>) -> Result<Vec<Product>>;

    /// Cosine nearest neighbours, closest first.
    async fn query(&self, name: &str, vector: &[f32], k: usize, category: Option<&str>) -> Result<Vec<Neighbour>>;

    /// Vector dimension of an existing collection.
    async fn dim(&self, name: &str) -> Result<usize>;
}
