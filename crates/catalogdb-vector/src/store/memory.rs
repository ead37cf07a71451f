use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use catalogdb_core::error::{Error, Result};
use catalogdb_core::types::Product;

use super::{IndexedDocument, Neighbour, VectorStore};

#[derive(Default)]
struct Collection {
    dim: usize,
    docs: Vec<IndexedDocument>,
}

/// In-process store with brute-force cosine search. Intended for tests and
/// small throwaway indexes.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Collection>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }
}

fn missing(name: &str) -> Error { Error::Store(format!("collection '{name}' does not exist")) }

fn matches_category(p: &Product, category: Option<&str>) -> bool {
    category.map_or(true, |c| p.in_category(c))
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 { return 1.0; }
    1.0 - dot / (na * nb)
}

#[async_trait]
impl VectorStore for MemoryStore {
    async fn collection_names(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn create_collection(&self, name: &str, dim: usize) -> Result<()> {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_insert_with(|| Collection { dim, docs: Vec::new() });
        Ok(())
    }

    async fn delete_collection(&self, name: &str) -> Result<()> {
        self.collections.write().await.remove(name);
        Ok(())
    }

    async fn add(&self, name: &str, docs: &[IndexedDocument]) -> Result<()> {
        let mut guard = self.collections.write().await;
        let coll = guard.get_mut(name).ok_or_else(|| missing(name))?;
        if let Some(bad) = docs.iter().find(|d| d.vector.len() != coll.dim) {
            return Err(Error::Store(format!(
                "product {} has a {}-dim vector, collection expects {}",
                bad.product.id,
                bad.vector.len(),
                coll.dim
            )));
        }
        coll.docs.extend_from_slice(docs);
        Ok(())
    }

    async fn count(&self, name: &str) -> Result<usize> {
        self.collections.read().await.get(name).map(|c| c.docs.len()).ok_or_else(|| missing(name))
    }

    async fn scan_page(&self, name: &str, offset: usize, limit: usize) -> Result<Vec<IndexedDocument>> {
        let guard = self.collections.read().await;
        let coll = guard.get(name).ok_or_else(|| missing(name))?;
        Ok(coll.docs.iter().skip(offset).take(limit).cloned().collect())
    }

    async fn find_by_article(&self, name: &str, article_lower: &str, category: Option<&str>) -> Result<Vec<Product>> {
        let guard = self.collections.read().await;
        let coll = guard.get(name).ok_or_else(|| missing(name))?;
        Ok(coll
            .docs
            .iter()
            .filter(|d| d.product.article_lower() == article_lower && matches_category(&d.product, category))
            .map(|d| d.product.clone())
            .collect())
    }

    async fn query(&self, name: &str, vector: &[f32], k: usize, category: Option<&str>) -> Result<Vec<Neighbour>> {
        let guard = self.collections.read().await;
        let coll = guard.get(name).ok_or_else(|| missing(name))?;
        let mut hits: Vec<Neighbour> = coll
            .docs
            .iter()
            .filter(|d| matches_category(&d.product, category))
            .map(|d| Neighbour { product: d.product.clone(), distance: cosine_distance(vector, &d.vector) })
            .collect();
        hits.sort_by(|a, b| a.distance.partial_cmp(&b.distance).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn dim(&self, name: &str) -> Result<usize> {
        self.collections.read().await.get(name).map(|c| c.dim).ok_or_else(|| missing(name))
    }
}
