//! Hybrid product search: exact article, article prefix, and semantic
//! candidates merged and reranked by keyword matches.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use catalogdb_core::config::SearchSettings;
use catalogdb_core::error::Result;
use catalogdb_core::types::{Product, SearchResult};
use catalogdb_vector::{CanonicalHandle, EmbedProvider, VectorStore};

pub mod scoring;

use scoring::{count_matches, keyword_boost, similarity, tokenize_query, EXACT_SCORE, PREFIX_SCORE};

pub struct HybridSearchEngine {
    store: Arc<dyn VectorStore>,
    provider: Arc<dyn EmbedProvider>,
    handle: Arc<CanonicalHandle>,
    settings: SearchSettings,
}

/// Candidates keyed by product id, keeping the best score seen.
#[derive(Default)]
struct Candidates(HashMap<String, (Product, f32)>);

impl Candidates {
    fn offer(&mut self, product: Product, score: f32) {
        match self.0.get_mut(&product.id) {
            Some(entry) => entry.1 = entry.1.max(score),
            None => { self.0.insert(product.id.clone(), (product, score)); }
        }
    }

    fn contains(&self, id: &str) -> bool { self.0.contains_key(id) }
}

impl HybridSearchEngine {
    pub fn new(store: Arc<dyn VectorStore>, provider: Arc<dyn EmbedProvider>, handle: Arc<CanonicalHandle>, settings: SearchSettings) -> Self {
        Self { store, provider, handle, settings }
    }

    pub fn handle(&self) -> &Arc<CanonicalHandle> { &self.handle }

    /// Ranked results, best first. Failures are logged and yield no results.
    pub async fn search(&self, query: &str, category: Option<&str>, k: usize) -> Vec<SearchResult> {
        match self.try_search(query, category, k).await {
            Ok(results) => results,
            Err(e) => {
                warn!(query, error = %e, "search failed");
                Vec::new()
            }
        }
    }

    /// Like [`search`](Self::search) but surfaces the error. A search that
    /// raced with a canonical swap, failed or not, is rerun once on the new
    /// collection.
    pub async fn try_search(&self, query: &str, category: Option<&str>, k: usize) -> Result<Vec<SearchResult>> {
        let Some(active) = self.handle.current() else {
            debug!("search before any catalog was indexed");
            return Ok(Vec::new());
        };
        let outcome = self.run(&active.name, query, category, k).await;
        // A swap that lands mid-search can fail the query or let later stages
        // read a half-filled collection; either way, rerun on the new snapshot.
        match self.handle.current() {
            Some(next) if next.generation != active.generation => {
                if let Err(e) = &outcome {
                    debug!(from = %active.name, to = %next.name, error = %e, "canonical changed mid-search, retrying");
                } else {
                    debug!(from = %active.name, to = %next.name, "canonical changed mid-search, rerunning");
                }
                self.run(&next.name, query, category, k).await
            }
            _ => outcome,
        }
    }

    async fn run(&self, collection: &str, query: &str, category: Option<&str>, k: usize) -> Result<Vec<SearchResult>> {
        let started = Instant::now();
        let query = query.trim();
        let limit = k.min(self.settings.max_results);
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let query_lower = query.to_lowercase();
        let mut candidates = Candidates::default();

        for product in self.store.find_by_article(collection, &query_lower, category).await? {
            candidates.offer(product, EXACT_SCORE);
        }
        let exact = candidates.0.len();

        if query_lower.chars().count() >= 2 {
            self.prefix_stage(collection, &query_lower, category, &mut candidates).await?;
        }
        let prefix = candidates.0.len() - exact;

        // Embedding or vector-query failures degrade to exact/prefix matches.
        let semantic_k = k.max(1) * self.settings.semantic_oversample.max(1);
        match self.provider.embed_one(query).await {
            Ok(vector) => match self.store.query(collection, &vector, semantic_k, category).await {
                Ok(hits) => {
                    for hit in hits {
                        candidates.offer(hit.product, similarity(hit.distance));
                    }
                }
                Err(e) => warn!(collection, error = %e, "vector query failed, semantic stage skipped"),
            },
            Err(e) => warn!(error = %e, "query embedding failed, semantic stage skipped"),
        }

        let words = tokenize_query(query);
        let mut ranked: Vec<(Product, f32)> = candidates
            .0
            .into_values()
            .map(|(product, score)| {
                let boosted = if words.is_empty() {
                    score
                } else {
                    let (whole, substring) = count_matches(&product.searchable_text().to_lowercase(), &words);
                    keyword_boost(whole, substring, words.len()).map_or(score, |b| score.max(b))
                };
                (product, boosted.clamp(0.0, 1.0))
            })
            .filter(|(_, score)| *score >= self.settings.min_score)
            .collect();
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.0.id.cmp(&b.0.id)));
        ranked.truncate(limit);

        debug!(
            collection,
            exact,
            prefix,
            returned = ranked.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "search complete"
        );
        ranked.into_iter().map(|(p, s)| SearchResult::new(p, s)).collect()
    }

    async fn prefix_stage(&self, collection: &str, query_lower: &str, category: Option<&str>, candidates: &mut Candidates) -> Result<()> {
        let page_size = self.settings.prefix_page_size.max(1);
        let mut offset = 0;
        loop {
            let page = self.store.scan_page(collection, offset, page_size).await?;
            let n = page.len();
            for doc in page {
                let p = doc.product;
                if category.is_some_and(|c| !p.in_category(c)) || candidates.contains(&p.id) {
                    continue;
                }
                let article = p.article_lower();
                if article.starts_with(query_lower) && article != query_lower {
                    candidates.offer(p, PREFIX_SCORE);
                }
            }
            if n < page_size { break; }
            offset += n;
        }
        Ok(())
    }

    /// Sorted, deduplicated union of every category level in the live catalog.
    /// Cached until the next swap.
    pub async fn get_categories(&self) -> Vec<String> {
        let Some(active) = self.handle.current() else { return Vec::new() };
        let page_size = self.settings.prefix_page_size.max(1);
        let res = active
            .categories_or_init(|| async {
                let mut seen = BTreeSet::new();
                let mut offset = 0;
                loop {
                    let page = self.store.scan_page(&active.name, offset, page_size).await?;
                    let n = page.len();
                    for doc in &page {
                        seen.extend(doc.product.categories().map(str::to_string));
                    }
                    if n < page_size { break; }
                    offset += n;
                }
                Ok(seen.into_iter().collect())
            })
            .await;
        match res {
            Ok(categories) => categories.to_vec(),
            Err(e) => {
                warn!(error = %e, "could not list categories");
                Vec::new()
            }
        }
    }

    /// Whether a non-empty canonical collection is being served.
    pub async fn is_indexed(&self) -> bool {
        let Some(active) = self.handle.current() else { return false };
        match self.store.count(&active.name).await {
            Ok(n) => n > 0,
            Err(e) => {
                debug!(error = %e, "index status check failed");
                false
            }
        }
    }
}
