/// Synchronous in-process embedding model (candle, hashed fake, ...).
///
/// Async providers in `catalogdb-vector` wrap implementations of this trait and
/// move calls onto the blocking pool.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}
