//! Vector storage, embedding providers, batch indexing, and the canonical
//! collection swap.

pub mod canonical;
pub mod embed_provider;
pub mod indexer;
pub mod memory;
pub mod schema;
pub mod store;
pub mod swap;
pub mod table;

pub use canonical::{ActiveCollection, CanonicalHandle};
pub use embed_provider::{provider_from_settings, EmbedProvider, LocalProvider, RemoteProvider, SharedModel};
pub use indexer::{BatchIndexer, IndexReport, ProgressSink};
pub use memory::{FixedMemory, MemoryProbe, ProcessMemory};
pub use store::{IndexedDocument, LanceStore, MemoryStore, Neighbour, VectorStore};
pub use swap::{copy_collection, rename_collection, swap_into_canonical, SwapOutcome, SwapRequest, CRITICAL_TARGET};
