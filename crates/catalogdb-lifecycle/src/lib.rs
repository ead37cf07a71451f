//! Catalog version records and the jobs that move them through their
//! lifecycle.

pub mod orchestrator;
pub mod repository;

pub use orchestrator::CatalogOrchestrator;
pub use repository::{LanceVersionRepository, MemoryVersionRepository, VersionRepository};
