pub mod config;
pub mod error;
pub mod loader;
pub mod traits;
pub mod types;

pub use error::{Error, Result};
pub use loader::CatalogLoader;
pub use types::{
    CatalogVersion, Product, ProductId, SearchResult, UploadedFile, VersionId, VersionStatus,
    VersionStatusReport,
};
