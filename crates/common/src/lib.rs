//! Pressroom Common Library
//!
//! Shared code for the Pressroom services including:
//! - Edition and clipping domain types
//! - Store traits with in-memory and Postgres backends
//! - Sequence allocation and blob storage
//! - The clipping workflow
//! - Error types, configuration, tenant identity and metrics

pub mod auth;
pub mod clipping;
pub mod config;
pub mod db;
pub mod domain;
pub mod errors;
pub mod metrics;
pub mod sequence;
pub mod storage;
pub mod store;

// Re-export commonly used types
pub use auth::TenantContext;
pub use clipping::ClippingService;
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use errors::{AppError, Result};
pub use sequence::SequenceAllocator;
pub use storage::BlobStore;
pub use store::{ClippingStore, PaperStore};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
