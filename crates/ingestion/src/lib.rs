//! Pressroom Ingestion
//!
//! Turns uploaded PDFs into editions:
//! - `rasterizer`: page counting and page rendering engines
//! - `pipeline`: CreatePaper, UpdatePaper, ReplacePage, DeletePaper and
//!   CheckDateAvailability on top of the shared stores
//! - `report`: partial-failure results returned by the pipeline

pub mod errors;
pub mod pdf;
pub mod pipeline;
pub mod rasterizer;
pub mod report;

pub use errors::IngestionError;
pub use pipeline::IngestionPipeline;
pub use rasterizer::{create_rasterizer, MockRasterizer, PopplerRasterizer, Rasterizer};
pub use report::{DependencyFailure, FailureStage, IngestionReport};
