//! Ingestion error types
//!
//! These describe why a rasterization dependency failed. The pipeline never
//! surfaces them as request failures; it records them as warnings on the
//! resulting edition.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("PDF parse error: {message}")]
    PdfParse { message: String },

    #[error("Rasterizer unavailable: {0}")]
    RasterizerUnavailable(String),

    #[error("Rasterization failed: {0}")]
    Rasterization(String),

    #[error("Render task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
