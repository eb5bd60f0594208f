//! Outcome of an ingestion run

use pressroom_common::domain::Paper;
use serde::Serialize;

use crate::errors::IngestionError;

/// Which rasterization dependency let us down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    PageCount,
    Rasterization,
    Timeout,
    PageStorage,
}

impl FailureStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureStage::PageCount => "page_count",
            FailureStage::Rasterization => "rasterization",
            FailureStage::Timeout => "timeout",
            FailureStage::PageStorage => "page_storage",
        }
    }
}

/// A swallowed dependency failure, reported alongside the saved edition
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyFailure {
    pub stage: FailureStage,
    pub message: String,
}

impl DependencyFailure {
    pub fn new(stage: FailureStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
        }
    }

    pub fn from_error(stage: FailureStage, err: &IngestionError) -> Self {
        Self::new(stage, err.to_string())
    }
}

/// Saved edition plus anything that went wrong on the way
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionReport {
    pub paper: Paper,
    pub warnings: Vec<DependencyFailure>,
}

impl IngestionReport {
    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn failed_stage(&self, stage: FailureStage) -> bool {
        self.warnings.iter().any(|w| w.stage == stage)
    }
}
