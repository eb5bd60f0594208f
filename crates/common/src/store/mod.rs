//! Storage abstractions for editions and clippings
//!
//! Two backends implement these traits:
//! - [`memory`]: process-local maps, used for development and tests
//! - [`crate::db::Repository`]: Postgres via SeaORM
//!
//! Both enforce the per-tenant schedule date invariant at write time, so a
//! second writer racing for the same `(tenant, date)` is rejected with
//! `DuplicateScheduleDate` rather than silently creating two editions.

pub mod memory;

use crate::domain::{Clipping, Epaper, Paper, PaperMetadata, PaperRendering, PaperRevision};
use crate::errors::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

pub use memory::{MemoryClippingStore, MemoryPaperStore};

/// Per-tenant ordered edition collections
#[async_trait]
pub trait PaperStore: Send + Sync {
    /// The tenant's collection, if one was ever created
    async fn find_epaper(&self, tenant_id: Uuid) -> Result<Option<Epaper>>;

    /// All editions of a tenant in insertion order (empty if no collection)
    async fn list_papers(&self, tenant_id: Uuid) -> Result<Vec<Paper>>;

    async fn get_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<Option<Paper>>;

    /// Does any edition of this tenant other than `exclude` occupy `date`
    async fn find_schedule_conflict(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<Option<Paper>>;

    /// Append an edition, creating the tenant's collection on first use.
    /// Fails with `DuplicateScheduleDate` when the date is already taken.
    async fn insert_paper(&self, tenant_id: Uuid, paper: Paper) -> Result<Paper>;

    /// Merge metadata, and a rendering when one is given, into the stored
    /// edition as it is at write time. Without a rendering the page sequence
    /// is left exactly as stored.
    /// Fails with `PaperNotFound` or `DuplicateScheduleDate`.
    async fn update_paper(
        &self,
        tenant_id: Uuid,
        paper_id: Uuid,
        metadata: &PaperMetadata,
        rendering: Option<PaperRendering>,
    ) -> Result<PaperRevision>;

    /// Overwrite the image of one page, addressed by page number
    async fn replace_page_image(
        &self,
        tenant_id: Uuid,
        paper_id: Uuid,
        page_number: u32,
        image_ref: String,
    ) -> Result<PaperRevision>;

    /// Remove an edition. `EpaperNotFound` when the tenant has no collection,
    /// `Ok(false)` when the edition was already gone.
    async fn delete_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<bool>;

    /// Earliest-created edition of any tenant scheduled on `date`
    async fn find_any_by_schedule_date(&self, date: NaiveDate) -> Result<Option<Paper>>;
}

/// Clipping records keyed by clip id
#[async_trait]
pub trait ClippingStore: Send + Sync {
    async fn insert_clipping(&self, clipping: Clipping) -> Result<Clipping>;

    async fn get_clipping(&self, clip_id: i64) -> Result<Option<Clipping>>;

    /// Clippings owned by a tenant, newest first
    async fn list_clippings_for_owner(&self, owner_tenant_id: Uuid) -> Result<Vec<Clipping>>;

    /// Delete only when both the id and the owner match
    async fn delete_owned_clipping(&self, clip_id: i64, owner_tenant_id: Uuid) -> Result<bool>;
}
