//! In-memory stores
//!
//! Each mutation runs under a single write lock, which makes the schedule
//! date check-and-insert atomic within the process.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ClippingStore, PaperStore};
use crate::domain::{Clipping, Epaper, Paper, PaperMetadata, PaperRendering, PaperRevision};
use crate::errors::{AppError, Result};

struct Collection {
    epaper: Epaper,
    papers: Vec<Paper>,
}

impl Collection {
    fn conflict(&self, date: NaiveDate, exclude: Option<Uuid>) -> Option<&Paper> {
        self.papers
            .iter()
            .find(|p| Some(p.id) != exclude && p.is_scheduled_on(date))
    }
}

/// Edition collections held in process memory
#[derive(Default)]
pub struct MemoryPaperStore {
    collections: RwLock<HashMap<Uuid, Collection>>,
}

impl MemoryPaperStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PaperStore for MemoryPaperStore {
    async fn find_epaper(&self, tenant_id: Uuid) -> Result<Option<Epaper>> {
        let collections = self.collections.read().await;
        Ok(collections.get(&tenant_id).map(|c| c.epaper.clone()))
    }

    async fn list_papers(&self, tenant_id: Uuid) -> Result<Vec<Paper>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&tenant_id)
            .map(|c| c.papers.clone())
            .unwrap_or_default())
    }

    async fn get_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<Option<Paper>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&tenant_id)
            .and_then(|c| c.papers.iter().find(|p| p.id == paper_id).cloned()))
    }

    async fn find_schedule_conflict(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<Option<Paper>> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&tenant_id)
            .and_then(|c| c.conflict(date, exclude).cloned()))
    }

    async fn insert_paper(&self, tenant_id: Uuid, paper: Paper) -> Result<Paper> {
        let mut collections = self.collections.write().await;
        let collection = collections.entry(tenant_id).or_insert_with(|| Collection {
            epaper: Epaper::new(tenant_id),
            papers: Vec::new(),
        });

        if let Some(date) = paper.schedule_date {
            if collection.conflict(date, None).is_some() {
                return Err(AppError::DuplicateScheduleDate { date });
            }
        }

        collection.papers.push(paper.clone());
        Ok(paper)
    }

    async fn update_paper(
        &self,
        tenant_id: Uuid,
        paper_id: Uuid,
        metadata: &PaperMetadata,
        rendering: Option<PaperRendering>,
    ) -> Result<PaperRevision> {
        let mut collections = self.collections.write().await;
        let not_found = || AppError::PaperNotFound {
            id: paper_id.to_string(),
        };
        let collection = collections.get_mut(&tenant_id).ok_or_else(not_found)?;

        if let Some(date) = metadata.schedule_date {
            if collection.conflict(date, Some(paper_id)).is_some() {
                return Err(AppError::DuplicateScheduleDate { date });
            }
        }

        let slot = collection
            .papers
            .iter_mut()
            .find(|p| p.id == paper_id)
            .ok_or_else(not_found)?;
        let previous = slot.clone();
        slot.apply_metadata(metadata);
        if let Some(rendering) = rendering {
            slot.apply_rendering(rendering);
        }

        Ok(PaperRevision {
            previous,
            current: slot.clone(),
        })
    }

    async fn replace_page_image(
        &self,
        tenant_id: Uuid,
        paper_id: Uuid,
        page_number: u32,
        image_ref: String,
    ) -> Result<PaperRevision> {
        let mut collections = self.collections.write().await;
        let paper = collections
            .get_mut(&tenant_id)
            .and_then(|c| c.papers.iter_mut().find(|p| p.id == paper_id))
            .ok_or_else(|| AppError::PaperNotFound {
                id: paper_id.to_string(),
            })?;

        let previous = paper.clone();
        paper.replace_page_image(page_number, image_ref)?;
        Ok(PaperRevision {
            previous,
            current: paper.clone(),
        })
    }

    async fn delete_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<bool> {
        let mut collections = self.collections.write().await;
        let collection = collections
            .get_mut(&tenant_id)
            .ok_or_else(|| AppError::EpaperNotFound {
                tenant_id: tenant_id.to_string(),
            })?;

        let before = collection.papers.len();
        collection.papers.retain(|p| p.id != paper_id);
        Ok(collection.papers.len() < before)
    }

    async fn find_any_by_schedule_date(&self, date: NaiveDate) -> Result<Option<Paper>> {
        let collections = self.collections.read().await;
        Ok(collections
            .values()
            .flat_map(|c| c.papers.iter())
            .filter(|p| p.is_scheduled_on(date))
            .min_by_key(|p| p.created_at)
            .cloned())
    }
}

/// Clippings held in process memory
#[derive(Default)]
pub struct MemoryClippingStore {
    clippings: RwLock<HashMap<i64, Clipping>>,
}

impl MemoryClippingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClippingStore for MemoryClippingStore {
    async fn insert_clipping(&self, clipping: Clipping) -> Result<Clipping> {
        let mut clippings = self.clippings.write().await;
        if clippings.contains_key(&clipping.clip_id) {
            return Err(AppError::Internal {
                message: format!("clip id {} already stored", clipping.clip_id),
            });
        }
        clippings.insert(clipping.clip_id, clipping.clone());
        Ok(clipping)
    }

    async fn get_clipping(&self, clip_id: i64) -> Result<Option<Clipping>> {
        Ok(self.clippings.read().await.get(&clip_id).cloned())
    }

    async fn list_clippings_for_owner(&self, owner_tenant_id: Uuid) -> Result<Vec<Clipping>> {
        let clippings = self.clippings.read().await;
        let mut owned: Vec<Clipping> = clippings
            .values()
            .filter(|c| c.owner_tenant_id == Some(owner_tenant_id))
            .cloned()
            .collect();
        owned.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.clip_id.cmp(&a.clip_id))
        });
        Ok(owned)
    }

    async fn delete_owned_clipping(&self, clip_id: i64, owner_tenant_id: Uuid) -> Result<bool> {
        let mut clippings = self.clippings.write().await;
        let owned = clippings
            .get(&clip_id)
            .is_some_and(|c| c.owner_tenant_id == Some(owner_tenant_id));
        if owned {
            clippings.remove(&clip_id);
        }
        Ok(owned)
    }
}
