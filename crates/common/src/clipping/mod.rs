//! Clipping workflow
//!
//! Creates, fetches, lists and deletes clippings. Identifiers come from the
//! `clip` sequence and are never reused: if persisting a clipping fails after
//! its id was issued, the id is simply skipped and any crop already stored
//! for it is removed.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::{Clipping, CreatedClipping, RegionInput};
use crate::errors::{AppError, Result};
use crate::metrics;
use crate::sequence::{SequenceAllocator, CLIP_SEQUENCE};
use crate::storage::{clipping_key, extension_for, BlobStore};
use crate::store::ClippingStore;

/// Crop image uploaded with the request
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub data: Vec<u8>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

/// Everything CreateClipping needs, as received from the caller
#[derive(Debug, Clone)]
pub struct NewClipping {
    /// `None` for anonymous readers
    pub owner_tenant_id: Option<Uuid>,
    pub paper_id: Uuid,
    pub page_number: u32,
    pub region: RegionInput,
    pub upload: Option<UploadedImage>,
    pub image_url: Option<String>,
}

pub struct ClippingService {
    store: Arc<dyn ClippingStore>,
    sequence: Arc<dyn SequenceAllocator>,
    blobs: Arc<dyn BlobStore>,
}

impl ClippingService {
    pub fn new(
        store: Arc<dyn ClippingStore>,
        sequence: Arc<dyn SequenceAllocator>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            store,
            sequence,
            blobs,
        }
    }

    /// CreateClipping
    #[instrument(skip(self, request), fields(paper_id = %request.paper_id, page = request.page_number))]
    pub async fn create(&self, request: NewClipping) -> Result<CreatedClipping> {
        let region = request.region.parse()?;

        let upload = request.upload.filter(|u| !u.data.is_empty());
        let image_url = request
            .image_url
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty());
        if upload.is_none() && image_url.is_none() {
            return Err(AppError::NoImageProvided);
        }

        let clip_id = self.allocate().await?;

        let (image_ref, stored_key) = match (upload, image_url) {
            (Some(image), _) => {
                let ext = extension_for(image.file_name.as_deref(), image.content_type.as_deref());
                let content_type = image
                    .content_type
                    .clone()
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let key = clipping_key(clip_id, &ext);
                let image_ref = self.blobs.put(&key, &image.data, &content_type).await?;
                (image_ref, Some(key))
            }
            (None, Some(url)) => (url, None),
            (None, None) => return Err(AppError::NoImageProvided),
        };

        let clipping = Clipping {
            clip_id,
            owner_tenant_id: request.owner_tenant_id,
            paper_id: request.paper_id,
            page_number: request.page_number,
            region,
            image_ref,
            created_at: Utc::now(),
        };
        let stored = match self.store.insert_clipping(clipping).await {
            Ok(stored) => stored,
            Err(e) => {
                if let Some(key) = stored_key {
                    if let Err(cleanup) = self.blobs.delete(&key).await {
                        warn!(key = %key, error = %cleanup, "Failed to remove orphaned crop");
                    }
                }
                return Err(e);
            }
        };

        metrics::record_clipping_created(stored.owner_tenant_id.is_none());
        info!(clip_id, "Clipping created");

        Ok(CreatedClipping {
            clip_id: stored.clip_id,
            image_ref: stored.image_ref,
        })
    }

    /// GetClippingById: public, no ownership check
    pub async fn get(&self, clip_id: i64) -> Result<Clipping> {
        self.store
            .get_clipping(clip_id)
            .await?
            .ok_or(AppError::ClippingNotFound { clip_id })
    }

    /// ListClippingsForTenant, newest first
    pub async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<Clipping>> {
        self.store.list_clippings_for_owner(tenant_id).await
    }

    /// DeleteClipping: only the owning tenant may delete
    #[instrument(skip(self))]
    pub async fn delete(&self, tenant_id: Uuid, clip_id: i64) -> Result<()> {
        if self.store.delete_owned_clipping(clip_id, tenant_id).await? {
            info!("Clipping deleted");
            Ok(())
        } else {
            Err(AppError::ClippingNotFound { clip_id })
        }
    }

    async fn allocate(&self) -> Result<i64> {
        match self.sequence.next(CLIP_SEQUENCE).await {
            Ok(id) => {
                metrics::record_sequence_allocation(CLIP_SEQUENCE, true);
                Ok(id)
            }
            Err(e) => {
                metrics::record_sequence_allocation(CLIP_SEQUENCE, false);
                warn!(error = %e, "Clip id allocation failed");
                Err(match e {
                    AppError::AllocatorUnavailable { .. } => e,
                    other => AppError::AllocatorUnavailable {
                        message: other.to_string(),
                    },
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Region;
    use crate::sequence::MemorySequence;
    use crate::storage::MemoryBlobStore;
    use crate::store::MemoryClippingStore;
    use async_trait::async_trait;

    struct Harness {
        service: ClippingService,
        store: Arc<MemoryClippingStore>,
        sequence: Arc<MemorySequence>,
        blobs: Arc<MemoryBlobStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryClippingStore::new());
        let sequence = Arc::new(MemorySequence::new());
        let blobs = Arc::new(MemoryBlobStore::default());
        Harness {
            service: ClippingService::new(store.clone(), sequence.clone(), blobs.clone()),
            store,
            sequence,
            blobs,
        }
    }

    fn region(x: &str, y: &str, w: &str, h: &str) -> RegionInput {
        RegionInput {
            x: Some(x.into()),
            y: Some(y.into()),
            width: Some(w.into()),
            height: Some(h.into()),
        }
    }

    fn request(owner: Option<Uuid>) -> NewClipping {
        NewClipping {
            owner_tenant_id: owner,
            paper_id: Uuid::new_v4(),
            page_number: 2,
            region: region("10", "20", "300", "150.5"),
            upload: None,
            image_url: Some("https://cdn.example/crop.jpg".into()),
        }
    }

    #[tokio::test]
    async fn test_create_then_get_round_trip() {
        let h = harness();
        let req = request(Some(Uuid::new_v4()));
        let created = h.service.create(req.clone()).await.unwrap();
        assert_eq!(created.clip_id, 1);
        assert_eq!(created.image_ref, "https://cdn.example/crop.jpg");

        let fetched = h.service.get(created.clip_id).await.unwrap();
        assert_eq!(fetched.region, Region { x: 10.0, y: 20.0, width: 300.0, height: 150.5 });
        assert_eq!(fetched.image_ref, created.image_ref);
        assert_eq!(fetched.page_number, req.page_number);
        assert_eq!(fetched.paper_id, req.paper_id);
    }

    #[tokio::test]
    async fn test_invalid_coordinates_allocate_nothing() {
        let h = harness();
        let before = h.sequence.last_issued(CLIP_SEQUENCE).await.unwrap();

        let mut req = request(None);
        req.region = region("10", "20", "abc", "5");
        let err = h.service.create(req).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidCoordinates { .. }));

        assert_eq!(h.sequence.last_issued(CLIP_SEQUENCE).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_missing_image_allocates_nothing() {
        let h = harness();
        let mut req = request(None);
        req.image_url = Some("   ".into());
        let err = h.service.create(req).await.unwrap_err();
        assert!(matches!(err, AppError::NoImageProvided));
        assert_eq!(h.sequence.last_issued(CLIP_SEQUENCE).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_upload_preferred_over_url() {
        let h = harness();
        let mut req = request(None);
        req.upload = Some(UploadedImage {
            data: b"\x89PNG".to_vec(),
            file_name: Some("crop.png".into()),
            content_type: Some("image/png".into()),
        });

        let created = h.service.create(req).await.unwrap();
        assert_eq!(created.image_ref, "/files/clippings/1.png");
        assert_eq!(h.blobs.count("clippings/").await, 1);
    }

    #[tokio::test]
    async fn test_failed_insert_removes_stored_crop() {
        let h = harness();
        // Occupy the id the sequence hands out next
        let taken = h.sequence.last_issued(CLIP_SEQUENCE).await.unwrap() + 1;
        h.store
            .insert_clipping(Clipping {
                clip_id: taken,
                owner_tenant_id: None,
                paper_id: Uuid::new_v4(),
                page_number: 1,
                region: Region { x: 0.0, y: 0.0, width: 1.0, height: 1.0 },
                image_ref: "elsewhere".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let mut req = request(None);
        req.upload = Some(UploadedImage {
            data: b"\x89PNG".to_vec(),
            file_name: Some("crop.png".into()),
            content_type: Some("image/png".into()),
        });
        assert!(h.service.create(req).await.is_err());
        assert_eq!(h.blobs.count("clippings/").await, 0);
        assert_eq!(h.sequence.last_issued(CLIP_SEQUENCE).await.unwrap(), taken);
    }

    #[tokio::test]
    async fn test_anonymous_clipping_has_no_owner() {
        let h = harness();
        let created = h.service.create(request(None)).await.unwrap();
        let stored = h.store.get_clipping(created.clip_id).await.unwrap().unwrap();
        assert!(stored.owner_tenant_id.is_none());
    }

    #[tokio::test]
    async fn test_delete_requires_matching_owner() {
        let h = harness();
        let tenant_a = Uuid::new_v4();
        let tenant_b = Uuid::new_v4();

        let owned_by_b = h.service.create(request(Some(tenant_b))).await.unwrap();
        let anonymous = h.service.create(request(None)).await.unwrap();

        for clip_id in [owned_by_b.clip_id, anonymous.clip_id] {
            let err = h.service.delete(tenant_a, clip_id).await.unwrap_err();
            assert!(err.is_not_found());
        }

        h.service.delete(tenant_b, owned_by_b.clip_id).await.unwrap();
        assert!(h.service.get(owned_by_b.clip_id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_list_for_tenant_newest_first() {
        let h = harness();
        let tenant = Uuid::new_v4();
        let first = h.service.create(request(Some(tenant))).await.unwrap();
        h.service.create(request(None)).await.unwrap();
        let third = h.service.create(request(Some(tenant))).await.unwrap();

        let ids: Vec<i64> = h
            .service
            .list_for_tenant(tenant)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.clip_id)
            .collect();
        assert_eq!(ids, vec![third.clip_id, first.clip_id]);
    }

    struct BrokenSequence;

    #[async_trait]
    impl SequenceAllocator for BrokenSequence {
        async fn next(&self, _namespace: &str) -> Result<i64> {
            Err(AppError::DatabaseConnection {
                message: "counter store offline".into(),
            })
        }

        async fn last_issued(&self, _namespace: &str) -> Result<i64> {
            Ok(0)
        }

        async fn reseed(&self, _namespace: &str, _value: i64) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_allocator_failure_writes_nothing() {
        let store = Arc::new(MemoryClippingStore::new());
        let service = ClippingService::new(
            store.clone(),
            Arc::new(BrokenSequence),
            Arc::new(MemoryBlobStore::default()),
        );
        let owner = Uuid::new_v4();

        let err = service.create(request(Some(owner))).await.unwrap_err();
        assert!(matches!(err, AppError::AllocatorUnavailable { .. }));
        assert!(store.list_clippings_for_owner(owner).await.unwrap().is_empty());
    }
}
