//! Paper ingestion pipeline
//!
//! Creates, updates, re-renders and deletes editions. A source PDF is always
//! retained once accepted; counting and rasterizing its pages are best effort.
//! When either fails (or exceeds the rasterization timeout) the edition is
//! still saved and the failure is returned as a warning on the report.
//!
//! Schedule dates are checked before any blob is written or any engine runs,
//! so a conflicting request leaves no trace. The store re-checks atomically
//! on write.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use pressroom_common::clipping::UploadedImage;
use pressroom_common::domain::{DateAvailability, PageImage, Paper, PaperMetadata, PaperRendering};
use pressroom_common::errors::{AppError, Result};
use pressroom_common::metrics;
use pressroom_common::storage::{
    content_type_for, extension_for, page_image_key, paper_prefix, source_document_key, BlobStore,
};
use pressroom_common::store::PaperStore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::errors::IngestionError;
use crate::pdf::looks_like_pdf;
use crate::rasterizer::{order_pages, Rasterizer};
use crate::report::{DependencyFailure, FailureStage, IngestionReport};

pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// What one render of a source document produced
struct Rendition {
    rendering: PaperRendering,
    /// Keys written during this render, source document included
    written: Vec<String>,
    warnings: Vec<DependencyFailure>,
}

pub struct IngestionPipeline {
    papers: Arc<dyn PaperStore>,
    rasterizer: Arc<dyn Rasterizer>,
    blobs: Arc<dyn BlobStore>,
    rasterize_timeout: Duration,
}

impl IngestionPipeline {
    pub fn new(
        papers: Arc<dyn PaperStore>,
        rasterizer: Arc<dyn Rasterizer>,
        blobs: Arc<dyn BlobStore>,
        rasterize_timeout: Duration,
    ) -> Self {
        Self {
            papers,
            rasterizer,
            blobs,
            rasterize_timeout,
        }
    }

    pub fn rasterizer_name(&self) -> &'static str {
        self.rasterizer.name()
    }

    /// CreatePaper
    #[instrument(skip(self, metadata, pdf), fields(tenant_id = %tenant_id))]
    pub async fn create_paper(
        &self,
        tenant_id: Uuid,
        metadata: PaperMetadata,
        pdf: Option<Vec<u8>>,
    ) -> Result<IngestionReport> {
        metadata.validate()?;
        let pdf = accepted_pdf(pdf)?;
        if let Some(date) = metadata.schedule_date {
            self.ensure_date_free(tenant_id, date, None).await?;
        }

        let paper_id = Uuid::now_v7();
        let mut paper = Paper::draft(paper_id, &metadata);
        let warnings = match pdf {
            Some(ref data) => {
                let rendition = self.render(tenant_id, paper_id, data).await?;
                paper.apply_rendering(rendition.rendering);
                rendition.warnings
            }
            None => Vec::new(),
        };

        let paper = match self.papers.insert_paper(tenant_id, paper).await {
            Ok(paper) => paper,
            Err(e) => {
                // Nothing references this edition's blobs yet
                self.discard_prefix(&paper_prefix(tenant_id, paper_id)).await;
                return Err(e);
            }
        };

        metrics::record_paper_created(&tenant_id.to_string(), paper.pages.len());
        info!(
            paper_id = %paper.id,
            pages = paper.pages.len(),
            status = paper.render_status.as_str(),
            warnings = warnings.len(),
            "Paper created"
        );
        Ok(IngestionReport { paper, warnings })
    }

    /// UpdatePaper. Supplied metadata fields are merged; a new PDF replaces
    /// the source document and the whole page sequence.
    #[instrument(skip(self, metadata, pdf), fields(tenant_id = %tenant_id, paper_id = %paper_id))]
    pub async fn update_paper(
        &self,
        tenant_id: Uuid,
        paper_id: Uuid,
        metadata: PaperMetadata,
        pdf: Option<Vec<u8>>,
    ) -> Result<IngestionReport> {
        metadata.validate()?;
        let pdf = accepted_pdf(pdf)?;
        self.get_paper(tenant_id, paper_id).await?;
        if let Some(date) = metadata.schedule_date {
            self.ensure_date_free(tenant_id, date, Some(paper_id)).await?;
        }

        let (rendering, written, warnings) = match pdf {
            Some(ref data) => {
                let rendition = self.render(tenant_id, paper_id, data).await?;
                (Some(rendition.rendering), rendition.written, rendition.warnings)
            }
            None => (None, Vec::new(), Vec::new()),
        };
        let rendered = rendering.is_some();

        // The store merges into the edition as it stands at write time, so a
        // page replaced since the lookup above is never written back over
        let revision = match self
            .papers
            .update_paper(tenant_id, paper_id, &metadata, rendering)
            .await
        {
            Ok(revision) => revision,
            Err(e) => {
                self.discard_written(tenant_id, paper_id, written).await;
                return Err(e);
            }
        };

        if rendered {
            let superseded = self.referenced_keys(&revision.previous).into_iter().collect();
            self.discard_unreferenced(superseded, &revision.current).await;
        }
        let saved = revision.current;

        info!(
            pages = saved.pages.len(),
            status = saved.render_status.as_str(),
            warnings = warnings.len(),
            "Paper updated"
        );
        Ok(IngestionReport {
            paper: saved,
            warnings,
        })
    }

    /// Render the retained source document again, e.g. after an engine outage
    #[instrument(skip(self), fields(tenant_id = %tenant_id, paper_id = %paper_id))]
    pub async fn rerender_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<IngestionReport> {
        let paper = self.get_paper(tenant_id, paper_id).await?;
        let source_key = paper
            .source_document_ref
            .as_deref()
            .and_then(|reference| self.blobs.key_for_reference(reference));

        let data = match source_key {
            Some(key) => self.blobs.get(&key).await?,
            None => None,
        }
        .ok_or_else(|| AppError::Validation {
            message: "edition has no retained source document".to_string(),
            field: Some("sourceDocumentRef".to_string()),
        })?;

        self.update_paper(tenant_id, paper_id, PaperMetadata::default(), Some(data))
            .await
    }

    /// ReplacePage. Only the addressed page changes.
    #[instrument(skip(self, image), fields(tenant_id = %tenant_id, paper_id = %paper_id, page = page_number))]
    pub async fn replace_page(
        &self,
        tenant_id: Uuid,
        paper_id: Uuid,
        page_number: u32,
        image: Option<UploadedImage>,
    ) -> Result<Paper> {
        let paper = self.get_paper(tenant_id, paper_id).await?;
        if paper.page(page_number).is_none() {
            return Err(AppError::PageNotFound {
                paper_id: paper_id.to_string(),
                page_number,
            });
        }
        let image = image
            .filter(|image| !image.data.is_empty())
            .ok_or(AppError::NoImageProvided)?;

        let ext = extension_for(image.file_name.as_deref(), image.content_type.as_deref());
        let key = page_image_key(tenant_id, paper_id, page_number, &new_revision(), &ext);
        let content_type = image
            .content_type
            .clone()
            .unwrap_or_else(|| content_type_for(&key));
        let image_ref = self.blobs.put(&key, &image.data, &content_type).await?;

        let revision = match self
            .papers
            .replace_page_image(tenant_id, paper_id, page_number, image_ref)
            .await
        {
            Ok(revision) => revision,
            Err(e) => {
                self.discard(&key).await;
                return Err(e);
            }
        };

        // The image actually overwritten, which a concurrent re-render may
        // have changed since the lookup above
        let replaced = revision
            .previous
            .page(page_number)
            .and_then(|page| self.blobs.key_for_reference(&page.image_ref));
        if let Some(old_key) = replaced {
            self.discard(&old_key).await;
        }

        metrics::record_page_replaced();
        info!("Page image replaced");
        Ok(revision.current)
    }

    /// DeletePaper. Idempotent once the tenant has a collection.
    #[instrument(skip(self), fields(tenant_id = %tenant_id, paper_id = %paper_id))]
    pub async fn delete_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<()> {
        if self.papers.delete_paper(tenant_id, paper_id).await? {
            self.discard_prefix(&paper_prefix(tenant_id, paper_id)).await;
            info!("Paper deleted");
        } else {
            debug!("Paper already absent");
        }
        Ok(())
    }

    /// CheckDateAvailability. Looks across every tenant.
    pub async fn check_date(&self, date: NaiveDate) -> Result<DateAvailability> {
        let paper = self.papers.find_any_by_schedule_date(date).await?;
        Ok(DateAvailability::from_match(paper))
    }

    pub async fn get_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<Paper> {
        self.papers
            .get_paper(tenant_id, paper_id)
            .await?
            .ok_or_else(|| AppError::PaperNotFound {
                id: paper_id.to_string(),
            })
    }

    pub async fn list_papers(&self, tenant_id: Uuid) -> Result<Vec<Paper>> {
        self.papers.list_papers(tenant_id).await
    }

    async fn ensure_date_free(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<()> {
        if let Some(existing) = self
            .papers
            .find_schedule_conflict(tenant_id, date, exclude)
            .await?
        {
            warn!(date = %date, existing = %existing.id, "Schedule date already taken");
            return Err(AppError::DuplicateScheduleDate { date });
        }
        Ok(())
    }

    /// Store the source document, then count and rasterize its pages.
    /// Only a failure to store the source document is an error.
    async fn render(&self, tenant_id: Uuid, paper_id: Uuid, pdf: &[u8]) -> Result<Rendition> {
        let source_key = source_document_key(tenant_id, paper_id, pdf);
        let source_ref = self.blobs.put(&source_key, pdf, PDF_CONTENT_TYPE).await?;

        let mut rendition = Rendition {
            rendering: PaperRendering {
                source_document_ref: source_ref,
                source_document_size: pdf.len() as u64,
                page_count: 0,
                pages: Vec::new(),
            },
            written: vec![source_key],
            warnings: Vec::new(),
        };

        match self
            .guarded(FailureStage::PageCount, self.rasterizer.page_count(pdf))
            .await
        {
            Ok(count) => rendition.rendering.page_count = count,
            Err(failure) => rendition.warnings.push(failure),
        }

        let profile = self.rasterizer.profile();
        let started = Instant::now();
        let rendered = self
            .guarded(FailureStage::Rasterization, self.rasterizer.rasterize(pdf))
            .await;
        metrics::record_rasterize(
            started.elapsed().as_secs_f64(),
            self.rasterizer.name(),
            rendered.is_ok(),
        );

        let raster = match rendered {
            Ok(raster) => order_pages(raster),
            Err(failure) => {
                rendition.warnings.push(failure);
                return Ok(rendition);
            }
        };
        if raster.is_empty() {
            rendition.warnings.push(DependencyFailure::new(
                FailureStage::Rasterization,
                "engine produced no pages",
            ));
            return Ok(rendition);
        }

        let revision = new_revision();
        let mut page_keys = Vec::with_capacity(raster.len());
        for (position, page) in raster.into_iter().enumerate() {
            let page_number = position as u32 + 1;
            let ext = extension_for(Some(page.file_name.as_str()), Some(page.content_type.as_str()));
            let key = page_image_key(tenant_id, paper_id, page_number, &revision, &ext);

            match self.blobs.put(&key, &page.data, &page.content_type).await {
                Ok(image_ref) => {
                    page_keys.push(key);
                    rendition.rendering.pages.push(PageImage {
                        page_number,
                        image_ref,
                    });
                }
                Err(e) => {
                    warn!(page = page_number, error = %e, "Failed to store page image");
                    metrics::record_rasterize_failure(FailureStage::PageStorage.as_str());
                    rendition.warnings.push(DependencyFailure::new(
                        FailureStage::PageStorage,
                        format!("page {}: {}", page_number, e),
                    ));
                    // A partial page sequence would break numbering
                    for key in page_keys.drain(..) {
                        self.discard(&key).await;
                    }
                    rendition.rendering.pages.clear();
                    return Ok(rendition);
                }
            }
        }

        debug!(
            pages = rendition.rendering.pages.len(),
            dpi = profile.dpi,
            engine = self.rasterizer.name(),
            "Rasterized source document"
        );
        rendition.written.extend(page_keys);
        Ok(rendition)
    }

    /// Run one rasterizer call under the timeout, turning failure into a warning
    async fn guarded<T, F>(
        &self,
        stage: FailureStage,
        work: F,
    ) -> std::result::Result<T, DependencyFailure>
    where
        F: Future<Output = std::result::Result<T, IngestionError>>,
    {
        match tokio::time::timeout(self.rasterize_timeout, work).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                warn!(stage = stage.as_str(), error = %e, "Rasterizer call failed");
                metrics::record_rasterize_failure(stage.as_str());
                Err(DependencyFailure::from_error(stage, &e))
            }
            Err(_) => {
                warn!(
                    stage = stage.as_str(),
                    timeout_ms = self.rasterize_timeout.as_millis() as u64,
                    "Rasterizer call timed out"
                );
                metrics::record_rasterize_failure(FailureStage::Timeout.as_str());
                Err(DependencyFailure::new(
                    FailureStage::Timeout,
                    format!("{} timed out after {:?}", stage.as_str(), self.rasterize_timeout),
                ))
            }
        }
    }

    /// Blob keys a saved edition points at
    fn referenced_keys(&self, paper: &Paper) -> HashSet<String> {
        paper
            .source_document_ref
            .iter()
            .chain(paper.pages.iter().map(|page| &page.image_ref))
            .filter_map(|reference| self.blobs.key_for_reference(reference))
            .collect()
    }

    /// Best-effort removal of `keys` that `keep` does not reference
    async fn discard_unreferenced(&self, keys: Vec<String>, keep: &Paper) {
        let live = self.referenced_keys(keep);
        for key in keys.iter().filter(|key| !live.contains(*key)) {
            self.discard(key).await;
        }
    }

    /// Undo the blob writes of a failed update. Keys the stored edition still
    /// points at stay; when its state cannot be read nothing is removed.
    async fn discard_written(&self, tenant_id: Uuid, paper_id: Uuid, written: Vec<String>) {
        match self.papers.get_paper(tenant_id, paper_id).await {
            Ok(Some(current)) => self.discard_unreferenced(written, &current).await,
            Ok(None) => {
                for key in &written {
                    self.discard(key).await;
                }
            }
            Err(e) => warn!(error = %e, blobs = written.len(), "Keeping blobs of failed update"),
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(e) = self.blobs.delete(key).await {
            warn!(key = %key, error = %e, "Failed to remove blob");
        }
    }

    async fn discard_prefix(&self, prefix: &str) {
        match self.blobs.delete_prefix(prefix).await {
            Ok(removed) => debug!(prefix = %prefix, removed, "Removed edition blobs"),
            Err(e) => warn!(prefix = %prefix, error = %e, "Failed to remove edition blobs"),
        }
    }
}

/// Empty uploads count as absent; anything else must look like a PDF
fn accepted_pdf(pdf: Option<Vec<u8>>) -> Result<Option<Vec<u8>>> {
    match pdf {
        Some(data) if data.is_empty() => Ok(None),
        Some(data) if !looks_like_pdf(&data) => Err(AppError::InvalidFormat {
            message: "uploaded document is not a PDF".to_string(),
        }),
        other => Ok(other),
    }
}

/// Short random tag that keeps successive page images apart
fn new_revision() -> String {
    let mut tag = Uuid::new_v4().simple().to_string();
    tag.truncate(8);
    tag
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::fixtures::sample_pdf;
    use crate::rasterizer::MockRasterizer;
    use pressroom_common::domain::{PaperRevision, RenderStatus};
    use pressroom_common::storage::MemoryBlobStore;
    use pressroom_common::store::MemoryPaperStore;
    use tokio_test::assert_err;

    const TIMEOUT: Duration = Duration::from_secs(5);

    struct Harness {
        pipeline: IngestionPipeline,
        papers: Arc<MemoryPaperStore>,
        blobs: Arc<MemoryBlobStore>,
        raster: Arc<MockRasterizer>,
    }

    fn harness_with(raster: MockRasterizer, timeout: Duration) -> Harness {
        let papers = Arc::new(MemoryPaperStore::new());
        let blobs = Arc::new(MemoryBlobStore::default());
        let raster = Arc::new(raster);
        let pipeline =
            IngestionPipeline::new(papers.clone(), raster.clone(), blobs.clone(), timeout);
        Harness {
            pipeline,
            papers,
            blobs,
            raster,
        }
    }

    fn harness(pages: u32) -> Harness {
        harness_with(MockRasterizer::new(pages), TIMEOUT)
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn scheduled(title: &str, on: NaiveDate) -> PaperMetadata {
        PaperMetadata {
            title: Some(title.to_string()),
            schedule_date: Some(on),
            ..Default::default()
        }
    }

    fn image(data: &[u8]) -> UploadedImage {
        UploadedImage {
            data: data.to_vec(),
            file_name: Some("replacement.png".to_string()),
            content_type: Some("image/png".to_string()),
        }
    }

    #[tokio::test]
    async fn test_create_three_page_edition() {
        let h = harness(3);
        let t1 = Uuid::new_v4();

        let report = h
            .pipeline
            .create_paper(t1, scheduled("Morning", date(2024, 3, 1)), Some(sample_pdf(3)))
            .await
            .unwrap();

        assert!(!report.has_warnings());
        let paper = report.paper;
        assert_eq!(paper.page_count, 3);
        assert_eq!(paper.render_status, RenderStatus::Rendered);
        let numbers: Vec<u32> = paper.pages.iter().map(|p| p.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert!(paper.source_document_ref.is_some());
        assert!(paper.pages.iter().all(|p| p.image_ref.starts_with("/files/papers/")));

        let prefix = paper_prefix(t1, paper.id);
        assert_eq!(h.blobs.count(&prefix).await, 4);
        assert_eq!(h.pipeline.list_papers(t1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_same_date_rejected_within_tenant_only() {
        let h = harness(3);
        let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());
        h.pipeline
            .create_paper(t1, scheduled("Morning", date(2024, 3, 1)), Some(sample_pdf(3)))
            .await
            .unwrap();
        let calls = h.raster.rasterize_calls();

        let err = assert_err!(
            h.pipeline
                .create_paper(t1, scheduled("Again", date(2024, 3, 1)), Some(sample_pdf(3)))
                .await
        );
        assert!(matches!(err, AppError::DuplicateScheduleDate { .. }));
        // Rejected before any rendering work or blob writes
        assert_eq!(h.raster.rasterize_calls(), calls);
        assert_eq!(h.pipeline.list_papers(t1).await.unwrap().len(), 1);
        assert_eq!(h.blobs.count("").await, 4);

        // Another tenant may use the same date
        h.pipeline
            .create_paper(t2, scheduled("Other", date(2024, 3, 1)), None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_time_of_day_does_not_separate_dates() {
        let h = harness(1);
        let tenant = Uuid::new_v4();
        let first: PaperMetadata =
            serde_json::from_str(r#"{"scheduleDate":"2024-03-01T06:00:00Z"}"#).unwrap();
        let second: PaperMetadata =
            serde_json::from_str(r#"{"scheduleDate":"2024-03-01T23:30:00Z"}"#).unwrap();

        h.pipeline.create_paper(tenant, first, None).await.unwrap();
        let err = assert_err!(h.pipeline.create_paper(tenant, second, None).await);
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_create_without_document_is_draft() {
        let h = harness(3);
        let report = h
            .pipeline
            .create_paper(Uuid::new_v4(), PaperMetadata::default(), None)
            .await
            .unwrap();
        assert_eq!(report.paper.render_status, RenderStatus::Draft);
        assert_eq!(report.paper.title, pressroom_common::domain::UNTITLED_EDITION);
        assert!(report.paper.source_document_ref.is_none());
        assert_eq!(h.raster.rasterize_calls(), 0);
    }

    #[tokio::test]
    async fn test_non_pdf_upload_rejected_before_side_effects() {
        let h = harness(3);
        let err = assert_err!(
            h.pipeline
                .create_paper(Uuid::new_v4(), PaperMetadata::default(), Some(b"GIF89a".to_vec()))
                .await
        );
        assert!(err.is_validation());
        assert_eq!(h.blobs.count("").await, 0);
    }

    #[tokio::test]
    async fn test_invalid_metadata_rejected() {
        let h = harness(1);
        let meta = PaperMetadata {
            title: Some(String::new()),
            ..Default::default()
        };
        let err = assert_err!(h.pipeline.create_paper(Uuid::new_v4(), meta, None).await);
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_rasterize_failure_still_saves_edition() {
        let h = harness(3);
        h.raster.set_fail_rasterize(true);
        let tenant = Uuid::new_v4();

        let report = h
            .pipeline
            .create_paper(tenant, PaperMetadata::default(), Some(sample_pdf(3)))
            .await
            .unwrap();

        assert!(report.failed_stage(FailureStage::Rasterization));
        assert!(report.paper.pages.is_empty());
        assert_eq!(report.paper.page_count, 3);
        assert_eq!(report.paper.render_status, RenderStatus::RenderFailed);
        assert!(report.paper.source_document_ref.is_some());
        assert!(h.papers.get_paper(tenant, report.paper.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_page_count_failure_records_zero() {
        let h = harness(2);
        h.raster.set_fail_page_count(true);

        let report = h
            .pipeline
            .create_paper(Uuid::new_v4(), PaperMetadata::default(), Some(sample_pdf(2)))
            .await
            .unwrap();

        assert!(report.failed_stage(FailureStage::PageCount));
        assert_eq!(report.paper.page_count, 0);
        assert_eq!(report.paper.pages.len(), 2);
        assert_eq!(report.paper.render_status, RenderStatus::Rendered);
    }

    #[tokio::test]
    async fn test_rasterize_timeout_is_a_failure() {
        let h = harness_with(
            MockRasterizer::new(2).with_delay(Duration::from_millis(500)),
            Duration::from_millis(20),
        );

        let report = h
            .pipeline
            .create_paper(Uuid::new_v4(), PaperMetadata::default(), Some(sample_pdf(2)))
            .await
            .unwrap();

        assert!(report.failed_stage(FailureStage::Timeout));
        assert!(report.paper.pages.is_empty());
        assert_eq!(report.paper.render_status, RenderStatus::RenderFailed);
    }

    #[tokio::test]
    async fn test_pages_follow_embedded_index_not_engine_order() {
        let h = harness_with(MockRasterizer::new(3).shuffled(), TIMEOUT);
        let tenant = Uuid::new_v4();

        let report = h
            .pipeline
            .create_paper(tenant, PaperMetadata::default(), Some(sample_pdf(3)))
            .await
            .unwrap();

        for page in &report.paper.pages {
            let key = h.blobs.key_for_reference(&page.image_ref).unwrap();
            let data = h.blobs.get(&key).await.unwrap().unwrap();
            assert_eq!(data, format!("mock raster {}", page.page_number).into_bytes());
        }
    }

    #[tokio::test]
    async fn test_update_merges_metadata_and_allows_own_date() {
        let h = harness(1);
        let tenant = Uuid::new_v4();
        let created = h
            .pipeline
            .create_paper(tenant, scheduled("Morning", date(2024, 3, 1)), None)
            .await
            .unwrap()
            .paper;

        let report = h
            .pipeline
            .update_paper(
                tenant,
                created.id,
                PaperMetadata {
                    schedule_date: Some(date(2024, 3, 1)),
                    is_published: Some(true),
                    ..Default::default()
                },
                None,
            )
            .await
            .unwrap();

        assert_eq!(report.paper.title, "Morning");
        assert!(report.paper.is_published);
        assert_eq!(report.paper.created_at, created.created_at);
    }

    #[tokio::test]
    async fn test_update_rejects_date_taken_by_sibling() {
        let h = harness(1);
        let tenant = Uuid::new_v4();
        h.pipeline
            .create_paper(tenant, scheduled("A", date(2024, 3, 1)), None)
            .await
            .unwrap();
        let b = h
            .pipeline
            .create_paper(tenant, scheduled("B", date(2024, 3, 2)), None)
            .await
            .unwrap()
            .paper;

        let err = assert_err!(
            h.pipeline
                .update_paper(tenant, b.id, scheduled("B", date(2024, 3, 1)), None)
                .await
        );
        assert!(matches!(err, AppError::DuplicateScheduleDate { .. }));
        let stored = h.pipeline.get_paper(tenant, b.id).await.unwrap();
        assert_eq!(stored.schedule_date, Some(date(2024, 3, 2)));
    }

    #[tokio::test]
    async fn test_update_unknown_paper() {
        let h = harness(1);
        let err = assert_err!(
            h.pipeline
                .update_paper(Uuid::new_v4(), Uuid::new_v4(), PaperMetadata::default(), None)
                .await
        );
        assert!(matches!(err, AppError::PaperNotFound { .. }));
    }

    #[tokio::test]
    async fn test_update_with_new_document_replaces_pages() {
        let h = harness(3);
        let tenant = Uuid::new_v4();
        let created = h
            .pipeline
            .create_paper(tenant, PaperMetadata::default(), Some(sample_pdf(3)))
            .await
            .unwrap()
            .paper;

        let report = h
            .pipeline
            .update_paper(tenant, created.id, PaperMetadata::default(), Some(sample_pdf(5)))
            .await
            .unwrap();

        assert_eq!(report.paper.pages.len(), 3);
        assert_ne!(report.paper.source_document_ref, created.source_document_ref);
        for old in &created.pages {
            assert!(!report.paper.pages.iter().any(|p| p.image_ref == old.image_ref));
        }
        // Old source document and old pages are gone
        assert_eq!(h.blobs.count(&paper_prefix(tenant, created.id)).await, 4);
    }

    #[tokio::test]
    async fn test_replace_page_touches_one_page() {
        let h = harness(3);
        let tenant = Uuid::new_v4();
        let created = h
            .pipeline
            .create_paper(tenant, scheduled("Morning", date(2024, 3, 1)), Some(sample_pdf(3)))
            .await
            .unwrap()
            .paper;

        let updated = h
            .pipeline
            .replace_page(tenant, created.id, 2, Some(image(b"fresh")))
            .await
            .unwrap();

        assert_eq!(updated.page_count, created.page_count);
        assert_eq!(updated.title, created.title);
        assert_eq!(updated.page(1), created.page(1));
        assert_eq!(updated.page(3), created.page(3));
        assert_ne!(updated.page(2), created.page(2));

        let key = h
            .blobs
            .key_for_reference(&updated.page(2).unwrap().image_ref)
            .unwrap();
        assert_eq!(h.blobs.get(&key).await.unwrap().unwrap(), b"fresh");
        let old_key = h
            .blobs
            .key_for_reference(&created.page(2).unwrap().image_ref)
            .unwrap();
        assert!(h.blobs.get(&old_key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replace_page_errors() {
        let h = harness(2);
        let tenant = Uuid::new_v4();
        let created = h
            .pipeline
            .create_paper(tenant, PaperMetadata::default(), Some(sample_pdf(2)))
            .await
            .unwrap()
            .paper;

        let err = assert_err!(
            h.pipeline
                .replace_page(tenant, created.id, 7, Some(image(b"x")))
                .await
        );
        assert!(matches!(err, AppError::PageNotFound { page_number: 7, .. }));

        let err = assert_err!(h.pipeline.replace_page(tenant, created.id, 1, None).await);
        assert!(matches!(err, AppError::NoImageProvided));

        let err = assert_err!(
            h.pipeline
                .replace_page(tenant, Uuid::new_v4(), 1, Some(image(b"x")))
                .await
        );
        assert!(matches!(err, AppError::PaperNotFound { .. }));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_removes_blobs() {
        let h = harness(2);
        let tenant = Uuid::new_v4();

        let err = assert_err!(h.pipeline.delete_paper(tenant, Uuid::new_v4()).await);
        assert!(matches!(err, AppError::EpaperNotFound { .. }));

        let created = h
            .pipeline
            .create_paper(tenant, PaperMetadata::default(), Some(sample_pdf(2)))
            .await
            .unwrap()
            .paper;
        assert_eq!(h.blobs.count("").await, 3);

        h.pipeline.delete_paper(tenant, created.id).await.unwrap();
        h.pipeline.delete_paper(tenant, created.id).await.unwrap();
        assert_eq!(h.blobs.count("").await, 0);
        assert!(h.pipeline.list_papers(tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_check_date_is_global() {
        let h = harness(1);
        let (t1, t2) = (Uuid::new_v4(), Uuid::new_v4());
        let first = h
            .pipeline
            .create_paper(t1, scheduled("T1", date(2024, 3, 1)), None)
            .await
            .unwrap()
            .paper;
        h.pipeline
            .create_paper(t2, scheduled("T2", date(2024, 3, 1)), None)
            .await
            .unwrap();

        let taken = h.pipeline.check_date(date(2024, 3, 1)).await.unwrap();
        assert!(taken.exists);
        assert_eq!(taken.paper.unwrap().id, first.id);

        let free = h.pipeline.check_date(date(2024, 3, 2)).await.unwrap();
        assert!(!free.exists);
        assert!(free.paper.is_none());
    }

    #[tokio::test]
    async fn test_rerender_recovers_failed_edition() {
        let h = harness(2);
        let tenant = Uuid::new_v4();
        h.raster.set_fail_rasterize(true);
        let failed = h
            .pipeline
            .create_paper(tenant, PaperMetadata::default(), Some(sample_pdf(2)))
            .await
            .unwrap()
            .paper;
        assert_eq!(failed.render_status, RenderStatus::RenderFailed);

        h.raster.set_fail_rasterize(false);
        let report = h.pipeline.rerender_paper(tenant, failed.id).await.unwrap();

        assert!(!report.has_warnings());
        assert_eq!(report.paper.render_status, RenderStatus::Rendered);
        assert_eq!(report.paper.pages.len(), 2);
        // Same bytes, same content-addressed source document
        assert_eq!(report.paper.source_document_ref, failed.source_document_ref);
        assert_eq!(h.blobs.count(&paper_prefix(tenant, failed.id)).await, 3);
    }

    #[tokio::test]
    async fn test_rerender_requires_source_document() {
        let h = harness(1);
        let tenant = Uuid::new_v4();
        let draft = h
            .pipeline
            .create_paper(tenant, PaperMetadata::default(), None)
            .await
            .unwrap()
            .paper;
        let err = assert_err!(h.pipeline.rerender_paper(tenant, draft.id).await);
        assert!(err.is_validation());
    }

    /// Memory store whose edition updates wait before touching the record
    struct SlowUpdates {
        inner: MemoryPaperStore,
        delay: Duration,
    }

    #[async_trait::async_trait]
    impl PaperStore for SlowUpdates {
        async fn find_epaper(&self, tenant_id: Uuid) -> Result<Option<pressroom_common::domain::Epaper>> {
            self.inner.find_epaper(tenant_id).await
        }

        async fn list_papers(&self, tenant_id: Uuid) -> Result<Vec<Paper>> {
            self.inner.list_papers(tenant_id).await
        }

        async fn get_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<Option<Paper>> {
            self.inner.get_paper(tenant_id, paper_id).await
        }

        async fn find_schedule_conflict(
            &self,
            tenant_id: Uuid,
            date: NaiveDate,
            exclude: Option<Uuid>,
        ) -> Result<Option<Paper>> {
            self.inner.find_schedule_conflict(tenant_id, date, exclude).await
        }

        async fn insert_paper(&self, tenant_id: Uuid, paper: Paper) -> Result<Paper> {
            self.inner.insert_paper(tenant_id, paper).await
        }

        async fn update_paper(
            &self,
            tenant_id: Uuid,
            paper_id: Uuid,
            metadata: &PaperMetadata,
            rendering: Option<PaperRendering>,
        ) -> Result<PaperRevision> {
            tokio::time::sleep(self.delay).await;
            self.inner
                .update_paper(tenant_id, paper_id, metadata, rendering)
                .await
        }

        async fn replace_page_image(
            &self,
            tenant_id: Uuid,
            paper_id: Uuid,
            page_number: u32,
            image_ref: String,
        ) -> Result<PaperRevision> {
            self.inner
                .replace_page_image(tenant_id, paper_id, page_number, image_ref)
                .await
        }

        async fn delete_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<bool> {
            self.inner.delete_paper(tenant_id, paper_id).await
        }

        async fn find_any_by_schedule_date(&self, date: NaiveDate) -> Result<Option<Paper>> {
            self.inner.find_any_by_schedule_date(date).await
        }
    }

    #[tokio::test]
    async fn test_metadata_update_keeps_concurrently_replaced_page() {
        let papers = Arc::new(SlowUpdates {
            inner: MemoryPaperStore::new(),
            delay: Duration::from_millis(200),
        });
        let blobs = Arc::new(MemoryBlobStore::default());
        let pipeline = IngestionPipeline::new(
            papers.clone(),
            Arc::new(MockRasterizer::new(3)),
            blobs.clone(),
            TIMEOUT,
        );
        let tenant = Uuid::new_v4();
        let created = pipeline
            .create_paper(tenant, PaperMetadata::default(), Some(sample_pdf(3)))
            .await
            .unwrap()
            .paper;

        let retitle = PaperMetadata {
            title: Some("Late edition".into()),
            ..Default::default()
        };
        let (updated, replaced) = tokio::join!(
            pipeline.update_paper(tenant, created.id, retitle, None),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                pipeline
                    .replace_page(tenant, created.id, 2, Some(image(b"fresh")))
                    .await
            }
        );
        let replaced = replaced.unwrap();
        assert_eq!(updated.unwrap().paper.title, "Late edition");

        let stored = pipeline.get_paper(tenant, created.id).await.unwrap();
        assert_eq!(stored.title, "Late edition");
        assert_eq!(stored.page(2), replaced.page(2));
        assert_eq!(stored.page(1), created.page(1));

        let key = blobs
            .key_for_reference(&stored.page(2).unwrap().image_ref)
            .unwrap();
        assert_eq!(blobs.get(&key).await.unwrap().unwrap(), b"fresh");
    }

    #[tokio::test]
    async fn test_rerender_during_page_replacement_leaves_no_dangling_pages() {
        let h = harness_with(
            MockRasterizer::new(2).with_delay(Duration::from_millis(200)),
            TIMEOUT,
        );
        let tenant = Uuid::new_v4();
        let created = h
            .pipeline
            .create_paper(tenant, PaperMetadata::default(), Some(sample_pdf(2)))
            .await
            .unwrap()
            .paper;

        let (updated, replaced) = tokio::join!(
            h.pipeline
                .update_paper(tenant, created.id, PaperMetadata::default(), Some(sample_pdf(2))),
            async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                h.pipeline
                    .replace_page(tenant, created.id, 1, Some(image(b"fresh")))
                    .await
            }
        );
        let replaced = replaced.unwrap();
        updated.unwrap();

        // Every page the stored edition points at still exists
        let stored = h.pipeline.get_paper(tenant, created.id).await.unwrap();
        assert_eq!(stored.pages.len(), 2);
        for page in &stored.pages {
            let key = h.blobs.key_for_reference(&page.image_ref).unwrap();
            assert!(h.blobs.get(&key).await.unwrap().is_some());
        }

        // The page image overwritten by the new rendering is gone
        let fresh_key = h
            .blobs
            .key_for_reference(&replaced.page(1).unwrap().image_ref)
            .unwrap();
        assert!(h.blobs.get(&fresh_key).await.unwrap().is_none());
    }
}
