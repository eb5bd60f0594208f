//! Editions ("papers") and the per-tenant e-paper collection

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::errors::{AppError, Result};

/// Title given to editions created without one
pub const UNTITLED_EDITION: &str = "Untitled Edition";

/// A tenant's edition collection. Created lazily on the first write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Epaper {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Epaper {
    pub fn new(tenant_id: Uuid) -> Self {
        Self {
            id: Uuid::now_v7(),
            tenant_id,
            created_at: Utc::now(),
        }
    }
}

/// Rasterization state of an edition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderStatus {
    /// Created, rasterization outcome unknown (or no document uploaded yet)
    Draft,
    /// Pages populated
    Rendered,
    /// Document retained but no pages could be produced
    RenderFailed,
}

impl RenderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderStatus::Draft => "draft",
            RenderStatus::Rendered => "rendered",
            RenderStatus::RenderFailed => "render_failed",
        }
    }
}

impl From<String> for RenderStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "rendered" => RenderStatus::Rendered,
            "render_failed" => RenderStatus::RenderFailed,
            _ => RenderStatus::Draft,
        }
    }
}

impl From<RenderStatus> for String {
    fn from(status: RenderStatus) -> Self {
        status.as_str().to_string()
    }
}

/// One rendered page of an edition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageImage {
    pub page_number: u32,
    pub image_ref: String,
}

/// What rendering a source document produced, ready to be stored on an edition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaperRendering {
    pub source_document_ref: String,
    pub source_document_size: u64,
    pub page_count: u32,
    pub pages: Vec<PageImage>,
}

/// An edition as it was just before an in-place write, and as it is after
#[derive(Debug, Clone)]
pub struct PaperRevision {
    pub previous: Paper,
    pub current: Paper,
}

/// One published issue of a tenant's e-paper
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paper {
    pub id: Uuid,
    pub title: String,
    pub schedule_date: Option<NaiveDate>,
    pub schedule_time: Option<String>,
    pub source_document_ref: Option<String>,
    pub source_document_size: Option<u64>,
    pub page_count: u32,
    pub pages: Vec<PageImage>,
    pub render_status: RenderStatus,
    pub is_published: bool,
    pub views: u64,
    pub downloads: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Paper {
    /// Build a draft edition from creation metadata
    pub fn draft(id: Uuid, metadata: &PaperMetadata) -> Self {
        let now = Utc::now();
        Self {
            id,
            title: metadata
                .title
                .clone()
                .unwrap_or_else(|| UNTITLED_EDITION.to_string()),
            schedule_date: metadata.schedule_date,
            schedule_time: metadata.schedule_time.clone(),
            source_document_ref: None,
            source_document_size: None,
            page_count: 0,
            pages: Vec::new(),
            render_status: RenderStatus::Draft,
            is_published: metadata.is_published.unwrap_or(false),
            views: 0,
            downloads: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge supplied metadata fields; absent fields keep their current value
    pub fn apply_metadata(&mut self, metadata: &PaperMetadata) {
        if let Some(ref title) = metadata.title {
            self.title = title.clone();
        }
        if let Some(date) = metadata.schedule_date {
            self.schedule_date = Some(date);
        }
        if let Some(ref time) = metadata.schedule_time {
            self.schedule_time = Some(time.clone());
        }
        if let Some(published) = metadata.is_published {
            self.is_published = published;
        }
        self.updated_at = Utc::now();
    }

    /// Take over a fresh rendering; the whole page sequence is replaced
    pub fn apply_rendering(&mut self, rendering: PaperRendering) {
        self.source_document_ref = Some(rendering.source_document_ref);
        self.source_document_size = Some(rendering.source_document_size);
        self.page_count = rendering.page_count;
        self.render_status = if rendering.pages.is_empty() {
            RenderStatus::RenderFailed
        } else {
            RenderStatus::Rendered
        };
        self.pages = rendering.pages;
        self.updated_at = Utc::now();
    }

    /// Whether this edition occupies the given calendar date
    pub fn is_scheduled_on(&self, date: NaiveDate) -> bool {
        self.schedule_date == Some(date)
    }

    pub fn page(&self, page_number: u32) -> Option<&PageImage> {
        self.pages.iter().find(|p| p.page_number == page_number)
    }

    /// Overwrite one page's image, leaving every other page untouched
    pub fn replace_page_image(&mut self, page_number: u32, image_ref: String) -> Result<()> {
        let page = self
            .pages
            .iter_mut()
            .find(|p| p.page_number == page_number)
            .ok_or_else(|| AppError::PageNotFound {
                paper_id: self.id.to_string(),
                page_number,
            })?;
        page.image_ref = image_ref;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Caller-supplied edition metadata for create and update
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PaperMetadata {
    #[validate(length(min = 1, max = 500))]
    pub title: Option<String>,

    #[serde(default, deserialize_with = "deserialize_schedule_date")]
    pub schedule_date: Option<NaiveDate>,

    #[validate(length(max = 32))]
    pub schedule_time: Option<String>,

    pub is_published: Option<bool>,
}

/// Answer to a global "is this date taken" query
#[derive(Debug, Clone, Serialize)]
pub struct DateAvailability {
    pub exists: bool,
    pub paper: Option<Paper>,
}

impl DateAvailability {
    pub fn from_match(paper: Option<Paper>) -> Self {
        Self {
            exists: paper.is_some(),
            paper,
        }
    }
}

/// Parse a schedule date, accepting `YYYY-MM-DD` or an RFC 3339 timestamp.
///
/// Timestamps are reduced to their calendar date; time-of-day never takes
/// part in schedule comparisons.
pub fn parse_schedule_date(raw: &str) -> Result<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.date_naive())
        .map_err(|_| AppError::InvalidFormat {
            message: format!("invalid date {:?}, expected YYYY-MM-DD", raw),
        })
}

fn deserialize_schedule_date<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => parse_schedule_date(value)
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_schedule_date_ignores_time_of_day() {
        assert_eq!(parse_schedule_date("2024-03-01").unwrap(), date(2024, 3, 1));
        assert_eq!(
            parse_schedule_date("2024-03-01T23:10:00+00:00").unwrap(),
            date(2024, 3, 1)
        );
        assert!(parse_schedule_date("01/03/2024").is_err());
        assert!(parse_schedule_date("2024-02-30").is_err());
    }

    #[test]
    fn test_metadata_from_json() {
        let meta: PaperMetadata = serde_json::from_str(
            r#"{"title":"Morning","scheduleDate":"2024-03-01T06:00:00Z","scheduleTime":"06:00"}"#,
        )
        .unwrap();
        assert_eq!(meta.title.as_deref(), Some("Morning"));
        assert_eq!(meta.schedule_date, Some(date(2024, 3, 1)));
        assert_eq!(meta.schedule_time.as_deref(), Some("06:00"));

        let empty: PaperMetadata = serde_json::from_str(r#"{"scheduleDate":""}"#).unwrap();
        assert_eq!(empty.schedule_date, None);
    }

    #[test]
    fn test_draft_uses_placeholder_title() {
        let paper = Paper::draft(Uuid::new_v4(), &PaperMetadata::default());
        assert_eq!(paper.title, UNTITLED_EDITION);
        assert_eq!(paper.render_status, RenderStatus::Draft);
        assert!(paper.pages.is_empty());
    }

    #[test]
    fn test_apply_metadata_merges_supplied_fields_only() {
        let mut paper = Paper::draft(
            Uuid::new_v4(),
            &PaperMetadata {
                title: Some("Evening".into()),
                schedule_date: Some(date(2024, 3, 1)),
                ..Default::default()
            },
        );
        paper.apply_metadata(&PaperMetadata {
            is_published: Some(true),
            ..Default::default()
        });
        assert_eq!(paper.title, "Evening");
        assert_eq!(paper.schedule_date, Some(date(2024, 3, 1)));
        assert!(paper.is_published);
    }

    #[test]
    fn test_apply_rendering_sets_status_from_pages() {
        let mut paper = Paper::draft(Uuid::new_v4(), &PaperMetadata::default());
        paper.apply_rendering(PaperRendering {
            source_document_ref: "src".into(),
            source_document_size: 10,
            page_count: 2,
            pages: Vec::new(),
        });
        assert_eq!(paper.render_status, RenderStatus::RenderFailed);
        assert_eq!(paper.page_count, 2);

        paper.apply_rendering(PaperRendering {
            source_document_ref: "src".into(),
            source_document_size: 10,
            page_count: 1,
            pages: vec![PageImage {
                page_number: 1,
                image_ref: "img1".into(),
            }],
        });
        assert_eq!(paper.render_status, RenderStatus::Rendered);
        assert_eq!(paper.source_document_ref.as_deref(), Some("src"));
    }

    #[test]
    fn test_replace_page_image_touches_one_page() {
        let mut paper = Paper::draft(Uuid::new_v4(), &PaperMetadata::default());
        paper.pages = (1..=3)
            .map(|n| PageImage {
                page_number: n,
                image_ref: format!("img{}", n),
            })
            .collect();
        paper.page_count = 3;

        paper.replace_page_image(2, "fresh".into()).unwrap();
        assert_eq!(paper.page(1).unwrap().image_ref, "img1");
        assert_eq!(paper.page(2).unwrap().image_ref, "fresh");
        assert_eq!(paper.page(3).unwrap().image_ref, "img3");
        assert_eq!(paper.page_count, 3);

        let err = paper.replace_page_image(9, "x".into()).unwrap_err();
        assert!(matches!(err, AppError::PageNotFound { page_number: 9, .. }));
    }

    #[test]
    fn test_paper_serializes_camel_case() {
        let paper = Paper::draft(Uuid::new_v4(), &PaperMetadata::default());
        let json = serde_json::to_value(&paper).unwrap();
        assert!(json.get("pageCount").is_some());
        assert!(json.get("sourceDocumentRef").is_some());
        assert_eq!(json["renderStatus"], "draft");
    }
}
