//! Edition management handlers

use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    Json,
};
use pressroom_common::{
    domain::{parse_schedule_date, DateAvailability, Paper, PaperMetadata},
    errors::{AppError, Result},
    TenantContext,
};
use pressroom_ingestion::IngestionReport;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::form::Form;
use crate::AppState;

/// Multipart part carrying the source PDF
const FILE_FIELD: &str = "file";

/// Multipart part carrying the JSON metadata blob
const METADATA_FIELD: &str = "metadata";

#[derive(Debug, Deserialize)]
pub struct CheckDateQuery {
    pub date: Option<String>,
}

#[derive(Serialize)]
pub struct PaperListResponse {
    pub papers: Vec<Paper>,
    pub total: usize,
}

/// Metadata and optional PDF from a create or update upload
struct PaperUpload {
    metadata: PaperMetadata,
    pdf: Option<Vec<u8>>,
}

impl PaperUpload {
    async fn read(state: &AppState, multipart: Multipart) -> Result<Self> {
        let mut form = Form::read(multipart, state.config.storage.max_upload_bytes).await?;
        let pdf = form.take_file(FILE_FIELD).map(|file| file.data);
        let metadata = parse_metadata(&form)?;
        Ok(Self { metadata, pdf })
    }
}

/// Metadata comes as one JSON blob, or as plain form fields when the blob is absent
fn parse_metadata(form: &Form) -> Result<PaperMetadata> {
    let value = match form.field(METADATA_FIELD) {
        Some(raw) => serde_json::from_str(raw).map_err(|e| AppError::InvalidFormat {
            message: format!("metadata is not valid JSON: {}", e),
        })?,
        None => {
            let mut map = Map::new();
            for (name, value) in form.fields() {
                let value = match name {
                    "title" | "scheduleDate" | "scheduleTime" => Value::String(value.to_string()),
                    "isPublished" => Value::Bool(parse_flag(value)?),
                    _ => continue,
                };
                map.insert(name.to_string(), value);
            }
            Value::Object(map)
        }
    };

    serde_json::from_value(value).map_err(|e| AppError::InvalidFormat {
        message: format!("invalid metadata: {}", e),
    })
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim() {
        "true" | "1" | "on" => Ok(true),
        "false" | "0" | "off" => Ok(false),
        other => Err(AppError::InvalidFormat {
            message: format!("isPublished must be a boolean, got {:?}", other),
        }),
    }
}

/// Create a new edition, rasterizing the uploaded PDF if there is one
pub async fn create_paper(
    State(state): State<AppState>,
    tenant: TenantContext,
    multipart: Multipart,
) -> Result<(StatusCode, Json<IngestionReport>)> {
    let upload = PaperUpload::read(&state, multipart).await?;

    let report = state
        .papers
        .create_paper(tenant.tenant_id, upload.metadata, upload.pdf)
        .await?;

    tracing::info!(
        paper_id = %report.paper.id,
        tenant_id = %tenant.tenant_id,
        request_id = %tenant.request_id,
        degraded = report.has_warnings(),
        "Paper created"
    );

    Ok((StatusCode::CREATED, Json(report)))
}

/// List the tenant's editions in creation order
pub async fn list_papers(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<PaperListResponse>> {
    let papers = state.papers.list_papers(tenant.tenant_id).await?;
    Ok(Json(PaperListResponse {
        total: papers.len(),
        papers,
    }))
}

/// Is any tenant's edition scheduled on the given date
pub async fn check_date(
    State(state): State<AppState>,
    _tenant: TenantContext,
    Query(query): Query<CheckDateQuery>,
) -> Result<Json<DateAvailability>> {
    let raw = query.date.ok_or_else(|| AppError::MissingField {
        field: "date".to_string(),
    })?;
    let date = parse_schedule_date(&raw)?;

    Ok(Json(state.papers.check_date(date).await?))
}

/// Get an edition by ID
pub async fn get_paper(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(paper_id): Path<Uuid>,
) -> Result<Json<Paper>> {
    let paper = state.papers.get_paper(tenant.tenant_id, paper_id).await?;
    Ok(Json(paper))
}

/// Merge metadata into an edition; a new PDF replaces every page
pub async fn update_paper(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(paper_id): Path<Uuid>,
    multipart: Multipart,
) -> Result<Json<IngestionReport>> {
    let upload = PaperUpload::read(&state, multipart).await?;

    let report = state
        .papers
        .update_paper(tenant.tenant_id, paper_id, upload.metadata, upload.pdf)
        .await?;

    Ok(Json(report))
}

/// Delete an edition
pub async fn delete_paper(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(paper_id): Path<Uuid>,
) -> Result<StatusCode> {
    state.papers.delete_paper(tenant.tenant_id, paper_id).await?;

    tracing::info!(
        paper_id = %paper_id,
        tenant_id = %tenant.tenant_id,
        "Paper deleted"
    );

    Ok(StatusCode::NO_CONTENT)
}
