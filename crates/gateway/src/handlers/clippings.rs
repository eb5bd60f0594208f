//! Clipping handlers
//!
//! Creation and lookup are open to anonymous readers; listing and deletion
//! need a resolved tenant.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Json,
};
use pressroom_common::{
    clipping::NewClipping,
    domain::{Clipping, CreatedClipping, RegionInput},
    errors::{AppError, Result},
    TenantContext,
};
use serde::Serialize;
use uuid::Uuid;

use super::form::Form;
use crate::AppState;

/// Multipart part carrying the cropped image
const IMAGE_FIELD: &str = "image";

#[derive(Serialize)]
pub struct ClippingListResponse {
    pub clippings: Vec<Clipping>,
    pub total: usize,
}

fn required<'a>(form: &'a Form, name: &str) -> Result<&'a str> {
    form.field(name).ok_or_else(|| AppError::MissingField {
        field: name.to_string(),
    })
}

/// Turn the form fields into a CreateClipping request
fn new_clipping(mut form: Form, owner: Option<Uuid>) -> Result<NewClipping> {
    let paper_id = Uuid::parse_str(required(&form, "paperId")?).map_err(|_| {
        AppError::InvalidFormat {
            message: "paperId must be a UUID".to_string(),
        }
    })?;

    let raw_page = form
        .field("page")
        .or_else(|| form.field("pageNumber"))
        .ok_or_else(|| AppError::MissingField {
            field: "page".to_string(),
        })?;
    let page_number: u32 = raw_page.parse().map_err(|_| AppError::InvalidFormat {
        message: format!("page must be a positive integer, got {:?}", raw_page),
    })?;

    let mut region = RegionInput::default();
    for (name, value) in form.fields() {
        region.set_field(name, value.to_string());
    }
    let image_url = form.field("imageUrl").map(str::to_string);

    Ok(NewClipping {
        owner_tenant_id: owner,
        paper_id,
        page_number,
        region,
        upload: form.take_file(IMAGE_FIELD),
        image_url,
    })
}

/// Save a crop of one page
pub async fn create_clipping(
    State(state): State<AppState>,
    tenant: Option<TenantContext>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<CreatedClipping>)> {
    let form = Form::read(multipart, state.config.storage.max_upload_bytes).await?;
    let request = new_clipping(form, tenant.map(|t| t.tenant_id))?;

    let created = state.clippings.create(request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Public lookup by clip id
pub async fn get_clipping(
    State(state): State<AppState>,
    Path(clip_id): Path<i64>,
) -> Result<Json<Clipping>> {
    Ok(Json(state.clippings.get(clip_id).await?))
}

/// The caller's clippings, newest first
pub async fn list_clippings(
    State(state): State<AppState>,
    tenant: TenantContext,
) -> Result<Json<ClippingListResponse>> {
    let clippings = state.clippings.list_for_tenant(tenant.tenant_id).await?;
    Ok(Json(ClippingListResponse {
        total: clippings.len(),
        clippings,
    }))
}

/// Delete a clipping the caller owns
pub async fn delete_clipping(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path(clip_id): Path<i64>,
) -> Result<StatusCode> {
    state.clippings.delete(tenant.tenant_id, clip_id).await?;

    tracing::info!(clip_id, tenant_id = %tenant.tenant_id, "Clipping deleted");
    Ok(StatusCode::NO_CONTENT)
}
