//! Single page replacement

use axum::{
    extract::{Multipart, Path, State},
    Json,
};
use pressroom_common::{domain::Paper, errors::Result, TenantContext};
use uuid::Uuid;

use super::form::Form;
use crate::AppState;

/// Multipart part carrying the replacement raster
const IMAGE_FIELD: &str = "image";

/// Overwrite one page image; every other page stays as it was
pub async fn replace_page(
    State(state): State<AppState>,
    tenant: TenantContext,
    Path((paper_id, page_number)): Path<(Uuid, u32)>,
    multipart: Multipart,
) -> Result<Json<Paper>> {
    let mut form = Form::read(multipart, state.config.storage.max_upload_bytes).await?;
    let image = form.take_file(IMAGE_FIELD);

    let paper = state
        .papers
        .replace_page(tenant.tenant_id, paper_id, page_number, image)
        .await?;

    tracing::info!(
        paper_id = %paper_id,
        page = page_number,
        tenant_id = %tenant.tenant_id,
        "Page replaced"
    );

    Ok(Json(paper))
}
