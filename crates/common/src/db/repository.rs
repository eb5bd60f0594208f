//! Repository pattern for database operations
//!
//! One `Repository` backs all three store traits. The schedule date
//! invariant is held by the `papers_epaper_schedule_date_key` partial unique
//! index; sequence counters advance with a single upsert statement.

use crate::db::models::*;
use crate::db::DbPool;
use crate::domain::{
    Clipping, Epaper, PageImage, Paper, PaperMetadata, PaperRendering, PaperRevision, Region,
    RenderStatus,
};
use crate::errors::{AppError, Result};
use crate::sequence::{check_reseed, SequenceAllocator};
use crate::store::{ClippingStore, PaperStore};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbBackend, DbErr, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlErr, Statement,
    TransactionTrait,
};
use uuid::Uuid;

/// Increment-and-read in one statement; creates the counter at 1
const NEXT_VALUE_SQL: &str = r#"
    INSERT INTO sequence_counters (name, value)
    VALUES ($1, 1)
    ON CONFLICT (name) DO UPDATE SET value = sequence_counters.value + 1
    RETURNING value
"#;

/// Repository for data access operations
#[derive(Clone)]
pub struct Repository {
    pool: DbPool,
}

impl Repository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Get the read connection
    fn read_conn(&self) -> &DatabaseConnection {
        self.pool.read()
    }

    /// Get the write connection
    fn write_conn(&self) -> &DatabaseConnection {
        self.pool.write()
    }

    /// Ping the database
    pub async fn ping(&self) -> Result<()> {
        self.pool.ping().await
    }
}

// ============================================================================
// Row conversions
// ============================================================================

fn paper_from_row(row: PaperRow) -> Result<Paper> {
    let pages: Vec<PageImage> = serde_json::from_value(row.pages)?;
    Ok(Paper {
        id: row.id,
        title: row.title,
        schedule_date: row.schedule_date,
        schedule_time: row.schedule_time,
        source_document_ref: row.source_document_ref,
        source_document_size: row.source_document_size.map(|s| s.max(0) as u64),
        page_count: row.page_count.max(0) as u32,
        pages,
        render_status: RenderStatus::from(row.render_status),
        is_published: row.is_published,
        views: row.views.max(0) as u64,
        downloads: row.downloads.max(0) as u64,
        created_at: row.created_at.with_timezone(&Utc),
        updated_at: row.updated_at.with_timezone(&Utc),
    })
}

fn paper_active_model(epaper_id: Uuid, tenant_id: Uuid, paper: &Paper) -> Result<PaperActiveModel> {
    Ok(PaperActiveModel {
        id: Set(paper.id),
        epaper_id: Set(epaper_id),
        tenant_id: Set(tenant_id),
        title: Set(paper.title.clone()),
        schedule_date: Set(paper.schedule_date),
        schedule_time: Set(paper.schedule_time.clone()),
        source_document_ref: Set(paper.source_document_ref.clone()),
        source_document_size: Set(paper.source_document_size.map(|s| s as i64)),
        page_count: Set(paper.page_count as i32),
        pages: Set(serde_json::to_value(&paper.pages)?),
        render_status: Set(paper.render_status.into()),
        is_published: Set(paper.is_published),
        views: Set(paper.views as i64),
        downloads: Set(paper.downloads as i64),
        created_at: Set(paper.created_at.into()),
        updated_at: Set(paper.updated_at.into()),
    })
}

fn epaper_from_row(row: EpaperRow) -> Epaper {
    Epaper {
        id: row.id,
        tenant_id: row.tenant_id,
        created_at: row.created_at.with_timezone(&Utc),
    }
}

fn clipping_from_row(row: ClippingRow) -> Clipping {
    Clipping {
        clip_id: row.clip_id,
        owner_tenant_id: row.owner_tenant_id,
        paper_id: row.paper_id,
        page_number: row.page_number.max(0) as u32,
        region: Region {
            x: row.region_x,
            y: row.region_y,
            width: row.region_width,
            height: row.region_height,
        },
        image_ref: row.image_ref,
        created_at: row.created_at.with_timezone(&Utc),
    }
}

/// A unique violation on `papers` can only come from the schedule date index
fn schedule_conflict(err: DbErr, date: Option<NaiveDate>) -> AppError {
    match (err.sql_err(), date) {
        (Some(SqlErr::UniqueConstraintViolation(_)), Some(date)) => {
            AppError::DuplicateScheduleDate { date }
        }
        _ => err.into(),
    }
}

fn allocator_error(namespace: &str, detail: impl std::fmt::Display) -> AppError {
    AppError::AllocatorUnavailable {
        message: format!("sequence {}: {}", namespace, detail),
    }
}

/// Read an edition with a row lock held until the transaction ends
async fn lock_paper(txn: &DatabaseTransaction, tenant_id: Uuid, paper_id: Uuid) -> Result<Paper> {
    let row = PaperEntity::find_by_id(paper_id)
        .filter(PaperColumn::TenantId.eq(tenant_id))
        .lock_exclusive()
        .one(txn)
        .await?
        .ok_or_else(|| AppError::PaperNotFound {
            id: paper_id.to_string(),
        })?;
    paper_from_row(row)
}

/// Find the tenant's collection, creating it on first use
async fn ensure_epaper<C: ConnectionTrait>(conn: &C, tenant_id: Uuid) -> Result<EpaperRow> {
    conn.execute(Statement::from_sql_and_values(
        DbBackend::Postgres,
        "INSERT INTO epapers (id, tenant_id, created_at) VALUES ($1, $2, NOW()) \
         ON CONFLICT (tenant_id) DO NOTHING",
        vec![Uuid::now_v7().into(), tenant_id.into()],
    ))
    .await?;

    EpaperEntity::find()
        .filter(EpaperColumn::TenantId.eq(tenant_id))
        .one(conn)
        .await?
        .ok_or_else(|| AppError::Internal {
            message: format!("epaper for tenant {} vanished after upsert", tenant_id),
        })
}

// ============================================================================
// Paper Operations
// ============================================================================

#[async_trait]
impl PaperStore for Repository {
    async fn find_epaper(&self, tenant_id: Uuid) -> Result<Option<Epaper>> {
        Ok(EpaperEntity::find()
            .filter(EpaperColumn::TenantId.eq(tenant_id))
            .one(self.read_conn())
            .await?
            .map(epaper_from_row))
    }

    async fn list_papers(&self, tenant_id: Uuid) -> Result<Vec<Paper>> {
        PaperEntity::find()
            .filter(PaperColumn::TenantId.eq(tenant_id))
            .order_by_asc(PaperColumn::CreatedAt)
            .order_by_asc(PaperColumn::Id)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(paper_from_row)
            .collect()
    }

    async fn get_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<Option<Paper>> {
        PaperEntity::find_by_id(paper_id)
            .filter(PaperColumn::TenantId.eq(tenant_id))
            .one(self.read_conn())
            .await?
            .map(paper_from_row)
            .transpose()
    }

    async fn find_schedule_conflict(
        &self,
        tenant_id: Uuid,
        date: NaiveDate,
        exclude: Option<Uuid>,
    ) -> Result<Option<Paper>> {
        let mut query = PaperEntity::find()
            .filter(PaperColumn::TenantId.eq(tenant_id))
            .filter(PaperColumn::ScheduleDate.eq(date));
        if let Some(id) = exclude {
            query = query.filter(PaperColumn::Id.ne(id));
        }

        // Primary, so a conflict written a moment ago is never missed
        query
            .one(self.write_conn())
            .await?
            .map(paper_from_row)
            .transpose()
    }

    async fn insert_paper(&self, tenant_id: Uuid, paper: Paper) -> Result<Paper> {
        let txn = self.write_conn().begin().await?;
        let epaper = ensure_epaper(&txn, tenant_id).await?;

        paper_active_model(epaper.id, tenant_id, &paper)?
            .insert(&txn)
            .await
            .map_err(|e| schedule_conflict(e, paper.schedule_date))?;

        txn.commit().await?;
        Ok(paper)
    }

    async fn update_paper(
        &self,
        tenant_id: Uuid,
        paper_id: Uuid,
        metadata: &PaperMetadata,
        rendering: Option<PaperRendering>,
    ) -> Result<PaperRevision> {
        let txn = self.write_conn().begin().await?;
        let previous = lock_paper(&txn, tenant_id, paper_id).await?;

        let mut current = previous.clone();
        current.apply_metadata(metadata);
        let mut row = PaperActiveModel {
            id: Set(current.id),
            title: Set(current.title.clone()),
            schedule_date: Set(current.schedule_date),
            schedule_time: Set(current.schedule_time.clone()),
            is_published: Set(current.is_published),
            ..Default::default()
        };
        if let Some(rendering) = rendering {
            current.apply_rendering(rendering);
            row.source_document_ref = Set(current.source_document_ref.clone());
            row.source_document_size = Set(current.source_document_size.map(|s| s as i64));
            row.page_count = Set(current.page_count as i32);
            row.pages = Set(serde_json::to_value(&current.pages)?);
            row.render_status = Set(current.render_status.into());
        }
        row.updated_at = Set(current.updated_at.into());

        row.update(&txn)
            .await
            .map_err(|e| schedule_conflict(e, current.schedule_date))?;

        txn.commit().await?;
        Ok(PaperRevision { previous, current })
    }

    async fn replace_page_image(
        &self,
        tenant_id: Uuid,
        paper_id: Uuid,
        page_number: u32,
        image_ref: String,
    ) -> Result<PaperRevision> {
        let txn = self.write_conn().begin().await?;
        let previous = lock_paper(&txn, tenant_id, paper_id).await?;

        let mut current = previous.clone();
        current.replace_page_image(page_number, image_ref)?;

        PaperActiveModel {
            id: Set(current.id),
            pages: Set(serde_json::to_value(&current.pages)?),
            updated_at: Set(current.updated_at.into()),
            ..Default::default()
        }
        .update(&txn)
        .await?;

        txn.commit().await?;
        Ok(PaperRevision { previous, current })
    }

    async fn delete_paper(&self, tenant_id: Uuid, paper_id: Uuid) -> Result<bool> {
        if self.find_epaper(tenant_id).await?.is_none() {
            return Err(AppError::EpaperNotFound {
                tenant_id: tenant_id.to_string(),
            });
        }

        let result = PaperEntity::delete_many()
            .filter(PaperColumn::Id.eq(paper_id))
            .filter(PaperColumn::TenantId.eq(tenant_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }

    async fn find_any_by_schedule_date(&self, date: NaiveDate) -> Result<Option<Paper>> {
        PaperEntity::find()
            .filter(PaperColumn::ScheduleDate.eq(date))
            .order_by_asc(PaperColumn::CreatedAt)
            .one(self.read_conn())
            .await?
            .map(paper_from_row)
            .transpose()
    }
}

// ============================================================================
// Clipping Operations
// ============================================================================

#[async_trait]
impl ClippingStore for Repository {
    async fn insert_clipping(&self, clipping: Clipping) -> Result<Clipping> {
        ClippingActiveModel {
            clip_id: Set(clipping.clip_id),
            owner_tenant_id: Set(clipping.owner_tenant_id),
            paper_id: Set(clipping.paper_id),
            page_number: Set(clipping.page_number as i32),
            region_x: Set(clipping.region.x),
            region_y: Set(clipping.region.y),
            region_width: Set(clipping.region.width),
            region_height: Set(clipping.region.height),
            image_ref: Set(clipping.image_ref.clone()),
            created_at: Set(clipping.created_at.into()),
        }
        .insert(self.write_conn())
        .await?;

        Ok(clipping)
    }

    async fn get_clipping(&self, clip_id: i64) -> Result<Option<Clipping>> {
        Ok(ClippingEntity::find_by_id(clip_id)
            .one(self.read_conn())
            .await?
            .map(clipping_from_row))
    }

    async fn list_clippings_for_owner(&self, owner_tenant_id: Uuid) -> Result<Vec<Clipping>> {
        Ok(ClippingEntity::find()
            .filter(ClippingColumn::OwnerTenantId.eq(owner_tenant_id))
            .order_by_desc(ClippingColumn::CreatedAt)
            .order_by_desc(ClippingColumn::ClipId)
            .all(self.read_conn())
            .await?
            .into_iter()
            .map(clipping_from_row)
            .collect())
    }

    async fn delete_owned_clipping(&self, clip_id: i64, owner_tenant_id: Uuid) -> Result<bool> {
        let result = ClippingEntity::delete_many()
            .filter(ClippingColumn::ClipId.eq(clip_id))
            .filter(ClippingColumn::OwnerTenantId.eq(owner_tenant_id))
            .exec(self.write_conn())
            .await?;

        Ok(result.rows_affected > 0)
    }
}

// ============================================================================
// Sequence Operations
// ============================================================================

#[async_trait]
impl SequenceAllocator for Repository {
    async fn next(&self, namespace: &str) -> Result<i64> {
        let stmt = Statement::from_sql_and_values(
            DbBackend::Postgres,
            NEXT_VALUE_SQL,
            vec![namespace.into()],
        );

        let row = self
            .write_conn()
            .query_one(stmt)
            .await
            .map_err(|e| allocator_error(namespace, e))?
            .ok_or_else(|| allocator_error(namespace, "counter upsert returned no row"))?;

        row.try_get::<i64>("", "value")
            .map_err(|e| allocator_error(namespace, e))
    }

    async fn last_issued(&self, namespace: &str) -> Result<i64> {
        Ok(SequenceCounterEntity::find_by_id(namespace.to_string())
            .one(self.write_conn())
            .await
            .map_err(|e| allocator_error(namespace, e))?
            .map(|row| row.value)
            .unwrap_or(0))
    }

    async fn reseed(&self, namespace: &str, value: i64) -> Result<()> {
        let txn = self.write_conn().begin().await?;

        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "INSERT INTO sequence_counters (name, value) VALUES ($1, 0) ON CONFLICT (name) DO NOTHING",
            vec![namespace.into()],
        ))
        .await?;

        let current = SequenceCounterEntity::find_by_id(namespace.to_string())
            .lock_exclusive()
            .one(&txn)
            .await?
            .map(|row| row.value)
            .unwrap_or(0);
        check_reseed(namespace, current, value)?;

        txn.execute(Statement::from_sql_and_values(
            DbBackend::Postgres,
            "UPDATE sequence_counters SET value = $2 WHERE name = $1",
            vec![namespace.into(), value.into()],
        ))
        .await?;

        txn.commit().await?;
        tracing::warn!(namespace, value, "Sequence reseeded");
        Ok(())
    }
}
