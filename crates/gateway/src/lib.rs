//! Pressroom API Gateway
//!
//! HTTP surface over the ingestion pipeline and the clipping workflow.
//! Handles:
//! - Tenant identity (resolved upstream, read from headers)
//! - Rate limiting and concurrency limits
//! - Request routing and multipart uploads
//! - Serving stored blobs under the public base URL
//! - Observability (logging, metrics, request ids)

pub mod handlers;
pub mod middleware;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    BoxError, Extension, Router,
};
use pressroom_common::{
    config::AppConfig,
    db::DbPool,
    errors::{AppError, Result},
    sequence::MemorySequence,
    storage::{BlobStore, LocalBlobStore, MemoryBlobStore},
    store::{MemoryClippingStore, MemoryPaperStore},
    ClippingService, Repository,
};
use pressroom_ingestion::{create_rasterizer, IngestionPipeline, Rasterizer};
use tower::{limit::ConcurrencyLimitLayer, timeout::TimeoutLayer, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::info;

use middleware::rate_limit::RateLimitState;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub papers: Arc<IngestionPipeline>,
    pub clippings: Arc<ClippingService>,
    /// Present when backed by Postgres; readiness pings it
    pub db: Option<DbPool>,
    /// Directory served under `/files` when blobs live on local disk
    pub files_root: Option<PathBuf>,
}

impl AppState {
    /// Wire stores, blobs and the rasterizer as the configuration asks
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        let blobs = Arc::new(LocalBlobStore::new(
            config.storage.root_dir.clone(),
            config.storage.public_base_url.clone(),
        ));
        let files_root = Some(blobs.root().to_path_buf());
        let rasterizer = create_rasterizer(&config.rasterizer);

        if config.uses_memory_store() {
            info!("Using in-memory stores");
            let mut state = Self::in_memory(config, rasterizer, blobs);
            state.files_root = files_root;
            return Ok(state);
        }

        info!("Connecting to database...");
        let db = DbPool::new(&config.database).await?;
        if config.database.ensure_schema {
            db.ensure_schema().await?;
        }
        let repository = Arc::new(Repository::new(db.clone()));

        let papers = IngestionPipeline::new(
            repository.clone(),
            rasterizer,
            blobs.clone(),
            config.rasterize_timeout(),
        );
        let clippings = ClippingService::new(repository.clone(), repository, blobs);

        Ok(Self {
            config: Arc::new(config),
            papers: Arc::new(papers),
            clippings: Arc::new(clippings),
            db: Some(db),
            files_root,
        })
    }

    /// Process-local state; nothing survives a restart
    pub fn in_memory(
        config: AppConfig,
        rasterizer: Arc<dyn Rasterizer>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let papers = IngestionPipeline::new(
            Arc::new(MemoryPaperStore::new()),
            rasterizer,
            blobs.clone(),
            config.rasterize_timeout(),
        );
        let clippings = ClippingService::new(
            Arc::new(MemoryClippingStore::new()),
            Arc::new(MemorySequence::new()),
            blobs,
        );

        Self {
            config: Arc::new(config),
            papers: Arc::new(papers),
            clippings: Arc::new(clippings),
            db: None,
            files_root: None,
        }
    }

    /// In-memory state with blobs held in memory too
    pub fn ephemeral(config: AppConfig, rasterizer: Arc<dyn Rasterizer>) -> Self {
        let blobs = Arc::new(MemoryBlobStore::new(config.storage.public_base_url.clone()));
        Self::in_memory(config, rasterizer, blobs)
    }
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    use handlers::{clippings, health, pages, papers};

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Editions
        .route("/papers", post(papers::create_paper).get(papers::list_papers))
        .route("/papers/check-date", get(papers::check_date))
        .route(
            "/papers/{paper_id}",
            get(papers::get_paper)
                .put(papers::update_paper)
                .delete(papers::delete_paper),
        )
        .route(
            "/papers/{paper_id}/pages/{page_number}",
            put(pages::replace_page),
        )
        // Clippings
        .route(
            "/clippings",
            post(clippings::create_clipping).get(clippings::list_clippings),
        )
        .route(
            "/clippings/{clip_id}",
            get(clippings::get_clipping).delete(clippings::delete_clipping),
        )
        .route_layer(axum::middleware::from_fn(middleware::metrics::track_metrics));

    let api_routes = if state.config.rate_limit.enabled {
        let limiter = RateLimitState::new(
            state.config.rate_limit.requests_per_second,
            state.config.rate_limit.burst,
        );
        api_routes.layer(axum::middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit::rate_limit_middleware,
        ))
    } else {
        api_routes
    };

    // Requests running past the deadline are dropped and answered with 408
    let request_timeout = state.config.request_timeout();
    let api_routes = api_routes.layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(move |err: BoxError| async move {
                timeout_error(err, request_timeout)
            }))
            .layer(TimeoutLayer::new(request_timeout)),
    );

    let mut app = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .nest("/v1", api_routes);

    if let Some(ref root) = state.files_root {
        let mount = public_mount(&state.config.storage.public_base_url);
        app = app.nest_service(&mount, ServeDir::new(root));
    }

    // Compose the app
    app.layer(Extension(state.config.auth.clone()))
        .layer(DefaultBodyLimit::max(state.config.storage.max_upload_bytes))
        .layer(ConcurrencyLimitLayer::new(
            state.config.server.max_concurrent_requests.max(1),
        ))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

fn timeout_error(err: BoxError, timeout: Duration) -> AppError {
    if err.is::<tower::timeout::error::Elapsed>() {
        AppError::RequestTimeout {
            timeout_ms: timeout.as_millis() as u64,
        }
    } else {
        AppError::Internal {
            message: format!("Unhandled middleware error: {}", err),
        }
    }
}

/// Route path for the public base URL, which may be absolute (`https://cdn/..`)
fn public_mount(public_base_url: &str) -> String {
    let path = public_base_url
        .split_once("://")
        .and_then(|(_, rest)| rest.find('/').map(|i| &rest[i..]))
        .unwrap_or(public_base_url);
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() || !trimmed.starts_with('/') {
        "/files".to_string()
    } else {
        trimmed.to_string()
    }
}
