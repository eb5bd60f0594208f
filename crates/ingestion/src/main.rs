//! Pressroom Ingestion operator CLI
//!
//! Usage:
//!   ingestion rerender <tenant-id> <paper-id>   re-run rasterization from the retained PDF
//!   ingestion inspect <file.pdf>                 count pages and check the rasterizer

use std::sync::Arc;

use anyhow::{bail, Context};
use pressroom_common::{
    config::AppConfig, db::DbPool, storage::LocalBlobStore, Repository, VERSION,
};
use pressroom_ingestion::{create_rasterizer, pdf, IngestionPipeline, PopplerRasterizer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

const USAGE: &str = "usage: ingestion rerender <tenant-id> <paper-id> | ingestion inspect <file.pdf>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load().context("Failed to load configuration")?;
    init_tracing(&config);

    info!("Pressroom ingestion v{}", VERSION);

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["rerender", tenant, paper] => {
            let tenant_id = Uuid::parse_str(tenant).context("invalid tenant id")?;
            let paper_id = Uuid::parse_str(paper).context("invalid paper id")?;
            rerender(&config, tenant_id, paper_id).await
        }
        ["inspect", path] => inspect(&config, path).await,
        _ => bail!(USAGE),
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn rerender(config: &AppConfig, tenant_id: Uuid, paper_id: Uuid) -> anyhow::Result<()> {
    if config.uses_memory_store() {
        bail!("rerender needs a persistent database; database.url is `memory`");
    }

    info!("Connecting to database...");
    let pool = DbPool::new(&config.database).await?;
    if config.database.ensure_schema {
        pool.ensure_schema().await?;
    }
    let repository = Arc::new(Repository::new(pool));
    let blobs = Arc::new(LocalBlobStore::new(
        config.storage.root_dir.clone(),
        config.storage.public_base_url.clone(),
    ));

    let pipeline = IngestionPipeline::new(
        repository,
        create_rasterizer(&config.rasterizer),
        blobs,
        config.rasterize_timeout(),
    );

    let report = pipeline.rerender_paper(tenant_id, paper_id).await?;
    for warning in &report.warnings {
        warn!(stage = warning.stage.as_str(), message = %warning.message, "Rasterization degraded");
    }
    info!(
        paper_id = %report.paper.id,
        pages = report.paper.pages.len(),
        status = report.paper.render_status.as_str(),
        "Re-render finished"
    );
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn inspect(config: &AppConfig, path: &str) -> anyhow::Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path))?;
    if !pdf::looks_like_pdf(&data) {
        bail!("{} is not a PDF", path);
    }

    let pages = pdf::count_pages(&data).await?;
    let poppler = PopplerRasterizer::new(&config.rasterizer);
    let available = poppler.is_available().await;

    info!(path, pages, pdftoppm_available = available, dpi = config.rasterizer.effective_dpi(), "Inspected document");
    println!("pages: {}", pages);
    println!("pdftoppm available: {}", available);
    Ok(())
}
