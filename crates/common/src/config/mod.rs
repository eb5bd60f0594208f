//! Configuration management for Pressroom services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Database URL that selects the in-memory stores instead of Postgres
pub const MEMORY_DATABASE_URL: &str = "memory";

/// Lowest rendering resolution accepted for page rasters
pub const MIN_RASTER_DPI: u32 = 300;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Blob storage for source documents, page images and clippings
    pub storage: StorageConfig,

    /// Rasterization engine configuration
    pub rasterizer: RasterizerConfig,

    /// Tenant identity headers
    #[serde(default)]
    pub auth: AuthConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Maximum concurrent requests
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes), or `memory`
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create missing tables and indexes on startup
    #[serde(default = "default_ensure_schema")]
    pub ensure_schema: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory for the filesystem blob store
    #[serde(default = "default_storage_root")]
    pub root_dir: PathBuf,

    /// URL prefix under which stored blobs are served
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RasterizerConfig {
    /// Engine: poppler, mock
    #[serde(default = "default_raster_engine")]
    pub engine: String,

    /// Path to the pdftoppm binary
    #[serde(default = "default_pdftoppm_path")]
    pub pdftoppm_path: String,

    /// Render resolution (clamped to at least 300)
    #[serde(default = "default_dpi")]
    pub dpi: u32,

    /// Timeout for a single rasterization call in seconds
    #[serde(default = "default_raster_timeout")]
    pub timeout_secs: u64,

    /// Maximum renders running at once
    #[serde(default = "default_max_concurrent_renders")]
    pub max_concurrent_renders: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Header carrying the resolved tenant UUID
    #[serde(default = "default_tenant_header")]
    pub tenant_header: String,

    /// Header carrying the `Bearer pk_...` credential
    #[serde(default = "default_api_key_header")]
    pub api_key_header: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            tenant_header: default_tenant_header(),
            api_key_header: default_api_key_header(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second (global)
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_request_timeout() -> u64 { 300 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_max_concurrent() -> usize { 100 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_ensure_schema() -> bool { true }
fn default_storage_root() -> PathBuf { PathBuf::from("data/blobs") }
fn default_public_base_url() -> String { "/files".to_string() }
fn default_max_upload_bytes() -> usize { 200 * 1024 * 1024 }
fn default_raster_engine() -> String { "poppler".to_string() }
fn default_pdftoppm_path() -> String { "pdftoppm".to_string() }
fn default_dpi() -> u32 { MIN_RASTER_DPI }
fn default_raster_timeout() -> u64 { 90 }
fn default_max_concurrent_renders() -> usize { 2 }
fn default_tenant_header() -> String { "X-Tenant-ID".to_string() }
fn default_api_key_header() -> String { "Authorization".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "pressroom".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("database.url", MEMORY_DATABASE_URL)?
            .set_default("storage.root_dir", "data/blobs")?
            .set_default("rasterizer.engine", default_raster_engine())?
            .set_default("observability.log_level", default_log_level())?
            .set_default("rate_limit.enabled", default_enabled())?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__SERVER__PORT=8081
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get request timeout as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.server.request_timeout_secs)
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Timeout applied to each rasterization call
    pub fn rasterize_timeout(&self) -> Duration {
        Duration::from_secs(self.rasterizer.timeout_secs)
    }

    /// Database URL for reads (replica if configured, otherwise primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url()
    }

    /// Whether the in-memory stores should back this process
    pub fn uses_memory_store(&self) -> bool {
        self.database.url == MEMORY_DATABASE_URL
    }
}

impl DatabaseConfig {
    /// Replica URL, falling back to the primary
    pub fn read_url(&self) -> &str {
        self.read_url.as_deref().unwrap_or(&self.url)
    }

    /// Whether reads go to a separate replica
    pub fn has_replica(&self) -> bool {
        self.read_url() != self.url
    }
}

impl RasterizerConfig {
    /// Configured DPI, never below the fidelity floor
    pub fn effective_dpi(&self) -> u32 {
        self.dpi.max(MIN_RASTER_DPI)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: default_host(),
                port: default_port(),
                request_timeout_secs: default_request_timeout(),
                shutdown_timeout_secs: default_shutdown_timeout(),
                max_concurrent_requests: default_max_concurrent(),
            },
            database: DatabaseConfig {
                url: MEMORY_DATABASE_URL.to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                ensure_schema: default_ensure_schema(),
            },
            storage: StorageConfig {
                root_dir: default_storage_root(),
                public_base_url: default_public_base_url(),
                max_upload_bytes: default_max_upload_bytes(),
            },
            rasterizer: RasterizerConfig {
                engine: default_raster_engine(),
                pdftoppm_path: default_pdftoppm_path(),
                dpi: default_dpi(),
                timeout_secs: default_raster_timeout(),
                max_concurrent_renders: default_max_concurrent_renders(),
            },
            auth: AuthConfig::default(),
            observability: ObservabilityConfig {
                log_level: default_log_level(),
                json_logging: default_json_logging(),
                metrics_port: default_metrics_port(),
                service_name: default_service_name(),
            },
            rate_limit: RateLimitConfig {
                requests_per_second: default_rate_limit(),
                burst: default_burst(),
                enabled: default_enabled(),
            },
        }
    }
}
