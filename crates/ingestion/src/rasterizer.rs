//! Rasterization adapter
//!
//! Turns a PDF into a page count and one raster image per page. Engines:
//! - `poppler`: runs `pdftoppm` as a child process
//! - `mock`: deterministic fake for tests and local development
//!
//! Engine output order is not trusted. Every page carries the index the
//! engine embedded in its file name and [`order_pages`] sorts on that.

use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use pressroom_common::config::RasterizerConfig;
use regex_lite::Regex;
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::errors::IngestionError;
use crate::pdf;

/// One rendered page as produced by an engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterPage {
    /// 1-based page index embedded by the engine
    pub index: u32,
    pub file_name: String,
    pub data: Vec<u8>,
    pub content_type: String,
}

/// Fixed output quality of an engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RasterProfile {
    pub dpi: u32,
    pub anti_aliased: bool,
    pub extension: &'static str,
}

#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Engine name for logs and metrics
    fn name(&self) -> &'static str;

    fn profile(&self) -> RasterProfile;

    async fn page_count(&self, pdf: &[u8]) -> Result<u32, IngestionError>;

    /// Render every page. Pages come back sorted by embedded index.
    async fn rasterize(&self, pdf: &[u8]) -> Result<Vec<RasterPage>, IngestionError>;
}

fn page_index_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-(\d+)\.[A-Za-z]+$").expect("page index pattern is valid"))
}

/// Page index embedded in an engine file name such as `page-07.png`
pub fn parse_page_index(file_name: &str) -> Option<u32> {
    page_index_pattern()
        .captures(file_name)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// Sort pages by their embedded index, dropping duplicate indices
pub fn order_pages(mut pages: Vec<RasterPage>) -> Vec<RasterPage> {
    pages.sort_by_key(|p| p.index);
    pages.dedup_by_key(|p| p.index);
    pages
}

// ============================================================================
// Poppler
// ============================================================================

/// `pdftoppm` driven rasterizer
pub struct PopplerRasterizer {
    binary: String,
    dpi: u32,
    permits: Arc<Semaphore>,
}

impl PopplerRasterizer {
    pub fn new(config: &RasterizerConfig) -> Self {
        Self {
            binary: config.pdftoppm_path.clone(),
            dpi: config.effective_dpi(),
            permits: Arc::new(Semaphore::new(config.max_concurrent_renders.max(1))),
        }
    }

    /// Check if pdftoppm is installed
    pub async fn is_available(&self) -> bool {
        let result = Command::new(&self.binary)
            .arg("-v")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        matches!(result, Ok(status) if status.success())
    }

    async fn collect_pages(dir: &std::path::Path) -> Result<Vec<RasterPage>, IngestionError> {
        let mut pages = Vec::new();
        let mut entries = tokio::fs::read_dir(dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.starts_with("page-") {
                continue;
            }
            let Some(index) = parse_page_index(&file_name) else {
                warn!(file = %file_name, "Skipping raster without page index");
                continue;
            };

            pages.push(RasterPage {
                index,
                data: tokio::fs::read(entry.path()).await?,
                file_name,
                content_type: "image/png".to_string(),
            });
        }

        Ok(pages)
    }
}

#[async_trait]
impl Rasterizer for PopplerRasterizer {
    fn name(&self) -> &'static str {
        "poppler"
    }

    fn profile(&self) -> RasterProfile {
        RasterProfile {
            dpi: self.dpi,
            anti_aliased: true,
            extension: "png",
        }
    }

    async fn page_count(&self, pdf: &[u8]) -> Result<u32, IngestionError> {
        pdf::count_pages(pdf).await
    }

    async fn rasterize(&self, pdf: &[u8]) -> Result<Vec<RasterPage>, IngestionError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| IngestionError::Task(e.to_string()))?;

        let workdir = tempfile::tempdir()?;
        let input = workdir.path().join("source.pdf");
        tokio::fs::write(&input, pdf).await?;

        debug!(dpi = self.dpi, bytes = pdf.len(), "Running pdftoppm");
        let output = Command::new(&self.binary)
            .arg("-r")
            .arg(self.dpi.to_string())
            .arg("-png")
            .args(["-aa", "yes", "-aaVector", "yes"])
            .arg(&input)
            .arg(workdir.path().join("page"))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                IngestionError::RasterizerUnavailable(format!("Failed to run {}: {}", self.binary, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(IngestionError::Rasterization(format!(
                "pdftoppm exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let pages = order_pages(Self::collect_pages(workdir.path()).await?);
        info!(pages = pages.len(), "Rasterization complete");
        Ok(pages)
    }
}

// ============================================================================
// Mock
// ============================================================================

/// Deterministic rasterizer for tests and local development
pub struct MockRasterizer {
    pages: u32,
    shuffled: bool,
    delay: Option<Duration>,
    fail_page_count: AtomicBool,
    fail_rasterize: AtomicBool,
    rasterize_calls: AtomicUsize,
}

impl MockRasterizer {
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            shuffled: false,
            delay: None,
            fail_page_count: AtomicBool::new(false),
            fail_rasterize: AtomicBool::new(false),
            rasterize_calls: AtomicUsize::new(0),
        }
    }

    /// Emit pages in reverse order, as a misbehaving engine might
    pub fn shuffled(mut self) -> Self {
        self.shuffled = true;
        self
    }

    /// Sleep before rendering, to exercise caller timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_fail_page_count(&self, fail: bool) {
        self.fail_page_count.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_rasterize(&self, fail: bool) {
        self.fail_rasterize.store(fail, Ordering::SeqCst);
    }

    pub fn rasterize_calls(&self) -> usize {
        self.rasterize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Rasterizer for MockRasterizer {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn profile(&self) -> RasterProfile {
        RasterProfile {
            dpi: pressroom_common::config::MIN_RASTER_DPI,
            anti_aliased: true,
            extension: "png",
        }
    }

    async fn page_count(&self, _pdf: &[u8]) -> Result<u32, IngestionError> {
        if self.fail_page_count.load(Ordering::SeqCst) {
            return Err(IngestionError::PdfParse {
                message: "mock page count failure".to_string(),
            });
        }
        Ok(self.pages)
    }

    async fn rasterize(&self, _pdf: &[u8]) -> Result<Vec<RasterPage>, IngestionError> {
        self.rasterize_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_rasterize.load(Ordering::SeqCst) {
            return Err(IngestionError::Rasterization("mock rasterizer failure".to_string()));
        }

        let mut pages: Vec<RasterPage> = (1..=self.pages)
            .map(|index| RasterPage {
                index,
                file_name: format!("page-{:02}.png", index),
                data: format!("mock raster {}", index).into_bytes(),
                content_type: "image/png".to_string(),
            })
            .collect();
        if self.shuffled {
            pages.reverse();
            return Ok(pages);
        }
        Ok(order_pages(pages))
    }
}

/// Create a rasterizer based on configuration
pub fn create_rasterizer(config: &RasterizerConfig) -> Arc<dyn Rasterizer> {
    match config.engine.as_str() {
        "poppler" => Arc::new(PopplerRasterizer::new(config)),
        "mock" => Arc::new(MockRasterizer::new(1)),
        other => {
            warn!(engine = other, "Unknown rasterizer engine, using poppler");
            Arc::new(PopplerRasterizer::new(config))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(index: u32) -> RasterPage {
        RasterPage {
            index,
            file_name: format!("page-{}.png", index),
            data: vec![index as u8],
            content_type: "image/png".into(),
        }
    }

    #[test]
    fn test_parse_page_index() {
        assert_eq!(parse_page_index("page-1.png"), Some(1));
        assert_eq!(parse_page_index("page-007.png"), Some(7));
        assert_eq!(parse_page_index("page-12.jpg"), Some(12));
        assert_eq!(parse_page_index("page.png"), None);
        assert_eq!(parse_page_index("page-x.png"), None);
    }

    #[test]
    fn test_order_pages_sorts_by_embedded_index() {
        let ordered = order_pages(vec![page(10), page(2), page(1), page(2)]);
        let indices: Vec<u32> = ordered.iter().map(|p| p.index).collect();
        assert_eq!(indices, vec![1, 2, 10]);
    }

    #[test]
    fn test_lexical_names_do_not_decide_order() {
        // "page-10" sorts before "page-2" lexically
        let mut names = vec!["page-10.png", "page-2.png", "page-1.png"];
        names.sort();
        let pages: Vec<RasterPage> = names
            .into_iter()
            .map(|n| RasterPage {
                index: parse_page_index(n).unwrap(),
                file_name: n.to_string(),
                data: Vec::new(),
                content_type: "image/png".into(),
            })
            .collect();
        let ordered: Vec<String> = order_pages(pages).into_iter().map(|p| p.file_name).collect();
        assert_eq!(ordered, vec!["page-1.png", "page-2.png", "page-10.png"]);
    }

    #[tokio::test]
    async fn test_mock_switches() {
        let mock = MockRasterizer::new(2).shuffled();
        let pages = mock.rasterize(b"%PDF-").await.unwrap();
        assert_eq!(pages.iter().map(|p| p.index).collect::<Vec<_>>(), vec![2, 1]);

        mock.set_fail_rasterize(true);
        mock.set_fail_page_count(true);
        assert!(mock.rasterize(b"%PDF-").await.is_err());
        assert!(mock.page_count(b"%PDF-").await.is_err());
        assert_eq!(mock.rasterize_calls(), 2);
    }

    #[test]
    fn test_poppler_profile_never_below_floor() {
        let mut config = RasterizerConfig {
            engine: "poppler".into(),
            pdftoppm_path: "pdftoppm".into(),
            dpi: 96,
            timeout_secs: 30,
            max_concurrent_renders: 0,
        };
        assert_eq!(PopplerRasterizer::new(&config).profile().dpi, 300);
        config.dpi = 600;
        assert_eq!(PopplerRasterizer::new(&config).profile().dpi, 600);
    }

    #[tokio::test]
    async fn test_missing_binary_is_unavailable() {
        let config = RasterizerConfig {
            engine: "poppler".into(),
            pdftoppm_path: "/nonexistent/pdftoppm".into(),
            dpi: 300,
            timeout_secs: 30,
            max_concurrent_renders: 1,
        };
        let rasterizer = PopplerRasterizer::new(&config);
        assert!(!rasterizer.is_available().await);
        let err = rasterizer.rasterize(b"%PDF-1.4").await.unwrap_err();
        assert!(matches!(err, IngestionError::RasterizerUnavailable(_)));
    }
}
