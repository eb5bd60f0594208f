//! PDF inspection
//!
//! Page counting with lopdf. Parsing is CPU-bound, so async callers go
//! through [`count_pages`], which moves the work to the blocking pool.

use crate::errors::IngestionError;
use tracing::debug;

/// Every PDF starts with this marker (after optional leading whitespace)
const PDF_MAGIC: &[u8] = b"%PDF-";

/// Cheap sniff used to reject uploads that are not PDFs at all
pub fn looks_like_pdf(data: &[u8]) -> bool {
    let start = data
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(data.len());
    data[start..].starts_with(PDF_MAGIC)
}

/// Count pages in an in-memory PDF
pub fn page_count_blocking(data: &[u8]) -> Result<u32, IngestionError> {
    let doc = lopdf::Document::load_mem(data).map_err(|e| IngestionError::PdfParse {
        message: format!("Failed to load PDF: {}", e),
    })?;

    let pages = doc.get_pages().len();
    debug!(page_count = pages, "Counted PDF pages");

    u32::try_from(pages).map_err(|_| IngestionError::PdfParse {
        message: format!("page count {} out of range", pages),
    })
}

/// Count pages on the blocking pool
pub async fn count_pages(data: &[u8]) -> Result<u32, IngestionError> {
    let owned = data.to_vec();
    tokio::task::spawn_blocking(move || page_count_blocking(&owned))
        .await
        .map_err(|e| IngestionError::Task(format!("Page count task panicked: {}", e)))?
}

#[cfg(test)]
pub(crate) mod fixtures {
    use lopdf::{dictionary, Document, Object};

    /// Minimal valid PDF with `pages` blank A4 pages
    pub fn sample_pdf(pages: usize) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        let kids: Vec<Object> = (0..pages)
            .map(|_| {
                doc.add_object(dictionary! {
                    "Type" => "Page",
                    "Parent" => pages_id,
                    "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
                })
                .into()
            })
            .collect();

        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => pages as i64,
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);

        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }
}
