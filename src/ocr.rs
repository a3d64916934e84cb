//! OCR backends and PDF page rasterizers.
//!
//! OCR takes one image at a time and returns its text. Scanned PDFs are
//! first turned into per-page images by a [`PageRasterizer`]; a page that
//! cannot be rasterized carries its error instead of an image so the
//! dispatcher can report it without abandoning the document.
//!
//! Backends:
//! - [`TesseractOcr`]: the `tesseract` binary (tesseract-ocr).
//! - LLM vision: the hosted and local chat clients in [`crate::llm`].
//!
//! Rasterizers:
//! - [`EmbeddedImageRasterizer`]: the largest JPEG/JPEG 2000 image embedded
//!   on each page (typical for scanner output), via lopdf.
//! - [`PdftoppmRasterizer`]: renders pages with poppler's `pdftoppm`.

use std::path::Path;
use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{Config, OcrConfig};
use crate::llm::LlmError;

#[derive(Debug, Error)]
pub enum OcrError {
    #[error("OCR is not configured")]
    NotConfigured,

    /// A required external tool is missing.
    #[error("{0}")]
    Unavailable(String),

    #[error("{0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

impl OcrError {
    /// Whether retrying later could succeed without the input changing.
    ///
    /// Results built from transient failures are not cached.
    pub fn is_transient(&self) -> bool {
        !matches!(self, OcrError::Backend(_))
    }
}

/// An encoded image and its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImageData {
    pub fn new(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            bytes,
        }
    }
}

#[async_trait]
pub trait OcrBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(&self, image: &ImageData) -> Result<String, OcrError>;
}

/// One rasterized page, numbered from 1.
#[derive(Debug)]
pub struct RasterPage {
    pub number: u32,
    pub image: Result<ImageData, OcrError>,
}

#[derive(Debug)]
pub struct RasterizedPdf {
    pub total_pages: usize,
    /// At most `max_pages` entries, in page order.
    pub pages: Vec<RasterPage>,
}

#[async_trait]
pub trait PageRasterizer: Send + Sync {
    fn name(&self) -> &str;

    async fn rasterize(&self, pdf: Vec<u8>, max_pages: usize) -> Result<RasterizedPdf, OcrError>;
}

/// Builds the configured OCR backend, if any.
pub fn create_ocr_backend(config: &Config) -> anyhow::Result<Option<Arc<dyn OcrBackend>>> {
    match config.ocr.provider.as_str() {
        "disabled" => Ok(None),
        "tesseract" => Ok(Some(Arc::new(TesseractOcr::new(&config.ocr.language)))),
        "llm" => Ok(Some(crate::llm::create_ocr_client(&config.llm)?)),
        other => bail!("Unknown ocr provider: '{}'", other),
    }
}

pub fn create_rasterizer(config: &OcrConfig) -> Arc<dyn PageRasterizer> {
    match config.rasterizer.as_str() {
        "pdftoppm" => Arc::new(PdftoppmRasterizer::new(config.dpi)),
        _ => Arc::new(EmbeddedImageRasterizer),
    }
}

fn check_output(
    result: std::io::Result<std::process::Output>,
    tool: &str,
    package: &str,
) -> Result<Vec<u8>, OcrError> {
    match result {
        Ok(output) if output.status.success() => Ok(output.stdout),
        Ok(output) => Err(OcrError::Backend(format!(
            "{} failed: {}",
            tool,
            String::from_utf8_lossy(&output.stderr).trim()
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(OcrError::Unavailable(format!(
            "{} not found (install {})",
            tool, package
        ))),
        Err(e) => Err(OcrError::Io(e)),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Tesseract
// ═══════════════════════════════════════════════════════════════════════

pub struct TesseractOcr {
    language: String,
}

impl TesseractOcr {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
        }
    }
}

#[async_trait]
impl OcrBackend for TesseractOcr {
    fn name(&self) -> &str {
        "tesseract"
    }

    async fn recognize(&self, image: &ImageData) -> Result<String, OcrError> {
        let extension = mime_guess::get_mime_extensions_str(&image.mime_type)
            .and_then(|exts| exts.first().copied())
            .unwrap_or("png");
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join(format!("image.{}", extension));
        tokio::fs::write(&path, &image.bytes).await?;

        let output = Command::new("tesseract")
            .arg(&path)
            .arg("stdout")
            .args(["-l", &self.language])
            .output()
            .await;
        let stdout = check_output(output, "tesseract", "tesseract-ocr")?;
        let text = String::from_utf8_lossy(&stdout).trim().to_string();
        debug!(chars = text.len(), "tesseract finished");
        Ok(text)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Rasterizers
// ═══════════════════════════════════════════════════════════════════════

fn load_pdf(bytes: &[u8]) -> Result<lopdf::Document, OcrError> {
    lopdf::Document::load_mem(bytes).map_err(|e| OcrError::Backend(format!("unreadable PDF: {}", e)))
}

async fn blocking<T, F>(f: F) -> Result<T, OcrError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, OcrError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| OcrError::Backend(format!("rasterizer task failed: {}", e)))?
}

#[derive(Debug, Default, Clone, Copy)]
pub struct EmbeddedImageRasterizer;

#[async_trait]
impl PageRasterizer for EmbeddedImageRasterizer {
    fn name(&self) -> &str {
        "embedded"
    }

    async fn rasterize(&self, pdf: Vec<u8>, max_pages: usize) -> Result<RasterizedPdf, OcrError> {
        blocking(move || {
            let doc = load_pdf(&pdf)?;
            let pages = doc.get_pages();
            let total_pages = pages.len();
            let pages = pages
                .into_iter()
                .take(max_pages)
                .map(|(number, id)| RasterPage {
                    number,
                    image: page_image(&doc, number, id),
                })
                .collect();
            Ok(RasterizedPdf { total_pages, pages })
        })
        .await
    }
}

/// Largest directly decodable image on a page.
fn page_image(doc: &lopdf::Document, number: u32, id: lopdf::ObjectId) -> Result<ImageData, OcrError> {
    let images = doc
        .get_page_images(id)
        .map_err(|e| OcrError::Backend(format!("could not read images on page {}: {}", number, e)))?;
    images
        .iter()
        .filter_map(|image| {
            let filters = image.filters.as_ref()?;
            let mime = if filters.iter().any(|f| f == "DCTDecode") {
                "image/jpeg"
            } else if filters.iter().any(|f| f == "JPXDecode") {
                "image/jp2"
            } else {
                return None;
            };
            Some((image.width * image.height, mime, image.content))
        })
        .max_by_key(|(area, _, _)| *area)
        .map(|(_, mime, content)| ImageData::new(mime, content.to_vec()))
        .ok_or_else(|| OcrError::Backend(format!("no embedded scan image on page {}", number)))
}

pub struct PdftoppmRasterizer {
    dpi: u32,
}

impl PdftoppmRasterizer {
    pub fn new(dpi: u32) -> Self {
        Self { dpi }
    }
}

/// pdftoppm zero-pads page numbers to the width of the last page.
fn find_page_image(dir: &Path, page: u32) -> Option<std::path::PathBuf> {
    (1..=4)
        .map(|width| dir.join(format!("page-{:0width$}.png", page, width = width)))
        .find(|path| path.exists())
}

#[async_trait]
impl PageRasterizer for PdftoppmRasterizer {
    fn name(&self) -> &str {
        "pdftoppm"
    }

    async fn rasterize(&self, pdf: Vec<u8>, max_pages: usize) -> Result<RasterizedPdf, OcrError> {
        let dir = tempfile::TempDir::new()?;
        let pdf_path = dir.path().join("input.pdf");
        tokio::fs::write(&pdf_path, &pdf).await?;
        let total_pages = blocking(move || Ok(load_pdf(&pdf)?.get_pages().len())).await?;
        let last = total_pages.min(max_pages);
        if last == 0 {
            return Ok(RasterizedPdf {
                total_pages,
                pages: Vec::new(),
            });
        }

        let output = Command::new("pdftoppm")
            .args(["-png", "-r", &self.dpi.to_string()])
            .args(["-f", "1", "-l", &last.to_string()])
            .arg(&pdf_path)
            .arg(dir.path().join("page"))
            .output()
            .await;
        check_output(output, "pdftoppm", "poppler-utils")?;

        let mut pages = Vec::with_capacity(last);
        for number in 1..=last as u32 {
            let image = match find_page_image(dir.path(), number) {
                Some(path) => tokio::fs::read(&path)
                    .await
                    .map(|bytes| ImageData::new("image/png", bytes))
                    .map_err(OcrError::from),
                None => {
                    warn!(page = number, "pdftoppm produced no image");
                    Err(OcrError::Backend(format!("no image rendered for page {}", number)))
                }
            };
            pages.push(RasterPage { number, image });
        }
        Ok(RasterizedPdf { total_pages, pages })
    }
}
