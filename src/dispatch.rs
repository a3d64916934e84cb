//! Extraction dispatcher: cache-first, format-routed text extraction.
//!
//! [`ExtractionDispatcher::extract`] never fails. Every outcome is text:
//! either the extracted content or a diagnostic that takes its place in
//! the prompt context.
//!
//! # Routing (first match wins)
//!
//! | Media type | Path |
//! |------------|------|
//! | `application/pdf` | page text; OCR fallback when nearly empty |
//! | `image/*` | OCR |
//! | `text/plain` | lossy UTF-8 |
//! | DOCX | [`DocxExtractor`] |
//! | XLSX / XLS | [`SpreadsheetExtractor`] |
//! | anything else | strict UTF-8, else an "unsupported" diagnostic |
//!
//! # Caching
//!
//! Results are written under the composite key and every alias, including
//! deterministic failure diagnostics, so a broken file is not re-parsed on
//! every turn. Results shaped by a transient OCR failure (network, missing
//! key, missing tool) are returned with [`Origin::Transient`] and not
//! cached, so the next turn retries.

use std::sync::Arc;

use doc_harness_core::models::{FileRef, SourceFile};
use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::cache::DocumentCache;
use crate::config::{Config, ExtractionConfig};
use crate::extract::{
    self, DocxExtractor, ExtractError, PageExtractor, PdfExtractor, SpreadsheetExtractor,
    TextExtractor, MIME_DOCX, MIME_PDF, MIME_TEXT,
};
use crate::ocr::{self, ImageData, OcrBackend, OcrError, PageRasterizer};

const PDF_NO_TEXT: &str =
    "No text could be extracted from this PDF. It may be scanned or contain only images.";
const DOCX_NO_TEXT: &str = "No text could be extracted from this Word document. It may be protected, contain only images, or use unsupported formatting.";
const SPREADSHEET_NO_TEXT: &str =
    "No text could be extracted from this Excel file. It may be protected or empty.";
const IMAGE_NO_TEXT: &str = "No text could be extracted from this image.";

/// Where an [`Extraction`]'s text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Served from the cache; no backend was called.
    Cached,
    /// Freshly extracted (or a deterministic diagnostic) and cached.
    Extracted,
    /// Shaped by a transient failure; returned but not cached.
    Transient,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    /// Citation name of the file.
    pub name: String,
    pub text: String,
    pub origin: Origin,
}

/// The backends the dispatcher routes to.
#[derive(Clone)]
pub struct Extractors {
    pub pdf: Arc<dyn PageExtractor>,
    pub docx: Arc<dyn TextExtractor>,
    pub spreadsheet: Arc<dyn TextExtractor>,
    pub ocr: Option<Arc<dyn OcrBackend>>,
    pub rasterizer: Arc<dyn PageRasterizer>,
}

impl Extractors {
    /// Built-in parsers with the given OCR backend and rasterizer.
    pub fn builtin(ocr: Option<Arc<dyn OcrBackend>>, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        Self {
            pdf: Arc::new(PdfExtractor),
            docx: Arc::new(DocxExtractor),
            spreadsheet: Arc::new(SpreadsheetExtractor),
            ocr,
            rasterizer,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::builtin(
            ocr::create_ocr_backend(config)?,
            ocr::create_rasterizer(&config.ocr),
        ))
    }
}

/// Text plus whether it was shaped by a transient failure.
struct Outcome {
    text: String,
    transient: bool,
}

impl Outcome {
    fn done(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            transient: false,
        }
    }
}

pub struct ExtractionDispatcher {
    cache: Arc<DocumentCache>,
    extractors: Extractors,
    config: ExtractionConfig,
}

impl ExtractionDispatcher {
    pub fn new(cache: Arc<DocumentCache>, extractors: Extractors, config: ExtractionConfig) -> Self {
        Self {
            cache,
            extractors,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    /// Cached text for `file`, extracting and caching it on a miss.
    pub async fn extract(&self, file: FileRef<'_>) -> Extraction {
        let name = file.citation_name();
        let key = file.cache_key();
        if let Some(text) = self.cache.get(&key) {
            debug!(key = %key, "extraction cache hit");
            return Extraction {
                name,
                text,
                origin: Origin::Cached,
            };
        }

        info!("Extracting {} ({})", name, file.file.media_type);
        let outcome = self.route(file.file).await;
        if outcome.transient {
            warn!("not caching {}: transient failure", name);
            return Extraction {
                name,
                text: outcome.text,
                origin: Origin::Transient,
            };
        }

        self.cache.put(&key, &file.aliases(), &outcome.text).await;
        Extraction {
            name,
            text: outcome.text,
            origin: Origin::Extracted,
        }
    }

    /// Extracts every file concurrently, preserving input order.
    pub async fn extract_all(&self, files: &[FileRef<'_>]) -> Vec<Extraction> {
        join_all(files.iter().map(|f| self.extract(*f))).await
    }

    /// Drops the cached entry group for `file` and extracts again.
    ///
    /// A concurrent extraction of the same file may finish after this one;
    /// whichever writes last wins.
    pub async fn reprocess(&self, file: FileRef<'_>) -> Extraction {
        self.cache.clear(Some(&file.cache_key())).await;
        self.extract(file).await
    }

    async fn route(&self, file: &SourceFile) -> Outcome {
        let media_type = file.media_type.as_str();
        let bytes = file.bytes.clone();

        if media_type == MIME_PDF {
            self.extract_pdf(bytes).await
        } else if extract::is_image(media_type) {
            self.extract_image(media_type, bytes).await
        } else if media_type == MIME_TEXT {
            Outcome::done(String::from_utf8_lossy(&bytes))
        } else if media_type == MIME_DOCX {
            Outcome::done(match self.extractors.docx.extract(bytes).await {
                Ok(text) if text.trim().is_empty() => DOCX_NO_TEXT.to_string(),
                Ok(text) => text,
                Err(ExtractError::Task(e)) => generic_failure(&e),
                Err(e) => format!(
                    "Error extracting text from Word document: {}. The document may be protected or damaged.",
                    e
                ),
            })
        } else if extract::is_spreadsheet(media_type) {
            Outcome::done(match self.extractors.spreadsheet.extract(bytes).await {
                Ok(text) if text.trim().is_empty() => SPREADSHEET_NO_TEXT.to_string(),
                Ok(text) => text,
                Err(ExtractError::Task(e)) => generic_failure(&e),
                Err(e) => format!(
                    "Error extracting text from Excel: {}. The file may be protected, damaged, or in an unsupported format.",
                    e
                ),
            })
        } else {
            Outcome::done(String::from_utf8(bytes).unwrap_or_else(|_| {
                format!(
                    "Unable to extract content from this file type ({}). Please convert it to PDF, text, or an image for better results.",
                    media_type
                )
            }))
        }
    }

    async fn extract_pdf(&self, bytes: Vec<u8>) -> Outcome {
        let pages = match self.extractors.pdf.pages(bytes.clone()).await {
            Ok(pages) => pages,
            Err(ExtractError::Task(e)) => return Outcome::done(generic_failure(&e)),
            Err(e) => {
                return Outcome::done(format!(
                    "Error extracting text from PDF: {}. The PDF may be encrypted, damaged, or in an unsupported format.",
                    e
                ))
            }
        };

        let chars = extract::visible_chars(&pages);
        let text_layer = if chars == 0 {
            PDF_NO_TEXT.to_string()
        } else {
            extract::format_pages(&pages)
        };
        if chars >= self.config.min_pdf_text_chars {
            return Outcome::done(text_layer);
        }
        match &self.extractors.ocr {
            Some(ocr) => {
                info!("PDF has {} text characters; falling back to OCR", chars);
                self.ocr_pdf(ocr.as_ref(), bytes, text_layer).await
            }
            None => Outcome::done(text_layer),
        }
    }

    async fn ocr_pdf(&self, ocr: &dyn OcrBackend, bytes: Vec<u8>, text_layer: String) -> Outcome {
        let raster = match self
            .extractors
            .rasterizer
            .rasterize(bytes, self.config.max_ocr_pages)
            .await
        {
            Ok(raster) => raster,
            Err(e) => {
                warn!("could not rasterize PDF for OCR: {}", e);
                return Outcome {
                    text: format!("{}\n\nOCR fallback failed: {}", text_layer.trim_end(), e),
                    transient: e.is_transient(),
                };
            }
        };
        if raster.pages.is_empty() {
            return Outcome::done(text_layer);
        }

        let processed = raster.pages.len();
        let mut text = String::new();
        let mut transient = false;
        for page in raster.pages {
            let result = match page.image {
                Ok(image) => ocr.recognize(&image).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(page_text) => {
                    text.push_str(&format!("Page {} (OCR): {}\n\n", page.number, page_text))
                }
                Err(e) => {
                    warn!(page = page.number, "OCR failed: {}", e);
                    transient |= e.is_transient();
                    text.push_str(&format!("Page {}: OCR failed: {}\n\n", page.number, e));
                }
            }
        }
        if raster.total_pages > processed {
            text.push_str(&format!(
                "[Note: OCR processed only the first {} of {} pages.]",
                processed, raster.total_pages
            ));
        }
        Outcome { text, transient }
    }

    async fn extract_image(&self, media_type: &str, bytes: Vec<u8>) -> Outcome {
        let Some(ocr) = &self.extractors.ocr else {
            return Outcome {
                text: format!("Error extracting text from image: {}", OcrError::NotConfigured),
                transient: true,
            };
        };
        match ocr.recognize(&ImageData::new(media_type, bytes)).await {
            Ok(text) if text.trim().is_empty() => Outcome::done(IMAGE_NO_TEXT),
            Ok(text) => Outcome::done(text),
            Err(e) => Outcome {
                text: format!("Error extracting text from image: {}", e),
                transient: e.is_transient(),
            },
        }
    }
}

fn generic_failure(reason: &str) -> String {
    format!("Error extracting content: {}", reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use doc_harness_core::store::memory::InMemoryBlobStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::llm::LlmError;
    use crate::ocr::{RasterPage, RasterizedPdf};

    #[derive(Default)]
    struct FakePdf {
        calls: AtomicUsize,
        pages: Vec<String>,
    }

    #[async_trait]
    impl PageExtractor for FakePdf {
        fn name(&self) -> &str {
            "fake-pdf"
        }
        async fn pages(&self, _bytes: Vec<u8>) -> Result<Vec<String>, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.pages.clone())
        }
    }

    #[derive(Default)]
    struct BrokenText {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TextExtractor for BrokenText {
        fn name(&self) -> &str {
            "broken"
        }
        async fn extract(&self, _bytes: Vec<u8>) -> Result<String, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ExtractError::Ooxml("corrupt archive".into()))
        }
    }

    /// Returns `"scan <first byte>"`; fails permanently on `fail_on`, or
    /// transiently on every call when `offline`.
    #[derive(Default)]
    struct FakeOcr {
        calls: AtomicUsize,
        fail_on: Option<u8>,
        offline: bool,
    }

    #[async_trait]
    impl OcrBackend for FakeOcr {
        fn name(&self) -> &str {
            "fake-ocr"
        }
        async fn recognize(&self, image: &ImageData) -> Result<String, OcrError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline {
                return Err(OcrError::Llm(LlmError::MissingApiKey("GEMINI_API_KEY".into())));
            }
            let n = image.bytes.first().copied().unwrap_or_default();
            if self.fail_on == Some(n) {
                return Err(OcrError::Backend("unreadable scan".into()));
            }
            Ok(format!("scan {}", n))
        }
    }

    struct FakeRasterizer {
        total: usize,
    }

    #[async_trait]
    impl PageRasterizer for FakeRasterizer {
        fn name(&self) -> &str {
            "fake"
        }
        async fn rasterize(&self, _pdf: Vec<u8>, max_pages: usize) -> Result<RasterizedPdf, OcrError> {
            let pages = (1..=self.total.min(max_pages) as u32)
                .map(|number| RasterPage {
                    number,
                    image: Ok(ImageData::new("image/png", vec![number as u8])),
                })
                .collect();
            Ok(RasterizedPdf {
                total_pages: self.total,
                pages,
            })
        }
    }

    struct Harness {
        pdf: Arc<FakePdf>,
        docx: Arc<BrokenText>,
        ocr: Arc<FakeOcr>,
        dispatcher: ExtractionDispatcher,
    }

    async fn harness(pdf_pages: &[&str], ocr: FakeOcr, raster_pages: usize) -> Harness {
        let store = Arc::new(InMemoryBlobStore::new());
        let cache = Arc::new(DocumentCache::open(store).await.unwrap());
        let pdf = Arc::new(FakePdf {
            calls: AtomicUsize::new(0),
            pages: pdf_pages.iter().map(|p| p.to_string()).collect(),
        });
        let docx = Arc::new(BrokenText::default());
        let ocr = Arc::new(ocr);
        let extractors = Extractors {
            pdf: pdf.clone(),
            docx: docx.clone(),
            spreadsheet: Arc::new(SpreadsheetExtractor),
            ocr: Some(ocr.clone()),
            rasterizer: Arc::new(FakeRasterizer { total: raster_pages }),
        };
        let config = ExtractionConfig {
            min_pdf_text_chars: 50,
            max_ocr_pages: 2,
        };
        Harness {
            pdf,
            docx,
            ocr,
            dispatcher: ExtractionDispatcher::new(cache, extractors, config),
        }
    }

    #[tokio::test]
    async fn notes_txt_is_read_verbatim_and_cleared() {
        let h = harness(&[], FakeOcr::default(), 0).await;
        let mut notes = SourceFile::new("notes.txt", MIME_TEXT, b"hello world".to_vec());
        notes.size = 10;

        let result = h.dispatcher.extract(FileRef::top_level(&notes)).await;
        assert_eq!(result.text, "hello world");
        assert_eq!(result.origin, Origin::Extracted);
        assert_eq!(h.pdf.calls.load(Ordering::SeqCst), 0);

        let cache = h.dispatcher.cache();
        assert_eq!(cache.get("notes.txt").as_deref(), Some("hello world"));
        assert_eq!(cache.get("notes.txt_10").as_deref(), Some("hello world"));
        cache.clear(Some("notes.txt")).await;
        assert!(cache.get("notes.txt").is_none());
    }

    #[tokio::test]
    async fn second_extraction_is_a_cache_hit() {
        let text = "A long enough text layer that clearly is not a scanned document at all.";
        let h = harness(&[text], FakeOcr::default(), 0).await;
        let file = SourceFile::new("r.pdf", MIME_PDF, vec![1, 2, 3]);

        let first = h.dispatcher.extract(FileRef::top_level(&file)).await;
        assert_eq!(first.text, format!("Page 1: {}\n\n", text));
        let second = h.dispatcher.extract(FileRef::top_level(&file)).await;
        assert_eq!(second.origin, Origin::Cached);
        assert_eq!(second.text, first.text);
        assert_eq!(h.pdf.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn extractor_failure_is_cached_as_diagnostic() {
        let h = harness(&[], FakeOcr::default(), 0).await;
        let file = SourceFile::new("bad.docx", MIME_DOCX, vec![0; 4]);

        let first = h.dispatcher.extract(FileRef::top_level(&file)).await;
        assert_eq!(first.origin, Origin::Extracted);
        assert!(first
            .text
            .starts_with("Error extracting text from Word document: corrupt archive."));
        let second = h.dispatcher.extract(FileRef::top_level(&file)).await;
        assert_eq!(second.origin, Origin::Cached);
        assert_eq!(h.docx.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_ocr_failure_is_not_cached() {
        let ocr = FakeOcr {
            offline: true,
            ..FakeOcr::default()
        };
        let h = harness(&[], ocr, 0).await;
        let file = SourceFile::new("photo.png", "image/png", vec![9]);

        let first = h.dispatcher.extract(FileRef::top_level(&file)).await;
        assert_eq!(first.origin, Origin::Transient);
        assert!(first.text.starts_with("Error extracting text from image:"));
        assert!(h.dispatcher.cache().is_empty());

        h.dispatcher.extract(FileRef::top_level(&file)).await;
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn folder_child_aliases_resolve_identically() {
        let h = harness(&[], FakeOcr::default(), 0).await;
        let child = SourceFile::new("c.md", "text/markdown", b"# heading".to_vec());
        let result = h.dispatcher.extract(FileRef::in_folder(&child, "Docs")).await;
        assert_eq!(result.name, "Docs/c.md");

        let cache = h.dispatcher.cache();
        assert_eq!(cache.get("Docs/c.md"), cache.get("c.md_9"));
        assert_eq!(cache.get("Docs/c.md").as_deref(), Some("# heading"));
    }

    #[tokio::test]
    async fn scanned_pdf_is_ocrd_up_to_the_page_cap() {
        let ocr = FakeOcr {
            fail_on: Some(2),
            ..FakeOcr::default()
        };
        let h = harness(&["", "  "], ocr, 5).await;
        let file = SourceFile::new("scan.pdf", MIME_PDF, vec![7; 32]);

        let result = h.dispatcher.extract(FileRef::top_level(&file)).await;
        assert_eq!(
            result.text,
            "Page 1 (OCR): scan 1\n\nPage 2: OCR failed: unreadable scan\n\n[Note: OCR processed only the first 2 of 5 pages.]"
        );
        assert_eq!(result.origin, Origin::Extracted);
        assert_eq!(h.ocr.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn undecodable_binary_gets_unsupported_diagnostic() {
        let h = harness(&[], FakeOcr::default(), 0).await;
        let file = SourceFile::new("blob.bin", "application/octet-stream", vec![0xff, 0xfe, 0x00]);
        let result = h.dispatcher.extract(FileRef::top_level(&file)).await;
        assert_eq!(
            result.text,
            "Unable to extract content from this file type (application/octet-stream). Please convert it to PDF, text, or an image for better results."
        );
    }

    #[tokio::test]
    async fn reprocess_runs_the_extractor_again() {
        let h = harness(&[], FakeOcr::default(), 0).await;
        let file = SourceFile::new("bad.docx", MIME_DOCX, vec![1]);
        h.dispatcher.extract(FileRef::top_level(&file)).await;
        let again = h.dispatcher.reprocess(FileRef::top_level(&file)).await;
        assert_eq!(again.origin, Origin::Extracted);
        assert_eq!(h.docx.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn extract_all_preserves_order() {
        let h = harness(&[], FakeOcr::default(), 0).await;
        let a = SourceFile::new("a.txt", MIME_TEXT, b"A".to_vec());
        let b = SourceFile::new("b.txt", MIME_TEXT, b"B".to_vec());
        let results = h
            .dispatcher
            .extract_all(&[FileRef::top_level(&a), FileRef::top_level(&b)])
            .await;
        let texts: Vec<&str> = results.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["A", "B"]);
    }
}
