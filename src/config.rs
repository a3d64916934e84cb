//! TOML configuration parsing and validation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub folders: FolderConfig,
    #[serde(default)]
    pub ocr: OcrConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
    /// Optional byte limit emulating browser storage quotas.
    #[serde(default)]
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Below this many non-whitespace characters a PDF is treated as scanned.
    #[serde(default = "default_min_pdf_text_chars")]
    pub min_pdf_text_chars: usize,
    /// Upper bound on pages sent through OCR for one scanned PDF.
    #[serde(default = "default_max_ocr_pages")]
    pub max_ocr_pages: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            min_pdf_text_chars: default_min_pdf_text_chars(),
            max_ocr_pages: default_max_ocr_pages(),
        }
    }
}

fn default_min_pdf_text_chars() -> usize {
    50
}
fn default_max_ocr_pages() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct FolderConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for FolderConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct OcrConfig {
    /// `disabled`, `llm` (vision model of the configured LLM), or `tesseract`.
    #[serde(default = "default_disabled")]
    pub provider: String,
    /// `embedded` (lopdf page images) or `pdftoppm` (poppler).
    #[serde(default = "default_rasterizer")]
    pub rasterizer: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_raster_dpi")]
    pub dpi: u32,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            rasterizer: default_rasterizer(),
            language: default_language(),
            dpi: default_raster_dpi(),
        }
    }
}

fn default_rasterizer() -> String {
    "embedded".to_string()
}
fn default_language() -> String {
    "eng".to_string()
}
fn default_raster_dpi() -> u32 {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    /// `disabled`, `hosted` (Gemini API), or `local` (OpenAI-compatible server).
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            max_output_tokens: default_max_output_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_output_tokens() -> u32 {
    4000
}
fn default_timeout_secs() -> u64 {
    60
}

impl Config {
    /// Defaults for commands that can run without a config file.
    pub fn minimal() -> Self {
        Self {
            store: StoreConfig {
                path: PathBuf::from("./data/dh-store.json"),
                max_bytes: None,
            },
            extraction: ExtractionConfig::default(),
            folders: FolderConfig::default(),
            ocr: OcrConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.store.max_bytes == Some(0) {
        anyhow::bail!("store.max_bytes must be > 0 when set");
    }

    if config.extraction.max_ocr_pages == 0 {
        anyhow::bail!("extraction.max_ocr_pages must be >= 1");
    }

    match config.llm.provider.as_str() {
        "disabled" | "hosted" | "local" => {}
        other => anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, hosted, or local.",
            other
        ),
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    match config.ocr.provider.as_str() {
        "disabled" | "tesseract" => {}
        "llm" => {
            if !config.llm.is_enabled() {
                anyhow::bail!("ocr.provider = 'llm' requires an enabled [llm] provider");
            }
        }
        other => anyhow::bail!(
            "Unknown ocr provider: '{}'. Must be disabled, llm, or tesseract.",
            other
        ),
    }

    match config.ocr.rasterizer.as_str() {
        "embedded" | "pdftoppm" => {}
        other => anyhow::bail!(
            "Unknown ocr rasterizer: '{}'. Must be embedded or pdftoppm.",
            other
        ),
    }

    Ok(())
}
