//! # Doc Harness
//!
//! A local-first document question-answering harness.
//!
//! Doc Harness turns user-supplied files, folders, and pasted text into a
//! citation-ready prompt context for an LLM. Extraction results are cached
//! (encrypted at rest) so each file is parsed once, and scanned PDFs and
//! images fall back to OCR.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────┐
//! │ Sources  │──▶│  Dispatcher  │──▶│ Document Cache │──▶ Blob Store
//! │ (paths)  │   │ PDF/DOCX/XLSX│   │ (enc:<base64>) │    (JSON file)
//! └──────────┘   │ OCR fallback │   └───────┬────────┘
//!                └──────────────┘           │
//!                                           ▼
//!                ┌──────────┐        ┌─────────────┐
//!                │   LLM    │◀───────│   Context   │
//!                │ client   │        │  assembly   │
//!                └──────────┘        └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! dh extract ./papers ./budget.xlsx          # extract and cache
//! dh context ./papers --text memo="Q3 plan"  # print the prompt context
//! dh ask "Which paper covers OCR?" ./papers  # full chat turn
//! dh clear                                   # drop every cached entry
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`store_fs`] | File-backed blob store |
//! | [`codec`] | Encryption of cached values |
//! | [`cache`] | Document cache |
//! | [`extract`] | PDF, DOCX, and spreadsheet parsers |
//! | [`ocr`] | OCR backends and PDF rasterizers |
//! | [`dispatch`] | Cache-first extraction routing |
//! | [`llm`] | Hosted and local chat clients |
//! | [`notebook`] | Source list and chat turn |
//! | [`sources`] | Sources from filesystem paths |
//! | [`commands`] | `dh` subcommands |
//!
//! Data model, key naming, the blob-store trait, and context assembly live
//! in the `doc-harness-core` crate.

pub mod cache;
pub mod codec;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod extract;
pub mod llm;
pub mod notebook;
pub mod ocr;
pub mod sources;
pub mod store_fs;
