//! # Doc Harness Core
//!
//! Shared, runtime-free logic for Doc Harness: the source data model, cache
//! key naming, the blob-store abstraction, and prompt-context assembly.
//!
//! This crate contains no tokio, HTTP, filesystem I/O, or format parsers.
//! Anything that extracts or persists lives in the `doc-harness` crate.

pub mod context;
pub mod keys;
pub mod models;
pub mod store;
