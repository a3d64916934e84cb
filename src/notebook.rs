//! Notebook (the validated source list) and the assistant chat turn.
//!
//! [`Assistant::ask`] is the whole turn: extract whatever is pending,
//! assemble the prompt context in source order, call the LLM, and pick out
//! the documents it cited. An LLM failure is returned unchanged and leaves
//! the cache as the extraction step left it.

use std::collections::HashMap;
use std::sync::Arc;

use doc_harness_core::context::{self, CacheLookup, PromptContext};
use doc_harness_core::keys::is_valid_top_level_name;
use doc_harness_core::models::{ChatMessage, FileRef, Source};
use thiserror::Error;
use tracing::{debug, info};

use crate::cache::DocumentCache;
use crate::dispatch::{Extraction, ExtractionDispatcher, Origin};
use crate::llm::{ChatClient, LlmError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("a source named '{0}' already exists")]
    DuplicateName(String),

    #[error("invalid source name '{0}': names must be non-empty and may not contain '/'")]
    InvalidName(String),

    #[error("no file named '{0}' in the notebook")]
    NotFound(String),
}

/// Ordered set of sources with unique, separator-free display names.
#[derive(Debug, Default, Clone)]
pub struct Notebook {
    sources: Vec<Source>,
}

impl Notebook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, source: Source) -> Result<(), SourceError> {
        let name = source.display_name();
        if !is_valid_top_level_name(name) {
            return Err(SourceError::InvalidName(name.to_string()));
        }
        if self.sources.iter().any(|s| s.display_name() == name) {
            return Err(SourceError::DuplicateName(name.to_string()));
        }
        debug!(kind = source.kind(), name, "source added");
        self.sources.push(source);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<Source> {
        let index = self.sources.iter().position(|s| s.display_name() == name)?;
        Some(self.sources.remove(index))
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Every file, top-level or in a folder, in source order.
    pub fn files(&self) -> Vec<FileRef<'_>> {
        self.sources.iter().flat_map(|s| s.file_refs()).collect()
    }

    /// File whose citation name is `name` (`"report.pdf"`, `"Docs/a.txt"`).
    pub fn find_file(&self, name: &str) -> Option<FileRef<'_>> {
        self.files().into_iter().find(|f| f.citation_name() == name)
    }

    pub fn find_unprocessed<'a>(&'a self, cache: &dyn CacheLookup) -> Vec<FileRef<'a>> {
        context::find_unprocessed(&self.sources, cache)
    }

    pub fn assemble(&self, cache: &dyn CacheLookup) -> PromptContext {
        context::assemble_context(&self.sources, cache)
    }
}

/// Cache view with uncached (transient) results layered on top.
struct Overlay<'a> {
    base: &'a dyn CacheLookup,
    extra: HashMap<String, String>,
}

impl CacheLookup for Overlay<'_> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.extra.get(key).cloned().or_else(|| self.base.lookup(key))
    }
}

/// Extracts the notebook's pending files, then builds the prompt context.
///
/// Results that could not be cached still appear in the context for this
/// turn.
pub async fn prepare_context(
    notebook: &Notebook,
    dispatcher: &ExtractionDispatcher,
) -> (PromptContext, Vec<Extraction>) {
    let cache: &DocumentCache = dispatcher.cache();
    let pending = notebook.find_unprocessed(cache);
    if !pending.is_empty() {
        info!("Extracting {} pending file(s)", pending.len());
    }
    let extractions = dispatcher.extract_all(&pending).await;

    let mut extra = HashMap::new();
    for (file, extraction) in pending.iter().zip(&extractions) {
        if extraction.origin == Origin::Transient {
            extra.insert(file.cache_key(), extraction.text.clone());
            if let Some(qualified) = file.qualified_name() {
                extra.insert(qualified, extraction.text.clone());
            }
        }
    }
    let overlay = Overlay { base: cache, extra };
    (notebook.assemble(&overlay), extractions)
}

/// Result of one chat turn.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    /// Index names cited as `[name]` in `text`, in index order.
    pub citations: Vec<String>,
    pub context: PromptContext,
    /// Extractions performed for this turn (pending files only).
    pub extractions: Vec<Extraction>,
}

pub struct Assistant {
    notebook: Notebook,
    dispatcher: ExtractionDispatcher,
    client: Arc<dyn ChatClient>,
}

impl Assistant {
    pub fn new(notebook: Notebook, dispatcher: ExtractionDispatcher, client: Arc<dyn ChatClient>) -> Self {
        Self {
            notebook,
            dispatcher,
            client,
        }
    }

    pub fn notebook(&self) -> &Notebook {
        &self.notebook
    }

    pub fn notebook_mut(&mut self) -> &mut Notebook {
        &mut self.notebook
    }

    pub fn dispatcher(&self) -> &ExtractionDispatcher {
        &self.dispatcher
    }

    pub async fn prepare(&self) -> (PromptContext, Vec<Extraction>) {
        prepare_context(&self.notebook, &self.dispatcher).await
    }

    /// Client preconditions such as a missing API key fail here, before
    /// any file is extracted.
    pub async fn ask(&self, question: &str, history: &[ChatMessage]) -> Result<Reply, LlmError> {
        self.client.ready()?;
        let (context, extractions) = self.prepare().await;
        debug!(documents = context.index().len(), "context assembled");

        let text = self
            .client
            .chat(question, history, context.prompt_text())
            .await?;
        let citations = context::cited_documents(&text, context.index());
        Ok(Reply {
            text,
            citations,
            context,
            extractions,
        })
    }

    /// Extracted text for a source or file, by display or citation name.
    pub fn view(&self, name: &str) -> Option<String> {
        let cache: &DocumentCache = self.dispatcher.cache();
        if let Some(file) = self.notebook.find_file(name) {
            return cache
                .get(&file.cache_key())
                .or_else(|| file.qualified_name().and_then(|q| cache.get(&q)));
        }
        match self.notebook.sources().iter().find(|s| s.display_name() == name) {
            Some(Source::Text { content, .. }) => Some(content.clone()),
            _ => cache.get(name),
        }
    }

    /// Clears and re-extracts one file.
    pub async fn reprocess(&self, name: &str) -> Result<Extraction, SourceError> {
        let file = self
            .notebook
            .find_file(name)
            .ok_or_else(|| SourceError::NotFound(name.to_string()))?;
        Ok(self.dispatcher.reprocess(file).await)
    }
}
