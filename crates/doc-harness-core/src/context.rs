//! Source registry queries and prompt-context assembly.
//!
//! Turns the current source list into (a) the files still needing
//! extraction and (b) one ordered context block with a document index the
//! LLM is told to cite from.
//!
//! # Ordering
//!
//! Documents appear in source order. Folder children follow in file order
//! at their folder's position, under their folder-qualified names. The
//! LLM cites by name, so `index` must match the names in the block
//! exactly; positions are informational.

use crate::keys::{composite_key, folder_qualified};
use crate::models::{FileRef, Source};

/// Placeholder emitted when a file has no cache entry yet.
pub const MISSING_CONTENT: &str = "No content available for this source.";

/// Prompt text used when no source resolved to any content.
pub const NO_CONTEXT_PROMPT: &str = "No specific document content provided. Use your general knowledge to answer the question, and provide citations where appropriate.";

const CONTEXT_HEADER: &str =
    "Document Context from your sources - REFER TO THESE DOCUMENTS BY THEIR EXACT NAMES IN [BRACKETS]:\n\n";
const INDEX_HEADER: &str = "\nAVAILABLE DOCUMENTS INDEX (use these exact names when referencing):\n";

/// Read-only view of cached extraction results.
pub trait CacheLookup {
    fn lookup(&self, key: &str) -> Option<String>;
}

impl CacheLookup for std::collections::HashMap<String, String> {
    fn lookup(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Result of [`assemble_context`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptContext {
    /// At least one document resolved to content.
    Documents { block: String, index: Vec<String> },
    /// Nothing to show; the LLM should answer from general knowledge.
    NoDocuments,
}

impl PromptContext {
    /// Text handed to the LLM as the context turn.
    pub fn prompt_text(&self) -> &str {
        match self {
            PromptContext::Documents { block, .. } => block,
            PromptContext::NoDocuments => NO_CONTEXT_PROMPT,
        }
    }

    /// Names the LLM may cite, in emission order.
    pub fn index(&self) -> &[String] {
        match self {
            PromptContext::Documents { index, .. } => index,
            PromptContext::NoDocuments => &[],
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, PromptContext::NoDocuments)
    }
}

/// Files whose extraction result is not cached yet, in source order.
///
/// Only the composite key counts. Aliases are shared or may be stale, so
/// a hit on one says nothing about this particular file.
pub fn find_unprocessed<'a>(sources: &'a [Source], cache: &dyn CacheLookup) -> Vec<FileRef<'a>> {
    sources
        .iter()
        .flat_map(|s| s.file_refs())
        .filter(|r| cache.lookup(&r.cache_key()).is_none())
        .collect()
}

/// Builds the ordered context block and document index for a chat turn.
pub fn assemble_context(sources: &[Source], cache: &dyn CacheLookup) -> PromptContext {
    let mut stanzas: Vec<(String, String)> = Vec::new();

    for source in sources {
        match source {
            Source::File(file) => {
                let text = cache
                    .lookup(&composite_key(&file.name, file.size))
                    .or_else(|| cache.lookup(&file.name));
                stanzas.push((file.name.clone(), text.unwrap_or_else(|| MISSING_CONTENT.to_string())));
            }
            Source::Folder { name, files } => {
                for file in files {
                    let qualified = folder_qualified(name, &file.name);
                    let text = cache
                        .lookup(&qualified)
                        .or_else(|| cache.lookup(&composite_key(&file.name, file.size)));
                    stanzas.push((qualified, text.unwrap_or_else(|| MISSING_CONTENT.to_string())));
                }
            }
            Source::Text { name, content } => stanzas.push((name.clone(), content.clone())),
            Source::Link { name, .. } => stanzas.push((name.clone(), format!("Content from {}", name))),
        }
    }

    if stanzas.iter().all(|(_, text)| text.trim().is_empty()) {
        return PromptContext::NoDocuments;
    }
    for (_, text) in stanzas.iter_mut() {
        if text.trim().is_empty() {
            *text = MISSING_CONTENT.to_string();
        }
    }

    let mut block = String::from(CONTEXT_HEADER);
    for (name, text) in &stanzas {
        block.push_str(&format!("Document [{}]:\n{}\n\n", name, text));
    }
    block.push_str(INDEX_HEADER);
    for (i, (name, _)) in stanzas.iter().enumerate() {
        block.push_str(&format!("{}. [{}]\n", i + 1, name));
    }

    PromptContext::Documents {
        block,
        index: stanzas.into_iter().map(|(name, _)| name).collect(),
    }
}

/// Index entries cited as `[name]` in an LLM reply, in index order.
pub fn cited_documents(reply: &str, index: &[String]) -> Vec<String> {
    index
        .iter()
        .filter(|name| reply.contains(&format!("[{}]", name)))
        .cloned()
        .collect()
}
