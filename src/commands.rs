//! CLI command implementations.
//!
//! Each `run_*` function backs one `dh` subcommand. Sources are rebuilt
//! from the given paths on every invocation; only the cache persists
//! between runs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use doc_harness_core::models::Source;

use crate::cache::DocumentCache;
use crate::config::Config;
use crate::dispatch::{Extraction, ExtractionDispatcher, Extractors, Origin};
use crate::llm;
use crate::notebook::{prepare_context, Assistant, Notebook};
use crate::sources::{parse_text_source, SourceLoader};
use crate::store_fs::FileBlobStore;

pub async fn open_cache(config: &Config) -> Result<Arc<DocumentCache>> {
    let store = Arc::new(FileBlobStore::from_config(&config.store));
    let cache = DocumentCache::open(store)
        .await
        .with_context(|| format!("Failed to open store {}", config.store.path.display()))?;
    Ok(Arc::new(cache))
}

pub fn build_notebook(config: &Config, paths: &[PathBuf], texts: &[String]) -> Result<Notebook> {
    let loader = SourceLoader::from_config(&config.folders)?;
    let mut notebook = Notebook::new();
    for path in paths {
        notebook.add(loader.load(path)?)?;
    }
    for text in texts {
        notebook.add(parse_text_source(text)?)?;
    }
    Ok(notebook)
}

fn dispatcher(config: &Config, cache: Arc<DocumentCache>) -> Result<ExtractionDispatcher> {
    Ok(ExtractionDispatcher::new(
        cache,
        Extractors::from_config(config)?,
        config.extraction.clone(),
    ))
}

fn origin_label(origin: Origin) -> &'static str {
    match origin {
        Origin::Cached => "cached",
        Origin::Extracted => "extracted",
        Origin::Transient => "retry-later",
    }
}

fn print_extractions(extractions: &[Extraction]) {
    for e in extractions {
        println!(
            "{:<12} {} ({} chars)",
            origin_label(e.origin),
            e.name,
            e.text.chars().count()
        );
    }
}

pub async fn run_extract(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let notebook = build_notebook(config, paths, &[])?;
    let dispatcher = dispatcher(config, open_cache(config).await?)?;
    let files = notebook.files();
    if files.is_empty() {
        println!("No files to extract.");
        return Ok(());
    }
    let extractions = dispatcher.extract_all(&files).await;
    print_extractions(&extractions);
    Ok(())
}

pub async fn run_pending(config: &Config, paths: &[PathBuf]) -> Result<()> {
    let notebook = build_notebook(config, paths, &[])?;
    let cache = open_cache(config).await?;
    let pending = notebook.find_unprocessed(&*cache);
    if pending.is_empty() {
        println!("All files are processed.");
    }
    for file in pending {
        println!("{}\t{}\t{}", file.citation_name(), file.file.media_type, file.file.size);
    }
    Ok(())
}

pub async fn run_show(config: &Config, name: &str) -> Result<()> {
    let cache = open_cache(config).await?;
    match cache.get(name) {
        Some(text) => {
            println!("{}", text);
            Ok(())
        }
        None => bail!("No cached content for '{}'", name),
    }
}

pub async fn run_list(config: &Config) -> Result<()> {
    let cache = open_cache(config).await?;
    for key in cache.keys() {
        println!("{}", key);
    }
    Ok(())
}

pub async fn run_reprocess(config: &Config, path: &Path) -> Result<()> {
    let notebook = build_notebook(config, &[path.to_path_buf()], &[])?;
    let dispatcher = dispatcher(config, open_cache(config).await?)?;
    let mut extractions = Vec::new();
    for file in notebook.files() {
        extractions.push(dispatcher.reprocess(file).await);
    }
    print_extractions(&extractions);
    Ok(())
}

pub async fn run_clear(config: &Config, name: Option<&str>) -> Result<()> {
    let cache = open_cache(config).await?;
    let removed = cache.clear(name).await;
    match name {
        Some(name) => println!("Cleared {} cache entries for {}.", removed, name),
        None => println!("Cleared all document caches ({} entries).", removed),
    }
    Ok(())
}

pub async fn run_context(config: &Config, paths: &[PathBuf], texts: &[String]) -> Result<()> {
    let notebook = build_notebook(config, paths, texts)?;
    let dispatcher = dispatcher(config, open_cache(config).await?)?;
    let (context, _) = prepare_context(&notebook, &dispatcher).await;
    println!("{}", context.prompt_text());
    Ok(())
}

pub async fn run_ask(
    config: &Config,
    question: &str,
    paths: &[PathBuf],
    texts: &[String],
) -> Result<()> {
    let client = llm::create_client(&config.llm)?
        .context("No LLM configured. Set [llm] provider = \"hosted\" or \"local\".")?;
    let notebook = build_notebook(config, paths, texts)?;
    let dispatcher = dispatcher(config, open_cache(config).await?)?;
    let assistant = Assistant::new(notebook, dispatcher, client);

    let reply = assistant.ask(question, &[]).await?;
    println!("{}", reply.text);
    if !reply.citations.is_empty() {
        println!();
        println!("Sources cited:");
        for name in &reply.citations {
            let kind = assistant
                .notebook()
                .sources()
                .iter()
                .find(|s| s.display_name() == name.as_str())
                .map(Source::kind)
                .unwrap_or("file");
            println!("  [{}] ({})", name, kind);
        }
    }
    Ok(())
}

pub async fn run_verify(config: &Config) -> Result<()> {
    let client = llm::create_client(&config.llm)?
        .context("No LLM configured. Set [llm] provider = \"hosted\" or \"local\".")?;
    client.verify().await?;
    println!("{} LLM provider is reachable.", client.name());
    Ok(())
}
