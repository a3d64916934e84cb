//! Building sources from the local filesystem.
//!
//! A file path becomes a [`Source::File`]; a directory becomes a
//! [`Source::Folder`] whose children are the supported files beneath it,
//! filtered by `[folders]` globs and sorted by relative path. Nested
//! children keep their relative path (`"sub/a.txt"`) as their name.
//! Media types are guessed from the extension.

use std::path::Path;

use anyhow::{bail, Context, Result};
use doc_harness_core::models::{Source, SourceFile};
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::FolderConfig;
use crate::extract::is_supported_type;

pub struct SourceLoader {
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl SourceLoader {
    pub fn from_config(config: &FolderConfig) -> Result<Self> {
        let mut excludes = vec!["**/.git/**".to_string(), "**/.DS_Store".to_string()];
        excludes.extend(config.exclude_globs.iter().cloned());
        Ok(Self {
            include: build_globset(&config.include_globs)?,
            exclude: build_globset(&excludes)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    /// Loads a file or directory as one source, named after its last
    /// path component.
    pub fn load(&self, path: &Path) -> Result<Source> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .with_context(|| format!("Path has no file name: {}", path.display()))?;

        if path.is_dir() {
            let files = self.scan_folder(path)?;
            debug!(folder = %name, files = files.len(), "folder scanned");
            Ok(Source::Folder { name, files })
        } else if path.is_file() {
            Ok(Source::File(read_file(path, name)?))
        } else {
            bail!("No such file or directory: {}", path.display())
        }
    }

    fn scan_folder(&self, root: &Path) -> Result<Vec<SourceFile>> {
        let mut files = Vec::new();
        for entry in WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
        {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path);
            let rel_str = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }
            if !is_supported_type(&media_type_for(path)) {
                debug!(path = %rel_str, "skipping unsupported file type");
                continue;
            }
            files.push(read_file(path, rel_str)?);
        }
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }
}

/// Media type guessed from the file extension.
pub fn media_type_for(path: &Path) -> String {
    mime_guess::from_path(path)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

fn read_file(path: &Path, name: String) -> Result<SourceFile> {
    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(SourceFile::new(name, media_type_for(path), bytes))
}

/// Parses a `NAME=CONTENT` argument into a text source.
pub fn parse_text_source(arg: &str) -> Result<Source> {
    let (name, content) = arg
        .split_once('=')
        .with_context(|| format!("Expected NAME=CONTENT, got '{}'", arg))?;
    Ok(Source::Text {
        name: name.trim().to_string(),
        content: content.to_string(),
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn folder_keeps_supported_files_in_path_order() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("Docs");
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("b.txt"), "b").unwrap();
        std::fs::write(root.join("a.pdf"), "%PDF").unwrap();
        std::fs::write(root.join("sub/c.png"), [0u8; 4]).unwrap();
        std::fs::write(root.join("skip.zip"), [0u8; 4]).unwrap();

        let loader = SourceLoader::from_config(&FolderConfig::default()).unwrap();
        let Source::Folder { name, files } = loader.load(&root).unwrap() else {
            panic!("expected folder");
        };
        assert_eq!(name, "Docs");
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.pdf", "b.txt", "sub/c.png"]);
        assert_eq!(files[0].media_type, "application/pdf");
    }

    #[test]
    fn exclude_globs_apply_to_relative_paths() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("drafts")).unwrap();
        std::fs::write(tmp.path().join("drafts/x.txt"), "x").unwrap();
        std::fs::write(tmp.path().join("y.txt"), "y").unwrap();

        let config = FolderConfig {
            exclude_globs: vec!["drafts/**".to_string()],
            ..FolderConfig::default()
        };
        let loader = SourceLoader::from_config(&config).unwrap();
        let Source::Folder { files, .. } = loader.load(tmp.path()).unwrap() else {
            panic!("expected folder");
        };
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "y.txt");
    }

    #[test]
    fn single_file_keeps_any_type() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("data.bin");
        std::fs::write(&path, [1u8, 2, 3]).unwrap();
        let loader = SourceLoader::from_config(&FolderConfig::default()).unwrap();
        let Source::File(file) = loader.load(&path).unwrap() else {
            panic!("expected file");
        };
        assert_eq!(file.size, 3);
        assert_eq!(file.media_type, "application/octet-stream");
    }

    #[test]
    fn text_argument_splits_on_first_equals() {
        assert_eq!(
            parse_text_source("memo=a=b").unwrap(),
            Source::Text {
                name: "memo".into(),
                content: "a=b".into()
            }
        );
        assert!(parse_text_source("no-separator").is_err());
    }
}
