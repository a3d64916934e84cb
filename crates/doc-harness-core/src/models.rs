//! Core data models used throughout Doc Harness.
//!
//! These types represent the user-supplied sources and chat turns that flow
//! through extraction, caching, and prompt-context assembly.

use serde::{Deserialize, Serialize};

use crate::keys::{composite_key, folder_qualified, FOLDER_SEPARATOR};

/// A binary file supplied by the user, with its declared media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub name: String,
    pub media_type: String,
    /// Declared byte size. Part of the composite cache key.
    pub size: u64,
    pub bytes: Vec<u8>,
}

impl SourceFile {
    /// Builds a file whose declared size is the payload length.
    pub fn new(name: impl Into<String>, media_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            media_type: media_type.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }
}

/// A user-added unit of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    File(SourceFile),
    Folder { name: String, files: Vec<SourceFile> },
    Text { name: String, content: String },
    Link { name: String, url: String },
}

impl Source {
    /// User-visible name, also the citation token for non-folder sources.
    pub fn display_name(&self) -> &str {
        match self {
            Source::File(file) => &file.name,
            Source::Folder { name, .. } | Source::Text { name, .. } | Source::Link { name, .. } => {
                name
            }
        }
    }

    /// Short lowercase kind label (`file`, `folder`, `text`, `link`).
    pub fn kind(&self) -> &'static str {
        match self {
            Source::File(_) => "file",
            Source::Folder { .. } => "folder",
            Source::Text { .. } => "text",
            Source::Link { .. } => "link",
        }
    }

    /// Every file carried by this source, with its owning folder.
    pub fn file_refs(&self) -> Vec<FileRef<'_>> {
        match self {
            Source::File(file) => vec![FileRef::top_level(file)],
            Source::Folder { name, files } => {
                files.iter().map(|f| FileRef::in_folder(f, name)).collect()
            }
            Source::Text { .. } | Source::Link { .. } => Vec::new(),
        }
    }
}

/// A file together with the folder that owns it, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileRef<'a> {
    pub file: &'a SourceFile,
    pub folder: Option<&'a str>,
}

impl<'a> FileRef<'a> {
    pub fn top_level(file: &'a SourceFile) -> Self {
        Self { file, folder: None }
    }

    pub fn in_folder(file: &'a SourceFile, folder: &'a str) -> Self {
        Self {
            file,
            folder: Some(folder),
        }
    }

    /// Primary cache key (`"<name>_<size>"`).
    pub fn cache_key(&self) -> String {
        composite_key(&self.file.name, self.file.size)
    }

    /// Folder-qualified name, for folder children only.
    pub fn qualified_name(&self) -> Option<String> {
        self.folder.map(|folder| folder_qualified(folder, &self.file.name))
    }

    /// Secondary keys written alongside the composite key.
    ///
    /// A nested child name (`"sub/a.txt"`) gets no bare alias: it could
    /// equal the qualified name of a child of a folder called `sub`.
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases = Vec::new();
        if !self.file.name.contains(FOLDER_SEPARATOR) {
            aliases.push(self.file.name.clone());
        }
        aliases.extend(self.qualified_name());
        aliases
    }

    /// Name emitted in the context block and expected back as a citation.
    pub fn citation_name(&self) -> String {
        self.qualified_name()
            .unwrap_or_else(|| self.file.name.clone())
    }
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior turn in the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub text: String,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folder_child_has_qualified_alias() {
        let file = SourceFile::new("child.txt", "text/plain", b"abc".to_vec());
        let r = FileRef::in_folder(&file, "Docs");
        assert_eq!(r.cache_key(), "child.txt_3");
        assert_eq!(r.aliases(), vec!["child.txt".to_string(), "Docs/child.txt".to_string()]);
        assert_eq!(r.citation_name(), "Docs/child.txt");
    }

    #[test]
    fn top_level_file_aliases_bare_name_only() {
        let file = SourceFile::new("a.pdf", "application/pdf", vec![0; 7]);
        let r = FileRef::top_level(&file);
        assert_eq!(r.aliases(), vec!["a.pdf".to_string()]);
        assert_eq!(r.citation_name(), "a.pdf");
    }

    #[test]
    fn nested_child_has_no_bare_alias() {
        let file = SourceFile::new("sub/a.txt", "text/plain", b"abc".to_vec());
        let r = FileRef::in_folder(&file, "Docs");
        assert_eq!(r.cache_key(), "sub/a.txt_3");
        assert_eq!(r.aliases(), vec!["Docs/sub/a.txt".to_string()]);
    }

    #[test]
    fn folder_source_yields_children_in_order() {
        let source = Source::Folder {
            name: "F".into(),
            files: vec![
                SourceFile::new("1.txt", "text/plain", vec![]),
                SourceFile::new("2.txt", "text/plain", vec![]),
            ],
        };
        let names: Vec<String> = source.file_refs().iter().map(|r| r.citation_name()).collect();
        assert_eq!(names, vec!["F/1.txt", "F/2.txt"]);
    }
}
