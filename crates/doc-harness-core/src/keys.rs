//! Cache key naming.
//!
//! A file is cached under a composite key `"<name>_<size>"` and aliased by
//! its bare name and, for folder children, by `"<folder>/<name>"`. The
//! folder-qualified name doubles as the citation token the LLM echoes back.

/// Separator between a folder name and a child file name.
pub const FOLDER_SEPARATOR: char = '/';

/// Composite cache key: file name plus declared byte size.
pub fn composite_key(name: &str, size: u64) -> String {
    format!("{}_{}", name, size)
}

/// Folder-qualified name of a folder child.
pub fn folder_qualified(folder: &str, child: &str) -> String {
    format!("{}{}{}", folder, FOLDER_SEPARATOR, child)
}

/// Splits a composite key back into `(name, size)`.
///
/// Returns `None` when the key has no `_<digits>` suffix.
pub fn split_composite(key: &str) -> Option<(&str, u64)> {
    let (name, size) = key.rsplit_once('_')?;
    if name.is_empty() || size.is_empty() || !size.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    size.parse().ok().map(|s| (name, s))
}

/// Whether a top-level source name is usable as a cache key and citation
/// token without colliding with folder-qualified names.
pub fn is_valid_top_level_name(name: &str) -> bool {
    !name.trim().is_empty() && !name.contains(FOLDER_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composite_key_appends_size() {
        assert_eq!(composite_key("notes.txt", 10), "notes.txt_10");
    }

    #[test]
    fn split_composite_uses_last_underscore() {
        assert_eq!(split_composite("my_file.pdf_2048"), Some(("my_file.pdf", 2048)));
        assert_eq!(split_composite("my_file.pdf"), None);
        assert_eq!(split_composite("_12"), None);
        assert_eq!(split_composite("a_12b"), None);
    }

    #[test]
    fn top_level_names_reject_separator() {
        assert!(is_valid_top_level_name("report.pdf"));
        assert!(!is_valid_top_level_name("docs/report.pdf"));
        assert!(!is_valid_top_level_name("   "));
    }
}
