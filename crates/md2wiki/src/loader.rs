//! Filesystem walk collecting the Markdown corpus.

use crate::scanner::{self, SourceDocument};
use anyhow::{Context, Result};
use std::path::Path;
use walkdir::WalkDir;

/// Loads every `.md` file under `root`, skipping hidden entries. A single
/// file path loads as a one-document corpus. Documents come back sorted by
/// relative path so downstream ordering is deterministic.
pub fn load_corpus(root: &Path) -> Result<Vec<SourceDocument>> {
    let root = root
        .canonicalize()
        .with_context(|| format!("cannot access {}", root.display()))?;

    if root.is_file() {
        let relative = root
            .file_name()
            .map(Path::new)
            .unwrap_or_else(|| Path::new("document.md"));
        let doc = scanner::read(&root, relative)
            .with_context(|| format!("failed to read {}", root.display()))?;
        return Ok(vec![doc]);
    }

    let mut docs = Vec::new();
    for entry in WalkDir::new(&root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name().to_string_lossy().as_ref()))
    {
        let entry = entry.context("directory walk failed")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("md") {
            continue;
        }
        let relative = path
            .strip_prefix(&root)
            .expect("walk entries live under root");
        let doc = scanner::read(path, relative)
            .with_context(|| format!("failed to read {}", path.display()))?;
        docs.push(doc);
    }
    docs.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(docs)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.') && name != "." && name != ".."
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn collects_markdown_recursively() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.md"), "# Root\n").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("sub/page.md"), "# Page\n").unwrap();
        fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let docs = load_corpus(dir.path()).unwrap();
        let rels: Vec<_> = docs
            .iter()
            .map(|d| d.relative_path.to_string_lossy().into_owned())
            .collect();
        assert_eq!(
            rels,
            vec![
                "index.md".to_string(),
                format!("sub{}page.md", std::path::MAIN_SEPARATOR),
            ]
        );
    }

    #[test]
    fn skips_hidden_directories() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.md"), "x\n").unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/log.md"), "x\n").unwrap();

        let docs = load_corpus(dir.path()).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn single_file_corpus() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("solo.md");
        fs::write(&file, "# Solo\n").unwrap();

        let docs = load_corpus(&file).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].relative_path, Path::new("solo.md"));
    }
}
