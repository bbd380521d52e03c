//! Front-matter and comment-key extraction for Markdown sources.
//!
//! A document can carry metadata in two places: HTML comment keys near the
//! top (`<!-- confluence-page-id: 123 -->`) and a leading front-matter block
//! delimited by `---` lines. Both are stripped from the text handed to the
//! conversion engine. Unrecognized front-matter keys are ignored, not errors.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// Metadata recognized from front-matter and comment keys.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentMeta {
    /// Explicit Confluence page ID, when the page is already associated.
    pub page_id: Option<String>,
    /// Space key overriding the run-level default.
    pub space_key: Option<String>,
    /// Page title; falls back to the first heading, then the file stem.
    pub title: Option<String>,
    /// Content labels to assign to the page.
    pub tags: Vec<String>,
    /// Content properties to assign to the page.
    pub properties: BTreeMap<String, Value>,
    /// When `false`, the document is indexed and linkable but never written
    /// to the remote store.
    pub synchronized: bool,
    /// Attribution text rendered as an info panel at the top of the page.
    pub generated_by: Option<String>,
}

/// A Markdown document after metadata extraction. Immutable after load.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    /// Absolute filesystem path.
    pub absolute_path: PathBuf,
    /// Path relative to the corpus root, used for tree placement and links.
    pub relative_path: PathBuf,
    pub meta: DocumentMeta,
    /// Remaining Markdown text after front-matter and comment keys.
    pub text: String,
}

impl SourceDocument {
    /// Effective page title: front-matter, else first ATX heading, else the
    /// file stem.
    pub fn title(&self) -> String {
        if let Some(title) = &self.meta.title {
            return title.clone();
        }
        for line in self.text.lines() {
            if let Some(rest) = line.strip_prefix("# ") {
                return rest.trim().to_string();
            }
        }
        self.relative_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "Untitled".to_string())
    }

    /// True when the file name designates a directory index document.
    pub fn is_index(&self) -> bool {
        matches!(
            self.relative_path
                .file_stem()
                .map(|s| s.to_string_lossy().to_lowercase())
                .as_deref(),
            Some("index") | Some("readme")
        )
    }
}

fn comment_key_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<!--\s+(confluence[-_]page[-_]id|confluence[-_]space[-_]key|generated[-_]by):\s*(.*?)\s+-->\r?\n?")
            .expect("comment key pattern")
    })
}

/// Extracts metadata from raw document text, returning the metadata and the
/// remaining Markdown.
pub fn scan(raw: &str) -> (DocumentMeta, String) {
    let mut meta = DocumentMeta {
        synchronized: true,
        ..DocumentMeta::default()
    };

    // Comment keys first; they take precedence over front-matter.
    let mut text = String::with_capacity(raw.len());
    let mut last = 0;
    for cap in comment_key_pattern().captures_iter(raw) {
        let whole = cap.get(0).expect("whole match");
        let key = cap[1].replace('_', "-");
        let value = cap[2].trim().to_string();
        match key.as_str() {
            "confluence-page-id" => meta.page_id = Some(value),
            "confluence-space-key" => meta.space_key = Some(value),
            "generated-by" => meta.generated_by = Some(value),
            _ => unreachable!("pattern restricts keys"),
        }
        text.push_str(&raw[last..whole.start()]);
        last = whole.end();
    }
    text.push_str(&raw[last..]);

    let text = extract_front_matter(&text, &mut meta);
    (meta, text)
}

/// Reads a file and scans its metadata.
pub fn read(absolute_path: &Path, relative_path: &Path) -> std::io::Result<SourceDocument> {
    let raw = std::fs::read_to_string(absolute_path)?;
    let (meta, text) = scan(&raw);
    Ok(SourceDocument {
        absolute_path: absolute_path.to_path_buf(),
        relative_path: relative_path.to_path_buf(),
        meta,
        text,
    })
}

/// Splits off a leading `---` front-matter block and folds recognized keys
/// into `meta`. Returns the remaining text.
fn extract_front_matter(text: &str, meta: &mut DocumentMeta) -> String {
    let mut lines = text.lines();
    if lines.next().map(str::trim_end) != Some("---") {
        return text.to_string();
    }

    let mut block = Vec::new();
    let mut consumed = false;
    for line in lines.by_ref() {
        if line.trim_end() == "---" {
            consumed = true;
            break;
        }
        block.push(line);
    }
    if !consumed {
        // No closing fence: not front-matter, leave the text alone.
        return text.to_string();
    }

    parse_front_matter(&block, meta);

    let rest: Vec<&str> = lines.collect();
    let mut out = rest.join("\n");
    if text.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Minimal flat front-matter reader for the recognized key set. Values are
/// scalars, inline lists (`[a, b]`), block lists, or one level of nested
/// `key: value` pairs under `properties:`.
fn parse_front_matter(lines: &[&str], meta: &mut DocumentMeta) {
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        i += 1;
        if line.trim().is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if line.starts_with(char::is_whitespace) {
            // Indented stray line outside a block we track; ignore.
            continue;
        }
        let key = key.trim().replace('-', "_");
        let value = value.trim();
        match key.as_str() {
            "page_id" | "confluence_page_id" => {
                if meta.page_id.is_none() {
                    meta.page_id = Some(unquote(value).to_string());
                }
            }
            "space_key" | "confluence_space_key" => {
                if meta.space_key.is_none() {
                    meta.space_key = Some(unquote(value).to_string());
                }
            }
            "title" => meta.title = Some(unquote(value).to_string()),
            "generated_by" => {
                if meta.generated_by.is_none() {
                    meta.generated_by = Some(unquote(value).to_string());
                }
            }
            "synchronized" => meta.synchronized = value != "false",
            "tags" => {
                if value.is_empty() {
                    // Block list form.
                    while i < lines.len() {
                        let item = lines[i].trim_start();
                        if let Some(rest) = item.strip_prefix("- ") {
                            meta.tags.push(unquote(rest.trim()).to_string());
                            i += 1;
                        } else {
                            break;
                        }
                    }
                } else {
                    meta.tags = parse_inline_list(value);
                }
            }
            "properties" => {
                while i < lines.len() {
                    let item = lines[i];
                    if !item.starts_with(char::is_whitespace) || item.trim().is_empty() {
                        break;
                    }
                    if let Some((k, v)) = item.trim().split_once(':') {
                        meta.properties
                            .insert(k.trim().to_string(), parse_scalar(v.trim()));
                    }
                    i += 1;
                }
            }
            // Unrecognized keys are ignored by contract.
            _ => {}
        }
    }
}

fn parse_inline_list(value: &str) -> Vec<String> {
    let inner = value
        .trim()
        .trim_start_matches('[')
        .trim_end_matches(']');
    inner
        .split(',')
        .map(|item| unquote(item.trim()).to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Interprets a front-matter scalar as JSON where possible, else a string.
fn parse_scalar(value: &str) -> Value {
    let value = value.trim();
    if let Ok(parsed) = serde_json::from_str::<Value>(value) {
        return parsed;
    }
    Value::String(unquote(value).to_string())
}

fn unquote(value: &str) -> &str {
    let value = value.trim();
    if value.len() >= 2
        && ((value.starts_with('"') && value.ends_with('"'))
            || (value.starts_with('\'') && value.ends_with('\'')))
    {
        &value[1..value.len() - 1]
    } else {
        value
    }
}
