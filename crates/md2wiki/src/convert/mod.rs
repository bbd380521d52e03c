//! Conversion engine: Markdown to Confluence Storage Format.
//!
//! Overlapping textual conventions are untangled by a fixed pass order
//! rather than a grammar. Code is masked first so every later pass sees
//! placeholder tokens where code used to be; raw CSF escapes, macro
//! shorthand, and math delimiters each claim their spans next; list
//! boundaries are normalized; the remaining Markdown renders through
//! pulldown-cmark into CSF; and finally every masked span is restored.
//!
//! Hard errors abort the document. Local errors degrade the offending span
//! to literal text and are reported as diagnostics on the converted
//! document.

pub mod lists;
pub mod macros;
pub mod mask;
pub mod math;
pub mod passthrough;
pub mod render;

pub use render::{AttachmentRef, AttachmentRegistry};

use crate::error::{ConvertError, Diagnostic};
use crate::index::XrefTable;
use crate::scanner::SourceDocument;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Output of converting one document.
#[derive(Debug)]
pub struct ConvertedDocument {
    pub title: String,
    /// CSF body ready for submission.
    pub body: String,
    /// Local files the page depends on, in first-reference order.
    pub attachments: Vec<AttachmentRef>,
    pub labels: Vec<String>,
    pub properties: BTreeMap<String, Value>,
    pub diagnostics: Vec<Diagnostic>,
}

pub fn convert(doc: &SourceDocument, xref: &XrefTable) -> Result<ConvertedDocument, ConvertError> {
    let title = doc.title();
    let mut store = mask::MaskStore::new();
    let mut diagnostics = Vec::new();

    // A first heading that became the page title would duplicate it.
    let text = if doc.meta.title.is_none() {
        strip_title_heading(&doc.text, &title)
    } else {
        doc.text.clone()
    };

    let text = mask::mask_code(&text, &mut store);
    let text = passthrough::apply(&text, &mut store)?;
    let text = macros::apply(&text, &mut store, &mut diagnostics);
    let text = math::apply(&text, &mut store);
    let text = lists::normalize(&text);

    let doc_dir = doc.absolute_path.parent().unwrap_or_else(|| Path::new(""));
    let mut attachments = AttachmentRegistry::new();
    let html = render::render(&text, doc_dir, xref, &mut attachments, &mut diagnostics);
    let mut body = mask::unmask(&html, &store);

    if let Some(note) = &doc.meta.generated_by {
        body = format!(
            "<ac:structured-macro ac:name=\"info\"><ac:rich-text-body><p>{}</p></ac:rich-text-body></ac:structured-macro>\n{body}",
            escape_xml(note)
        );
    }

    Ok(ConvertedDocument {
        title,
        body,
        attachments: attachments.into_entries(),
        labels: doc.meta.tags.clone(),
        properties: doc.meta.properties.clone(),
        diagnostics,
    })
}

/// Removes the first heading when it is the document's first content line
/// and its text equals the derived title.
fn strip_title_heading(text: &str, title: &str) -> String {
    let mut lines = text.split_inclusive('\n');
    let mut prefix_len = 0;
    for line in &mut lines {
        let bare = line.trim();
        if bare.is_empty() {
            prefix_len += line.len();
            continue;
        }
        if let Some(rest) = bare.strip_prefix("# ") {
            if rest.trim() == title {
                let heading_end = prefix_len + line.len();
                return format!("{}{}", &text[..prefix_len], &text[heading_end..]);
            }
        }
        break;
    }
    text.to_string()
}

pub(crate) fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

pub(crate) fn cdata(s: &str) -> String {
    format!("<![CDATA[{}]]>", s.replace("]]>", "]]]]><![CDATA[>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn doc(text: &str) -> SourceDocument {
        let (meta, body) = crate::scanner::scan(text);
        SourceDocument {
            absolute_path: PathBuf::from("/corpus/page.md"),
            relative_path: PathBuf::from("page.md"),
            meta,
            text: body,
        }
    }

    fn convert_str(text: &str) -> ConvertedDocument {
        convert(&doc(text), &XrefTable::default()).unwrap()
    }

    #[test]
    fn shell_fence_dollars_survive_untouched() {
        let out = convert_str("# T\n\n```bash\nTEST=\"$VAR1 $VAR2\"\n```\n");
        assert!(out.body.contains("<![CDATA[TEST=\"$VAR1 $VAR2\"]]>"));
        assert!(!out.body.contains("mathinline"));
        assert!(!out.body.contains("mathblock"));
    }

    #[test]
    fn title_heading_is_dropped_from_body() {
        let out = convert_str("# My Page\n\nBody here.\n");
        assert_eq!(out.title, "My Page");
        assert!(!out.body.contains("<h1>"));
        assert!(out.body.contains("<p>Body here.</p>"));
    }

    #[test]
    fn explicit_title_keeps_heading() {
        let out = convert_str("---\ntitle: Other\n---\n# My Page\n\nx\n");
        assert_eq!(out.title, "Other");
        assert!(out.body.contains("<h1>My Page</h1>"));
    }

    #[test]
    fn unterminated_passthrough_aborts_document() {
        let err = convert(&doc("# T\n\n<!-- csf-begin -->\nno end\n"), &XrefTable::default())
            .unwrap_err();
        assert!(matches!(err, ConvertError::UnterminatedPassthrough { .. }));
    }

    #[test]
    fn generated_by_note_renders_as_info_panel() {
        let out = convert_str("---\ngenerated_by: exported from docs/\n---\n# T\n\nx\n");
        assert!(out.body.starts_with(
            "<ac:structured-macro ac:name=\"info\"><ac:rich-text-body><p>exported from docs/</p></ac:rich-text-body></ac:structured-macro>"
        ));
    }

    #[test]
    fn labels_and_properties_carry_through() {
        let out = convert_str("---\ntags: [a, b]\nproperties:\n  owner: me\n---\n# T\n\nx\n");
        assert_eq!(out.labels, vec!["a", "b"]);
        assert_eq!(
            out.properties.get("owner"),
            Some(&Value::String("me".into()))
        );
    }

    #[test]
    fn macro_and_math_compose_with_code() {
        let src = "# T\n\nStatus: <!-- macro:status: green, Done -->\n\nInline \\(x^2\\) and `\\(code\\)` here.\n";
        let out = convert_str(src);
        assert!(out.body.contains("ac:name=\"status\""));
        assert!(out.body.contains("ac:name=\"mathinline\""));
        assert!(out.body.contains("<code>\\(code\\)</code>"));
        assert!(out.diagnostics.is_empty());
    }

    #[test]
    fn paragraph_then_list_forms_two_blocks() {
        let out = convert_str("# T\n\nIntro line:\n- one\n- two\n");
        assert!(out.body.contains("<p>Intro line:</p>"));
        assert!(out.body.contains("<ul><li>one</li><li>two</li></ul>"));
    }
}
