//! Markdown event stream to Confluence Storage Format.
//!
//! Walks the pulldown-cmark event stream and writes CSF (an XHTML dialect)
//! directly. Relative links to Markdown documents resolve through the
//! cross-reference table; local images and file links register attachment
//! dependencies. External URLs pass through untouched. Placeholder tokens
//! from earlier passes travel through as ordinary text and are restored by
//! the unmasking pass afterwards.

use super::mask::code_macro;
use crate::error::{Diagnostic, DiagnosticKind};
use crate::index::XrefTable;
use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::{Component, Path, PathBuf};

/// A file the converted document depends on, deduplicated by content hash.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentRef {
    /// Upload name, derived from the link target with separators flattened.
    pub name: String,
    /// Absolute path of the local file.
    pub source: PathBuf,
    /// Lowercase hex SHA-256 of the file contents.
    pub hash: String,
}

/// Collects attachment dependencies during rendering. Registration reads
/// the referenced file's bytes once to compute its content hash; a second
/// reference to the same path or the same content reuses the first entry.
#[derive(Debug, Default)]
pub struct AttachmentRegistry {
    entries: Vec<AttachmentRef>,
    by_path: HashMap<PathBuf, usize>,
    by_hash: HashMap<String, usize>,
}

impl AttachmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, doc_dir: &Path, target: &str) -> std::io::Result<&AttachmentRef> {
        let path = normalize(&doc_dir.join(target));
        if let Some(&i) = self.by_path.get(&path) {
            return Ok(&self.entries[i]);
        }
        let bytes = std::fs::read(&path)?;
        let hash = hex_digest(&bytes);
        if let Some(&i) = self.by_hash.get(&hash) {
            self.by_path.insert(path, i);
            return Ok(&self.entries[i]);
        }
        let i = self.entries.len();
        self.entries.push(AttachmentRef {
            name: attachment_name(target),
            source: path.clone(),
            hash: hash.clone(),
        });
        self.by_path.insert(path, i);
        self.by_hash.insert(hash, i);
        Ok(&self.entries[i])
    }

    pub fn entries(&self) -> &[AttachmentRef] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<AttachmentRef> {
        self.entries
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Flattens a link target into a legal attachment name.
fn attachment_name(target: &str) -> String {
    target
        .trim_start_matches("./")
        .replace(['/', '\\'], "_")
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

enum LinkFrame {
    /// `<a href>` already written; close it on end.
    Anchor,
    /// Collect plain text, wrap in a page reference on end.
    Page {
        title: String,
        space_key: Option<String>,
        anchor: Option<String>,
    },
    /// Collect plain text, wrap in an attachment reference on end.
    Attachment { name: String },
}

pub fn render(
    markdown: &str,
    doc_dir: &Path,
    xref: &XrefTable,
    attachments: &mut AttachmentRegistry,
    diagnostics: &mut Vec<Diagnostic>,
) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);

    let mut out = String::with_capacity(markdown.len() * 2);
    // Buffers collect plain text for link bodies and image alt text.
    let mut buffers: Vec<String> = Vec::new();
    let mut links: Vec<LinkFrame> = Vec::new();
    let mut in_table_head = false;
    let mut code_block: Option<(Option<String>, String)> = None;

    // Writes either to the innermost collection buffer or the output.
    fn emit_to(buffers: &mut Vec<String>, out: &mut String, s: &str) {
        match buffers.last_mut() {
            Some(buffer) => buffer.push_str(s),
            None => out.push_str(s),
        }
    }

    for (event, range) in Parser::new_ext(markdown, options).into_offset_iter() {
        let line = 1 + markdown[..range.start].matches('\n').count();
        macro_rules! emit {
            ($s:expr) => {
                emit_to(&mut buffers, &mut out, $s)
            };
        }

        match event {
            Event::Start(tag) => match tag {
                Tag::Paragraph => emit!("<p>"),
                Tag::Heading(level, _, _) => emit!(&format!("<{level}>")),
                Tag::BlockQuote => emit!("<blockquote>"),
                Tag::CodeBlock(kind) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().map(str::to_string)
                        }
                        CodeBlockKind::Indented => None,
                    };
                    code_block = Some((lang, String::new()));
                }
                Tag::List(None) => emit!("<ul>"),
                Tag::List(Some(1)) => emit!("<ol>"),
                Tag::List(Some(start)) => emit!(&format!("<ol start=\"{start}\">")),
                Tag::Item => emit!("<li>"),
                Tag::Emphasis => emit!("<em>"),
                Tag::Strong => emit!("<strong>"),
                Tag::Strikethrough => emit!("<del>"),
                Tag::Table(_alignments) => emit!("<table>"),
                Tag::TableHead => {
                    in_table_head = true;
                    emit!("<thead><tr>");
                }
                Tag::TableRow => emit!("<tr>"),
                Tag::TableCell => emit!(if in_table_head { "<th>" } else { "<td>" }),
                Tag::Link(_, dest, _) => {
                    let frame = classify_link(&dest, doc_dir, xref, attachments, diagnostics, line);
                    match &frame {
                        LinkFrame::Anchor => {
                            emit!(&format!("<a href=\"{}\">", super::escape_xml(&dest)))
                        }
                        _ => buffers.push(String::new()),
                    }
                    links.push(frame);
                }
                Tag::Image(..) => buffers.push(String::new()),
                Tag::FootnoteDefinition(_) => {}
            },
            Event::End(tag) => match tag {
                Tag::Paragraph => emit!("</p>\n"),
                Tag::Heading(level, _, _) => emit!(&format!("</{level}>\n")),
                Tag::BlockQuote => emit!("</blockquote>\n"),
                Tag::CodeBlock(_) => {
                    if let Some((lang, body)) = code_block.take() {
                        emit!(&code_macro(lang.as_deref(), &body));
                        emit!("\n");
                    }
                }
                Tag::List(None) => emit!("</ul>\n"),
                Tag::List(Some(_)) => emit!("</ol>\n"),
                Tag::Item => emit!("</li>"),
                Tag::Emphasis => emit!("</em>"),
                Tag::Strong => emit!("</strong>"),
                Tag::Strikethrough => emit!("</del>"),
                Tag::Table(_) => emit!("</tbody></table>\n"),
                Tag::TableHead => {
                    in_table_head = false;
                    emit!("</tr></thead><tbody>");
                }
                Tag::TableRow => emit!("</tr>"),
                Tag::TableCell => emit!(if in_table_head { "</th>" } else { "</td>" }),
                Tag::Link(..) => {
                    let frame = links.pop().expect("balanced link tags");
                    match frame {
                        LinkFrame::Anchor => emit!("</a>"),
                        LinkFrame::Page {
                            title,
                            space_key,
                            anchor,
                        } => {
                            let body = buffers.pop().expect("link body buffer");
                            let mut csf = String::from("<ac:link");
                            if let Some(anchor) = anchor {
                                let _ = write!(
                                    csf,
                                    " ac:anchor=\"{}\"",
                                    super::escape_xml(&anchor)
                                );
                            }
                            let _ = write!(
                                csf,
                                "><ri:page ri:content-title=\"{}\"",
                                super::escape_xml(&title)
                            );
                            if let Some(key) = space_key {
                                let _ =
                                    write!(csf, " ri:space-key=\"{}\"", super::escape_xml(&key));
                            }
                            let _ = write!(
                                csf,
                                " /><ac:plain-text-link-body>{}</ac:plain-text-link-body></ac:link>",
                                super::cdata(&body)
                            );
                            emit!(&csf);
                        }
                        LinkFrame::Attachment { name } => {
                            let body = buffers.pop().expect("link body buffer");
                            emit!(&format!(
                                "<ac:link><ri:attachment ri:filename=\"{}\" /><ac:plain-text-link-body>{}</ac:plain-text-link-body></ac:link>",
                                super::escape_xml(&name),
                                super::cdata(&body)
                            ));
                        }
                    }
                }
                Tag::Image(_, dest, _) => {
                    let alt = buffers.pop().expect("image alt buffer");
                    let csf = render_image(&dest, &alt, doc_dir, attachments, diagnostics, line);
                    emit!(&csf);
                }
                Tag::FootnoteDefinition(_) => {}
            },
            Event::Text(text) => {
                if let Some((_, body)) = &mut code_block {
                    body.push_str(&text);
                } else if let Some(buffer) = buffers.last_mut() {
                    buffer.push_str(&text);
                } else {
                    out.push_str(&super::escape_xml(&text));
                }
            }
            Event::Code(code) => {
                if let Some(buffer) = buffers.last_mut() {
                    buffer.push_str(&code);
                } else {
                    let _ = write!(out, "<code>{}</code>", super::escape_xml(&code));
                }
            }
            Event::Html(html) => emit!(&html),
            Event::SoftBreak => emit!("\n"),
            Event::HardBreak => emit!("<br />"),
            Event::Rule => emit!("<hr />\n"),
            Event::TaskListMarker(_) | Event::FootnoteReference(_) => {}
        }
    }
    out
}

fn classify_link(
    dest: &str,
    doc_dir: &Path,
    xref: &XrefTable,
    attachments: &mut AttachmentRegistry,
    diagnostics: &mut Vec<Diagnostic>,
    line: usize,
) -> LinkFrame {
    if is_external(dest) || dest.starts_with('#') {
        return LinkFrame::Anchor;
    }

    let (path, anchor) = match dest.split_once('#') {
        Some((p, a)) => (p, Some(a.to_string())),
        None => (dest, None),
    };

    if path.ends_with(".md") {
        match xref.resolve(doc_dir, path) {
            Some(entry) => LinkFrame::Page {
                title: entry.title.clone(),
                space_key: entry.space_key.clone(),
                anchor,
            },
            None => {
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::UnresolvedLink,
                    line,
                    format!("no document found for link target '{dest}'"),
                ));
                LinkFrame::Anchor
            }
        }
    } else {
        match attachments.register(doc_dir, path) {
            Ok(entry) => LinkFrame::Attachment {
                name: entry.name.clone(),
            },
            Err(err) => {
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::MissingFile,
                    line,
                    format!("cannot read '{path}': {err}"),
                ));
                LinkFrame::Anchor
            }
        }
    }
}

fn render_image(
    dest: &str,
    alt: &str,
    doc_dir: &Path,
    attachments: &mut AttachmentRegistry,
    diagnostics: &mut Vec<Diagnostic>,
    line: usize,
) -> String {
    let alt_attr = if alt.is_empty() {
        String::new()
    } else {
        format!(" ac:alt=\"{}\"", super::escape_xml(alt))
    };
    if is_external(dest) {
        return format!(
            "<ac:image{alt_attr}><ri:url ri:value=\"{}\" /></ac:image>",
            super::escape_xml(dest)
        );
    }
    match attachments.register(doc_dir, dest) {
        Ok(entry) => format!(
            "<ac:image{alt_attr}><ri:attachment ri:filename=\"{}\" /></ac:image>",
            super::escape_xml(&entry.name)
        ),
        Err(err) => {
            diagnostics.push(Diagnostic::new(
                DiagnosticKind::MissingFile,
                line,
                format!("cannot read image '{dest}': {err}"),
            ));
            super::escape_xml(alt)
        }
    }
}

fn is_external(dest: &str) -> bool {
    dest.contains("://") || dest.starts_with("mailto:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{build_tree, XrefTable};
    use crate::scanner::scan;
    use crate::scanner::SourceDocument;
    use std::fs;

    fn render_plain(src: &str) -> String {
        let xref = XrefTable::default();
        let mut attachments = AttachmentRegistry::new();
        let mut diagnostics = Vec::new();
        render(
            src,
            Path::new("/corpus"),
            &xref,
            &mut attachments,
            &mut diagnostics,
        )
    }

    #[test]
    fn basic_blocks() {
        let out = render_plain("# Title\n\nSome *em* and **strong** text.\n");
        assert!(out.contains("<h1>Title</h1>"));
        assert!(out.contains("<p>Some <em>em</em> and <strong>strong</strong> text.</p>"));
    }

    #[test]
    fn lists_and_quotes() {
        let out = render_plain("> quoted\n\n- one\n- two\n\n1. first\n");
        assert!(out.contains("<blockquote><p>quoted</p>\n</blockquote>"));
        assert!(out.contains("<ul><li>one</li><li>two</li></ul>"));
        assert!(out.contains("<ol><li>first</li></ol>"));
    }

    #[test]
    fn tables_render_head_and_body() {
        let out = render_plain("| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(out.contains("<table><thead><tr><th>a</th><th>b</th></tr></thead><tbody>"));
        assert!(out.contains("<tr><td>1</td><td>2</td></tr></tbody></table>"));
    }

    #[test]
    fn external_link_passes_through() {
        let out = render_plain("[site](https://example.com/x)\n");
        assert!(out.contains("<a href=\"https://example.com/x\">site</a>"));
    }

    #[test]
    fn resolved_document_link_becomes_page_reference() {
        let docs = vec![
            {
                let (meta, text) = scan("# Home\n[setup](guide/setup.md#install)\n");
                SourceDocument {
                    absolute_path: PathBuf::from("/corpus/index.md"),
                    relative_path: PathBuf::from("index.md"),
                    meta,
                    text,
                }
            },
            {
                let (meta, text) = scan("# Setup\n");
                SourceDocument {
                    absolute_path: PathBuf::from("/corpus/guide/setup.md"),
                    relative_path: PathBuf::from("guide/setup.md"),
                    meta,
                    text,
                }
            },
        ];
        let tree = build_tree(docs, false).unwrap();
        let xref = XrefTable::build(&tree);
        let mut attachments = AttachmentRegistry::new();
        let mut diagnostics = Vec::new();
        let out = render(
            "[setup](guide/setup.md#install)\n",
            Path::new("/corpus"),
            &xref,
            &mut attachments,
            &mut diagnostics,
        );
        assert!(out.contains(
            "<ac:link ac:anchor=\"install\"><ri:page ri:content-title=\"Setup\" /><ac:plain-text-link-body><![CDATA[setup]]></ac:plain-text-link-body></ac:link>"
        ));
        assert!(diagnostics.is_empty());
    }

    #[test]
    fn unresolved_document_link_degrades_with_diagnostic() {
        let xref = XrefTable::default();
        let mut attachments = AttachmentRegistry::new();
        let mut diagnostics = Vec::new();
        let out = render(
            "[gone](missing.md)\n",
            Path::new("/corpus"),
            &xref,
            &mut attachments,
            &mut diagnostics,
        );
        assert!(out.contains("<a href=\"missing.md\">gone</a>"));
        assert_eq!(diagnostics[0].kind, DiagnosticKind::UnresolvedLink);
    }

    #[test]
    fn local_image_registers_attachment() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("pic.png"), b"not really a png").unwrap();
        let xref = XrefTable::default();
        let mut attachments = AttachmentRegistry::new();
        let mut diagnostics = Vec::new();
        let out = render(
            "![logo](pic.png)\n",
            dir.path(),
            &xref,
            &mut attachments,
            &mut diagnostics,
        );
        assert!(out.contains(
            "<ac:image ac:alt=\"logo\"><ri:attachment ri:filename=\"pic.png\" /></ac:image>"
        ));
        assert_eq!(attachments.entries().len(), 1);
        assert_eq!(attachments.entries()[0].hash.len(), 64);
    }

    #[test]
    fn missing_image_degrades_with_diagnostic() {
        let out_diags = {
            let xref = XrefTable::default();
            let mut attachments = AttachmentRegistry::new();
            let mut diagnostics = Vec::new();
            let out = render(
                "![alt text](nope.png)\n",
                Path::new("/definitely/not/here"),
                &xref,
                &mut attachments,
                &mut diagnostics,
            );
            (out, diagnostics)
        };
        assert!(out_diags.0.contains("alt text"));
        assert_eq!(out_diags.1[0].kind, DiagnosticKind::MissingFile);
    }

    #[test]
    fn duplicate_content_is_registered_once() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("a.bin"), b"same bytes").unwrap();
        fs::write(dir.path().join("b.bin"), b"same bytes").unwrap();
        let mut attachments = AttachmentRegistry::new();
        attachments.register(dir.path(), "a.bin").unwrap();
        attachments.register(dir.path(), "b.bin").unwrap();
        assert_eq!(attachments.entries().len(), 1);
    }

    #[test]
    fn attachment_name_flattens_separators() {
        assert_eq!(attachment_name("./img/pic.png"), "img_pic.png");
    }
}
