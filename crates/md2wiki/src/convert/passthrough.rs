//! Raw CSF passthrough: comment-delimited escapes spliced into the output
//! without interpretation.
//!
//! Two forms, both recognized only outside masked code regions:
//! `<!-- csf: ... -->` on a single line, and a `<!-- csf-begin -->` /
//! `<!-- csf-end -->` pair wrapping any number of lines. An opened
//! multi-line block that never closes is a hard error for the document.

use super::mask::{MaskStore, SpanKind};
use crate::error::ConvertError;
use regex::Regex;
use std::sync::OnceLock;

fn inline_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<!--\s*csf:\s*(.*?)\s*-->").expect("csf inline pattern"))
}

fn begin_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*<!--\s*csf-begin\s*-->\s*$").expect("csf-begin pattern"))
}

fn end_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*<!--\s*csf-end\s*-->\s*$").expect("csf-end pattern"))
}

pub fn apply(text: &str, store: &mut MaskStore) -> Result<String, ConvertError> {
    let mut out = String::with_capacity(text.len());
    let mut block: Option<(usize, String)> = None;

    for (idx, line) in text.split_inclusive('\n').enumerate() {
        let bare = line.strip_suffix('\n').unwrap_or(line);
        match &mut block {
            Some((_, body)) => {
                if end_pattern().is_match(bare) {
                    let (_, body) = block.take().expect("open block");
                    let tok = store.insert(
                        SpanKind::Raw { block: true },
                        body.trim_end_matches('\n').to_string(),
                    );
                    out.push_str(&tok);
                    out.push('\n');
                } else {
                    body.push_str(line);
                }
            }
            None => {
                if begin_pattern().is_match(bare) {
                    block = Some((idx + 1, String::new()));
                } else {
                    out.push_str(&replace_inline(line, store));
                }
            }
        }
    }

    if let Some((line, _)) = block {
        return Err(ConvertError::UnterminatedPassthrough { line });
    }
    Ok(out)
}

fn replace_inline(line: &str, store: &mut MaskStore) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last = 0;
    for cap in inline_pattern().captures_iter(line) {
        let whole = cap.get(0).expect("whole match");
        // A comment alone on its line splices as a block.
        let alone = line.trim() == whole.as_str().trim();
        let tok = store.insert(SpanKind::Raw { block: alone }, cap[1].to_string());
        out.push_str(&line[last..whole.start()]);
        out.push_str(&tok);
        last = whole.end();
    }
    out.push_str(&line[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::mask::{token, unmask};

    #[test]
    fn single_line_escape_is_spliced() {
        let mut store = MaskStore::new();
        let out = apply("<!-- csf: <ac:structured-macro ac:name=\"toc\"/> -->\n", &mut store).unwrap();
        assert_eq!(out, format!("{}\n", token(0)));
        let restored = unmask(&out, &store);
        assert_eq!(restored, "<ac:structured-macro ac:name=\"toc\"/>\n");
    }

    #[test]
    fn multi_line_block_is_spliced_verbatim() {
        let mut store = MaskStore::new();
        let src = "a\n<!-- csf-begin -->\n<table>\n<tr><td>1</td></tr>\n</table>\n<!-- csf-end -->\nb\n";
        let out = apply(src, &mut store).unwrap();
        assert_eq!(out, format!("a\n{}\nb\n", token(0)));
        assert_eq!(
            store.get(0).unwrap().content,
            "<table>\n<tr><td>1</td></tr>\n</table>"
        );
    }

    #[test]
    fn unterminated_block_is_hard_error() {
        let mut store = MaskStore::new();
        let err = apply("x\n<!-- csf-begin -->\nnever closed\n", &mut store).unwrap_err();
        assert!(matches!(
            err,
            ConvertError::UnterminatedPassthrough { line: 2 }
        ));
    }

    #[test]
    fn inline_escape_mid_paragraph_stays_inline() {
        let mut store = MaskStore::new();
        let out = apply("see <!-- csf: <ac:emoticon ac:name=\"smile\"/> --> here\n", &mut store)
            .unwrap();
        assert_eq!(out, format!("see {} here\n", token(0)));
        assert_eq!(
            store.get(0).unwrap().kind,
            SpanKind::Raw { block: false }
        );
    }

    #[test]
    fn ordinary_comments_pass_untouched() {
        let mut store = MaskStore::new();
        let src = "<!-- just a note -->\n";
        assert_eq!(apply(src, &mut store).unwrap(), src);
        assert!(store.is_empty());
    }
}
