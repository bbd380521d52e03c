//! Math delimiter disambiguation.
//!
//! `\( ... \)` converts to an inline math macro and `\[ ... \]` to a block
//! math macro; a fenced block with language `math` restores as a block
//! macro during unmasking. Dollar-delimited spans are never treated as
//! math: shell and code fragments outside code spans stay literal.

use super::mask::{MaskStore, SpanKind};
use regex::Regex;
use std::sync::OnceLock;

fn block_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)\\\[(.+?)\\\]").expect("math block pattern"))
}

fn inline_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\\((.+?)\\\)").expect("math inline pattern"))
}

pub fn apply(text: &str, store: &mut MaskStore) -> String {
    let text = replace_with(text, block_pattern(), store, |body| {
        (
            format!(
                "<ac:structured-macro ac:name=\"mathblock\"><ac:plain-text-body>{}</ac:plain-text-body></ac:structured-macro>",
                super::cdata(body.trim())
            ),
            true,
        )
    });
    replace_with(&text, inline_pattern(), store, |body| {
        (
            format!(
                "<ac:structured-macro ac:name=\"mathinline\"><ac:parameter ac:name=\"body\">{}</ac:parameter></ac:structured-macro>",
                super::escape_xml(body.trim())
            ),
            false,
        )
    })
}

fn replace_with(
    text: &str,
    pattern: &Regex,
    store: &mut MaskStore,
    expand: impl Fn(&str) -> (String, bool),
) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for cap in pattern.captures_iter(text) {
        let whole = cap.get(0).expect("whole match");
        let (csf, block) = expand(&cap[1]);
        let tok = store.insert(SpanKind::Raw { block }, csf);
        out.push_str(&text[last..whole.start()]);
        out.push_str(&tok);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}
