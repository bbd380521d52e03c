//! Code masking: the first and last conversion passes.
//!
//! Fenced code blocks and inline code spans are located before any other
//! pass runs and their interiors replaced by placeholder tokens drawn from
//! the Unicode private use area. Later passes (passthrough, macros, math)
//! register their own spans in the same store. The final unmasking pass
//! substitutes every token with its rendered form: verbatim CDATA for block
//! code, XML-escaped `<code>` for inline code, raw splice for CSF spans.

use std::fmt::Write as _;

pub const TOKEN_OPEN: char = '\u{E000}';
pub const TOKEN_CLOSE: char = '\u{E001}';

#[derive(Debug, Clone, PartialEq)]
pub enum SpanKind {
    /// Fenced code block; `lang` is the first word of the info string.
    Block { lang: Option<String> },
    /// Inline code span.
    Inline,
    /// Already-rendered CSF to splice verbatim (passthrough, macros, math).
    /// `block` spans shed a wrapping `<p>` on restore.
    Raw { block: bool },
}

#[derive(Debug, Clone)]
pub struct MaskedSpan {
    pub kind: SpanKind,
    /// Interior bytes exactly as they appeared in the source.
    pub content: String,
}

/// Append-only span store. Token ids are indices into `spans`.
#[derive(Debug, Default)]
pub struct MaskStore {
    spans: Vec<MaskedSpan>,
}

impl MaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a span and returns its placeholder token.
    pub fn insert(&mut self, kind: SpanKind, content: impl Into<String>) -> String {
        let id = self.spans.len();
        self.spans.push(MaskedSpan {
            kind,
            content: content.into(),
        });
        token(id)
    }

    pub fn get(&self, id: usize) -> Option<&MaskedSpan> {
        self.spans.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &MaskedSpan)> {
        self.spans.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.spans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }
}

pub fn token(id: usize) -> String {
    let mut s = String::new();
    let _ = write!(s, "{TOKEN_OPEN}{id}{TOKEN_CLOSE}");
    s
}

/// Masks fenced blocks and inline code spans. A fenced block is replaced,
/// fences included, by a token on its own line; an inline span is replaced,
/// backticks included, by a bare token.
pub fn mask_code(text: &str, store: &mut MaskStore) -> String {
    let blocked = mask_fences(text, store);
    mask_inline(&blocked, store)
}

struct OpenFence {
    marker: char,
    length: usize,
    indent: String,
    lang: Option<String>,
    body: String,
}

fn mask_fences(text: &str, store: &mut MaskStore) -> String {
    let mut out = String::with_capacity(text.len());
    let mut open: Option<OpenFence> = None;

    for line in text.split_inclusive('\n') {
        let bare = line.strip_suffix('\n').unwrap_or(line);
        match &mut open {
            None => {
                if let Some(fence) = parse_fence_open(bare) {
                    open = Some(fence);
                } else {
                    out.push_str(line);
                }
            }
            Some(fence) => {
                if closes_fence(bare, fence.marker, fence.length) {
                    let fence = open.take().expect("open fence");
                    let tok = store.insert(
                        SpanKind::Block { lang: fence.lang },
                        fence.body,
                    );
                    out.push_str(&fence.indent);
                    out.push_str(&tok);
                    out.push('\n');
                } else {
                    // Content lines shed up to the opening fence's indent.
                    let mut rest = line;
                    let mut budget = fence.indent.len();
                    while budget > 0 {
                        if let Some(stripped) = rest.strip_prefix(' ') {
                            rest = stripped;
                            budget -= 1;
                        } else {
                            break;
                        }
                    }
                    fence.body.push_str(rest);
                }
            }
        }
    }

    // Unterminated fence runs to end of input.
    if let Some(fence) = open {
        let tok = store.insert(SpanKind::Block { lang: fence.lang }, fence.body);
        out.push_str(&fence.indent);
        out.push_str(&tok);
        out.push('\n');
    }
    out
}

fn parse_fence_open(line: &str) -> Option<OpenFence> {
    let indent_len = line.len() - line.trim_start_matches(' ').len();
    if indent_len > 3 {
        return None;
    }
    let rest = &line[indent_len..];
    let marker = rest.chars().next()?;
    if marker != '`' && marker != '~' {
        return None;
    }
    let length = rest.chars().take_while(|&c| c == marker).count();
    if length < 3 {
        return None;
    }
    let info = rest[length..].trim();
    // Backtick fences may not carry backticks in the info string.
    if marker == '`' && info.contains('`') {
        return None;
    }
    let lang = info.split_whitespace().next().map(str::to_string);
    Some(OpenFence {
        marker,
        length,
        indent: line[..indent_len].to_string(),
        lang,
        body: String::new(),
    })
}

fn closes_fence(line: &str, marker: char, min_len: usize) -> bool {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return false;
    }
    let run = trimmed.chars().take_while(|&c| c == marker).count();
    run >= min_len && trimmed[run..].trim().is_empty()
}

fn mask_inline(text: &str, store: &mut MaskStore) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '`' {
            let open_len = run_length(&chars, i, '`');
            if let Some(close_at) = find_closer(&chars, i + open_len, open_len) {
                let content: String = chars[i + open_len..close_at].iter().collect();
                let tok = store.insert(SpanKind::Inline, strip_span_padding(&content));
                out.push_str(&tok);
                i = close_at + open_len;
                continue;
            }
            // No closer: literal backticks.
            for _ in 0..open_len {
                out.push('`');
            }
            i += open_len;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}

fn run_length(chars: &[char], at: usize, c: char) -> usize {
    chars[at..].iter().take_while(|&&x| x == c).count()
}

/// Finds the next backtick run of exactly `len`, returning its start.
/// The search ends at the first blank line: a span never crosses a
/// paragraph boundary.
fn find_closer(chars: &[char], from: usize, len: usize) -> Option<usize> {
    let mut i = from;
    while i < chars.len() {
        match chars[i] {
            '`' => {
                let run = run_length(chars, i, '`');
                if run == len {
                    return Some(i);
                }
                i += run;
            }
            '\n' => {
                let mut j = i + 1;
                while j < chars.len() && (chars[j] == ' ' || chars[j] == '\t') {
                    j += 1;
                }
                if j >= chars.len() || chars[j] == '\n' {
                    return None;
                }
                i = j;
            }
            _ => i += 1,
        }
    }
    None
}

/// Restores every placeholder token in rendered output. Spans registered
/// later may embed earlier tokens, so restoration walks ids downward.
pub fn unmask(html: &str, store: &MaskStore) -> String {
    let mut out = html.to_string();
    for id in (0..store.len()).rev() {
        let span = store.get(id).expect("span id in range");
        let tok = token(id);
        let (expansion, block) = match &span.kind {
            SpanKind::Block { lang } => match lang.as_deref() {
                Some("csf") => (span.content.trim_end_matches('\n').to_string(), true),
                Some("math") => (
                    format!(
                        "<ac:structured-macro ac:name=\"mathblock\"><ac:plain-text-body>{}</ac:plain-text-body></ac:structured-macro>",
                        super::cdata(span.content.trim_end_matches('\n'))
                    ),
                    true,
                ),
                lang => (code_macro(lang, &span.content), true),
            },
            SpanKind::Inline => (
                format!("<code>{}</code>", super::escape_xml(&span.content)),
                false,
            ),
            SpanKind::Raw { block } => (span.content.clone(), *block),
        };
        if block {
            let wrapped = format!("<p>{tok}</p>");
            out = out.replace(&wrapped, &expansion);
        }
        out = out.replace(&tok, &expansion);
    }
    out
}

pub(crate) fn code_macro(lang: Option<&str>, content: &str) -> String {
    let mut s = String::from("<ac:structured-macro ac:name=\"code\">");
    if let Some(lang) = lang {
        let _ = write!(
            s,
            "<ac:parameter ac:name=\"language\">{}</ac:parameter>",
            super::escape_xml(lang)
        );
    }
    let _ = write!(
        s,
        "<ac:plain-text-body>{}</ac:plain-text-body></ac:structured-macro>",
        super::cdata(content.trim_end_matches('\n'))
    );
    s
}

/// One leading and trailing space are stripped when both are present and
/// the content is not all spaces.
fn strip_span_padding(content: &str) -> String {
    if content.len() >= 2
        && content.starts_with(' ')
        && content.ends_with(' ')
        && content.chars().any(|c| c != ' ')
    {
        content[1..content.len() - 1].to_string()
    } else {
        content.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fenced_block_is_replaced_by_token() {
        let mut store = MaskStore::new();
        let src = "before\n```bash\nTEST=\"$VAR1 $VAR2\"\n```\nafter\n";
        let masked = mask_code(src, &mut store);
        assert_eq!(store.len(), 1);
        let span = store.get(0).unwrap();
        assert_eq!(span.kind, SpanKind::Block { lang: Some("bash".into()) });
        assert_eq!(span.content, "TEST=\"$VAR1 $VAR2\"\n");
        assert_eq!(masked, format!("before\n{}\nafter\n", token(0)));
    }

    #[test]
    fn inline_span_interior_is_preserved() {
        let mut store = MaskStore::new();
        let masked = mask_code("use `$HOME` here\n", &mut store);
        assert_eq!(store.get(0).unwrap().content, "$HOME");
        assert_eq!(masked, format!("use {} here\n", token(0)));
    }

    #[test]
    fn double_backtick_span_with_embedded_backtick() {
        let mut store = MaskStore::new();
        mask_code("a `` b ` c `` d\n", &mut store);
        assert_eq!(store.get(0).unwrap().content, "b ` c");
    }

    #[test]
    fn tilde_fence_and_unterminated_fence() {
        let mut store = MaskStore::new();
        let masked = mask_code("~~~\nx\n~~~\n```\nran off\n", &mut store);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(0).unwrap().content, "x\n");
        assert_eq!(store.get(1).unwrap().content, "ran off\n");
        assert!(!masked.contains("ran off"));
    }

    #[test]
    fn fence_interior_is_not_inline_masked() {
        let mut store = MaskStore::new();
        mask_code("```\n`not a span`\n```\n", &mut store);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(0).unwrap().content, "`not a span`\n");
    }

    #[test]
    fn unmatched_backtick_stays_literal() {
        let mut store = MaskStore::new();
        let masked = mask_code("a ` b\n", &mut store);
        assert!(store.is_empty());
        assert_eq!(masked, "a ` b\n");
    }

    #[test]
    fn lone_backticks_in_separate_paragraphs_stay_literal() {
        let mut store = MaskStore::new();
        let src = "don't type ` here\n\nuse ` to quote\n";
        let masked = mask_code(src, &mut store);
        assert!(store.is_empty());
        assert_eq!(masked, src);
    }

    #[test]
    fn inline_span_may_wrap_a_single_line_break() {
        let mut store = MaskStore::new();
        let masked = mask_code("a `one\ntwo` b\n", &mut store);
        assert_eq!(store.get(0).unwrap().content, "one\ntwo");
        assert_eq!(masked, format!("a {} b\n", token(0)));
    }

    #[test]
    fn indented_fence_keeps_indent_on_token_line() {
        let mut store = MaskStore::new();
        let masked = mask_code("- item\n\n  ```\n  code\n  ```\n", &mut store);
        assert_eq!(masked, format!("- item\n\n  {}\n", token(0)));
    }

    #[test]
    fn unmask_block_code_restores_verbatim_in_cdata() {
        let mut store = MaskStore::new();
        mask_code("```bash\nTEST=\"$VAR1 $VAR2\"\n```\n", &mut store);
        let out = unmask(&format!("<p>{}</p>", token(0)), &store);
        assert_eq!(
            out,
            "<ac:structured-macro ac:name=\"code\"><ac:parameter ac:name=\"language\">bash</ac:parameter><ac:plain-text-body><![CDATA[TEST=\"$VAR1 $VAR2\"]]></ac:plain-text-body></ac:structured-macro>"
        );
    }

    #[test]
    fn unmask_inline_code_is_escaped() {
        let mut store = MaskStore::new();
        let tok = store.insert(SpanKind::Inline, "a < b && c");
        let out = unmask(&format!("x {tok} y"), &store);
        assert_eq!(out, "x <code>a &lt; b &amp;&amp; c</code> y");
    }

    #[test]
    fn unmask_csf_fence_is_spliced_verbatim() {
        let mut store = MaskStore::new();
        mask_code("```csf\n<ac:structured-macro ac:name=\"toc\"/>\n```\n", &mut store);
        let out = unmask(&format!("<p>{}</p>", token(0)), &store);
        assert_eq!(out, "<ac:structured-macro ac:name=\"toc\"/>");
    }

    #[test]
    fn unmask_resolves_nested_tokens() {
        let mut store = MaskStore::new();
        let inner = store.insert(SpanKind::Inline, "x");
        let outer = store.insert(SpanKind::Raw { block: false }, format!("[{inner}]"));
        let out = unmask(&outer, &store);
        assert_eq!(out, "[<code>x</code>]");
    }

    #[test]
    fn cdata_close_sequence_is_split() {
        let mut store = MaskStore::new();
        mask_code("```\na ]]> b\n```\n", &mut store);
        let out = unmask(&token(0), &store);
        assert!(out.contains("a ]]]]><![CDATA[> b"));
    }

    #[test]
    fn info_string_language_is_first_word() {
        let mut store = MaskStore::new();
        mask_code("```rust,ignore extra\nx\n```\n", &mut store);
        assert_eq!(
            store.get(0).unwrap().kind,
            SpanKind::Block { lang: Some("rust,ignore".into()) }
        );
    }
}
