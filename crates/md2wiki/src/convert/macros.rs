//! Macro shorthand expansion.
//!
//! `<!-- macro:name: params -->` expands through a closed registry to
//! deterministic CSF. Parameters are comma-separated, positional or
//! `key=value`, with double or single quotes respected. An unknown macro
//! name or an argument list the macro cannot interpret leaves the comment
//! literal and records a diagnostic; the document still converts.

use super::mask::{MaskStore, SpanKind};
use crate::error::{Diagnostic, DiagnosticKind};
use regex::Regex;
use std::sync::OnceLock;

pub const MACRO_NAMES: &[&str] = &["jira", "status", "emoticon"];

fn macro_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<!--\s*macro:(\w+):\s*(.*?)\s*-->").expect("macro pattern"))
}

pub fn apply(text: &str, store: &mut MaskStore, diagnostics: &mut Vec<Diagnostic>) -> String {
    let mut out = String::with_capacity(text.len());
    for (idx, line) in text.split_inclusive('\n').enumerate() {
        out.push_str(&expand_line(line, idx + 1, store, diagnostics));
    }
    out
}

fn expand_line(
    line: &str,
    line_no: usize,
    store: &mut MaskStore,
    diagnostics: &mut Vec<Diagnostic>,
) -> String {
    let mut out = String::with_capacity(line.len());
    let mut last = 0;
    for cap in macro_pattern().captures_iter(line) {
        let whole = cap.get(0).expect("whole match");
        let name = &cap[1];
        let params = cap[2].trim();

        let expanded = match name {
            "jira" => expand_jira(params),
            "status" => expand_status(params),
            "emoticon" => expand_emoticon(params),
            _ => {
                diagnostics.push(Diagnostic::new(
                    DiagnosticKind::UnknownMacro,
                    line_no,
                    format!("unknown macro '{name}'"),
                ));
                None
            }
        };

        out.push_str(&line[last..whole.start()]);
        match expanded {
            Some(csf) => {
                let alone = line.trim() == whole.as_str().trim();
                let tok = store.insert(SpanKind::Raw { block: alone }, csf);
                out.push_str(&tok);
            }
            None => {
                if MACRO_NAMES.contains(&name) {
                    diagnostics.push(Diagnostic::new(
                        DiagnosticKind::MacroArguments,
                        line_no,
                        format!("macro '{name}' cannot interpret arguments '{params}'"),
                    ));
                }
                out.push_str(whole.as_str());
            }
        }
        last = whole.end();
    }
    out.push_str(&line[last..]);
    out
}

/// Splits `params` on commas outside double quotes, then separates
/// positional values from `key=value` pairs.
fn parse_parameters(params: &str) -> (Vec<String>, Vec<(String, String)>) {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in params.chars() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                current.push(c);
            }
            ',' if !in_quotes => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    parts.push(current);

    let mut positional = Vec::new();
    let mut named = Vec::new();
    for part in parts {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            named.push((key.trim().to_string(), unquote(value.trim())));
        } else {
            positional.push(unquote(part));
        }
    }
    (positional, named)
}

fn unquote(value: &str) -> String {
    value
        .trim_matches('"')
        .trim_matches('\'')
        .to_string()
}

fn lookup<'a>(named: &'a [(String, String)], key: &str) -> Option<&'a str> {
    named
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn expand_jira(params: &str) -> Option<String> {
    let (positional, named) = parse_parameters(params);
    let key = positional.first()?;
    let show_summary = lookup(&named, "showSummary").unwrap_or("true");

    let mut csf = String::from("<ac:structured-macro ac:name=\"jira\" ac:schema-version=\"1\">");
    csf.push_str(&format!(
        "<ac:parameter ac:name=\"key\">{}</ac:parameter>",
        super::escape_xml(key)
    ));
    // The default is implicit; only a non-default value is emitted.
    if !show_summary.eq_ignore_ascii_case("true") {
        csf.push_str(&format!(
            "<ac:parameter ac:name=\"showSummary\">{}</ac:parameter>",
            super::escape_xml(show_summary)
        ));
    }
    csf.push_str("</ac:structured-macro>");
    Some(csf)
}

fn expand_status(params: &str) -> Option<String> {
    let (positional, named) = parse_parameters(params);
    let color = lookup(&named, "color")
        .map(str::to_string)
        .or_else(|| positional.first().cloned())?;
    let title = lookup(&named, "title")
        .map(str::to_string)
        .or_else(|| positional.get(1).cloned())?;

    Some(format!(
        "<ac:structured-macro ac:name=\"status\" ac:schema-version=\"1\"><ac:parameter ac:name=\"colour\">{}</ac:parameter><ac:parameter ac:name=\"title\">{}</ac:parameter></ac:structured-macro>",
        super::escape_xml(&capitalize(&color)),
        super::escape_xml(&title)
    ))
}

fn expand_emoticon(params: &str) -> Option<String> {
    let name = unquote(params.trim());
    if name.is_empty() {
        return None;
    }
    Some(format!(
        "<ac:emoticon ac:name=\"{}\" />",
        super::escape_xml(&name)
    ))
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::mask::unmask;

    fn expand(src: &str) -> (String, Vec<Diagnostic>) {
        let mut store = MaskStore::new();
        let mut diagnostics = Vec::new();
        let masked = apply(src, &mut store, &mut diagnostics);
        (unmask(&masked, &store), diagnostics)
    }

    #[test]
    fn jira_default_summary_omits_parameter() {
        let (out, diags) = expand("<!-- macro:jira: PROJ-123 -->\n");
        assert!(diags.is_empty());
        assert_eq!(
            out,
            "<ac:structured-macro ac:name=\"jira\" ac:schema-version=\"1\"><ac:parameter ac:name=\"key\">PROJ-123</ac:parameter></ac:structured-macro>\n"
        );
    }

    #[test]
    fn jira_explicit_false_summary_is_emitted() {
        let (out, _) = expand("<!-- macro:jira: PROJ-123, showSummary=false -->\n");
        assert!(out.contains("<ac:parameter ac:name=\"showSummary\">false</ac:parameter>"));
    }

    #[test]
    fn jira_expansion_is_deterministic() {
        let (a, _) = expand("<!-- macro:jira: PROJ-9, showSummary=false -->\n");
        let (b, _) = expand("<!-- macro:jira: PROJ-9, showSummary=false -->\n");
        assert_eq!(a, b);
    }

    #[test]
    fn status_positional_and_named_agree() {
        let (pos, _) = expand("<!-- macro:status: green, Done -->\n");
        let (named, _) = expand("<!-- macro:status: color=\"green\", title=\"Done\" -->\n");
        assert_eq!(pos, named);
        assert!(pos.contains("<ac:parameter ac:name=\"colour\">Green</ac:parameter>"));
        assert!(pos.contains("<ac:parameter ac:name=\"title\">Done</ac:parameter>"));
    }

    #[test]
    fn emoticon_expands_to_self_closing_element() {
        let (out, _) = expand("<!-- macro:emoticon: thumbs-up -->\n");
        assert_eq!(out, "<ac:emoticon ac:name=\"thumbs-up\" />\n");
    }

    #[test]
    fn unknown_macro_left_literal_with_diagnostic() {
        let src = "<!-- macro:panel: hello -->\n";
        let (out, diags) = expand(src);
        assert_eq!(out, src);
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].kind, DiagnosticKind::UnknownMacro);
    }

    #[test]
    fn missing_arguments_left_literal_with_diagnostic() {
        let src = "<!-- macro:status: green -->\n";
        let (out, diags) = expand(src);
        assert_eq!(out, src);
        assert_eq!(diags[0].kind, DiagnosticKind::MacroArguments);
    }

    #[test]
    fn quoted_value_with_comma_stays_whole() {
        let (out, _) = expand("<!-- macro:status: color=\"green\", title=\"Done, really\" -->\n");
        assert!(out.contains("<ac:parameter ac:name=\"title\">Done, really</ac:parameter>"));
    }
}
