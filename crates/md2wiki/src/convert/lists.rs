//! Structural normalization for loose lists.
//!
//! A list marker line immediately following a paragraph line starts a new
//! list. CommonMark renderers accept that shape, but to keep block
//! boundaries explicit for the rest of the pipeline a blank line is
//! inserted between the paragraph and the first marker. Runs after code
//! masking, so fenced block interiors are already out of reach.

use regex::Regex;
use std::sync::OnceLock;

fn marker_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\s{0,3})([-*+]|\d+[.)])\s").expect("list marker pattern"))
}

pub fn normalize(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            if let Some(cap) = marker_pattern().captures(line) {
                let indent = cap[1].len();
                let prev = lines[i - 1];
                let prev_marker = marker_pattern().captures(prev);
                let prev_is_shallower_item = prev_marker
                    .as_ref()
                    .map(|c| c[1].len() <= indent)
                    .unwrap_or(false);
                if !prev.trim().is_empty() && !prev_is_shallower_item {
                    out.push("");
                }
            }
        }
        out.push(line);
    }
    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_line_inserted_after_paragraph() {
        let src = "Some paragraph.\n- one\n- two\n";
        assert_eq!(normalize(src), "Some paragraph.\n\n- one\n- two\n");
    }

    #[test]
    fn existing_blank_line_is_not_doubled() {
        let src = "Paragraph.\n\n- one\n";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn consecutive_items_stay_together() {
        let src = "- one\n- two\n- three\n";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn nested_item_after_parent_item_stays_attached() {
        let src = "- parent\n  - child\n";
        assert_eq!(normalize(src), src);
    }

    #[test]
    fn ordered_markers_with_dot_and_paren() {
        assert_eq!(normalize("p\n1. a\n"), "p\n\n1. a\n");
        assert_eq!(normalize("p\n1) a\n"), "p\n\n1) a\n");
    }

    #[test]
    fn top_level_item_after_deeper_item_gets_separation() {
        // A top-level marker after a more-indented item starts a new list.
        let src = "  - deep\n- top\n";
        assert_eq!(normalize(src), "  - deep\n\n- top\n");
    }
}
