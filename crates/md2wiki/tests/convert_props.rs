use md2wiki::index::XrefTable;
use md2wiki::scanner::{self, SourceDocument};
use proptest::prelude::*;
use std::path::PathBuf;

fn document(text: &str) -> SourceDocument {
    let (meta, body) = scanner::scan(text);
    SourceDocument {
        absolute_path: PathBuf::from("/corpus/page.md"),
        relative_path: PathBuf::from("page.md"),
        meta,
        text: body,
    }
}

fn convert_body(text: &str) -> String {
    md2wiki::convert(&document(text), &XrefTable::default())
        .unwrap()
        .body
}

proptest! {
    // Fenced code content survives byte-exact inside CDATA, dollar signs
    // and math-like delimiters included.
    #[test]
    fn fenced_code_is_preserved_verbatim(
        content in r"[a-zA-Z0-9 $()/{}.,_\\='-]{0,60}"
    ) {
        let source = format!("# T\n\n```bash\n{content}\n```\n");
        let body = convert_body(&source);
        let expected = format!("<![CDATA[{content}]]>");
        prop_assert!(body.contains(&expected));
        prop_assert!(!body.contains("mathinline"));
        prop_assert!(!body.contains("mathblock"));
    }

    // Inline code spans keep their content (XML-escaped) and never expand
    // math or macros.
    #[test]
    fn inline_code_never_becomes_math(
        content in r"[a-zA-Z0-9 $(){}.,_\\-]{1,40}"
    ) {
        prop_assume!(!content.trim().is_empty());
        let source = format!("# T\n\nBefore `{content}` after.\n");
        let body = convert_body(&source);
        prop_assert!(body.contains("<code>"));
        prop_assert!(!body.contains("mathinline"));
    }

    // Bare dollar-delimited text is never treated as math.
    #[test]
    fn bare_dollar_text_stays_literal(inner in "[a-zA-Z0-9 ]{1,20}") {
        let source = format!("# T\n\nCost is ${inner}$ total.\n");
        let body = convert_body(&source);
        prop_assert!(!body.contains("mathinline"));
        prop_assert!(!body.contains("mathblock"));
    }

    // Identical macro arguments expand to byte-identical output.
    #[test]
    fn macro_expansion_is_deterministic(key in "[A-Z]{2,5}-[0-9]{1,4}") {
        let source = format!("# T\n\n<!-- macro:jira: {key} -->\n");
        let first = convert_body(&source);
        let second = convert_body(&source);
        prop_assert_eq!(&first, &second);
        prop_assert!(first.contains(&key));
        prop_assert!(first.contains("ac:name=\"jira\""));
    }

    // Conversion never panics on arbitrary printable input.
    #[test]
    fn conversion_is_total_on_printable_text(text in r"[ -~\n]{0,200}") {
        // csf-begin without an end is the one defined hard error.
        let doc = document(&format!("# T\n\n{text}"));
        let _ = md2wiki::convert(&doc, &XrefTable::default());
    }
}
