//! Run-level outcome report.
//!
//! Every node of the document tree ends the run in exactly one outcome.
//! The report aggregates them, renders a summary table for humans, and
//! serializes to JSON for tooling. Partial success stays visible: a run
//! with one failed node still lists what was created or updated.

use crate::error::Diagnostic;
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Created { page_id: String },
    Updated { page_id: String },
    /// Remote already matched; no write issued.
    Skipped { page_id: String },
    Failed { reason: String },
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }

    fn verb(&self) -> &'static str {
        match self {
            Outcome::Created { .. } => "created",
            Outcome::Updated { .. } => "updated",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageOutcome {
    /// Corpus-relative source path, or the directory name for synthetic
    /// grouping nodes.
    pub source: String,
    pub title: String,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Default, Serialize)]
pub struct RunReport {
    pub pages: Vec<PageOutcome>,
}

impl RunReport {
    pub fn record(&mut self, outcome: PageOutcome) {
        self.pages.push(outcome);
    }

    pub fn has_failures(&self) -> bool {
        self.pages.iter().any(|p| p.outcome.is_failure())
    }

    pub fn count(&self, verb: &str) -> usize {
        self.pages.iter().filter(|p| p.outcome.verb() == verb).count()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .pages
            .iter()
            .map(|p| p.source.len())
            .max()
            .unwrap_or(0)
            .max(6);
        writeln!(f, "{:<width$}  {:<8}  title", "source", "outcome")?;
        for page in &self.pages {
            writeln!(f, "{:<width$}  {:<8}  {}", page.source, page.outcome.verb(), page.title)?;
            if let Outcome::Failed { reason } = &page.outcome {
                writeln!(f, "{:<width$}    reason: {reason}", "")?;
            }
            for diagnostic in &page.diagnostics {
                writeln!(f, "{:<width$}    warning: {diagnostic}", "")?;
            }
        }
        write!(
            f,
            "{} created, {} updated, {} skipped, {} failed",
            self.count("created"),
            self.count("updated"),
            self.count("skipped"),
            self.count("failed"),
        )
    }
}

/// Process exit status, ordered by severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Success = 0,
    RunFailed = 1,
    InvalidArgument = 2,
    StructureError = 4,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DiagnosticKind;

    fn outcome(source: &str, outcome: Outcome) -> PageOutcome {
        PageOutcome {
            source: source.to_string(),
            title: "T".to_string(),
            outcome,
            diagnostics: Vec::new(),
        }
    }

    #[test]
    fn failure_flag_and_counts() {
        let mut report = RunReport::default();
        report.record(outcome("a.md", Outcome::Created { page_id: "1".into() }));
        report.record(outcome("b.md", Outcome::Skipped { page_id: "2".into() }));
        assert!(!report.has_failures());
        report.record(outcome("c.md", Outcome::Failed { reason: "conflict".into() }));
        assert!(report.has_failures());
        assert_eq!(report.count("created"), 1);
        assert_eq!(report.count("failed"), 1);
    }

    #[test]
    fn table_lists_reasons_and_warnings() {
        let mut report = RunReport::default();
        report.record(PageOutcome {
            source: "docs/a.md".into(),
            title: "A".into(),
            outcome: Outcome::Updated { page_id: "9".into() },
            diagnostics: vec![Diagnostic::new(
                DiagnosticKind::UnknownMacro,
                3,
                "unknown macro 'spin'",
            )],
        });
        report.record(outcome("docs/b.md", Outcome::Failed { reason: "conflict".into() }));
        let text = report.to_string();
        assert!(text.contains("updated"));
        assert!(text.contains("warning: line 3: unknown macro 'spin'"));
        assert!(text.contains("reason: conflict"));
        assert!(text.ends_with("0 created, 1 updated, 0 skipped, 1 failed"));
    }

    #[test]
    fn json_carries_tagged_outcomes() {
        let mut report = RunReport::default();
        report.record(outcome("a.md", Outcome::Created { page_id: "7".into() }));
        let json = report.to_json();
        assert!(json.contains("\"outcome\": \"created\""));
        assert!(json.contains("\"page_id\": \"7\""));
    }

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(ExitStatus::Success.code(), 0);
        assert_eq!(ExitStatus::RunFailed.code(), 1);
        assert_eq!(ExitStatus::InvalidArgument.code(), 2);
        assert_eq!(ExitStatus::StructureError.code(), 4);
    }
}
