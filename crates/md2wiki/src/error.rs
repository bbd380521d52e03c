//! Error taxonomy for md2wiki.
//!
//! Failure severity follows a strict ladder:
//!
//! - [`StructureError`] — the document tree is invalid; the whole run aborts.
//! - [`ConvertError`] — a single document cannot be converted; its siblings
//!   still proceed.
//! - [`Diagnostic`] — a single span degraded to literal text; the document
//!   still publishes.
//! - [`RemoteError`] — a remote operation failed; fatal for one node only.

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

/// Tree invariant violation. Always fatal for the entire run.
#[derive(Debug, Error)]
pub enum StructureError {
    #[error("no root document found; add an index.md or README.md at the top level")]
    NoRoot,

    #[error("multiple root candidates: {} and {}; keep a single top-level index document", first.display(), second.display())]
    MultipleRoots { first: PathBuf, second: PathBuf },

    #[error("cycle detected in document tree involving {}", path.display())]
    Cycle { path: PathBuf },

    #[error("parent of {} is not present in the index", child.display())]
    MissingParent { child: PathBuf },
}

/// Invalid connection settings or command-line input. Carried inside the
/// binary's error chain so exit-code mapping can recognize usage errors by
/// type rather than by message text.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// Hard conversion failure. Aborts one document; no partial output is kept.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("unterminated csf-begin block starting at line {line}")]
    UnterminatedPassthrough { line: usize },
}

/// Category of a per-span diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// Macro shorthand named a macro outside the registry.
    UnknownMacro,
    /// Macro arguments did not satisfy the macro's grammar.
    MacroArguments,
    /// A relative document link had no cross-reference entry.
    UnresolvedLink,
    /// A referenced local file does not exist on disk.
    MissingFile,
}

/// A recoverable per-span problem. The offending span is left as literal
/// text and the document still converts.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// 1-based line in the source document, where known.
    pub line: usize,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, line: usize, message: impl Into<String>) -> Self {
        Self {
            kind,
            line,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "line {}: {}", self.line, self.message)
    }
}

/// Failure of a remote operation.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Optimistic-lock mismatch: the page version moved underneath us.
    #[error("version conflict on page {page_id}: submitted version {submitted} is stale")]
    Conflict { page_id: String, submitted: i64 },

    /// Transport-level failure that survived the retry budget.
    #[error("transport failure after {attempts} attempt(s): {message}")]
    Transport { attempts: u32, message: String },

    /// Non-success HTTP status that is not a version conflict.
    #[error("HTTP {status} from {url}: {message}")]
    Http {
        status: u16,
        url: String,
        message: String,
    },

    /// The response body did not match the expected wire shape.
    #[error("unexpected payload from {url}: {message}")]
    Payload { url: String, message: String },

    #[error("page not found: {0}")]
    PageNotFound(String),

    #[error("space not found: {0}")]
    SpaceNotFound(String),

    /// Operation structurally unsupported under the active protocol shape.
    #[error("unsupported under the active API flavor: {0}")]
    Limitation(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

impl RemoteError {
    /// True for failures worth a bounded automatic retry at the transport
    /// layer. Application-level conflicts are never transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, RemoteError::Transport { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_is_not_transient() {
        let err = RemoteError::Conflict {
            page_id: "123".into(),
            submitted: 4,
        };
        assert!(!err.is_transient());
    }

    #[test]
    fn transport_is_transient() {
        let err = RemoteError::Transport {
            attempts: 3,
            message: "connection reset".into(),
        };
        assert!(err.is_transient());
    }

    #[test]
    fn diagnostic_display_includes_line() {
        let diag = Diagnostic::new(DiagnosticKind::UnknownMacro, 12, "unknown macro 'panel'");
        assert_eq!(diag.to_string(), "line 12: unknown macro 'panel'");
    }
}
