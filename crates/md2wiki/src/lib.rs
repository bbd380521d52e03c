//! md2wiki Library
//!
//! Converts Markdown corpora to Confluence Storage Format and keeps a
//! remote Confluence page tree synchronized with them. The binary is a
//! thin wrapper; all behavior lives here so tests can drive it directly.

pub mod cli;
pub mod config;
pub mod convert;
pub mod error;
pub mod index;
pub mod loader;
pub mod remote;
pub mod report;
pub mod scanner;
pub mod sync;

// Re-export commonly used types
pub use convert::{convert, ConvertedDocument};
pub use error::{ConfigError, ConvertError, Diagnostic, RemoteError, StructureError};
pub use index::{build_tree, DocumentTree, XrefTable};
pub use remote::WikiRemote;
pub use report::{ExitStatus, Outcome, RunReport};
pub use scanner::SourceDocument;
pub use sync::{SyncOptions, Synchronizer};
