//! Command-line interface definitions using clap.

use clap::Parser;
use std::path::PathBuf;

/// md2wiki - Markdown to Confluence publisher
///
/// Converts a Markdown corpus to Confluence Storage Format and keeps a
/// remote page tree synchronized with it.
///
/// Exit Codes:
///   0  - All documents synchronized (or converted with --local)
///   1  - One or more documents failed; partial progress was kept
///   2  - Invalid arguments or configuration
///   4  - Document tree invalid (no root, multiple roots, cycle)
#[derive(Debug, Parser)]
#[command(name = "md2wiki")]
#[command(about = "Publish Markdown documents to Confluence", long_about = None)]
pub struct Cli {
    /// Markdown file or directory to publish
    pub path: PathBuf,

    /// Confluence host, e.g. example.atlassian.net
    #[arg(long)]
    pub domain: Option<String>,

    /// URL prefix of the wiki, wrapped in slashes
    #[arg(long = "base-path")]
    pub base_path: Option<String>,

    /// Account name for basic authentication
    #[arg(long)]
    pub username: Option<String>,

    /// API token (prefer the CONFLUENCE_API_KEY environment variable)
    #[arg(long)]
    pub apikey: Option<String>,

    /// Default space key for documents that do not declare one
    #[arg(long)]
    pub space: Option<String>,

    /// REST shape of the remote: cloud or server
    #[arg(long)]
    pub flavor: Option<String>,

    /// Represent index-less directories as grouping pages
    #[arg(long)]
    pub keep_hierarchy: bool,

    /// Convert to .csf files next to the sources; no remote calls
    #[arg(long)]
    pub local: bool,

    /// Walk the sync protocol without issuing any mutating call
    #[arg(long)]
    pub dry_run: bool,

    /// Emit the run report as JSON on stdout
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}
