//! md2wiki
//!
//! Publishes a Markdown corpus to Confluence: scans and indexes the
//! documents, converts them to Confluence Storage Format, and synchronizes
//! the remote page tree. `--local` converts to `.csf` files on disk
//! without touching any remote.

use anyhow::{Context, Result};
use clap::Parser;
use md2wiki::cli::Cli;
use md2wiki::config::{ConnectionConfig, FileConfig, Overrides};
use md2wiki::convert;
use md2wiki::error::{ConfigError, StructureError};
use md2wiki::index::{build_tree, XrefTable};
use md2wiki::loader;
use md2wiki::remote::cloud::CloudRemote;
use md2wiki::remote::server::ServerRemote;
use md2wiki::remote::types::ApiFlavor;
use md2wiki::remote::WikiRemote;
use md2wiki::report::{ExitStatus, Outcome, PageOutcome, RunReport};
use md2wiki::sync::{SyncOptions, Synchronizer};
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Maps an error chain to the documented exit codes.
fn error_to_exit_status(error: &anyhow::Error) -> ExitStatus {
    if error.downcast_ref::<StructureError>().is_some() {
        return ExitStatus::StructureError;
    }
    if error.downcast_ref::<ConfigError>().is_some() {
        return ExitStatus::InvalidArgument;
    }
    ExitStatus::RunFailed
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "md2wiki=info",
        1 => "md2wiki=debug",
        _ => "md2wiki=trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let status = match run(&cli) {
        Ok(status) => status,
        Err(e) => {
            eprintln!("Error: {e:#}");
            error_to_exit_status(&e)
        }
    };
    if status != ExitStatus::Success {
        std::process::exit(status.code());
    }
}

fn run(cli: &Cli) -> Result<ExitStatus> {
    let documents = loader::load_corpus(&cli.path)
        .with_context(|| format!("failed to load {}", cli.path.display()))?;
    if documents.is_empty() {
        anyhow::bail!("no Markdown documents under {}", cli.path.display());
    }

    let corpus_dir = if cli.path.is_dir() {
        cli.path.clone()
    } else {
        cli.path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf()
    };
    let file_config = FileConfig::load(&corpus_dir)?;
    let keep_hierarchy = cli.keep_hierarchy || file_config.keep_hierarchy.unwrap_or(false);

    let mut tree = build_tree(documents, keep_hierarchy)?;

    if cli.local {
        let report = convert_local(&tree)?;
        emit(cli, &report);
        return Ok(if report.has_failures() {
            ExitStatus::RunFailed
        } else {
            ExitStatus::Success
        });
    }

    let flavor = match &cli.flavor {
        Some(raw) => Some(
            raw.parse::<ApiFlavor>()
                .map_err(|e| anyhow::Error::new(ConfigError(e)))?,
        ),
        None => None,
    };
    let overrides = Overrides {
        domain: cli.domain.clone(),
        base_path: cli.base_path.clone(),
        user_name: cli.username.clone(),
        api_key: cli.apikey.clone(),
        space_key: cli.space.clone(),
        api_flavor: flavor,
    };
    let connection = ConnectionConfig::resolve(&file_config, &overrides)?;

    let remote: Box<dyn WikiRemote> = match connection.flavor {
        ApiFlavor::Cloud => Box::new(CloudRemote::new(&connection)),
        ApiFlavor::Server => Box::new(ServerRemote::new(&connection)),
    };
    info!(domain = %connection.domain, flavor = %remote.flavor(), dry_run = cli.dry_run, "synchronizing");

    let options = SyncOptions {
        space_key: connection.space_key.clone(),
        dry_run: cli.dry_run,
    };
    let report = Synchronizer::new(remote.as_ref(), options).synchronize(&mut tree);
    emit(cli, &report);
    Ok(if report.has_failures() {
        ExitStatus::RunFailed
    } else {
        ExitStatus::Success
    })
}

/// Converts every document to a `.csf` file next to its source.
fn convert_local(tree: &md2wiki::DocumentTree) -> Result<RunReport> {
    let xref = XrefTable::build(tree);
    let mut report = RunReport::default();
    for id in tree.preorder() {
        let node = tree.node(id);
        let Some(doc) = &node.source else { continue };
        let source = doc.relative_path.display().to_string();
        match convert::convert(doc, &xref) {
            Ok(converted) => {
                let output = doc.absolute_path.with_extension("csf");
                std::fs::write(&output, &converted.body)
                    .with_context(|| format!("failed to write {}", output.display()))?;
                info!(output = %output.display(), "wrote");
                report.record(PageOutcome {
                    source,
                    title: converted.title,
                    outcome: Outcome::Created {
                        page_id: output.display().to_string(),
                    },
                    diagnostics: converted.diagnostics,
                });
            }
            Err(e) => {
                report.record(PageOutcome {
                    source,
                    title: node.title.clone(),
                    outcome: Outcome::Failed {
                        reason: e.to_string(),
                    },
                    diagnostics: Vec::new(),
                });
            }
        }
    }
    Ok(report)
}

fn emit(cli: &Cli, report: &RunReport) {
    if cli.json {
        println!("{}", report.to_json());
    } else {
        println!("{report}");
    }
}
