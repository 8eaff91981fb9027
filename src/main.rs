// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Sextant language server and CLI.
//!
//! Runs the language server over stdio, or lints files once and prints
//! the diagnostics.

#![allow(clippy::print_stdout, reason = "CLI tool needs to output to stdout")]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lsp_types::DiagnosticSeverity;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use sextant::check::check_files;
use sextant::cli::{self, ColorConfig};
use sextant::config::Config;
use sextant::lsp;

/// Command-line arguments for Sextant.
#[derive(Parser, Debug)]
#[command(name = "sextant")]
#[command(about = "Language server with debounced linting and policy-driven recompilation")]
#[command(version = env!("SEXTANT_VERSION"))]
struct Args {
    /// The subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Lint debounce window in milliseconds.
    /// Overrides config file if set (default in config is 300).
    #[arg(long, global = true)]
    debounce_ms: Option<u64>,
}

/// Subcommands supported by Sextant.
#[derive(Subcommand, Debug)]
enum Command {
    /// Run the language server on stdio (default if no subcommand given).
    Serve,

    /// Lint files once and print their diagnostics.
    Check {
        /// Files to check.
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Disable colored output.
        #[arg(long)]
        nocolor: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let mut config = Config::load(args.config.clone())?;
    if let Some(debounce_ms) = args.debounce_ms {
        config.debounce_ms = debounce_ms;
    }
    init_tracing(&config)?;
    debug!("Configuration: {config:?}");

    match args.command {
        None | Some(Command::Serve) => run_server(&config).await,
        Some(Command::Check { files, nocolor }) => run_check(&config, &files, nocolor).await,
    }
}

/// `RUST_LOG` wins, then the `log_level` config key, then `sextant=info`.
fn init_tracing(config: &Config) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let directive = config.log_level.as_deref().unwrap_or("sextant=info");
            EnvFilter::try_new(directive)
                .with_context(|| format!("Invalid log_level: {directive}"))?
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

/// Runs the language server.
///
/// # Errors
///
/// Returns an error if stdin cannot be read.
async fn run_server(config: &Config) -> Result<ExitCode> {
    info!(
        "Sextant {} (debounce {}ms)",
        env!("SEXTANT_VERSION"),
        config.debounce_ms
    );
    let clean = lsp::serve_stdio(config).await?;
    Ok(if clean {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// Lints `files` and prints one line per diagnostic.
///
/// # Errors
///
/// Returns an error if a path cannot be converted for publication.
async fn run_check(config: &Config, files: &[PathBuf], nocolor: bool) -> Result<ExitCode> {
    let colors = ColorConfig::new(nocolor);
    let report = check_files(config, files).await?;

    for file in &report.files {
        let name = file.path.display().to_string();
        if let Some(reason) = &file.failure {
            println!(
                "{}: {}: cannot read file: {reason}",
                colors.bold(&name),
                colors.red("error")
            );
            continue;
        }
        for diagnostic in &file.diagnostics {
            println!("{}", cli::format_diagnostic(&colors, &name, diagnostic));
        }
    }

    let errors = report.count(DiagnosticSeverity::ERROR)
        + report.files.iter().filter(|f| f.failure.is_some()).count();
    println!(
        "{}",
        colors.dim(&cli::summary(
            errors,
            report.count(DiagnosticSeverity::WARNING),
            report.files.len()
        ))
    );

    Ok(if report.has_errors() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
