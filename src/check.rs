// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! One-shot lint of files on disk, driven through the same scheduler and
//! publication engine the server uses.

use anyhow::Result;
use lsp_types::{Diagnostic, DiagnosticSeverity, Uri};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::RwLock;
use tracing::debug;

use crate::compiler::TokenCompiler;
use crate::config::Config;
use crate::coordinator::{Coordinator, DiagnosticSink};
use crate::documents::{DocumentStore, path_to_uri};

/// Outcome for one file named on the command line.
#[derive(Debug)]
pub struct FileReport {
    /// The path as given.
    pub path: PathBuf,
    /// Published diagnostics, in position order.
    pub diagnostics: Vec<Diagnostic>,
    /// Why the file could not be checked at all.
    pub failure: Option<String>,
}

/// Outcome of a check run, in command-line order.
#[derive(Debug, Default)]
pub struct CheckReport {
    /// One entry per input file.
    pub files: Vec<FileReport>,
}

impl CheckReport {
    /// Number of diagnostics with `severity` across all files.
    #[must_use]
    pub fn count(&self, severity: DiagnosticSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|f| &f.diagnostics)
            .filter(|d| d.severity == Some(severity))
            .count()
    }

    /// Whether any file has an error or could not be checked.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.count(DiagnosticSeverity::ERROR) > 0 || self.files.iter().any(|f| f.failure.is_some())
    }
}

/// Keeps the latest publication per document.
#[derive(Default)]
struct CollectingSink {
    published: Mutex<HashMap<Uri, Vec<Diagnostic>>>,
}

impl CollectingSink {
    fn take(&self, uri: &Uri) -> Option<Vec<Diagnostic>> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(uri)
    }
}

impl DiagnosticSink for CollectingSink {
    fn publish(&self, uri: Uri, _version: Option<i32>, diagnostics: Vec<Diagnostic>) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(uri, diagnostics);
    }
}

/// Lints `files` in a single pass.
///
/// # Errors
///
/// Returns an error if a readable path cannot be expressed as a URI.
pub async fn check_files(config: &Config, files: &[PathBuf]) -> Result<CheckReport> {
    let documents = Arc::new(RwLock::new(DocumentStore::new()));
    let sink = Arc::new(CollectingSink::default());
    let coordinator = Coordinator::new(
        documents.clone(),
        TokenCompiler::new(documents),
        sink.clone(),
        config.debounce(),
    );

    let mut loaded: Vec<(PathBuf, Result<Uri, String>)> = Vec::new();
    for file in files {
        match tokio::fs::read_to_string(file).await {
            Ok(text) => {
                let path = tokio::fs::canonicalize(file)
                    .await
                    .unwrap_or_else(|_| file.clone());
                let uri = path_to_uri(&path)?;
                coordinator
                    .documents()
                    .write()
                    .await
                    .open(path.clone(), uri.clone(), text, 0);
                coordinator.scheduler().enqueue(path);
                loaded.push((file.clone(), Ok(uri)));
            }
            Err(e) => loaded.push((file.clone(), Err(e.to_string()))),
        }
    }

    debug!("Checking {} file(s)", coordinator.scheduler().queued().len());
    coordinator.scheduler().drain_and_run().await;

    let mut report = CheckReport::default();
    for (file, uri) in loaded {
        let entry = match uri {
            Ok(uri) => FileReport {
                path: file,
                diagnostics: sink.take(&uri).unwrap_or_default(),
                failure: None,
            },
            Err(reason) => FileReport {
                path: file,
                diagnostics: Vec::new(),
                failure: Some(reason),
            },
        };
        report.files.push(entry);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[tokio::test]
    async fn test_check_reports_per_file() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let broken = dir.path().join("broken.sx");
        let clean = dir.path().join("clean.sx");
        let missing = dir.path().join("missing.sx");
        std::fs::write(&broken, "fn f( {\n")?;
        std::fs::write(&clean, "let a = 1 // TODO rename\n")?;

        let report = check_files(
            &Config::default(),
            &[broken.clone(), clean.clone(), missing.clone()],
        )
        .await?;

        assert_eq!(report.files.len(), 3);
        assert_eq!(report.files[0].path, broken);
        assert_eq!(report.files[0].diagnostics.len(), 2);

        let clean_report = &report.files[1];
        assert!(clean_report.failure.is_none());
        let hint = clean_report.diagnostics.first().context("marker hint")?;
        assert_eq!(hint.severity, Some(DiagnosticSeverity::HINT));

        assert!(report.files[2].failure.is_some());
        assert_eq!(report.count(DiagnosticSeverity::ERROR), 2);
        assert!(report.has_errors());
        Ok(())
    }

    #[tokio::test]
    async fn test_clean_files_have_no_errors() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("ok.sx");
        std::fs::write(&file, "fn ok(a) {\n  a\n}\n")?;

        let report = check_files(&Config::default(), &[file]).await?;
        assert!(!report.has_errors());
        assert!(report.files[0].diagnostics.is_empty());
        Ok(())
    }
}
