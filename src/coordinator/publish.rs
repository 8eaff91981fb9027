// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Diagnostic publication.
//!
//! A batch is converted and partitioned by owning document before anything
//! is sent, and the whole batch goes out under one lock so publications
//! from different batches (and from close) never interleave.

use lsp_types::{Diagnostic, DiagnosticSeverity, Uri};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::compiler::{CompileOutput, CompilerDiagnostic, Severity};
use crate::documents::DocumentStore;

/// Client-facing channel for `textDocument/publishDiagnostics`.
pub trait DiagnosticSink: Send + Sync + 'static {
    /// Replaces the diagnostics shown for `uri`. An empty list clears them.
    fn publish(&self, uri: Uri, version: Option<i32>, diagnostics: Vec<Diagnostic>);
}

impl<S: DiagnosticSink + ?Sized> DiagnosticSink for Arc<S> {
    fn publish(&self, uri: Uri, version: Option<i32>, diagnostics: Vec<Diagnostic>) {
        (**self).publish(uri, version, diagnostics);
    }
}

/// Converts a compiler diagnostic into its protocol form.
#[must_use]
pub fn to_protocol(raw: CompilerDiagnostic) -> Diagnostic {
    let severity = match raw.severity {
        Severity::Error => DiagnosticSeverity::ERROR,
        Severity::Warning => DiagnosticSeverity::WARNING,
        Severity::Information => DiagnosticSeverity::INFORMATION,
        Severity::Hint => DiagnosticSeverity::HINT,
    };
    Diagnostic {
        range: raw.range,
        severity: Some(severity),
        source: Some(raw.source),
        message: raw.message,
        ..Default::default()
    }
}

/// Reconciles compiler output with what the editor shows.
pub struct DiagnosticPublisher<S> {
    sink: S,
    /// Paths whose last publication was non-empty.
    published: Mutex<HashSet<PathBuf>>,
}

impl<S: DiagnosticSink> DiagnosticPublisher<S> {
    /// Creates a publisher writing to `sink`.
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            published: Mutex::new(HashSet::new()),
        }
    }

    /// The underlying sink.
    pub const fn sink(&self) -> &S {
        &self.sink
    }

    /// Publishes the result of compiling `compiled`.
    ///
    /// Open documents with diagnostics get exactly that set, and open
    /// documents that compiled clean get an explicit empty set. Nothing is
    /// sent for documents that are not open. Paths that failed to compile
    /// keep whatever was published before. Every publication goes to the
    /// URI the client opened the document with.
    pub async fn publish_batch(
        &self,
        compiled: &[PathBuf],
        mut output: CompileOutput,
        documents: &RwLock<DocumentStore>,
    ) {
        for failure in &output.failures {
            warn!("Keeping previous diagnostics: {failure}");
        }
        let mut grouped: BTreeMap<PathBuf, Vec<Diagnostic>> = BTreeMap::new();
        for raw in std::mem::take(&mut output.diagnostics) {
            grouped
                .entry(raw.path.clone())
                .or_default()
                .push(to_protocol(raw));
        }
        for path in compiled {
            if !output.failed(path) {
                grouped.entry(path.clone()).or_default();
            }
        }

        let mut published = self.published.lock().await;

        let mut outgoing: Vec<(PathBuf, Uri, Option<i32>, Vec<Diagnostic>)> = Vec::new();
        {
            let documents = documents.read().await;
            for (path, diagnostics) in grouped {
                match documents.uri(&path) {
                    Some(uri) => {
                        let (uri, version) = (uri.clone(), documents.version(&path));
                        outgoing.push((path, uri, version, diagnostics));
                    }
                    None => debug!(
                        "Suppressing {} diagnostic(s) for closed document {}",
                        diagnostics.len(),
                        path.display()
                    ),
                }
            }
        }

        for (path, uri, version, diagnostics) in outgoing {
            debug!(
                "Publishing {} diagnostic(s) for {}",
                diagnostics.len(),
                uri.as_str()
            );
            if diagnostics.is_empty() {
                published.remove(&path);
            } else {
                published.insert(path);
            }
            self.sink.publish(uri, version, diagnostics);
        }
    }

    /// Clears diagnostics for a document the editor closed, sending the
    /// empty set to `uri`.
    pub async fn clear(&self, path: &Path, uri: Uri) {
        let mut published = self.published.lock().await;
        published.remove(path);
        debug!("Clearing diagnostics for {}", uri.as_str());
        self.sink.publish(uri, None, Vec::new());
    }

    /// Paths whose most recent publication was non-empty, sorted.
    pub async fn published_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.published.lock().await.iter().cloned().collect();
        paths.sort();
        paths
    }
}
