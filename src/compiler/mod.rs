// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Compilation cache interface and the shared handle that serializes
//! every compiling operation.
//!
//! The cache is not safe for concurrent mutation. All access goes through
//! [`CompilerHandle`], which holds an owned async lock for the duration of
//! a blocking compile task. Snapshots handed out are immutable `Arc`s, so
//! queries against them run without the lock.

mod token;

pub use token::TokenCompiler;

use lsp_types::{Range, SymbolKind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::CompileError;

/// Severity of a compiler diagnostic, independent of the editor protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Prevents the file from compiling.
    Error,
    /// Suspicious but valid.
    Warning,
    /// Informational note.
    Information,
    /// Style hint.
    Hint,
}

/// A compiler message tagged with the file it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerDiagnostic {
    /// Owning document.
    pub path: PathBuf,
    /// Location in the owning document.
    pub range: Range,
    /// How serious the problem is.
    pub severity: Severity,
    /// Human-readable description.
    pub message: String,
    /// Which compiler stage produced it.
    pub source: String,
}

/// An identifier occurrence in compiled source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Identifier text.
    pub name: String,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset one past the last character.
    pub end: usize,
}

/// A declaration found while compiling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// Declared name.
    pub name: String,
    /// Declaration kind.
    pub kind: SymbolKind,
    /// Byte offset of the name.
    pub start: usize,
    /// Byte offset one past the name.
    pub end: usize,
    /// Declaration text as written (for hover and signature help).
    pub detail: String,
    /// Parameter labels for function declarations.
    pub parameters: Vec<String>,
}

/// Immutable result of compiling one document.
#[derive(Debug, Clone)]
pub struct CompiledSnapshot {
    /// Document that was compiled.
    pub path: PathBuf,
    /// Monotonic stamp; larger is more recent.
    pub stamp: u64,
    /// Client version of the buffer that was compiled, if it was open.
    pub document_version: Option<i32>,
    /// Source text the snapshot was built from.
    pub text: String,
    /// Identifier occurrences in source order (keywords excluded).
    pub tokens: Vec<Token>,
    /// Declarations in source order.
    pub symbols: Vec<Symbol>,
}

impl CompiledSnapshot {
    /// Returns the identifier spanning `offset`, including one ending exactly there.
    #[must_use]
    pub fn token_at(&self, offset: usize) -> Option<&Token> {
        self.tokens
            .iter()
            .find(|t| t.start <= offset && offset <= t.end)
    }

    /// Returns the first declaration of `name`.
    #[must_use]
    pub fn declaration(&self, name: &str) -> Option<&Symbol> {
        self.symbols.iter().find(|s| s.name == name)
    }
}

/// Result of a batch compile.
#[derive(Debug, Default)]
pub struct CompileOutput {
    /// Diagnostics for every file that compiled.
    pub diagnostics: Vec<CompilerDiagnostic>,
    /// Per-path failures; these paths have no diagnostics in this batch.
    pub failures: Vec<CompileError>,
}

impl CompileOutput {
    /// Whether `path` failed to compile in this batch.
    #[must_use]
    pub fn failed(&self, path: &Path) -> bool {
        self.failures.iter().any(|f| f.path() == Some(path))
    }
}

/// Produces compiled snapshots and batch diagnostics.
pub trait CompilationCache: Send + 'static {
    /// Forces a fresh compile of `path` and returns the new snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be read or compiled.
    fn current_version(&mut self, path: &Path) -> Result<Arc<CompiledSnapshot>, CompileError>;

    /// Returns the most recent snapshot for `path`, compiling only if none exists.
    ///
    /// # Errors
    ///
    /// Returns an error if nothing is cached and the compile fails.
    fn latest_compiled_version(
        &mut self,
        path: &Path,
    ) -> Result<Arc<CompiledSnapshot>, CompileError>;

    /// Compiles a batch and returns structured diagnostics.
    ///
    /// Per-path failures are reported in [`CompileOutput::failures`]; an
    /// `Err` means the whole batch failed.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be compiled at all.
    fn compile_files(&mut self, paths: &[PathBuf]) -> Result<CompileOutput, CompileError>;

    /// Drops everything cached for `path`.
    fn forget(&mut self, path: &Path);
}

/// Single access path to a [`CompilationCache`].
///
/// Every compiling call takes the lock and runs on the blocking pool, so
/// at most one compiler operation is in flight at a time.
pub struct CompilerHandle<C> {
    inner: Arc<Mutex<C>>,
}

impl<C> Clone for CompilerHandle<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: CompilationCache> CompilerHandle<C> {
    /// Wraps a cache.
    pub fn new(cache: C) -> Self {
        Self {
            inner: Arc::new(Mutex::new(cache)),
        }
    }

    /// Forces a fresh compile of `path`.
    ///
    /// # Errors
    ///
    /// Propagates the cache's failure.
    pub async fn current_version(&self, path: PathBuf) -> Result<Arc<CompiledSnapshot>, CompileError> {
        trace!("Fresh compile: {}", path.display());
        self.with_cache(move |cache| cache.current_version(&path))
            .await
    }

    /// Returns the latest cached snapshot of `path`.
    ///
    /// # Errors
    ///
    /// Propagates the cache's failure.
    pub async fn latest_compiled_version(
        &self,
        path: PathBuf,
    ) -> Result<Arc<CompiledSnapshot>, CompileError> {
        self.with_cache(move |cache| cache.latest_compiled_version(&path))
            .await
    }

    /// Batch-compiles `paths` for linting.
    ///
    /// # Errors
    ///
    /// Propagates a whole-batch failure.
    pub async fn compile_files(&self, paths: Vec<PathBuf>) -> Result<CompileOutput, CompileError> {
        self.with_cache(move |cache| cache.compile_files(&paths))
            .await
    }

    /// Evicts `path` from the cache.
    ///
    /// # Errors
    ///
    /// Returns an error if the eviction task was aborted.
    pub async fn forget(&self, path: PathBuf) -> Result<(), CompileError> {
        self.with_cache(move |cache| {
            cache.forget(&path);
            Ok(())
        })
        .await
    }

    async fn with_cache<T, F>(&self, f: F) -> Result<T, CompileError>
    where
        T: Send + 'static,
        F: FnOnce(&mut C) -> Result<T, CompileError> + Send + 'static,
    {
        let mut guard = self.inner.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || f(&mut guard))
            .await
            .map_err(|e| CompileError::Aborted(e.to_string()))?
    }
}
