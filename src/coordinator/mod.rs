// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Request coordination.
//!
//! Wires the document store, the compiler handle, the lint scheduler and
//! the diagnostic publisher together. Document notifications mutate state
//! in arrival order; requests pick a snapshot according to their
//! [`RecompilePolicy`] and run the query against it without holding the
//! compiler lock.

mod policy;
mod publish;
mod scheduler;

pub use policy::{
    MEMBER_ACCESS, Recompile, RecompilePolicy, RequestKind, decide, preceding_char,
};
pub use publish::{DiagnosticPublisher, DiagnosticSink, to_protocol};
pub use scheduler::{LintPass, LintScheduler};

use lsp_types::{
    CodeActionParams, CodeActionResponse, CompletionItem, CompletionParams,
    DidChangeTextDocumentParams, DidCloseTextDocumentParams, DidOpenTextDocumentParams,
    DidSaveTextDocumentParams, DocumentFormattingParams, DocumentRangeFormattingParams,
    DocumentSymbol, DocumentSymbolParams, GotoDefinitionParams, Hover, HoverParams, Location,
    Position, ReferenceParams, SignatureHelp, SignatureHelpParams, TextEdit,
};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::analysis;
use crate::compiler::{CompilationCache, CompiledSnapshot, CompilerHandle};
use crate::documents::{DocumentStore, offset_at, uri_to_path};
use crate::error::RequestError;

/// Lint pass: batch-compile, then publish through the publication engine.
pub struct LintRunner<C, S> {
    compiler: CompilerHandle<C>,
    publisher: Arc<DiagnosticPublisher<S>>,
    documents: Arc<RwLock<DocumentStore>>,
}

impl<C: CompilationCache, S: DiagnosticSink> LintPass for LintRunner<C, S> {
    async fn run(&self, paths: Vec<PathBuf>) {
        match self.compiler.compile_files(paths.clone()).await {
            Ok(output) => {
                self.publisher
                    .publish_batch(&paths, output, &self.documents)
                    .await;
            }
            Err(e) => error!("Lint pass over {} file(s) failed: {e}", paths.len()),
        }
    }
}

/// Scheduler type driven by a [`Coordinator`].
pub type Scheduler<C, S> = LintScheduler<LintRunner<C, S>>;

/// Owns all per-server state and answers document notifications and
/// analysis requests.
pub struct Coordinator<C, S> {
    documents: Arc<RwLock<DocumentStore>>,
    compiler: CompilerHandle<C>,
    publisher: Arc<DiagnosticPublisher<S>>,
    scheduler: Arc<Scheduler<C, S>>,
}

impl<C: CompilationCache, S: DiagnosticSink> Coordinator<C, S> {
    /// Builds a coordinator around `compiler`, which must read buffers from
    /// `documents`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(
        documents: Arc<RwLock<DocumentStore>>,
        compiler: C,
        sink: S,
        debounce: Duration,
    ) -> Arc<Self> {
        let compiler = CompilerHandle::new(compiler);
        let publisher = Arc::new(DiagnosticPublisher::new(sink));
        let scheduler = LintScheduler::new(
            LintRunner {
                compiler: compiler.clone(),
                publisher: publisher.clone(),
                documents: documents.clone(),
            },
            debounce,
        );
        Arc::new(Self {
            documents,
            compiler,
            publisher,
            scheduler,
        })
    }

    /// Open-document buffers.
    pub const fn documents(&self) -> &Arc<RwLock<DocumentStore>> {
        &self.documents
    }

    /// The lint scheduler.
    pub const fn scheduler(&self) -> &Arc<Scheduler<C, S>> {
        &self.scheduler
    }

    /// The diagnostic publisher.
    pub const fn publisher(&self) -> &Arc<DiagnosticPublisher<S>> {
        &self.publisher
    }

    /// Changes the lint debounce window without dropping queued paths.
    pub fn set_debounce(&self, debounce: Duration) {
        self.scheduler.set_delay(debounce);
    }

    // -- Notifications --

    /// Tracks a newly opened document and lints it immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Resolution`] if the URI is not a local file.
    pub async fn did_open(&self, params: DidOpenTextDocumentParams) -> Result<(), RequestError> {
        let doc = params.text_document;
        let path = uri_to_path(&doc.uri)?;
        debug!("didOpen {} ({})", doc.uri.as_str(), doc.language_id);
        self.documents
            .write()
            .await
            .open(path.clone(), doc.uri, doc.text, doc.version);
        self.scheduler.enqueue_and_flush_now(path);
        Ok(())
    }

    /// Applies an edit, then schedules a debounced lint.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Resolution`] if the URI is not a local file.
    pub async fn did_change(
        &self,
        params: DidChangeTextDocumentParams,
    ) -> Result<(), RequestError> {
        let path = uri_to_path(&params.text_document.uri)?;
        let applied = self.documents.write().await.edit(
            &path,
            params.text_document.version,
            params.content_changes,
        );
        if let Err(e) = applied {
            warn!("{e}");
            return Ok(());
        }
        self.scheduler.enqueue(path);
        Ok(())
    }

    /// Lints a saved document immediately.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Resolution`] if the URI is not a local file.
    pub async fn did_save(&self, params: DidSaveTextDocumentParams) -> Result<(), RequestError> {
        let path = uri_to_path(&params.text_document.uri)?;
        if self.documents.read().await.is_open(&path) {
            self.scheduler.enqueue_and_flush_now(path);
        }
        Ok(())
    }

    /// Stops tracking a document, drops it from the lint queue, clears its
    /// diagnostics and evicts its cached snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Resolution`] if the URI is not a local file.
    pub async fn did_close(&self, params: DidCloseTextDocumentParams) -> Result<(), RequestError> {
        let uri = params.text_document.uri;
        let path = uri_to_path(&uri)?;
        self.documents.write().await.close(&path);
        self.scheduler.forget(&path);
        self.publisher.clear(&path, uri).await;
        if let Err(e) = self.compiler.forget(path).await {
            warn!("Cache eviction failed: {e}");
        }
        Ok(())
    }

    // -- Requests --

    /// Runs `kind` on its own task. The handle resolves to the serialized
    /// result.
    pub fn dispatch(
        self: &Arc<Self>,
        kind: RequestKind,
        params: Value,
    ) -> JoinHandle<Result<Value, RequestError>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.handle_request(kind, params).await })
    }

    /// Deserializes `params`, answers the request and serializes the result.
    ///
    /// # Errors
    ///
    /// Returns the request's [`RequestError`], or
    /// [`RequestError::InvalidParams`] if `params` do not match `kind`.
    pub async fn handle_request(
        &self,
        kind: RequestKind,
        params: Value,
    ) -> Result<Value, RequestError> {
        let result = match kind {
            RequestKind::Hover => serde_json::to_value(self.hover(parse(params)?).await?),
            RequestKind::Completion => {
                serde_json::to_value(self.completion(parse(params)?).await?)
            }
            RequestKind::Definition => {
                serde_json::to_value(self.definition(parse(params)?).await?)
            }
            RequestKind::References => {
                serde_json::to_value(self.references(parse(params)?).await?)
            }
            RequestKind::SignatureHelp => {
                serde_json::to_value(self.signature_help(parse(params)?).await?)
            }
            RequestKind::DocumentSymbols => {
                serde_json::to_value(self.document_symbols(parse(params)?).await?)
            }
            RequestKind::Formatting => {
                serde_json::to_value(self.formatting(parse(params)?).await?)
            }
            RequestKind::RangeFormatting => {
                serde_json::to_value(self.range_formatting(parse(params)?).await?)
            }
            RequestKind::CodeAction => {
                serde_json::to_value(self.code_action(parse(params)?).await?)
            }
        };
        Ok(result?)
    }

    /// Obtains a snapshot of `path` as fresh as `kind` requires.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Compile`] if a needed compile fails.
    pub async fn snapshot_for(
        &self,
        kind: RequestKind,
        path: &Path,
        position: Option<Position>,
    ) -> Result<Arc<CompiledSnapshot>, RequestError> {
        let decision = {
            let documents = self.documents.read().await;
            let content = documents.content(path).unwrap_or_default();
            let offset = position.map_or(0, |p| offset_at(content, p));
            decide(kind.policy(), offset, content)
        };
        debug!(
            "{}: {decision:?} for {}",
            kind.method(),
            path.display()
        );

        let snapshot = match decision {
            Recompile::ForceFresh => self.compiler.current_version(path.to_path_buf()).await?,
            Recompile::ReuseCached => {
                self.compiler
                    .latest_compiled_version(path.to_path_buf())
                    .await?
            }
            Recompile::WaitThenReuse => {
                self.scheduler.wait_for_pending_lint().await;
                self.compiler
                    .latest_compiled_version(path.to_path_buf())
                    .await?
            }
        };
        Ok(snapshot)
    }

    /// `textDocument/hover`
    ///
    /// # Errors
    ///
    /// See [`RequestError`].
    pub async fn hover(&self, params: HoverParams) -> Result<Hover, RequestError> {
        let at = params.text_document_position_params;
        let path = uri_to_path(&at.text_document.uri)?;
        let snapshot = self
            .snapshot_for(RequestKind::Hover, &path, Some(at.position))
            .await?;
        analysis::hover(&snapshot, at.position)
    }

    /// `textDocument/completion`. The prefix comes from the live buffer, so
    /// it is current even when the snapshot is not.
    ///
    /// # Errors
    ///
    /// See [`RequestError`].
    pub async fn completion(
        &self,
        params: CompletionParams,
    ) -> Result<Vec<CompletionItem>, RequestError> {
        let at = params.text_document_position;
        let path = uri_to_path(&at.text_document.uri)?;
        let prefix = {
            let documents = self.documents.read().await;
            let content = documents.content(&path).unwrap_or_default();
            analysis::identifier_prefix(content, offset_at(content, at.position)).to_string()
        };
        let snapshot = self
            .snapshot_for(RequestKind::Completion, &path, Some(at.position))
            .await?;
        Ok(analysis::completion(&snapshot, &prefix))
    }

    /// `textDocument/definition`
    ///
    /// # Errors
    ///
    /// See [`RequestError`].
    pub async fn definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Location, RequestError> {
        let at = params.text_document_position_params;
        let path = uri_to_path(&at.text_document.uri)?;
        let snapshot = self
            .snapshot_for(RequestKind::Definition, &path, Some(at.position))
            .await?;
        analysis::definition(&snapshot, &at.text_document.uri, at.position)
    }

    /// `textDocument/references`
    ///
    /// # Errors
    ///
    /// See [`RequestError`].
    pub async fn references(&self, params: ReferenceParams) -> Result<Vec<Location>, RequestError> {
        let at = params.text_document_position;
        let path = uri_to_path(&at.text_document.uri)?;
        let snapshot = self
            .snapshot_for(RequestKind::References, &path, Some(at.position))
            .await?;
        analysis::references(
            &snapshot,
            &at.text_document.uri,
            at.position,
            params.context.include_declaration,
        )
    }

    /// `textDocument/signatureHelp`
    ///
    /// # Errors
    ///
    /// See [`RequestError`].
    pub async fn signature_help(
        &self,
        params: SignatureHelpParams,
    ) -> Result<SignatureHelp, RequestError> {
        let at = params.text_document_position_params;
        let path = uri_to_path(&at.text_document.uri)?;
        let snapshot = self
            .snapshot_for(RequestKind::SignatureHelp, &path, Some(at.position))
            .await?;
        analysis::signature_help(&snapshot, at.position)
    }

    /// `textDocument/documentSymbol`
    ///
    /// # Errors
    ///
    /// See [`RequestError`].
    pub async fn document_symbols(
        &self,
        params: DocumentSymbolParams,
    ) -> Result<Vec<DocumentSymbol>, RequestError> {
        let path = uri_to_path(&params.text_document.uri)?;
        let snapshot = self
            .snapshot_for(RequestKind::DocumentSymbols, &path, None)
            .await?;
        Ok(analysis::document_symbols(&snapshot))
    }

    /// `textDocument/formatting`
    ///
    /// # Errors
    ///
    /// See [`RequestError`].
    pub async fn formatting(
        &self,
        params: DocumentFormattingParams,
    ) -> Result<Vec<TextEdit>, RequestError> {
        let path = uri_to_path(&params.text_document.uri)?;
        let snapshot = self
            .snapshot_for(RequestKind::Formatting, &path, None)
            .await?;
        Ok(analysis::formatting(&snapshot))
    }

    /// `textDocument/rangeFormatting`
    ///
    /// # Errors
    ///
    /// See [`RequestError`].
    pub async fn range_formatting(
        &self,
        params: DocumentRangeFormattingParams,
    ) -> Result<Vec<TextEdit>, RequestError> {
        let path = uri_to_path(&params.text_document.uri)?;
        let snapshot = self
            .snapshot_for(RequestKind::RangeFormatting, &path, Some(params.range.start))
            .await?;
        Ok(analysis::range_formatting(&snapshot, params.range))
    }

    /// `textDocument/codeAction`
    ///
    /// # Errors
    ///
    /// Always [`RequestError::Unimplemented`].
    pub async fn code_action(
        &self,
        params: CodeActionParams,
    ) -> Result<CodeActionResponse, RequestError> {
        uri_to_path(&params.text_document.uri)?;
        Err(RequestError::Unimplemented(RequestKind::CodeAction.method()))
    }
}

fn parse<T: serde::de::DeserializeOwned>(params: Value) -> Result<T, RequestError> {
    Ok(serde_json::from_value(params)?)
}

/// The result sent when a request has no meaningful answer.
#[must_use]
pub fn empty_result(kind: RequestKind) -> Value {
    match kind {
        RequestKind::Hover | RequestKind::Definition | RequestKind::SignatureHelp => Value::Null,
        RequestKind::Completion
        | RequestKind::References
        | RequestKind::DocumentSymbols
        | RequestKind::Formatting
        | RequestKind::RangeFormatting
        | RequestKind::CodeAction => Value::Array(Vec::new()),
    }
}
