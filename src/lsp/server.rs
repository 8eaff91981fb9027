// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Language server main loop.
//!
//! Reads framed messages, handles lifecycle and document notifications
//! inline in arrival order, and hands every analysis request to its own
//! task. Responses and diagnostic pushes all go through one writer task.

use anyhow::{Context, Result};
use bytes::BytesMut;
use lsp_types::{
    CompletionOptions, DidChangeConfigurationParams, Diagnostic, HoverProviderCapability,
    InitializeParams, InitializeResult, OneOf, PositionEncodingKind, PublishDiagnosticsParams,
    ServerCapabilities, ServerInfo, SignatureHelpOptions, TextDocumentSyncCapability,
    TextDocumentSyncKind, TextDocumentSyncOptions, TextDocumentSyncSaveOptions, Uri,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::protocol::{
    INVALID_PARAMS, INVALID_REQUEST, Incoming, METHOD_NOT_FOUND, NotificationMessage,
    REQUEST_FAILED, RequestId, RequestMessage, ResponseMessage, SERVER_NOT_INITIALIZED,
    encode_message, try_parse_message,
};
use crate::compiler::TokenCompiler;
use crate::config::{Config, debounce_from_settings};
use crate::coordinator::{Coordinator, DiagnosticSink, MEMBER_ACCESS, RequestKind, empty_result};
use crate::documents::DocumentStore;
use crate::error::RequestError;

enum Outbound {
    Frame(Vec<u8>),
    /// Acknowledged once every earlier frame has been written.
    Flush(oneshot::Sender<()>),
}

/// Sending half of the single outgoing writer.
#[derive(Clone)]
pub struct Outgoing {
    tx: mpsc::UnboundedSender<Outbound>,
}

impl Outgoing {
    /// Spawns the writer task over `output`.
    pub fn spawn<W>(output: W) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(writer_task(rx, output));
        Self { tx }
    }

    /// Queues a message for writing.
    pub fn send<T: Serialize>(&self, message: &T) {
        match encode_message(message) {
            Ok(frame) => {
                if self.tx.send(Outbound::Frame(frame)).is_err() {
                    debug!("Writer closed, dropping message");
                }
            }
            Err(e) => error!("Failed to encode outgoing message: {e}"),
        }
    }

    /// Waits until everything queued so far has been written.
    pub async fn flush(&self) {
        let (done, written) = oneshot::channel();
        if self.tx.send(Outbound::Flush(done)).is_ok() {
            let _ = written.await;
        }
    }
}

impl DiagnosticSink for Outgoing {
    fn publish(&self, uri: Uri, version: Option<i32>, diagnostics: Vec<Diagnostic>) {
        let params = PublishDiagnosticsParams::new(uri, diagnostics, version);
        match serde_json::to_value(params) {
            Ok(params) => self.send(&NotificationMessage::new(
                "textDocument/publishDiagnostics",
                params,
            )),
            Err(e) => error!("Failed to serialize diagnostics: {e}"),
        }
    }
}

async fn writer_task<W>(mut rx: mpsc::UnboundedReceiver<Outbound>, mut output: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(frame) => {
                trace!("Sending: {}", String::from_utf8_lossy(&frame));
                let written = async {
                    output.write_all(&frame).await?;
                    output.flush().await
                };
                if let Err(e) = written.await {
                    error!("Failed to write to client: {e}");
                    break;
                }
            }
            Outbound::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
    debug!("Writer task exiting");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Uninitialized,
    Running,
    ShuttingDown,
}

/// What the read loop should do after a message.
enum Flow {
    Continue,
    /// `exit` received; `true` if `shutdown` came first.
    Exit(bool),
}

/// The server: lifecycle state plus the coordinator it drives.
pub struct LanguageServer {
    coordinator: Arc<Coordinator<TokenCompiler, Outgoing>>,
    outgoing: Outgoing,
    lifecycle: Lifecycle,
}

impl LanguageServer {
    /// Creates a server writing to `outgoing`.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn new(config: &Config, outgoing: Outgoing) -> Self {
        let documents = Arc::new(RwLock::new(DocumentStore::new()));
        let coordinator = Coordinator::new(
            documents.clone(),
            TokenCompiler::new(documents),
            outgoing.clone(),
            config.debounce(),
        );
        Self {
            coordinator,
            outgoing,
            lifecycle: Lifecycle::Uninitialized,
        }
    }

    /// Serves until `exit` or end of input. Returns whether the session
    /// ended cleanly (`shutdown` before `exit`).
    ///
    /// # Errors
    ///
    /// Returns an error if reading input fails.
    pub async fn run<R>(mut self, mut input: R) -> Result<bool>
    where
        R: AsyncRead + Unpin,
    {
        let mut buffer = BytesMut::with_capacity(8192);
        info!("Language server starting, waiting for messages on stdin");

        let clean = 'read: loop {
            let n = input
                .read_buf(&mut buffer)
                .await
                .context("Failed to read from stdin")?;
            if n == 0 {
                info!("Input closed");
                break 'read false;
            }

            loop {
                match try_parse_message(&mut buffer) {
                    Ok(Some(body)) => {
                        trace!("Received: {body}");
                        if let Flow::Exit(clean) = self.handle_message(&body).await {
                            break 'read clean;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => warn!("Dropping malformed frame: {e}"),
                }
            }
        };

        self.outgoing.flush().await;
        info!("Language server exiting");
        Ok(clean)
    }

    async fn handle_message(&mut self, body: &str) -> Flow {
        match Incoming::parse(body) {
            Ok(Incoming::Request(request)) => {
                self.handle_request(request);
                Flow::Continue
            }
            Ok(Incoming::Notification(notification)) => {
                self.handle_notification(notification).await
            }
            Ok(Incoming::Response(response)) => {
                debug!("Ignoring response for id {:?}", response.id);
                Flow::Continue
            }
            Err(e) => {
                warn!("Ignoring message: {e:#}");
                Flow::Continue
            }
        }
    }

    fn handle_request(&mut self, request: RequestMessage) {
        debug!("Handling request: {} (id={:?})", request.method, request.id);
        let id = request.id;

        match (request.method.as_str(), self.lifecycle) {
            ("initialize", Lifecycle::Uninitialized) => {
                let response = self.initialize(id, request.params);
                self.outgoing.send(&response);
            }
            ("initialize", _) => self.outgoing.send(&ResponseMessage::error(
                Some(id),
                INVALID_REQUEST,
                "Server is already initialized",
            )),
            ("shutdown", _) => {
                info!("Shutdown requested");
                self.lifecycle = Lifecycle::ShuttingDown;
                self.outgoing.send(&ResponseMessage::success(id, Value::Null));
            }
            (_, Lifecycle::Uninitialized) => self.outgoing.send(&ResponseMessage::error(
                Some(id),
                SERVER_NOT_INITIALIZED,
                "Server is not initialized",
            )),
            (_, Lifecycle::ShuttingDown) => self.outgoing.send(&ResponseMessage::error(
                Some(id),
                INVALID_REQUEST,
                "Server is shutting down",
            )),
            (method, Lifecycle::Running) => match RequestKind::from_method(method) {
                Some(kind) => self.dispatch(id, kind, request.params),
                None => {
                    warn!("Unknown method: {method}");
                    self.outgoing.send(&ResponseMessage::error(
                        Some(id),
                        METHOD_NOT_FOUND,
                        format!("Unknown method: {method}"),
                    ));
                }
            },
        }
    }

    fn dispatch(&self, id: RequestId, kind: RequestKind, params: Value) {
        let handle = self.coordinator.dispatch(kind, params);
        let outgoing = self.outgoing.clone();
        tokio::spawn(async move {
            let response = match handle.await {
                Ok(Ok(result)) => ResponseMessage::success(id, result),
                Ok(Err(e)) => error_response(id, kind, &e),
                Err(e) => {
                    error!("{} handler did not complete: {e}", kind.method());
                    ResponseMessage::error(Some(id), REQUEST_FAILED, "Request handler failed")
                }
            };
            outgoing.send(&response);
        });
    }

    fn initialize(&mut self, id: RequestId, params: Value) -> ResponseMessage {
        let params: InitializeParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                warn!("Invalid initialize params: {e}");
                return ResponseMessage::error(Some(id), INVALID_PARAMS, e.to_string());
            }
        };

        if let Some(client) = &params.client_info {
            info!(
                "Client connecting: {} v{}",
                client.name,
                client.version.as_deref().unwrap_or("unknown")
            );
        }
        if let Some(debounce) = params
            .initialization_options
            .as_ref()
            .and_then(debounce_from_settings)
        {
            self.coordinator.set_debounce(debounce);
        }

        self.lifecycle = Lifecycle::Running;
        let result = InitializeResult {
            capabilities: capabilities(),
            server_info: Some(ServerInfo {
                name: "sextant".to_string(),
                version: Some(env!("SEXTANT_VERSION").to_string()),
            }),
        };
        match serde_json::to_value(result) {
            Ok(result) => ResponseMessage::success(id, result),
            Err(e) => ResponseMessage::error(Some(id), REQUEST_FAILED, e.to_string()),
        }
    }

    async fn handle_notification(&mut self, notification: NotificationMessage) -> Flow {
        debug!("Handling notification: {}", notification.method);
        let method = notification.method.as_str();

        match method {
            "exit" => return Flow::Exit(self.lifecycle == Lifecycle::ShuttingDown),
            "initialized" => info!("Client initialized"),
            _ if self.lifecycle != Lifecycle::Running => {
                debug!("Ignoring {method} outside a running session");
            }
            "textDocument/didOpen" => {
                if let Some(params) = params(method, notification.params) {
                    log_outcome(method, self.coordinator.did_open(params).await);
                }
            }
            "textDocument/didChange" => {
                if let Some(params) = params(method, notification.params) {
                    log_outcome(method, self.coordinator.did_change(params).await);
                }
            }
            "textDocument/didSave" => {
                if let Some(params) = params(method, notification.params) {
                    log_outcome(method, self.coordinator.did_save(params).await);
                }
            }
            "textDocument/didClose" => {
                if let Some(params) = params(method, notification.params) {
                    log_outcome(method, self.coordinator.did_close(params).await);
                }
            }
            "workspace/didChangeConfiguration" => {
                if let Some(DidChangeConfigurationParams { settings }) =
                    params(method, notification.params)
                {
                    match debounce_from_settings(&settings) {
                        Some(debounce) => self.coordinator.set_debounce(debounce),
                        None => debug!("No debounce setting in configuration change"),
                    }
                }
            }
            "$/cancelRequest" => debug!("Cancellation is not supported; request runs to completion"),
            _ => debug!("Ignoring unknown notification: {method}"),
        }
        Flow::Continue
    }
}

fn params<T: DeserializeOwned>(method: &str, params: Value) -> Option<T> {
    match serde_json::from_value(params) {
        Ok(params) => Some(params),
        Err(e) => {
            warn!("Invalid {method} params: {e}");
            None
        }
    }
}

fn log_outcome(method: &str, outcome: Result<(), RequestError>) {
    match outcome {
        Ok(()) => {}
        Err(e @ RequestError::Resolution { .. }) => info!("{method}: ignoring document: {e}"),
        Err(e) => warn!("{method}: {e}"),
    }
}

/// Maps a request failure to the response the client sees.
///
/// No-result and unresolvable-document failures answer with the request's
/// empty result; everything else is a protocol error.
#[must_use]
pub fn error_response(id: RequestId, kind: RequestKind, e: &RequestError) -> ResponseMessage {
    let method = kind.method();
    match e {
        RequestError::NoResult(_) => {
            info!("{method}: {e}");
            ResponseMessage::success(id, empty_result(kind))
        }
        RequestError::Resolution { .. } => {
            info!("{method}: answering empty for unresolvable document: {e}");
            ResponseMessage::success(id, empty_result(kind))
        }
        RequestError::Compile(_) | RequestError::Unimplemented(_) => {
            warn!("{method}: {e}");
            ResponseMessage::error(Some(id), REQUEST_FAILED, e.to_string())
        }
        RequestError::InvalidParams(_) => {
            warn!("{method}: {e}");
            ResponseMessage::error(Some(id), INVALID_PARAMS, e.to_string())
        }
    }
}

fn capabilities() -> ServerCapabilities {
    ServerCapabilities {
        position_encoding: Some(PositionEncodingKind::UTF16),
        text_document_sync: Some(TextDocumentSyncCapability::Options(
            TextDocumentSyncOptions {
                open_close: Some(true),
                change: Some(TextDocumentSyncKind::INCREMENTAL),
                save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                ..Default::default()
            },
        )),
        hover_provider: Some(HoverProviderCapability::Simple(true)),
        completion_provider: Some(CompletionOptions {
            trigger_characters: Some(vec![MEMBER_ACCESS.to_string()]),
            ..Default::default()
        }),
        signature_help_provider: Some(SignatureHelpOptions {
            trigger_characters: Some(vec!["(".to_string(), ",".to_string()]),
            ..Default::default()
        }),
        definition_provider: Some(OneOf::Left(true)),
        references_provider: Some(OneOf::Left(true)),
        document_symbol_provider: Some(OneOf::Left(true)),
        document_formatting_provider: Some(OneOf::Left(true)),
        document_range_formatting_provider: Some(OneOf::Left(true)),
        ..Default::default()
    }
}

/// Runs the server over the process's stdin and stdout.
///
/// # Errors
///
/// Returns an error if reading stdin fails.
pub async fn serve_stdio(config: &Config) -> Result<bool> {
    let outgoing = Outgoing::spawn(tokio::io::stdout());
    LanguageServer::new(config, outgoing)
        .run(tokio::io::stdin())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileError;
    use anyhow::anyhow;
    use serde_json::json;
    use std::time::Duration;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    /// Client end of an in-memory connection to a running server.
    struct TestClient {
        reader: ReadHalf<DuplexStream>,
        writer: WriteHalf<DuplexStream>,
        buffer: BytesMut,
        server: tokio::task::JoinHandle<Result<bool>>,
    }

    impl TestClient {
        fn start() -> Self {
            let (client, server_end) = tokio::io::duplex(64 * 1024);
            let (server_read, server_write) = tokio::io::split(server_end);
            let config = Config {
                debounce_ms: 10,
                ..Config::default()
            };
            let server = LanguageServer::new(&config, Outgoing::spawn(server_write));
            let server = tokio::spawn(server.run(server_read));
            let (reader, writer) = tokio::io::split(client);
            Self {
                reader,
                writer,
                buffer: BytesMut::new(),
                server,
            }
        }

        async fn send(&mut self, message: Value) -> Result<()> {
            self.writer.write_all(&encode_message(&message)?).await?;
            Ok(())
        }

        async fn recv(&mut self) -> Result<Value> {
            loop {
                if let Some(body) = try_parse_message(&mut self.buffer)? {
                    return Ok(serde_json::from_str(&body)?);
                }
                let read = tokio::time::timeout(
                    Duration::from_secs(5),
                    self.reader.read_buf(&mut self.buffer),
                )
                .await??;
                if read == 0 {
                    return Err(anyhow!("server closed the connection"));
                }
            }
        }

        /// Reads until a message satisfies `pred`.
        async fn recv_until(&mut self, pred: impl Fn(&Value) -> bool) -> Result<Value> {
            loop {
                let message = self.recv().await?;
                if pred(&message) {
                    return Ok(message);
                }
            }
        }

        async fn initialize(&mut self) -> Result<Value> {
            self.send(json!({
                "jsonrpc": "2.0", "id": 1, "method": "initialize",
                "params": { "capabilities": {}, "initializationOptions": { "debounceMs": 20 } }
            }))
            .await?;
            let response = self.recv_until(|m| m["id"] == 1).await?;
            self.send(json!({ "jsonrpc": "2.0", "method": "initialized", "params": {} }))
                .await?;
            Ok(response)
        }
    }

    const URI: &str = "file:///nonexistent/sextant-server/main.sx";

    #[tokio::test]
    async fn test_initialize_advertises_capabilities() -> Result<()> {
        let mut client = TestClient::start();
        let response = client.initialize().await?;
        let caps = &response["result"]["capabilities"];
        assert_eq!(caps["completionProvider"]["triggerCharacters"], json!(["."]));
        assert_eq!(caps["hoverProvider"], true);
        assert!(caps.get("codeActionProvider").is_none());
        assert_eq!(response["result"]["serverInfo"]["name"], "sextant");
        Ok(())
    }

    #[tokio::test]
    async fn test_requests_before_initialize_are_rejected() -> Result<()> {
        let mut client = TestClient::start();
        client
            .send(json!({ "jsonrpc": "2.0", "id": 7, "method": "textDocument/hover", "params": {} }))
            .await?;
        let response = client.recv().await?;
        assert_eq!(response["error"]["code"], SERVER_NOT_INITIALIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_open_publishes_and_queries_answer() -> Result<()> {
        let mut client = TestClient::start();
        client.initialize().await?;

        client
            .send(json!({
                "jsonrpc": "2.0", "method": "textDocument/didOpen",
                "params": { "textDocument": {
                    "uri": URI, "languageId": "sextant", "version": 1,
                    "text": "fn greet(name) {\n  name\n}\ngreet(\n"
                }}
            }))
            .await?;
        let published = client
            .recv_until(|m| m["method"] == "textDocument/publishDiagnostics")
            .await?;
        assert_eq!(published["params"]["uri"], URI);
        assert_eq!(published["params"]["version"], 1);
        assert_eq!(
            published["params"]["diagnostics"][0]["message"],
            "unclosed '('"
        );

        client
            .send(json!({
                "jsonrpc": "2.0", "id": 2, "method": "textDocument/signatureHelp",
                "params": { "textDocument": { "uri": URI }, "position": { "line": 3, "character": 6 } }
            }))
            .await?;
        let help = client.recv_until(|m| m["id"] == 2).await?;
        assert_eq!(help["result"]["signatures"][0]["label"], "fn greet(name)");

        // No identifier under the cursor: empty answer, not an error
        client
            .send(json!({
                "jsonrpc": "2.0", "id": 3, "method": "textDocument/hover",
                "params": { "textDocument": { "uri": URI }, "position": { "line": 2, "character": 0 } }
            }))
            .await?;
        let hover = client.recv_until(|m| m["id"] == 3).await?;
        assert_eq!(hover["result"], Value::Null);
        assert!(hover.get("error").is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_close_clears_diagnostics() -> Result<()> {
        let mut client = TestClient::start();
        client.initialize().await?;
        client
            .send(json!({
                "jsonrpc": "2.0", "method": "textDocument/didOpen",
                "params": { "textDocument": {
                    "uri": URI, "languageId": "sextant", "version": 1, "text": "{\n"
                }}
            }))
            .await?;
        client
            .recv_until(|m| m["method"] == "textDocument/publishDiagnostics")
            .await?;

        client
            .send(json!({
                "jsonrpc": "2.0", "method": "textDocument/didClose",
                "params": { "textDocument": { "uri": URI } }
            }))
            .await?;
        let cleared = client
            .recv_until(|m| m["method"] == "textDocument/publishDiagnostics")
            .await?;
        assert_eq!(cleared["params"]["diagnostics"], json!([]));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_and_unimplemented_methods() -> Result<()> {
        let mut client = TestClient::start();
        client.initialize().await?;

        client
            .send(json!({ "jsonrpc": "2.0", "id": 4, "method": "textDocument/rename", "params": {} }))
            .await?;
        let unknown = client.recv_until(|m| m["id"] == 4).await?;
        assert_eq!(unknown["error"]["code"], METHOD_NOT_FOUND);

        client
            .send(json!({
                "jsonrpc": "2.0", "id": 5, "method": "textDocument/codeAction",
                "params": {
                    "textDocument": { "uri": URI },
                    "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 0 } },
                    "context": { "diagnostics": [] }
                }
            }))
            .await?;
        let action = client.recv_until(|m| m["id"] == 5).await?;
        assert_eq!(action["error"]["code"], REQUEST_FAILED);
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_then_exit_is_clean() -> Result<()> {
        let mut client = TestClient::start();
        client.initialize().await?;
        client
            .send(json!({ "jsonrpc": "2.0", "id": 9, "method": "shutdown" }))
            .await?;
        let response = client.recv_until(|m| m["id"] == 9).await?;
        assert_eq!(response["result"], Value::Null);

        client
            .send(json!({ "jsonrpc": "2.0", "method": "exit" }))
            .await?;
        assert!(client.server.await??);
        Ok(())
    }

    #[tokio::test]
    async fn test_exit_without_shutdown_is_unclean() -> Result<()> {
        let mut client = TestClient::start();
        client.initialize().await?;
        client
            .send(json!({ "jsonrpc": "2.0", "method": "exit" }))
            .await?;
        assert!(!client.server.await??);
        Ok(())
    }

    #[test]
    fn test_error_response_mapping() {
        let id = RequestId::Number(1);
        let empty = error_response(
            id.clone(),
            RequestKind::Completion,
            &RequestError::no_result("nothing"),
        );
        assert_eq!(empty.result, Some(json!([])));

        let failed = error_response(
            id.clone(),
            RequestKind::Hover,
            &RequestError::Compile(CompileError::Aborted("cancelled".to_string())),
        );
        assert_eq!(failed.error.map(|e| e.code), Some(REQUEST_FAILED));

        let invalid = error_response(
            id,
            RequestKind::Hover,
            &RequestError::InvalidParams("missing field".to_string()),
        );
        assert_eq!(invalid.error.map(|e| e.code), Some(INVALID_PARAMS));
    }
}
