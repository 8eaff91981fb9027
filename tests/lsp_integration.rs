// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

#![deny(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! End-to-end tests driving the `sextant` binary over stdio.

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use tempfile::TempDir;

/// A running server with framed stdio.
struct ServerProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    /// Holds the isolated config home for the lifetime of the process.
    _home: TempDir,
}

impl ServerProcess {
    fn spawn(extra_args: &[&str]) -> Result<Self> {
        let home = tempfile::tempdir()?;
        let mut child = Command::new(env!("CARGO_BIN_EXE_sextant"))
            .arg("serve")
            .args(extra_args)
            // Isolate from user-level config
            .env("XDG_CONFIG_HOME", home.path())
            .env_remove("SEXTANT_DEBOUNCE_MS")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .context("Failed to spawn sextant")?;

        let stdin = child.stdin.take().context("Failed to get stdin")?;
        let stdout = BufReader::new(child.stdout.take().context("Failed to get stdout")?);
        Ok(Self {
            child,
            stdin: Some(stdin),
            stdout,
            _home: home,
        })
    }

    fn send(&mut self, message: &Value) -> Result<()> {
        let body = serde_json::to_string(message)?;
        let stdin = self.stdin.as_mut().context("stdin already closed")?;
        write!(stdin, "Content-Length: {}\r\n\r\n{body}", body.len())?;
        stdin.flush()?;
        Ok(())
    }

    fn recv(&mut self) -> Result<Value> {
        let mut content_length = None;
        loop {
            let mut line = String::new();
            if self.stdout.read_line(&mut line)? == 0 {
                return Err(anyhow!("server closed stdout"));
            }
            let line = line.trim_end();
            if line.is_empty() {
                break;
            }
            if let Some((name, value)) = line.split_once(':')
                && name.eq_ignore_ascii_case("content-length")
            {
                content_length = Some(value.trim().parse::<usize>()?);
            }
        }
        let mut body = vec![0; content_length.context("missing Content-Length")?];
        self.stdout.read_exact(&mut body)?;
        Ok(serde_json::from_slice(&body)?)
    }

    fn recv_until(&mut self, pred: impl Fn(&Value) -> bool) -> Result<Value> {
        loop {
            let message = self.recv()?;
            if pred(&message) {
                return Ok(message);
            }
        }
    }

    fn request(&mut self, id: i64, method: &str, params: Value) -> Result<Value> {
        self.send(&json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params }))?;
        self.recv_until(|m| m["id"] == id)
    }

    fn notify(&mut self, method: &str, params: Value) -> Result<()> {
        self.send(&json!({ "jsonrpc": "2.0", "method": method, "params": params }))
    }

    fn initialize(&mut self) -> Result<Value> {
        let response = self.request(
            1,
            "initialize",
            json!({ "capabilities": {}, "clientInfo": { "name": "test", "version": "1.0" } }),
        )?;
        self.notify("initialized", json!({}))?;
        Ok(response)
    }

    fn next_diagnostics(&mut self) -> Result<Value> {
        let message = self.recv_until(|m| m["method"] == "textDocument/publishDiagnostics")?;
        Ok(message["params"].clone())
    }

    fn exit(&mut self) -> Result<std::process::ExitStatus> {
        self.notify("exit", Value::Null)?;
        drop(self.stdin.take());
        Ok(self.child.wait()?)
    }
}

impl Drop for ServerProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
    }
}

fn uri_for(path: &Path) -> String {
    format!("file://{}", path.display())
}

#[test]
fn test_full_session() -> Result<()> {
    let mut server = ServerProcess::spawn(&["--debounce-ms", "50"])?;
    let response = server.initialize()?;
    assert_eq!(response["result"]["serverInfo"]["name"], "sextant");

    let uri = uri_for(Path::new("/nonexistent/sextant-it/session.sx"));
    server.notify(
        "textDocument/didOpen",
        json!({ "textDocument": {
            "uri": uri, "languageId": "sextant", "version": 1,
            "text": "struct Point {\nlet origin = Point\norigin.\n"
        }}),
    )?;

    let published = server.next_diagnostics()?;
    assert_eq!(published["uri"], uri);
    let diagnostics = published["diagnostics"]
        .as_array()
        .context("diagnostics array")?;
    assert_eq!(diagnostics.len(), 1);
    assert_eq!(diagnostics[0]["message"], "unclosed '{'");
    assert_eq!(diagnostics[0]["severity"], 1);

    // Completion after member access
    let completion = server.request(
        2,
        "textDocument/completion",
        json!({ "textDocument": { "uri": uri }, "position": { "line": 2, "character": 7 } }),
    )?;
    let labels: Vec<&str> = completion["result"]
        .as_array()
        .context("completion array")?
        .iter()
        .filter_map(|item| item["label"].as_str())
        .collect();
    assert_eq!(labels, vec!["Point", "origin"]);

    // Fixing the file clears its diagnostics after the debounce window
    server.notify(
        "textDocument/didChange",
        json!({
            "textDocument": { "uri": uri, "version": 2 },
            "contentChanges": [{ "text": "struct Point {}\nlet origin = Point\n" }]
        }),
    )?;
    let cleared = server.next_diagnostics()?;
    assert_eq!(cleared["diagnostics"], json!([]));
    assert_eq!(cleared["version"], 2);

    let shutdown = server.request(3, "shutdown", Value::Null)?;
    assert_eq!(shutdown["result"], Value::Null);
    assert!(server.exit()?.success());
    Ok(())
}

#[test]
fn test_configuration_change_reschedules_lint() -> Result<()> {
    // A debounce long enough that only the configuration change can trigger the lint
    let mut server = ServerProcess::spawn(&["--debounce-ms", "600000"])?;
    server.initialize()?;

    let uri = uri_for(Path::new("/nonexistent/sextant-it/config.sx"));
    server.notify(
        "textDocument/didOpen",
        json!({ "textDocument": {
            "uri": uri, "languageId": "sextant", "version": 1, "text": "let a = 1\n"
        }}),
    )?;
    assert_eq!(server.next_diagnostics()?["diagnostics"], json!([]));

    server.notify(
        "textDocument/didChange",
        json!({
            "textDocument": { "uri": uri, "version": 2 },
            "contentChanges": [{
                "range": { "start": { "line": 0, "character": 8 }, "end": { "line": 0, "character": 9 } },
                "text": "(1"
            }]
        }),
    )?;
    server.notify(
        "workspace/didChangeConfiguration",
        json!({ "settings": { "sextant": { "debounceMs": 10 } } }),
    )?;

    let published = server.next_diagnostics()?;
    assert_eq!(published["version"], 2);
    assert_eq!(published["diagnostics"][0]["message"], "unclosed '('");

    server.request(2, "shutdown", Value::Null)?;
    assert!(server.exit()?.success());
    Ok(())
}

#[test]
fn test_exit_without_shutdown_fails() -> Result<()> {
    let mut server = ServerProcess::spawn(&[])?;
    server.initialize()?;
    let status = server.exit()?;
    assert_eq!(status.code(), Some(1));
    Ok(())
}

#[test]
fn test_unknown_method_is_reported() -> Result<()> {
    let mut server = ServerProcess::spawn(&[])?;
    server.initialize()?;
    let response = server.request(5, "workspace/executeCommand", json!({ "command": "x" }))?;
    assert_eq!(response["error"]["code"], -32601);

    server.request(6, "shutdown", Value::Null)?;
    assert!(server.exit()?.success());
    Ok(())
}
