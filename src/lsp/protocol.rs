// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! JSON-RPC message shapes and Content-Length framing.

use anyhow::{Context, Result, anyhow};
use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `jsonrpc` field value.
pub const JSONRPC_VERSION: &str = "2.0";

/// Malformed params.
pub const INVALID_PARAMS: i64 = -32602;
/// Unknown method.
pub const METHOD_NOT_FOUND: i64 = -32601;
/// Request arrived before `initialize` completed.
pub const SERVER_NOT_INITIALIZED: i64 = -32002;
/// Request sent after `shutdown`.
pub const INVALID_REQUEST: i64 = -32600;
/// Well-formed request the server could not satisfy.
pub const REQUEST_FAILED: i64 = -32803;

const fn default_null() -> Value {
    Value::Null
}

/// Client-to-server request.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RequestMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Echoed in the response.
    pub id: RequestId,
    /// Method name.
    pub method: String,
    /// Method parameters; `null` when absent.
    #[serde(default = "default_null")]
    pub params: Value,
}

/// Response to a [`RequestMessage`].
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Id of the request; `None` if it could not be determined.
    pub id: Option<RequestId>,
    /// Result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Error on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl ResponseMessage {
    /// Successful response. A `null` result is still sent as `"result": null`.
    #[must_use]
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(id),
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    pub fn error(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// Message with no response.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct NotificationMessage {
    /// Always `"2.0"`.
    pub jsonrpc: String,
    /// Method name.
    pub method: String,
    /// Method parameters; `null` when absent.
    #[serde(default = "default_null")]
    pub params: Value,
}

impl NotificationMessage {
    /// Builds a notification with serialized params.
    pub fn new(method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// Request id as sent by the client.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    /// Numeric id.
    Number(i64),
    /// String id.
    String(String),
}

/// JSON-RPC error object.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResponseError {
    /// Error code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
    /// Extra data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

/// An incoming message, classified by the presence of `method` and `id`.
#[derive(Debug)]
pub enum Incoming {
    /// Expects a response.
    Request(RequestMessage),
    /// Expects no response.
    Notification(NotificationMessage),
    /// A response to something we sent; the server sends no requests, so
    /// these are only logged.
    Response(ResponseMessage),
}

impl Incoming {
    /// Parses a message body.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not JSON or not a JSON-RPC message.
    pub fn parse(body: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(body).context("Message is not valid JSON")?;
        let has_method = value.get("method").is_some();
        let has_id = value.get("id").is_some();

        match (has_method, has_id) {
            (true, true) => Ok(Self::Request(
                serde_json::from_value(value).context("Malformed request")?,
            )),
            (true, false) => Ok(Self::Notification(
                serde_json::from_value(value).context("Malformed notification")?,
            )),
            (false, true) => Ok(Self::Response(
                serde_json::from_value(value).context("Malformed response")?,
            )),
            (false, false) => Err(anyhow!("Message has neither method nor id")),
        }
    }
}

/// Helper to parse the Content-Length header and body from a buffer
///
/// # Errors
///
/// Returns an error if the headers are not UTF-8, carry no valid
/// Content-Length (the headers are consumed), or the body is not UTF-8.
pub fn try_parse_message(buffer: &mut BytesMut) -> Result<Option<String>> {
    let mut headers_end = None;
    let mut content_length = None;

    // Scan for \r\n\r\n
    for i in 0..buffer.len().saturating_sub(3) {
        if &buffer[i..i + 4] == b"\r\n\r\n" {
            headers_end = Some(i + 4);

            let Ok(headers_str) = std::str::from_utf8(&buffer[0..i]) else {
                buffer.advance(i + 4);
                return Err(anyhow!("Failed to parse headers as UTF-8"));
            };

            for line in headers_str.lines() {
                if let Some((name, value)) = line.split_once(':')
                    && name.trim().eq_ignore_ascii_case("content-length")
                {
                    content_length = value.trim().parse::<usize>().ok();
                }
            }
            break;
        }
    }

    if let (Some(header_len), Some(content_len)) = (headers_end, content_length) {
        let total_len = header_len + content_len;

        if buffer.len() >= total_len {
            buffer.advance(header_len);
            let message_bytes = buffer.split_to(content_len);
            let message = String::from_utf8(message_bytes.to_vec())
                .context("Message body is not UTF-8")?;
            return Ok(Some(message));
        }
    } else if let Some(header_len) = headers_end {
        // Headers without a usable length cannot be framed; skip them
        buffer.advance(header_len);
        return Err(anyhow!("Message headers have no valid Content-Length"));
    }

    Ok(None)
}

/// Serializes `message` with its Content-Length header.
///
/// # Errors
///
/// Returns an error if the message does not serialize.
pub fn encode_message<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    let body = serde_json::to_string(message)?;
    let mut framed = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
    framed.extend_from_slice(body.as_bytes());
    Ok(framed)
}
