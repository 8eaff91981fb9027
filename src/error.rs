// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Error taxonomy for request handling and compilation.

use std::path::PathBuf;
use thiserror::Error;

/// Failure raised by the compilation cache for a single path.
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// The source text for the path could not be obtained.
    #[error("cannot read source for {path}: {reason}")]
    Unreadable {
        /// Path that failed.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },
    /// The compiler gave up on the path.
    #[error("compiler failed on {path}: {reason}")]
    Internal {
        /// Path that failed.
        path: PathBuf,
        /// Underlying cause.
        reason: String,
    },
    /// The blocking compile task did not finish (panicked or was cancelled).
    #[error("compile task aborted: {0}")]
    Aborted(String),
}

impl CompileError {
    /// Returns the path this failure belongs to, if it is path-specific.
    #[must_use]
    pub fn path(&self) -> Option<&std::path::Path> {
        match self {
            Self::Unreadable { path, .. } | Self::Internal { path, .. } => Some(path),
            Self::Aborted(_) => None,
        }
    }
}

/// Outcome of a request that did not produce a result.
#[derive(Debug, Error)]
pub enum RequestError {
    /// Well-formed request with no meaningful answer at the position.
    #[error("no result: {0}")]
    NoResult(String),
    /// The document identity cannot be mapped to a trackable path.
    #[error("cannot resolve document {uri}: {reason}")]
    Resolution {
        /// The URI as sent by the client.
        uri: String,
        /// Why it could not be resolved.
        reason: String,
    },
    /// Compiling the document for this request failed.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// The request kind is not supported.
    #[error("{0} is not implemented")]
    Unimplemented(&'static str),
    /// The request parameters did not deserialize.
    #[error("invalid params: {0}")]
    InvalidParams(String),
}

impl RequestError {
    /// Creates a [`RequestError::NoResult`] from a reason.
    pub fn no_result(reason: impl Into<String>) -> Self {
        Self::NoResult(reason.into())
    }

    /// Whether the caller should see an empty/default result instead of an error.
    #[must_use]
    pub const fn is_empty_answer(&self) -> bool {
        matches!(self, Self::NoResult(_) | Self::Resolution { .. })
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidParams(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_answer_classification() {
        assert!(RequestError::no_result("nothing here").is_empty_answer());
        assert!(
            RequestError::Resolution {
                uri: "untitled:1".to_string(),
                reason: "not a file".to_string(),
            }
            .is_empty_answer()
        );
        assert!(!RequestError::Unimplemented("textDocument/codeAction").is_empty_answer());
        assert!(
            !RequestError::Compile(CompileError::Aborted("panic".to_string())).is_empty_answer()
        );
    }

    #[test]
    fn test_compile_error_path() {
        let err = CompileError::Unreadable {
            path: PathBuf::from("/tmp/a.sx"),
            reason: "gone".to_string(),
        };
        assert_eq!(err.path(), Some(std::path::Path::new("/tmp/a.sx")));
        assert!(CompileError::Aborted("x".to_string()).path().is_none());
        assert_eq!(
            err.to_string(),
            "cannot read source for /tmp/a.sx: gone".to_string()
        );
    }
}
