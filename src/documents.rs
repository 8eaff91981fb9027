// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! In-memory buffers for documents the editor has open.

use anyhow::{Result, anyhow};
use lsp_types::{Position, TextDocumentContentChangeEvent, Uri};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::RequestError;

/// Tracks the state of an open document.
#[derive(Debug, Clone)]
struct OpenDocument {
    uri: Uri,
    version: i32,
    content: String,
}

/// Open-document buffers keyed by the path the client's URI names.
///
/// Each entry remembers the URI the client opened it with; diagnostics go
/// back to that URI. Mutated only by notification handlers; request
/// handlers and the compiler read from it.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: HashMap<PathBuf, OpenDocument>,
}

impl DocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a document, replacing any previous buffer for the path.
    pub fn open(&mut self, path: PathBuf, uri: Uri, text: String, version: i32) {
        debug!("Opening document: {} (v{version})", uri.as_str());
        self.documents.insert(
            path,
            OpenDocument {
                uri,
                version,
                content: text,
            },
        );
    }

    /// Applies content changes in order and records the new version.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not open.
    pub fn edit(
        &mut self,
        path: &Path,
        version: i32,
        changes: Vec<TextDocumentContentChangeEvent>,
    ) -> Result<()> {
        let doc = self
            .documents
            .get_mut(path)
            .ok_or_else(|| anyhow!("Edit for document that is not open: {}", path.display()))?;

        for change in changes {
            match change.range {
                Some(range) => {
                    let start = offset_at(&doc.content, range.start);
                    let end = offset_at(&doc.content, range.end).max(start);
                    doc.content.replace_range(start..end, &change.text);
                }
                None => doc.content = change.text,
            }
        }

        trace!("Edited {} -> v{version}", path.display());
        doc.version = version;
        Ok(())
    }

    /// Stops tracking a document. Returns whether it was open.
    pub fn close(&mut self, path: &Path) -> bool {
        let was_open = self.documents.remove(path).is_some();
        if was_open {
            debug!("Closing document: {}", path.display());
        }
        was_open
    }

    /// Returns the buffer content for an open document.
    #[must_use]
    pub fn content(&self, path: &Path) -> Option<&str> {
        self.documents.get(path).map(|d| d.content.as_str())
    }

    /// Returns whether the editor currently has the document open.
    #[must_use]
    pub fn is_open(&self, path: &Path) -> bool {
        self.documents.contains_key(path)
    }

    /// Returns the client-assigned version of an open document.
    #[must_use]
    pub fn version(&self, path: &Path) -> Option<i32> {
        self.documents.get(path).map(|d| d.version)
    }

    /// Returns the URI the client opened the document with.
    #[must_use]
    pub fn uri(&self, path: &Path) -> Option<&Uri> {
        self.documents.get(path).map(|d| &d.uri)
    }
}

/// Resolves a document URI to the path used as the key for all per-file
/// state.
///
/// The path is taken as written and never resolved against the filesystem,
/// so it stays the same for the lifetime of the buffer even when symlinks
/// or files on disk change underneath it.
///
/// # Errors
///
/// Returns [`RequestError::Resolution`] for non-`file` URIs or URIs that do
/// not map to a local path.
pub fn uri_to_path(uri: &Uri) -> Result<PathBuf, RequestError> {
    let resolution = |reason: &str| RequestError::Resolution {
        uri: uri.as_str().to_string(),
        reason: reason.to_string(),
    };

    let url = url::Url::parse(uri.as_str()).map_err(|e| resolution(&e.to_string()))?;
    if url.scheme() != "file" {
        return Err(resolution(&format!("unsupported scheme '{}'", url.scheme())));
    }
    url.to_file_path()
        .map_err(|()| resolution("not a local file path"))
}

/// Converts a path into a `file://` URI.
///
/// # Errors
///
/// Returns an error if the path is relative or cannot be expressed as a URI.
pub fn path_to_uri(path: &Path) -> Result<Uri> {
    let url = url::Url::from_file_path(path)
        .map_err(|()| anyhow!("Invalid path for URI: {}", path.display()))?;
    url.as_str()
        .parse()
        .map_err(|e| anyhow!("Invalid path for URI: {}: {e:?}", path.display()))
}

/// Converts an LSP position (UTF-16 columns) into a byte offset.
///
/// Positions past the end of a line clamp to the line end; lines past the
/// end of the text clamp to the text length.
#[must_use]
pub fn offset_at(text: &str, position: Position) -> usize {
    let mut line_start = 0;
    for _ in 0..position.line {
        match text[line_start..].find('\n') {
            Some(i) => line_start += i + 1,
            None => return text.len(),
        }
    }

    let line_end = text[line_start..]
        .find('\n')
        .map_or(text.len(), |i| line_start + i);

    let mut units = 0u32;
    for (i, ch) in text[line_start..line_end].char_indices() {
        if units >= position.character {
            return line_start + i;
        }
        #[allow(
            clippy::cast_possible_truncation,
            reason = "len_utf16 is at most 2"
        )]
        let width = ch.len_utf16() as u32;
        units += width;
    }
    line_end
}

/// Converts a byte offset into an LSP position (UTF-16 columns).
#[must_use]
pub fn position_at(text: &str, offset: usize) -> Position {
    let offset = floor_char_boundary(text, offset);
    let before = &text[..offset];
    let line_start = before.rfind('\n').map_or(0, |i| i + 1);

    #[allow(
        clippy::cast_possible_truncation,
        reason = "documents beyond u32::MAX lines or columns are not supported"
    )]
    Position {
        line: before.matches('\n').count() as u32,
        character: before[line_start..].encode_utf16().count() as u32,
    }
}

/// Largest char boundary at or below `offset`, clamped to the text length.
#[must_use]
pub fn floor_char_boundary(text: &str, offset: usize) -> usize {
    let mut offset = offset.min(text.len());
    while !text.is_char_boundary(offset) {
        offset -= 1;
    }
    offset
}
