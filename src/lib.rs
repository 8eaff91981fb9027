// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Sextant is the request-coordination core of a language server.
//!
//! It debounces lint passes over edited documents, decides per request
//! whether a fresh compile is needed, keeps published diagnostics in step
//! with what the editor has open, and serializes compiler access while
//! queries run in parallel on immutable snapshots.

/// Query handlers over compiled snapshots.
pub mod analysis;
/// One-shot lint of files on disk.
pub mod check;
/// Command-line interface output helpers.
pub mod cli;
/// Compilation cache interface and the bundled compiler.
pub mod compiler;
/// Layered configuration.
pub mod config;
/// Lint scheduling, recompilation policy, and diagnostic publication.
pub mod coordinator;
/// Open-document buffers and position/URI conversion.
pub mod documents;
/// Error taxonomy.
pub mod error;
/// Language server protocol transport.
pub mod lsp;
