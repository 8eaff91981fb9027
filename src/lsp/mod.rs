// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

/// JSON-RPC message definitions and framing.
pub mod protocol;
/// Stdio server loop and outgoing writer.
pub mod server;

pub use server::{LanguageServer, Outgoing, serve_stdio};
