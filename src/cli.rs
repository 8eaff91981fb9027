// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! CLI utilities for terminal output formatting and colors.

use crossterm::tty::IsTty;
use lsp_types::{Diagnostic, DiagnosticSeverity};
use std::io::stdout;

/// Configuration for color output
#[derive(Debug, Clone)]
pub struct ColorConfig {
    /// Whether ANSI escapes are emitted.
    pub enabled: bool,
}

impl ColorConfig {
    /// Create a new `ColorConfig`, auto-detecting TTY unless nocolor is true
    #[must_use]
    pub fn new(nocolor: bool) -> Self {
        Self {
            enabled: !nocolor && stdout().is_tty(),
        }
    }

    fn paint(&self, code: &str, s: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{s}\x1b[0m")
        } else {
            s.to_string()
        }
    }

    /// Red (errors)
    #[must_use]
    pub fn red(&self, s: &str) -> String {
        self.paint("31", s)
    }

    /// Yellow (warnings)
    #[must_use]
    pub fn yellow(&self, s: &str) -> String {
        self.paint("33", s)
    }

    /// Cyan (hints and information)
    #[must_use]
    pub fn cyan(&self, s: &str) -> String {
        self.paint("36", s)
    }

    /// Dim text
    #[must_use]
    pub fn dim(&self, s: &str) -> String {
        self.paint("2", s)
    }

    /// Bold text
    #[must_use]
    pub fn bold(&self, s: &str) -> String {
        self.paint("1", s)
    }
}

/// Lower-case severity label, colored by severity.
#[must_use]
pub fn severity_label(colors: &ColorConfig, severity: Option<DiagnosticSeverity>) -> String {
    match severity {
        Some(DiagnosticSeverity::ERROR) => colors.red("error"),
        Some(DiagnosticSeverity::WARNING) => colors.yellow("warning"),
        Some(DiagnosticSeverity::HINT) => colors.cyan("hint"),
        _ => colors.cyan("info"),
    }
}

/// One diagnostic as `file:line:col: severity: message`, 1-based.
#[must_use]
pub fn format_diagnostic(colors: &ColorConfig, file: &str, diagnostic: &Diagnostic) -> String {
    let start = diagnostic.range.start;
    format!(
        "{}: {}: {}",
        colors.bold(&format!("{file}:{}:{}", start.line + 1, start.character + 1)),
        severity_label(colors, diagnostic.severity),
        diagnostic.message
    )
}

/// Closing summary line, e.g. `2 errors, 1 warning in 3 files`.
#[must_use]
pub fn summary(errors: usize, warnings: usize, files: usize) -> String {
    let plural = |n: usize, word: &str| {
        if n == 1 {
            format!("{n} {word}")
        } else {
            format!("{n} {word}s")
        }
    };
    format!(
        "{}, {} in {}",
        plural(errors, "error"),
        plural(warnings, "warning"),
        plural(files, "file")
    )
}
