// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! A small lexical compiler: identifiers, declarations, and structural
//! checks (delimiters, string literals, marker comments).

use lsp_types::{Range, SymbolKind};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::{
    CompilationCache, CompileOutput, CompiledSnapshot, CompilerDiagnostic, Severity, Symbol, Token,
};
use crate::documents::{DocumentStore, position_at};
use crate::error::CompileError;

const SOURCE: &str = "sextant";

static IDENTIFIER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*"));

static MARKER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\b(TODO|FIXME|XXX)\b"));

/// Keywords that introduce a declaration of the following identifier.
const DECLARATION_KEYWORDS: &[(&str, SymbolKind)] = &[
    ("fn", SymbolKind::FUNCTION),
    ("let", SymbolKind::VARIABLE),
    ("const", SymbolKind::CONSTANT),
    ("struct", SymbolKind::STRUCT),
    ("enum", SymbolKind::ENUM),
    ("trait", SymbolKind::INTERFACE),
    ("type", SymbolKind::TYPE_PARAMETER),
    ("mod", SymbolKind::MODULE),
];

const OTHER_KEYWORDS: &[&str] = &[
    "if", "else", "while", "for", "in", "return", "match", "true", "false", "pub", "use", "mut",
];

/// Compilation cache backed by the open-document buffers, falling back to
/// disk for paths the editor does not have open.
pub struct TokenCompiler {
    documents: Arc<RwLock<DocumentStore>>,
    snapshots: HashMap<PathBuf, Arc<CompiledSnapshot>>,
    next_stamp: u64,
}

impl TokenCompiler {
    /// Creates a compiler reading buffers from `documents`.
    #[must_use]
    pub fn new(documents: Arc<RwLock<DocumentStore>>) -> Self {
        Self {
            documents,
            snapshots: HashMap::new(),
            next_stamp: 1,
        }
    }

    fn source(&self, path: &Path) -> Result<(String, Option<i32>), CompileError> {
        {
            let documents = self.documents.blocking_read();
            if let Some(content) = documents.content(path) {
                return Ok((content.to_string(), documents.version(path)));
            }
        }

        std::fs::read_to_string(path)
            .map(|text| (text, None))
            .map_err(|e| CompileError::Unreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
    }

    fn compile(
        &mut self,
        path: &Path,
    ) -> Result<(Arc<CompiledSnapshot>, Vec<CompilerDiagnostic>), CompileError> {
        let (text, document_version) = self.source(path)?;
        if text.contains('\0') {
            return Err(CompileError::Internal {
                path: path.to_path_buf(),
                reason: "binary content".to_string(),
            });
        }

        let lexed = lex(path, &text)?;
        let stamp = self.next_stamp;
        self.next_stamp += 1;

        let snapshot = Arc::new(CompiledSnapshot {
            path: path.to_path_buf(),
            stamp,
            document_version,
            text,
            tokens: lexed.tokens,
            symbols: lexed.symbols,
        });
        debug!(
            "Compiled {} (stamp {stamp}, {} diagnostics)",
            path.display(),
            lexed.diagnostics.len()
        );
        self.snapshots.insert(path.to_path_buf(), snapshot.clone());
        Ok((snapshot, lexed.diagnostics))
    }
}

impl CompilationCache for TokenCompiler {
    fn current_version(&mut self, path: &Path) -> Result<Arc<CompiledSnapshot>, CompileError> {
        self.compile(path).map(|(snapshot, _)| snapshot)
    }

    fn latest_compiled_version(
        &mut self,
        path: &Path,
    ) -> Result<Arc<CompiledSnapshot>, CompileError> {
        if let Some(snapshot) = self.snapshots.get(path) {
            return Ok(snapshot.clone());
        }
        self.current_version(path)
    }

    fn compile_files(&mut self, paths: &[PathBuf]) -> Result<CompileOutput, CompileError> {
        let mut output = CompileOutput::default();
        for path in paths {
            match self.compile(path) {
                Ok((_, diagnostics)) => output.diagnostics.extend(diagnostics),
                Err(e) => {
                    warn!("Compile failed: {e}");
                    output.failures.push(e);
                }
            }
        }
        Ok(output)
    }

    fn forget(&mut self, path: &Path) {
        if self.snapshots.remove(path).is_some() {
            debug!(
                "Evicted {} ({} snapshot(s) cached)",
                path.display(),
                self.snapshots.len()
            );
        }
    }
}

struct Lexed {
    tokens: Vec<Token>,
    symbols: Vec<Symbol>,
    diagnostics: Vec<CompilerDiagnostic>,
}

/// Byte span of code outside strings and comments.
type Span = (usize, usize);

fn lex(path: &Path, text: &str) -> Result<Lexed, CompileError> {
    let identifier = pattern(&IDENTIFIER, path)?;
    let marker = pattern(&MARKER, path)?;

    let mut diagnostics = Vec::new();
    let diagnostic = |start: usize, end: usize, severity: Severity, message: String| {
        CompilerDiagnostic {
            path: path.to_path_buf(),
            range: Range::new(position_at(text, start), position_at(text, end)),
            severity,
            message,
            source: SOURCE.to_string(),
        }
    };

    let mut code: Vec<Span> = Vec::new();
    let mut delimiters: Vec<(char, usize)> = Vec::new();
    let mut span_start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        match ch {
            '/' if chars.peek().is_some_and(|&(_, c)| c == '/') => {
                code.push((span_start, i));
                let end = text[i..].find('\n').map_or(text.len(), |n| i + n);
                for m in marker.find_iter(&text[i..end]) {
                    diagnostics.push(diagnostic(
                        i + m.start(),
                        i + m.end(),
                        Severity::Hint,
                        format!("{} marker", m.as_str()),
                    ));
                }
                while chars.peek().is_some_and(|&(j, _)| j < end) {
                    chars.next();
                }
                span_start = end;
            }
            '"' => {
                code.push((span_start, i));
                let mut end = None;
                while let Some((j, c)) = chars.next() {
                    match c {
                        '\\' => {
                            chars.next();
                        }
                        '"' => {
                            end = Some(j + 1);
                            break;
                        }
                        '\n' => break,
                        _ => {}
                    }
                }
                if let Some(end) = end {
                    span_start = end;
                } else {
                    let line_end = text[i..].find('\n').map_or(text.len(), |n| i + n);
                    diagnostics.push(diagnostic(
                        i,
                        line_end,
                        Severity::Error,
                        "unterminated string literal".to_string(),
                    ));
                    span_start = line_end;
                }
            }
            '(' | '[' | '{' => delimiters.push((ch, i)),
            ')' | ']' | '}' => {
                let expected = match ch {
                    ')' => '(',
                    ']' => '[',
                    _ => '{',
                };
                match delimiters.last() {
                    Some(&(open, _)) if open == expected => {
                        delimiters.pop();
                    }
                    Some(&(open, _)) => diagnostics.push(diagnostic(
                        i,
                        i + 1,
                        Severity::Error,
                        format!("mismatched '{ch}', expected closing for '{open}'"),
                    )),
                    None => diagnostics.push(diagnostic(
                        i,
                        i + 1,
                        Severity::Error,
                        format!("unexpected '{ch}'"),
                    )),
                }
            }
            _ => {}
        }
    }
    code.push((span_start, text.len()));

    for (open, i) in delimiters {
        diagnostics.push(diagnostic(
            i,
            i + 1,
            Severity::Error,
            format!("unclosed '{open}'"),
        ));
    }

    let mut tokens = Vec::new();
    let mut symbols: Vec<Symbol> = Vec::new();
    let mut seen = HashSet::new();
    let mut pending_kind: Option<(SymbolKind, usize)> = None;

    for &(start, end) in code.iter().filter(|(s, e)| s < e) {
        for m in identifier.find_iter(&text[start..end]) {
            let (name, m_start, m_end) = (m.as_str(), start + m.start(), start + m.end());

            if let Some(&(_, kind)) = DECLARATION_KEYWORDS.iter().find(|(k, _)| *k == name) {
                pending_kind = Some((kind, m_start));
                continue;
            }
            if OTHER_KEYWORDS.contains(&name) {
                continue;
            }

            if let Some((kind, keyword_start)) = pending_kind.take() {
                if !seen.insert(name.to_string()) {
                    diagnostics.push(diagnostic(
                        m_start,
                        m_end,
                        Severity::Warning,
                        format!("`{name}` is already declared"),
                    ));
                }
                let (detail, parameters) = declaration_text(text, keyword_start, m_end, kind);
                symbols.push(Symbol {
                    name: name.to_string(),
                    kind,
                    start: m_start,
                    end: m_end,
                    detail,
                    parameters,
                });
            }

            tokens.push(Token {
                name: name.to_string(),
                start: m_start,
                end: m_end,
            });
        }
    }

    diagnostics.sort_by_key(|d| (d.range.start.line, d.range.start.character));
    Ok(Lexed {
        tokens,
        symbols,
        diagnostics,
    })
}

fn pattern<'a>(
    regex: &'a LazyLock<Result<Regex, regex::Error>>,
    path: &Path,
) -> Result<&'a Regex, CompileError> {
    LazyLock::force(regex).as_ref().map_err(|e| CompileError::Internal {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Declaration text from the keyword to the end of its header, plus
/// parameter labels for functions.
fn declaration_text(
    text: &str,
    keyword_start: usize,
    name_end: usize,
    kind: SymbolKind,
) -> (String, Vec<String>) {
    let line_end = text[name_end..]
        .find('\n')
        .map_or(text.len(), |i| name_end + i);
    let header = &text[keyword_start..line_end];

    if kind != SymbolKind::FUNCTION {
        let header = header.split(['{', '=', ';']).next().unwrap_or(header);
        return (header.trim().to_string(), Vec::new());
    }

    let rest = &text[name_end..line_end];
    let Some(open) = rest.find('(') else {
        return (header.trim().to_string(), Vec::new());
    };
    let Some(close) = rest[open..].find(')').map(|c| open + c) else {
        return (header.trim().to_string(), Vec::new());
    };

    let parameters = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();
    let signature = &text[keyword_start..name_end + close + 1];
    (signature.to_string(), parameters)
}
