// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Query handlers. Each is a pure function of a compiled snapshot and a
//! cursor position or range.

use lsp_types::{
    CompletionItem, CompletionItemKind, DocumentSymbol, Hover, HoverContents, Location,
    MarkupContent, MarkupKind, ParameterInformation, ParameterLabel, Position, Range,
    SignatureHelp, SignatureInformation, SymbolKind, TextEdit, Uri,
};
use std::collections::BTreeMap;

use crate::compiler::CompiledSnapshot;
use crate::documents::{floor_char_boundary, offset_at, position_at};
use crate::error::RequestError;

fn span(snapshot: &CompiledSnapshot, start: usize, end: usize) -> Range {
    Range::new(
        position_at(&snapshot.text, start),
        position_at(&snapshot.text, end),
    )
}

fn token_name(snapshot: &CompiledSnapshot, position: Position) -> Result<&str, RequestError> {
    let offset = offset_at(&snapshot.text, position);
    snapshot
        .token_at(offset)
        .map(|t| t.name.as_str())
        .ok_or_else(|| RequestError::no_result("no symbol under cursor"))
}

/// Declaration text for the identifier under the cursor.
///
/// # Errors
///
/// [`RequestError::NoResult`] if there is no identifier or it is undeclared.
pub fn hover(snapshot: &CompiledSnapshot, position: Position) -> Result<Hover, RequestError> {
    let offset = offset_at(&snapshot.text, position);
    let token = snapshot
        .token_at(offset)
        .ok_or_else(|| RequestError::no_result("no symbol under cursor"))?;
    let symbol = snapshot
        .declaration(&token.name)
        .ok_or_else(|| RequestError::no_result(format!("`{}` is not declared", token.name)))?;

    Ok(Hover {
        contents: HoverContents::Markup(MarkupContent {
            kind: MarkupKind::Markdown,
            value: format!("```sextant\n{}\n```", symbol.detail),
        }),
        range: Some(span(snapshot, token.start, token.end)),
    })
}

/// The identifier characters immediately before `offset` in live buffer text.
#[must_use]
pub fn identifier_prefix(content: &str, offset: usize) -> &str {
    let offset = floor_char_boundary(content, offset);
    let before = &content[..offset];
    let start = before
        .char_indices()
        .rev()
        .take_while(|&(_, c)| c.is_alphanumeric() || c == '_')
        .last()
        .map_or(offset, |(i, _)| i);
    &before[start..]
}

const fn completion_kind(kind: SymbolKind) -> CompletionItemKind {
    match kind {
        SymbolKind::FUNCTION => CompletionItemKind::FUNCTION,
        SymbolKind::CONSTANT => CompletionItemKind::CONSTANT,
        SymbolKind::STRUCT => CompletionItemKind::STRUCT,
        SymbolKind::ENUM => CompletionItemKind::ENUM,
        SymbolKind::INTERFACE => CompletionItemKind::INTERFACE,
        SymbolKind::TYPE_PARAMETER => CompletionItemKind::TYPE_PARAMETER,
        SymbolKind::MODULE => CompletionItemKind::MODULE,
        _ => CompletionItemKind::VARIABLE,
    }
}

/// Declared names starting with `prefix`, one item per name, sorted.
#[must_use]
pub fn completion(snapshot: &CompiledSnapshot, prefix: &str) -> Vec<CompletionItem> {
    let mut items: BTreeMap<&str, CompletionItem> = BTreeMap::new();
    for symbol in &snapshot.symbols {
        if !symbol.name.starts_with(prefix) || symbol.name == prefix {
            continue;
        }
        items.entry(&symbol.name).or_insert_with(|| CompletionItem {
            label: symbol.name.clone(),
            kind: Some(completion_kind(symbol.kind)),
            detail: Some(symbol.detail.clone()),
            ..Default::default()
        });
    }
    items.into_values().collect()
}

/// Location of the declaration of the identifier under the cursor.
///
/// # Errors
///
/// [`RequestError::NoResult`] if there is no identifier or it is undeclared.
pub fn definition(
    snapshot: &CompiledSnapshot,
    uri: &Uri,
    position: Position,
) -> Result<Location, RequestError> {
    let name = token_name(snapshot, position)?;
    let symbol = snapshot
        .declaration(name)
        .ok_or_else(|| RequestError::no_result(format!("`{name}` is not declared")))?;
    Ok(Location::new(
        uri.clone(),
        span(snapshot, symbol.start, symbol.end),
    ))
}

/// Every occurrence of the identifier under the cursor.
///
/// # Errors
///
/// [`RequestError::NoResult`] if there is no identifier at the position.
pub fn references(
    snapshot: &CompiledSnapshot,
    uri: &Uri,
    position: Position,
    include_declaration: bool,
) -> Result<Vec<Location>, RequestError> {
    let name = token_name(snapshot, position)?;
    let is_declaration = |start: usize| {
        snapshot
            .symbols
            .iter()
            .any(|s| s.start == start && s.name == name)
    };

    Ok(snapshot
        .tokens
        .iter()
        .filter(|t| t.name == name)
        .filter(|t| include_declaration || !is_declaration(t.start))
        .map(|t| Location::new(uri.clone(), span(snapshot, t.start, t.end)))
        .collect())
}

/// Signature of the function call enclosing the cursor.
///
/// # Errors
///
/// [`RequestError::NoResult`] if the cursor is not inside a call to a
/// declared function.
pub fn signature_help(
    snapshot: &CompiledSnapshot,
    position: Position,
) -> Result<SignatureHelp, RequestError> {
    let offset = offset_at(&snapshot.text, position);
    let before = &snapshot.text[..offset];

    let mut depth = 0usize;
    let mut active = 0u32;
    let mut open = None;
    for (i, ch) in before.char_indices().rev() {
        match ch {
            ')' => depth += 1,
            '(' if depth == 0 => {
                open = Some(i);
                break;
            }
            '(' => depth -= 1,
            ',' if depth == 0 => active += 1,
            ';' | '{' | '}' if depth == 0 => break,
            _ => {}
        }
    }

    let open = open.ok_or_else(|| RequestError::no_result("not inside a call"))?;
    let callee_end = before[..open].trim_end().len();
    let callee = snapshot
        .tokens
        .iter()
        .find(|t| t.end == callee_end)
        .ok_or_else(|| RequestError::no_result("call target is not an identifier"))?;
    let symbol = snapshot
        .declaration(&callee.name)
        .filter(|s| s.kind == SymbolKind::FUNCTION)
        .ok_or_else(|| {
            RequestError::no_result(format!("`{}` is not a declared function", callee.name))
        })?;

    let parameters = symbol
        .parameters
        .iter()
        .map(|p| ParameterInformation {
            label: ParameterLabel::Simple(p.clone()),
            documentation: None,
        })
        .collect();

    Ok(SignatureHelp {
        signatures: vec![SignatureInformation {
            label: symbol.detail.clone(),
            documentation: None,
            parameters: Some(parameters),
            active_parameter: None,
        }],
        active_signature: Some(0),
        active_parameter: Some(active),
    })
}

/// Flat outline of every declaration.
#[must_use]
pub fn document_symbols(snapshot: &CompiledSnapshot) -> Vec<DocumentSymbol> {
    snapshot
        .symbols
        .iter()
        .map(|symbol| {
            let range = span(snapshot, symbol.start, symbol.end);
            #[allow(
                deprecated,
                reason = "DocumentSymbol::deprecated must still be initialized"
            )]
            DocumentSymbol {
                name: symbol.name.clone(),
                detail: Some(symbol.detail.clone()),
                kind: symbol.kind,
                tags: None,
                deprecated: None,
                range,
                selection_range: range,
                children: None,
            }
        })
        .collect()
}

/// Removes trailing whitespace and ensures a final newline.
#[must_use]
pub fn formatting(snapshot: &CompiledSnapshot) -> Vec<TextEdit> {
    let text = &snapshot.text;
    let mut edits = trailing_whitespace_edits(text, 0, u32::MAX);
    if !text.is_empty() && !text.ends_with('\n') {
        let end = position_at(text, text.len());
        edits.push(TextEdit::new(Range::new(end, end), "\n".to_string()));
    }
    edits
}

/// Removes trailing whitespace on the lines touched by `range`.
#[must_use]
pub fn range_formatting(snapshot: &CompiledSnapshot, range: Range) -> Vec<TextEdit> {
    trailing_whitespace_edits(&snapshot.text, range.start.line, range.end.line)
}

fn trailing_whitespace_edits(text: &str, first: u32, last: u32) -> Vec<TextEdit> {
    let utf16_len = |s: &str| -> u32 {
        #[allow(
            clippy::cast_possible_truncation,
            reason = "line lengths beyond u32::MAX are not supported"
        )]
        let len = s.encode_utf16().count() as u32;
        len
    };

    text.split('\n')
        .zip(0u32..)
        .filter(|&(_, line)| line >= first && line <= last)
        .filter_map(|(content, line)| {
            let content = content.strip_suffix('\r').unwrap_or(content);
            let trimmed = content.trim_end();
            (trimmed.len() < content.len()).then(|| {
                TextEdit::new(
                    Range::new(
                        Position::new(line, utf16_len(trimmed)),
                        Position::new(line, utf16_len(content)),
                    ),
                    String::new(),
                )
            })
        })
        .collect()
}
