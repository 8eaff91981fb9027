// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2026 Mark Wells <contact@markwells.dev>

//! Per-request recompilation policy.
//!
//! Recompiling is the most expensive thing the server does. Each request
//! kind carries a [`RecompilePolicy`]; [`decide`] turns the policy plus the
//! cursor context into a [`Recompile`] action.

use crate::documents::floor_char_boundary;

/// Character that marks member access.
pub const MEMBER_ACCESS: char = '.';

/// Editor request kinds handled by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// `textDocument/hover`
    Hover,
    /// `textDocument/completion`
    Completion,
    /// `textDocument/definition`
    Definition,
    /// `textDocument/references`
    References,
    /// `textDocument/signatureHelp`
    SignatureHelp,
    /// `textDocument/documentSymbol`
    DocumentSymbols,
    /// `textDocument/formatting`
    Formatting,
    /// `textDocument/rangeFormatting`
    RangeFormatting,
    /// `textDocument/codeAction`
    CodeAction,
}

impl RequestKind {
    /// Maps a protocol method name to a request kind.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        Some(match method {
            "textDocument/hover" => Self::Hover,
            "textDocument/completion" => Self::Completion,
            "textDocument/definition" => Self::Definition,
            "textDocument/references" => Self::References,
            "textDocument/signatureHelp" => Self::SignatureHelp,
            "textDocument/documentSymbol" => Self::DocumentSymbols,
            "textDocument/formatting" => Self::Formatting,
            "textDocument/rangeFormatting" => Self::RangeFormatting,
            "textDocument/codeAction" => Self::CodeAction,
            _ => return None,
        })
    }

    /// Protocol method name.
    #[must_use]
    pub const fn method(self) -> &'static str {
        match self {
            Self::Hover => "textDocument/hover",
            Self::Completion => "textDocument/completion",
            Self::Definition => "textDocument/definition",
            Self::References => "textDocument/references",
            Self::SignatureHelp => "textDocument/signatureHelp",
            Self::DocumentSymbols => "textDocument/documentSymbol",
            Self::Formatting => "textDocument/formatting",
            Self::RangeFormatting => "textDocument/rangeFormatting",
            Self::CodeAction => "textDocument/codeAction",
        }
    }

    /// How fresh the snapshot must be for this request.
    #[must_use]
    pub const fn policy(self) -> RecompilePolicy {
        match self {
            Self::Hover | Self::Definition | Self::SignatureHelp | Self::CodeAction => {
                RecompilePolicy::Never
            }
            Self::Completion => RecompilePolicy::AfterDot,
            Self::DocumentSymbols => RecompilePolicy::WaitForLint,
            Self::References | Self::Formatting | Self::RangeFormatting => {
                RecompilePolicy::Always
            }
        }
    }
}

/// Freshness requirement attached to a request kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecompilePolicy {
    /// Always compile before answering.
    Always,
    /// Compile only when the cursor follows [`MEMBER_ACCESS`].
    AfterDot,
    /// Let any scheduled lint pass finish, then use the cache.
    WaitForLint,
    /// Use whatever the cache holds.
    Never,
}

/// What to do before answering a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recompile {
    /// Compile the file now.
    ForceFresh,
    /// Use the latest cached snapshot.
    ReuseCached,
    /// Wait for the pending lint pass, then use the latest cached snapshot.
    WaitThenReuse,
}

/// Decides how to obtain a snapshot. Total for any offset and content:
/// offsets past the end clamp, offsets inside a character round down, and
/// offset zero has no preceding character.
#[must_use]
pub fn decide(policy: RecompilePolicy, offset: usize, content: &str) -> Recompile {
    match policy {
        RecompilePolicy::Always => Recompile::ForceFresh,
        RecompilePolicy::Never => Recompile::ReuseCached,
        RecompilePolicy::WaitForLint => Recompile::WaitThenReuse,
        RecompilePolicy::AfterDot => {
            if preceding_char(content, offset) == Some(MEMBER_ACCESS) {
                Recompile::ForceFresh
            } else {
                Recompile::ReuseCached
            }
        }
    }
}

/// The character immediately before `offset`, if any.
#[must_use]
pub fn preceding_char(content: &str, offset: usize) -> Option<char> {
    let offset = floor_char_boundary(content, offset);
    content[..offset].chars().next_back()
}

#[cfg(test)]
mod tests {
    use super::*;

    const POLICIES: [RecompilePolicy; 4] = [
        RecompilePolicy::Always,
        RecompilePolicy::AfterDot,
        RecompilePolicy::WaitForLint,
        RecompilePolicy::Never,
    ];

    #[test]
    fn test_decision_table() {
        let content = "foo.bar";
        let cases = [
            (RecompilePolicy::Always, 0, Recompile::ForceFresh),
            (RecompilePolicy::Always, 3, Recompile::ForceFresh),
            (RecompilePolicy::AfterDot, 4, Recompile::ForceFresh),
            (RecompilePolicy::AfterDot, 3, Recompile::ReuseCached),
            (RecompilePolicy::AfterDot, 0, Recompile::ReuseCached),
            (RecompilePolicy::WaitForLint, 4, Recompile::WaitThenReuse),
            (RecompilePolicy::Never, 4, Recompile::ReuseCached),
        ];
        for (policy, offset, expected) in cases {
            assert_eq!(
                decide(policy, offset, content),
                expected,
                "{policy:?} at {offset}"
            );
        }
    }

    #[test]
    fn test_total_over_edge_inputs() {
        let contents = ["", ".", "é.", "a\u{1F600}.", "foo."];
        for policy in POLICIES {
            for content in contents {
                for offset in 0..=content.len() + 2 {
                    // Must not panic for any combination
                    let _ = decide(policy, offset, content);
                }
            }
        }
    }

    #[test]
    fn test_after_dot_never_fires_at_start() {
        assert_eq!(
            decide(RecompilePolicy::AfterDot, 0, ".foo"),
            Recompile::ReuseCached
        );
        assert_eq!(decide(RecompilePolicy::AfterDot, 0, ""), Recompile::ReuseCached);
    }

    #[test]
    fn test_offset_inside_multibyte_char() {
        // Offset 1 lands inside 'é'; nothing precedes the rounded-down boundary
        assert_eq!(preceding_char("é.", 1), None);
        assert_eq!(preceding_char("é.", 3), Some('.'));
        assert_eq!(preceding_char("foo.", 99), Some('.'));
    }

    #[test]
    fn test_request_policies() {
        assert_eq!(RequestKind::Hover.policy(), RecompilePolicy::Never);
        assert_eq!(RequestKind::Definition.policy(), RecompilePolicy::Never);
        assert_eq!(RequestKind::SignatureHelp.policy(), RecompilePolicy::Never);
        assert_eq!(RequestKind::Completion.policy(), RecompilePolicy::AfterDot);
        assert_eq!(
            RequestKind::DocumentSymbols.policy(),
            RecompilePolicy::WaitForLint
        );
        assert_eq!(RequestKind::Formatting.policy(), RecompilePolicy::Always);
        assert_eq!(RequestKind::References.policy(), RecompilePolicy::Always);
    }

    #[test]
    fn test_unknown_method() {
        assert_eq!(
            RequestKind::from_method("textDocument/completion"),
            Some(RequestKind::Completion)
        );
        assert_eq!(RequestKind::from_method("textDocument/rename"), None);
    }
}
