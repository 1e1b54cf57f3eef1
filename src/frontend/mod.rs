//! Parsers for raw toolchain output
//!
//! Each parser turns one tool's text format into the language-neutral stage
//! outputs in `core::types` (tokens, syntax trees, code listings). Parsers
//! return `Err(reason)` only when the text is not recognisable at all;
//! partially understood output yields a partial structure.

pub mod clang_dump;
pub mod diagnostics;
pub mod go_asm;
pub mod ir_listing;
pub mod javap;
pub mod lexer;
pub mod outline;
pub mod sexpr;

pub use lexer::{tokenize, Dialect, Lexed};
pub use outline::{outline, Outline};

use once_cell::sync::Lazy;
use regex::Regex;

/// Borrow a lazily compiled pattern, reporting a bad pattern as a parse error
pub(crate) fn compiled(
    re: &'static Lazy<Option<Regex>>,
    name: &str,
) -> Result<&'static Regex, String> {
    let pattern: &'static Option<Regex> = re;
    pattern
        .as_ref()
        .ok_or_else(|| format!("{} pattern failed to compile", name))
}

/// Collapse whitespace and cut a label to `max` characters
pub fn clip_label(text: &str, max: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max {
        return collapsed;
    }
    let mut clipped: String = collapsed.chars().take(max.saturating_sub(3)).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_label() {
        assert_eq!(clip_label("a  b\n c", 10), "a b c");
        assert_eq!(clip_label("abcdefghij", 6), "abc...");
    }
}
