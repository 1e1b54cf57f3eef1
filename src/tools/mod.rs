//! Embedded toolchains
//!
//! Programs that run in-process under the sandbox contract. Each one writes
//! an [`EmbeddedReport`] as JSON on stdout, which the `Embedded` output
//! parser decodes back into a stage output.
//!
//! - [`source`]: generic C-family lexer and brace outliner (Java front end)
//! - [`brainfuck`]: lexer, parser, optimizer and tracing interpreter

pub mod brainfuck;
pub mod source;

use crate::core::types::{Diagnostic, StageOutput};
use crate::sandbox::EmbeddedContext;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// What an embedded tool hands back to the adapter
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedReport {
    pub output: StageOutput,
    #[serde(default)]
    pub diagnostics: Vec<Diagnostic>,
}

impl EmbeddedReport {
    pub fn new(output: StageOutput, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            output,
            diagnostics,
        }
    }

    /// Serialize onto the program's stdout
    pub fn emit(&self, ctx: &mut EmbeddedContext<'_>) {
        if let Err(e) = serde_json::to_writer(ctx.stdout(), self) {
            log::debug!("embedded report not written: {}", e);
        }
    }

    pub fn decode(text: &str) -> Result<Self, String> {
        serde_json::from_str(text.trim()).map_err(|e| format!("invalid embedded report: {}", e))
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics.iter().any(Diagnostic::is_error)
    }
}

/// Read the single positional input file named on the command line
pub(crate) fn read_source(ctx: &mut EmbeddedContext<'_>) -> Option<String> {
    let Some(path) = ctx.positional().first().map(|p| p.to_string()) else {
        let _ = writeln!(ctx.stderr(), "no input file");
        return None;
    };
    match ctx.read_input_text(&path) {
        Ok(text) => Some(text),
        Err(e) => {
            let _ = writeln!(ctx.stderr(), "{}: {}", path, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{Token, TokenKind};

    #[test]
    fn test_report_decodes_what_it_encodes() {
        let report = EmbeddedReport::new(
            StageOutput::Tokens(vec![Token::new(TokenKind::Instruction, "+").at(1, 1)]),
            vec![Diagnostic::error("unmatched ']'").at(Some(1), Some(2))],
        );
        let text = serde_json::to_string(&report).unwrap();
        let decoded = EmbeddedReport::decode(&text).unwrap();
        assert_eq!(decoded, report);
        assert!(decoded.has_errors());
        assert!(EmbeddedReport::decode("not json").is_err());
    }
}
