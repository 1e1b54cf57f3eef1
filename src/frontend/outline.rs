/// Brace-structure outline of a token stream
///
/// Not a grammar: declarations, control blocks and statements are recognised
/// from their leading tokens, which is enough to draw a stable tree for every
/// C-family language without a full parser.
use crate::core::types::{Diagnostic, SyntaxTree, Token, TokenKind};
use crate::frontend::clip_label;
use crate::frontend::lexer::Dialect;

const CONTAINERS: &[&str] = &[
    "class", "struct", "interface", "enum", "union", "namespace", "protocol", "extension",
    "record",
];

const CONTROL: &[&str] = &[
    "if", "else", "for", "while", "do", "switch", "try", "catch", "finally", "synchronized",
    "select", "guard", "repeat", "defer", "case", "default",
];

const STATEMENT_KEYWORDS: &[&str] = &[
    "return", "import", "package", "using", "throw", "break", "continue", "goto", "typedef",
    "defer", "go", "let", "var", "const", "type",
];

const LABEL_WIDTH: usize = 60;

#[derive(Clone, Debug, Default)]
pub struct Outline {
    pub tree: SyntaxTree,
    pub errors: Vec<Diagnostic>,
}

struct Builder<'a> {
    dialect: Dialect,
    tree: SyntaxTree,
    errors: Vec<Diagnostic>,
    /// Open blocks: node index and the line of their `{`
    stack: Vec<(usize, Option<u32>)>,
    pending: Vec<&'a Token>,
    paren_depth: usize,
    /// Depth of braces folded into the pending statement (initializers, lambdas)
    inline_depth: usize,
}

pub fn outline(tokens: &[Token], dialect: Dialect, root_label: &str) -> Outline {
    let mut tree = SyntaxTree::default();
    let root = tree.push("source_file", root_label, None);
    let mut b = Builder {
        dialect,
        tree,
        errors: Vec::new(),
        stack: vec![(root, None)],
        pending: Vec::new(),
        paren_depth: 0,
        inline_depth: 0,
    };

    for tok in tokens.iter().filter(|t| t.kind != TokenKind::Comment) {
        b.feed(tok);
    }
    b.finish()
}

impl<'a> Builder<'a> {
    fn current(&self) -> usize {
        self.stack.last().map(|(idx, _)| *idx).unwrap_or(0)
    }

    fn feed(&mut self, tok: &'a Token) {
        if tok.kind == TokenKind::Directive {
            self.flush();
            let parent = self.current();
            self.tree.push_at(
                "directive",
                clip_label(&tok.text, LABEL_WIDTH),
                Some(parent),
                tok.line,
                tok.column,
            );
            return;
        }

        if self.inline_depth > 0 {
            match tok.text.as_str() {
                "{" => self.inline_depth += 1,
                "}" => self.inline_depth -= 1,
                _ => {}
            }
            self.pending.push(tok);
            return;
        }

        if self.dialect.newline_terminates() && self.paren_depth == 0 {
            if let Some(last) = self.pending.last() {
                if tok.line > last.line && !continues_line(last) && !tok.text.starts_with('.') {
                    self.flush();
                }
            }
        }

        match tok.text.as_str() {
            "(" | "[" => {
                self.paren_depth += 1;
                self.pending.push(tok);
            }
            ")" | "]" => {
                if self.paren_depth == 0 {
                    self.errors.push(
                        Diagnostic::error(format!("unexpected '{}'", tok.text))
                            .at(tok.line, tok.column),
                    );
                } else {
                    self.paren_depth -= 1;
                }
                self.pending.push(tok);
            }
            "{" if tok.kind == TokenKind::Punctuation => {
                if self.paren_depth > 0 || self.is_inline_brace() {
                    self.inline_depth = 1;
                    self.pending.push(tok);
                } else {
                    self.open_block(tok);
                }
            }
            "}" if tok.kind == TokenKind::Punctuation => {
                self.flush();
                if self.stack.len() <= 1 {
                    self.errors
                        .push(Diagnostic::error("unexpected '}'").at(tok.line, tok.column));
                } else {
                    self.stack.pop();
                }
            }
            ";" if self.paren_depth == 0 => self.flush(),
            _ => self.pending.push(tok),
        }
    }

    /// `{` that belongs to an expression rather than opening a block
    fn is_inline_brace(&self) -> bool {
        let (first, last) = match (self.pending.first(), self.pending.last()) {
            (Some(first), Some(last)) => (first.text.as_str(), last.text.as_str()),
            _ => return false,
        };
        if matches!(last, "=" | ":=" | "," | "return" | "->") || first == "return" {
            return true;
        }
        !CONTROL.contains(&first)
            && first != "func"
            && self.pending.iter().any(|t| is_assignment(&t.text))
    }

    fn open_block(&mut self, brace: &'a Token) {
        let header = std::mem::take(&mut self.pending);
        let (kind, label) = classify_header(&header);
        let anchor = header.first().copied().unwrap_or(brace);
        let parent = self.current();
        let idx = self
            .tree
            .push_at(kind, label, Some(parent), anchor.line, anchor.column);
        self.stack.push((idx, brace.line));
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let statement = std::mem::take(&mut self.pending);
        let (kind, label) = classify_statement(&statement);
        let parent = self.current();
        self.tree.push_at(
            kind,
            label,
            Some(parent),
            statement[0].line,
            statement[0].column,
        );
    }

    fn finish(mut self) -> Outline {
        if self.inline_depth > 0 {
            let line = self.pending.first().and_then(|t| t.line);
            self.errors
                .push(Diagnostic::error("unbalanced '{' in expression").at(line, None));
        }
        self.flush();
        if self.paren_depth > 0 {
            self.errors.push(Diagnostic::error("unbalanced '(' at end of input"));
        }
        while self.stack.len() > 1 {
            if let Some((idx, line)) = self.stack.pop() {
                let kind = &self.tree.nodes[idx].kind;
                self.errors.push(
                    Diagnostic::error(format!("missing '}}' to close {}", kind)).at(line, None),
                );
            }
        }
        Outline {
            tree: self.tree,
            errors: self.errors,
        }
    }
}

fn continues_line(last: &Token) -> bool {
    (last.kind == TokenKind::Operator && !matches!(last.text.as_str(), "++" | "--"))
        || matches!(last.text.as_str(), "," | "(" | "[" | ".")
}

fn is_assignment(text: &str) -> bool {
    text.ends_with('=') && !matches!(text, "==" | "!=" | "<=" | ">=")
}

fn classify_header(header: &[&Token]) -> (&'static str, String) {
    if header.is_empty() {
        return ("block", "{}".to_string());
    }

    if let Some(pos) = header.iter().position(|t| CONTAINERS.contains(&t.text.as_str())) {
        let kind = CONTAINERS
            .iter()
            .copied()
            .find(|c| *c == header[pos].text)
            .unwrap_or("block");
        let name = header[pos + 1..]
            .iter()
            .find(|t| t.kind == TokenKind::Identifier)
            .or_else(|| {
                header[..pos]
                    .iter()
                    .rev()
                    .find(|t| t.kind == TokenKind::Identifier)
            })
            .map(|t| t.text.clone())
            .unwrap_or_else(|| kind.to_string());
        return (kind, name);
    }

    let first = header[0].text.as_str();
    if let Some(kind) = CONTROL.iter().copied().find(|c| *c == first) {
        return (kind, render(header));
    }

    if let Some(name) = function_name(header) {
        return ("function", name);
    }
    ("block", render(header))
}

/// Name before the parameter list, skipping a Go method receiver
fn function_name(header: &[&Token]) -> Option<String> {
    let mut search_from = 0;
    loop {
        let open = search_from + header[search_from..].iter().position(|t| t.text == "(")?;
        let before = open.checked_sub(1).map(|i| header[i])?;
        if before.text == "func" {
            let mut depth = 0;
            let close = header[open..].iter().position(|t| {
                match t.text.as_str() {
                    "(" => depth += 1,
                    ")" => depth -= 1,
                    _ => {}
                }
                depth == 0
            })?;
            search_from = open + close + 1;
            continue;
        }
        if before.kind == TokenKind::Identifier || before.kind == TokenKind::Keyword {
            return Some(before.text.clone());
        }
        return None;
    }
}

fn classify_statement(tokens: &[&Token]) -> (&'static str, String) {
    let first = tokens[0].text.as_str();
    let kind = if let Some(kw) = STATEMENT_KEYWORDS.iter().copied().find(|k| *k == first) {
        kw
    } else if tokens.iter().any(|t| t.kind == TokenKind::Operator && is_assignment(&t.text)) {
        "assignment"
    } else if tokens.iter().any(|t| t.text == "(") {
        "call"
    } else {
        "statement"
    };
    (kind, render(tokens))
}

fn render(tokens: &[&Token]) -> String {
    let mut out = String::new();
    let mut prev: Option<&str> = None;
    for tok in tokens {
        let text = tok.text.as_str();
        let glue = matches!(text, "(" | ")" | "[" | "]" | "," | ";" | "." | "::" | "++" | "--")
            || prev.is_some_and(|p| matches!(p, "(" | "[" | "." | "::"));
        if !out.is_empty() && !glue {
            out.push(' ');
        }
        out.push_str(text);
        prev = Some(text);
    }
    clip_label(&out, LABEL_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::lexer::tokenize;

    fn build(source: &str, dialect: Dialect) -> Outline {
        outline(&tokenize(source, dialect).tokens, dialect, "input")
    }

    fn shape(tree: &SyntaxTree) -> Vec<(String, String, Option<usize>)> {
        tree.nodes
            .iter()
            .map(|n| (n.kind.clone(), n.label.clone(), n.parent))
            .collect()
    }

    #[test]
    fn test_java_class_outline() {
        let source = "public class Main {\n  public static void main(String[] args) {\n    int x = 1;\n    if (x > 0) {\n      System.out.println(x);\n    }\n  }\n}\n";
        let out = build(source, Dialect::Java);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let nodes = shape(&out.tree);
        assert_eq!(nodes[1], ("class".to_string(), "Main".to_string(), Some(0)));
        assert_eq!(nodes[2].0, "function");
        assert_eq!(nodes[2].1, "main");
        assert_eq!(nodes[3].0, "assignment");
        assert_eq!(nodes[4].0, "if");
        assert_eq!(nodes[5].0, "call");
        assert_eq!(nodes[5].2, Some(4));
        assert_eq!(out.tree.nodes[2].line, Some(2));
    }

    #[test]
    fn test_go_newline_statements() {
        let source = "package main\n\nimport \"fmt\"\n\nfunc (s *Server) Start() {\n\tx := 1 +\n\t\t2\n\tfmt.Println(x)\n}\n";
        let out = build(source, Dialect::Go);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let kinds: Vec<&str> = out.tree.nodes.iter().map(|n| n.kind.as_str()).collect();
        assert_eq!(
            kinds,
            vec!["source_file", "package", "import", "function", "assignment", "call"]
        );
        assert_eq!(out.tree.nodes[3].label, "Start");
    }

    #[test]
    fn test_initializer_braces_stay_in_statement() {
        let out = build("int a[] = {1, 2};\nint main() { return 0; }", Dialect::C);
        assert!(out.errors.is_empty());
        assert_eq!(out.tree.nodes[1].kind, "assignment");
        assert_eq!(out.tree.nodes[2].kind, "function");
        assert_eq!(out.tree.nodes[3].kind, "return");
        assert_eq!(out.tree.len(), 4);
    }

    #[test]
    fn test_go_struct_and_composite_literal() {
        let source = "type Point struct {\n\tX int\n}\nvar p = Point{X: 1}\n";
        let out = build(source, Dialect::Go);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        assert_eq!(out.tree.nodes[1].kind, "struct");
        assert_eq!(out.tree.nodes[1].label, "Point");
        assert_eq!(out.tree.nodes.last().unwrap().kind, "var");
    }

    #[test]
    fn test_unbalanced_braces_are_reported() {
        let open = build("int main() {\n  return 0;\n", Dialect::C);
        assert_eq!(open.errors.len(), 1);
        assert_eq!(open.errors[0].line, Some(1));

        let close = build("}\n", Dialect::C);
        assert_eq!(close.errors.len(), 1);
        assert!(close.errors[0].message.contains("unexpected"));
    }

    #[test]
    fn test_directive_nodes() {
        let out = build("#include <stdio.h>\nint main(void) { return 0; }", Dialect::C);
        assert_eq!(out.tree.nodes[1].kind, "directive");
        assert_eq!(out.tree.nodes[1].label, "#include <stdio.h>");
    }
}
