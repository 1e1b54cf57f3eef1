//! Parenthesised dumps such as `swiftc -dump-parse`
//!
//! Every `(head attr=... "name" ...)` form becomes one node: the head word is
//! the node kind and the first double-quoted string before the first child is
//! its label. Locations come from `range=[file:line:col - ...]`. Input that
//! ends with open forms is closed implicitly.

use crate::core::types::SyntaxTree;
use crate::frontend::{clip_label, compiled};
use once_cell::sync::Lazy;
use regex::Regex;

static RANGE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"range=\[[^\]:]*:(\d+):(\d+)").ok());

struct Frame {
    header: String,
    node: Option<usize>,
}

pub fn parse_dump(text: &str) -> Result<SyntaxTree, String> {
    let range_re = compiled(&RANGE, "range")?;
    if !text.contains('(') {
        return Err("no parenthesised dump in output".to_string());
    }

    let mut tree = SyntaxTree::default();
    let mut stack: Vec<Frame> = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;

    let finish = |tree: &mut SyntaxTree, stack: &mut Vec<Frame>| {
        let parent = stack
            .iter()
            .rev()
            .skip(1)
            .find_map(|frame| frame.node);
        if let Some(frame) = stack.last_mut() {
            if frame.node.is_none() {
                frame.node = Some(open_node(tree, &frame.header, parent, range_re));
            }
        }
    };

    for ch in text.chars() {
        if let Some(open) = quote {
            if let Some(frame) = stack.last_mut() {
                if frame.node.is_none() {
                    frame.header.push(ch);
                }
            }
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == open {
                quote = None;
            }
            continue;
        }
        match ch {
            '(' => {
                finish(&mut tree, &mut stack);
                stack.push(Frame {
                    header: String::new(),
                    node: None,
                });
            }
            ')' => {
                finish(&mut tree, &mut stack);
                stack.pop();
            }
            '"' | '\'' if !stack.is_empty() => {
                quote = Some(ch);
                if let Some(frame) = stack.last_mut() {
                    if frame.node.is_none() {
                        frame.header.push(ch);
                    }
                }
            }
            _ => {
                if let Some(frame) = stack.last_mut() {
                    if frame.node.is_none() {
                        frame.header.push(ch);
                    }
                }
            }
        }
    }

    while !stack.is_empty() {
        finish(&mut tree, &mut stack);
        stack.pop();
    }
    Ok(tree)
}

fn open_node(tree: &mut SyntaxTree, header: &str, parent: Option<usize>, range_re: &Regex) -> usize {
    let kind = header
        .split_whitespace()
        .next()
        .filter(|word| !word.starts_with('"') && !word.starts_with('\''))
        .unwrap_or("node")
        .to_string();
    let label = first_double_quoted(header).unwrap_or_else(|| kind.clone());
    let (line, column) = match range_re.captures(header) {
        Some(caps) => (caps[1].parse().ok(), caps[2].parse().ok()),
        None => (None, None),
    };
    tree.push_at(kind, clip_label(&label, 80), parent, line, column)
}

fn first_double_quoted(header: &str) -> Option<String> {
    let mut chars = header.chars();
    let mut in_single = false;
    while let Some(ch) = chars.next() {
        match ch {
            '\'' => in_single = !in_single,
            '"' if !in_single => {
                let mut value = String::new();
                let mut escaped = false;
                for c in chars.by_ref() {
                    if escaped {
                        value.push(c);
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        return Some(value);
                    } else {
                        value.push(c);
                    }
                }
                return Some(value);
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"(source_file "main.swift"
  (func_decl range=[main.swift:1:1 - line:3:1] "add(_:_:)" interface type='(Int, Int) -> Int'
    (parameter_list range=[main.swift:1:9 - line:1:33]
      (parameter "a" apiName=a)
      (parameter "b" apiName=b))
    (brace_stmt range=[main.swift:1:40 - line:3:1]
      (return_stmt range=[main.swift:2:5 - line:2:16]
        (binary_expr
          (unresolved_decl_ref_expr name="+" function_ref=unapplied)))))
  (top_level_code_decl range=[main.swift:4:1 - line:4:15]
    (brace_stmt implicit
      (call_expr type='()' "print(\"(\")"))))
"#;

    #[test]
    fn test_swift_dump_tree() {
        let tree = parse_dump(DUMP).unwrap();
        assert_eq!(tree.nodes[0].kind, "source_file");
        assert_eq!(tree.nodes[0].label, "main.swift");
        assert_eq!(tree.nodes[0].parent, None);

        let func = tree.nodes.iter().position(|n| n.kind == "func_decl").unwrap();
        assert_eq!(tree.nodes[func].label, "add(_:_:)");
        assert_eq!(tree.nodes[func].line, Some(1));
        assert_eq!(tree.nodes[func].parent, Some(0));
        let params: Vec<_> = tree
            .nodes
            .iter()
            .filter(|n| n.kind == "parameter")
            .map(|n| n.label.as_str())
            .collect();
        assert_eq!(params, vec!["a", "b"]);

        let ret = tree.nodes.iter().position(|n| n.kind == "return_stmt").unwrap();
        assert_eq!(tree.nodes[ret].line, Some(2));
        assert_eq!(tree.nodes[ret].column, Some(5));

        // no quoted name falls back to the head word
        let binary = tree.nodes.iter().position(|n| n.kind == "binary_expr").unwrap();
        assert_eq!(tree.nodes[binary].label, "binary_expr");

        // parentheses inside quotes do not open forms
        let call = tree.nodes.iter().position(|n| n.kind == "call_expr").unwrap();
        assert_eq!(tree.nodes[call].label, "print(\"(\")");
        let top = tree.nodes.iter().position(|n| n.kind == "top_level_code_decl").unwrap();
        assert_eq!(tree.nodes[top].parent, Some(0));
    }

    #[test]
    fn test_truncated_dump_is_closed() {
        let tree = parse_dump("(source_file \"x.swift\"\n  (func_decl \"f()\"\n    (brace_stmt").unwrap();
        assert_eq!(tree.len(), 3);
        assert_eq!(tree.nodes[2].parent, Some(1));
    }

    #[test]
    fn test_plain_text_is_rejected() {
        assert!(parse_dump("error: unable to load standard library").is_err());
    }
}
