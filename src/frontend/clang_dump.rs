/// Parsers for clang's `-Xclang -dump-tokens` and `-Xclang -ast-dump` text
use crate::core::types::{SyntaxTree, Token, TokenKind};
use crate::frontend::{clip_label, compiled};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;

static TOKEN_LINE: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"^(?P<kind>[A-Za-z_]\w*) '(?P<text>.*)'\s.*Loc=<(?P<loc>[^>]*)>").ok()
});

static LOCATION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(?P<file>.+?):(?P<line>\d+):(?P<col>\d+)").ok());

static AST_LINE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^(?P<prefix>[ |`-]*)(?P<kind>[A-Z]\w*)(?P<rest>.*)$").ok());

/// `line:` and `col:` must be tried before the file form
static AST_LOCATION: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"line:(?P<line>\d+):(?P<lcol>\d+)|col:(?P<col>\d+)|(?P<file>[^\s<>:,']+):(?P<fline>\d+):(?P<fcol>\d+)",
    )
    .ok()
});

static ADDRESS: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"\b0x[0-9a-f]+\b").ok());
static QUOTED: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"'([^']*)'").ok());

const FLAG_WORDS: &[&str] = &[
    "implicit", "used", "referenced", "invalid", "cinit", "callinit", "listinit", "lvalue",
    "prvalue", "xvalue", "extern", "static", "inline", "constexpr", "definition", "parent",
    "prev", "sugar", "imported", "sloc", "struct", "union", "class", "enum", "typename",
];

const LABEL_WIDTH: usize = 48;

fn same_file(file: &str, source_file: &str) -> bool {
    Path::new(file.trim()).file_name() == Some(std::ffi::OsStr::new(source_file))
}

/// Tokens of `source_file` from a `-dump-tokens` listing (headers are dropped)
pub fn parse_tokens(dump: &str, source_file: &str) -> Result<Vec<Token>, String> {
    let line_re = compiled(&TOKEN_LINE, "token")?;
    let loc_re = compiled(&LOCATION, "location")?;

    let mut tokens = Vec::new();
    let mut recognised = false;
    for text in dump.lines() {
        let Some(caps) = line_re.captures(text) else {
            continue;
        };
        recognised = true;
        let kind = &caps["kind"];
        if kind == "eof" {
            continue;
        }
        let Some(loc) = loc_re.captures(&caps["loc"]) else {
            continue;
        };
        if !same_file(&loc["file"], source_file) {
            continue;
        }
        let spelling = &caps["text"];
        let line = loc["line"].parse().unwrap_or(0);
        let column = loc["col"].parse().unwrap_or(0);
        tokens.push(Token::new(token_kind(kind, spelling), spelling).at(line, column));
    }

    if !recognised {
        return Err("no -dump-tokens lines in clang output".to_string());
    }
    Ok(tokens)
}

fn token_kind(kind: &str, spelling: &str) -> TokenKind {
    match kind {
        "identifier" | "raw_identifier" => TokenKind::Identifier,
        "numeric_constant" | "char_constant" | "wide_char_constant" | "utf8_char_constant"
        | "utf16_char_constant" | "utf32_char_constant" => TokenKind::Literal,
        k if k.ends_with("string_literal") => TokenKind::StringLiteral,
        "l_paren" | "r_paren" | "l_brace" | "r_brace" | "l_square" | "r_square" | "semi"
        | "comma" | "period" | "colon" | "coloncolon" | "ellipsis" => TokenKind::Punctuation,
        "hash" | "hashhash" => TokenKind::Directive,
        "comment" => TokenKind::Comment,
        "unknown" => TokenKind::Unknown,
        // keyword tokens are named after their own spelling
        k if k == spelling => TokenKind::Keyword,
        _ => TokenKind::Operator,
    }
}

/// Tree of the declarations of `source_file` from an `-ast-dump` listing
///
/// Top-level declarations pulled in from headers or implicit builtins are
/// skipped together with their subtrees.
pub fn parse_ast(dump: &str, source_file: &str) -> Result<SyntaxTree, String> {
    let line_re = compiled(&AST_LINE, "ast line")?;
    let loc_re = compiled(&AST_LOCATION, "ast location")?;

    let mut tree = SyntaxTree::default();
    let root = tree.push("TranslationUnitDecl", source_file, None);
    let mut stack: Vec<(usize, usize)> = Vec::new();
    let mut file = String::new();
    let mut line = 0u32;
    let mut skip_below: Option<usize> = None;
    let mut recognised = false;

    for text in dump.lines() {
        let Some(caps) = line_re.captures(text) else {
            continue;
        };
        recognised = true;
        let depth = caps["prefix"].len() / 2;
        let kind = &caps["kind"];
        let rest = &caps["rest"];

        // Abbreviated locations are relative to the previous one printed,
        // so every line updates the cursor, kept or not.
        let own = advance_location(loc_re, rest, &mut file, &mut line);

        if let Some(limit) = skip_below {
            if depth > limit {
                continue;
            }
            skip_below = None;
        }
        if depth == 0 {
            continue;
        }
        if depth == 1 && !(own.is_some() && same_file(&file, source_file)) {
            skip_below = Some(1);
            continue;
        }

        while stack.last().is_some_and(|(d, _)| *d >= depth) {
            stack.pop();
        }
        let parent = stack.last().map(|(_, idx)| *idx).unwrap_or(root);
        let label = node_label(kind, rest);
        let idx = tree.push_at(
            kind,
            label,
            Some(parent),
            own.map(|(l, _)| l),
            own.map(|(_, c)| c),
        );
        stack.push((depth, idx));
    }

    if !recognised {
        return Err("no AST nodes in clang output".to_string());
    }
    Ok(tree)
}

fn advance_location(
    loc_re: &Regex,
    rest: &str,
    file: &mut String,
    line: &mut u32,
) -> Option<(u32, u32)> {
    let mut first = None;
    for caps in loc_re.captures_iter(rest) {
        let column = if let Some(l) = caps.name("line") {
            *line = l.as_str().parse().unwrap_or(*line);
            caps.name("lcol")
        } else if let Some(c) = caps.name("col") {
            Some(c)
        } else {
            if let Some(f) = caps.name("file") {
                *file = f.as_str().to_string();
            }
            if let Some(l) = caps.name("fline") {
                *line = l.as_str().parse().unwrap_or(*line);
            }
            caps.name("fcol")
        };
        let column = column.and_then(|c| c.as_str().parse().ok()).unwrap_or(0);
        if first.is_none() {
            first = Some((*line, column));
        }
    }
    first
}

fn node_label(kind: &str, rest: &str) -> String {
    let (Ok(addr_re), Ok(quoted_re)) = (compiled(&ADDRESS, "address"), compiled(&QUOTED, "quoted"))
    else {
        return kind.to_string();
    };

    let without_range = strip_range(rest);
    let cleaned = addr_re.replace_all(&without_range, "");
    let quoted: Vec<&str> = quoted_re
        .captures_iter(&cleaned)
        .filter_map(|c| c.get(1).map(|m| m.as_str()))
        .collect();
    let bare = quoted_re.replace_all(&cleaned, " ");

    let label = if kind.ends_with("Operator") {
        quoted.last().map(|s| s.to_string())
    } else if kind.ends_with("Literal") {
        match cleaned.find('"') {
            Some(pos) => Some(cleaned[pos..].trim().to_string()),
            None => bare.split_whitespace().last().map(str::to_string),
        }
    } else if kind == "DeclRefExpr" {
        quoted.get(1).map(|s| s.to_string())
    } else if kind == "MemberExpr" {
        bare.split_whitespace()
            .find(|w| w.starts_with('.') || w.starts_with("->"))
            .map(str::to_string)
    } else if kind.ends_with("Decl") {
        bare.split_whitespace()
            .filter(|w| !w.contains(':') && !FLAG_WORDS.contains(w))
            .find(|w| w.starts_with(|c: char| c.is_alphabetic() || c == '_' || c == '~'))
            .map(str::to_string)
    } else {
        None
    };

    match label {
        Some(label) if !label.is_empty() => clip_label(&label, LABEL_WIDTH),
        _ => kind.to_string(),
    }
}

/// Drop the leading `<...>` source range, which may nest (`<<invalid sloc>>`)
fn strip_range(rest: &str) -> String {
    let Some(start) = rest.find('<') else {
        return rest.to_string();
    };
    let mut depth = 0usize;
    for (i, c) in rest[start..].char_indices() {
        match c {
            '<' => depth += 1,
            '>' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start + i + 1;
                    return format!("{}{}", &rest[..start], &rest[end..]);
                }
            }
            _ => {}
        }
    }
    rest[..start].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKENS: &str = "\
typedef 'typedef'\t [StartOfLine]\tLoc=</usr/include/stdio.h:30:1>
int 'int'\t [StartOfLine]\tLoc=<source.c:2:1>
identifier 'main'\t [LeadingSpace]\tLoc=<source.c:2:5>
l_paren '('\t\tLoc=<source.c:2:9>
r_paren ')'\t\tLoc=<source.c:2:10>
l_brace '{'\t [LeadingSpace]\tLoc=<source.c:2:12>
return 'return'\t [StartOfLine] [LeadingSpace]\tLoc=<source.c:3:3>
numeric_constant '0'\t [LeadingSpace]\tLoc=<source.c:3:10>
semi ';'\t\tLoc=<source.c:3:11>
r_brace '}'\t [StartOfLine]\tLoc=<source.c:4:1>
eof ''\t\tLoc=<source.c:4:2>
";

    #[test]
    fn test_parse_tokens_filters_headers() {
        let tokens = parse_tokens(TOKENS, "source.c").unwrap();
        assert_eq!(tokens.len(), 9);
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].text, "main");
        assert_eq!((tokens[1].line, tokens[1].column), (Some(2), Some(5)));
        assert_eq!(tokens[6].kind, TokenKind::Literal);
        assert_eq!(tokens[7].kind, TokenKind::Punctuation);
    }

    #[test]
    fn test_parse_tokens_rejects_garbage() {
        assert!(parse_tokens("source.c:1:1: error: expected identifier", "source.c").is_err());
    }

    const AST: &str = "\
TranslationUnitDecl 0x55d0c8a2e8e8 <<invalid sloc>> <invalid sloc>
|-TypedefDecl 0x55d0c8a2f190 <<invalid sloc>> <invalid sloc> implicit __int128_t '__int128'
| `-BuiltinType 0x55d0c8a2ee90 '__int128'
|-FunctionDecl 0x55d0c8a90000 </usr/include/stdio.h:356:1, col:40> col:12 printf 'int (const char *, ...)'
| `-ParmVarDecl 0x55d0c8a8ff00 <col:20, col:32> col:32 __format 'const char *'
|-FunctionDecl 0x55d0c8a91000 <source.c:3:1, line:6:1> line:3:5 main 'int (void)'
| `-CompoundStmt 0x55d0c8a91200 <col:16, line:6:1>
|   |-DeclStmt 0x55d0c8a91300 <line:4:3, col:12>
|   | `-VarDecl 0x55d0c8a91280 <col:3, col:11> col:7 used x 'int' cinit
|   |   `-IntegerLiteral 0x55d0c8a91260 <col:11> 'int' 42
|   `-ReturnStmt 0x55d0c8a91400 <line:5:3, col:14>
|     `-BinaryOperator 0x55d0c8a913e0 <col:10, col:14> 'int' '+'
|       |-ImplicitCastExpr 0x55d0c8a913b0 <col:10> 'int' <LValueToRValue>
|       | `-DeclRefExpr 0x55d0c8a91370 <col:10> 'int' lvalue Var 0x55d0c8a91280 'x' 'int'
|       `-IntegerLiteral 0x55d0c8a91390 <col:14> 'int' 1
";

    #[test]
    fn test_parse_ast_keeps_only_source_declarations() {
        let tree = parse_ast(AST, "source.c").unwrap();
        let kinds: Vec<&str> = tree.nodes.iter().map(|n| n.kind.as_str()).collect();
        assert_eq!(kinds[0], "TranslationUnitDecl");
        assert_eq!(kinds[1], "FunctionDecl");
        assert!(!kinds.contains(&"TypedefDecl"));
        assert!(!kinds.contains(&"ParmVarDecl"));

        let main = &tree.nodes[1];
        assert_eq!(main.label, "main");
        assert_eq!((main.line, main.column), (Some(3), Some(1)));

        let var = tree.nodes.iter().find(|n| n.kind == "VarDecl").unwrap();
        assert_eq!(var.label, "x");
        assert_eq!(var.line, Some(4));

        let op = tree.nodes.iter().find(|n| n.kind == "BinaryOperator").unwrap();
        assert_eq!(op.label, "+");
        assert_eq!(op.line, Some(5));
        assert_eq!(op.column, Some(10));

        let reference = tree.nodes.iter().find(|n| n.kind == "DeclRefExpr").unwrap();
        assert_eq!(reference.label, "x");
        assert_eq!(tree.nodes[reference.parent.unwrap()].kind, "ImplicitCastExpr");

        let literal = tree.nodes.iter().filter(|n| n.kind == "IntegerLiteral").count();
        assert_eq!(literal, 2);
    }

    #[test]
    fn test_parse_ast_rejects_garbage() {
        assert!(parse_ast("error: no input files\n", "source.c").is_err());
    }
}
