/// Source lexer for the C family, Java, Go and Swift
///
/// Used where a toolchain has no token dump of its own. The lexer never
/// fails: malformed input yields `Unknown` tokens plus error diagnostics.
use crate::config::types::Language;
use crate::core::types::{Diagnostic, Token, TokenKind};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    C,
    Cpp,
    Java,
    Go,
    Swift,
}

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Bool", "_Static_assert",
];

const CPP_EXTRA: &[&str] = &[
    "bool", "catch", "class", "constexpr", "delete", "explicit", "friend", "mutable",
    "namespace", "new", "noexcept", "operator", "override", "private", "protected", "public",
    "template", "this", "throw", "try", "typename", "using", "virtual", "auto", "nullptr",
];

const JAVA_KEYWORDS: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "final", "finally",
    "float", "for", "if", "implements", "import", "instanceof", "int", "interface", "long",
    "native", "new", "package", "private", "protected", "public", "record", "return", "short",
    "static", "super", "switch", "synchronized", "this", "throw", "throws", "try", "var",
    "void", "volatile", "while",
];

const GO_KEYWORDS: &[&str] = &[
    "break", "case", "chan", "const", "continue", "default", "defer", "else", "fallthrough",
    "for", "func", "go", "goto", "if", "import", "interface", "map", "package", "range",
    "return", "select", "struct", "switch", "type", "var",
];

const SWIFT_KEYWORDS: &[&str] = &[
    "as", "break", "case", "catch", "class", "continue", "default", "defer", "do", "else",
    "enum", "extension", "fallthrough", "fileprivate", "for", "func", "guard", "if", "import",
    "in", "init", "internal", "is", "let", "mutating", "open", "private", "protocol", "public",
    "repeat", "return", "self", "static", "struct", "subscript", "switch", "throw", "throws",
    "try", "typealias", "var", "where", "while",
];

const LITERAL_WORDS: &[&str] = &["true", "false", "null", "nil", "nullptr", "NULL"];

/// Multi-character operators, longest first
const OPERATORS: &[&str] = &[
    ">>>=", "<<=", ">>=", ">>>", "...", "..<", "->*", "&^=", "::", "->", "++", "--", "<<",
    ">>", "<=", ">=", "==", "!=", "&&", "||", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
    ":=", "<-", "&^", "=>", "??", "?.", "##",
];

const PUNCTUATION: &[char] = &['(', ')', '{', '}', '[', ']', ';', ',', '.', ':'];
const SINGLE_OPERATORS: &[char] = &['+', '-', '*', '/', '%', '=', '<', '>', '!', '&', '|', '^', '~', '?', '@'];

impl Dialect {
    pub fn for_language(language: Language) -> Option<Self> {
        match language {
            Language::C => Some(Dialect::C),
            Language::Cpp => Some(Dialect::Cpp),
            Language::Java => Some(Dialect::Java),
            Language::Go => Some(Dialect::Go),
            Language::Swift => Some(Dialect::Swift),
            Language::Brainfuck => None,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "c" => Some(Dialect::C),
            "cpp" => Some(Dialect::Cpp),
            "java" => Some(Dialect::Java),
            "go" => Some(Dialect::Go),
            "swift" => Some(Dialect::Swift),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Dialect::C => "c",
            Dialect::Cpp => "cpp",
            Dialect::Java => "java",
            Dialect::Go => "go",
            Dialect::Swift => "swift",
        }
    }

    pub fn is_keyword(self, word: &str) -> bool {
        match self {
            Dialect::C => C_KEYWORDS.contains(&word),
            Dialect::Cpp => C_KEYWORDS.contains(&word) || CPP_EXTRA.contains(&word),
            Dialect::Java => JAVA_KEYWORDS.contains(&word),
            Dialect::Go => GO_KEYWORDS.contains(&word),
            Dialect::Swift => SWIFT_KEYWORDS.contains(&word),
        }
    }

    /// Whether a line break terminates a statement
    pub fn newline_terminates(self) -> bool {
        matches!(self, Dialect::Go | Dialect::Swift)
    }

    fn has_preprocessor(self) -> bool {
        matches!(self, Dialect::C | Dialect::Cpp)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lexed {
    pub tokens: Vec<Token>,
    pub errors: Vec<Diagnostic>,
}

struct Cursor {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    /// Only whitespace seen since the last newline
    line_start: bool,
}

impl Cursor {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            line_start: true,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
            self.line_start = true;
        } else {
            self.column += 1;
            if !c.is_whitespace() {
                self.line_start = false;
            }
        }
        Some(c)
    }

    fn take(&mut self, n: usize) -> String {
        (0..n).filter_map(|_| self.bump()).collect()
    }

    fn take_while(&mut self, mut pred: impl FnMut(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !pred(c) {
                break;
            }
            out.push(c);
            self.bump();
        }
        out
    }
}

pub fn tokenize(source: &str, dialect: Dialect) -> Lexed {
    let mut cur = Cursor::new(source);
    let mut out = Lexed::default();

    while let Some(c) = cur.peek() {
        if c.is_whitespace() {
            cur.bump();
            continue;
        }

        let (line, column) = (cur.line, cur.column);
        let at_line_start = cur.line_start;
        let token = if cur.starts_with("//") {
            let text = cur.take_while(|c| c != '\n');
            Token::new(TokenKind::Comment, text)
        } else if cur.starts_with("/*") {
            lex_block_comment(&mut cur, dialect, &mut out.errors, line, column)
        } else if c == '#' && dialect.has_preprocessor() && at_line_start {
            lex_directive(&mut cur)
        } else if c == '#' && dialect == Dialect::Swift {
            cur.bump();
            let word = cur.take_while(is_ident_continue);
            Token::new(TokenKind::Directive, format!("#{}", word))
        } else if is_ident_start(c, dialect) {
            let word = cur.take_while(|c| is_ident_continue(c) || (c == '$' && dialect == Dialect::Java));
            let kind = if LITERAL_WORDS.contains(&word.as_str()) {
                TokenKind::Literal
            } else if dialect.is_keyword(&word) {
                TokenKind::Keyword
            } else {
                TokenKind::Identifier
            };
            Token::new(kind, word)
        } else if c.is_ascii_digit() || (c == '.' && cur.peek_at(1).is_some_and(|n| n.is_ascii_digit())) {
            Token::new(TokenKind::Literal, lex_number(&mut cur))
        } else if cur.starts_with("\"\"\"") && matches!(dialect, Dialect::Swift | Dialect::Java) {
            lex_delimited(&mut cur, "\"\"\"", true, &mut out.errors, line, column)
        } else if c == '"' {
            lex_delimited(&mut cur, "\"", false, &mut out.errors, line, column)
        } else if c == '`' && dialect == Dialect::Go {
            lex_delimited(&mut cur, "`", true, &mut out.errors, line, column)
        } else if c == '\'' && dialect != Dialect::Swift {
            let mut token = lex_delimited(&mut cur, "'", false, &mut out.errors, line, column);
            token.kind = TokenKind::Literal;
            token
        } else if let Some(op) = OPERATORS.iter().find(|op| cur.starts_with(op)) {
            Token::new(TokenKind::Operator, cur.take(op.chars().count()))
        } else if PUNCTUATION.contains(&c) {
            Token::new(TokenKind::Punctuation, cur.take(1))
        } else if SINGLE_OPERATORS.contains(&c) {
            Token::new(TokenKind::Operator, cur.take(1))
        } else {
            let text = cur.take(1);
            out.errors.push(
                Diagnostic::error(format!("unexpected character '{}'", text.escape_default()))
                    .at(Some(line), Some(column)),
            );
            Token::new(TokenKind::Unknown, text)
        };

        out.tokens.push(token.at(line, column));
    }

    out
}

fn is_ident_start(c: char, dialect: Dialect) -> bool {
    c.is_alphabetic() || c == '_' || (c == '$' && dialect == Dialect::Java)
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn lex_number(cur: &mut Cursor) -> String {
    let mut text = String::new();
    let hex = cur.starts_with("0x") || cur.starts_with("0X");
    while let Some(c) = cur.peek() {
        // `0..<5` is a range, not a float
        if c == '.' && cur.peek_at(1) == Some('.') {
            break;
        }
        let exponent = if hex { matches!(c, 'p' | 'P') } else { matches!(c, 'e' | 'E') };
        if c.is_alphanumeric() || c == '_' || c == '.' || c == '\'' && cur.peek_at(1).is_some_and(|n| n.is_ascii_digit()) {
            text.push(c);
            cur.bump();
            if exponent && matches!(cur.peek(), Some('+') | Some('-')) {
                text.push(cur.bump().unwrap_or('+'));
            }
        } else {
            break;
        }
    }
    text
}

fn lex_block_comment(
    cur: &mut Cursor,
    dialect: Dialect,
    errors: &mut Vec<Diagnostic>,
    line: u32,
    column: u32,
) -> Token {
    let mut text = cur.take(2);
    let mut depth = 1;
    while depth > 0 {
        if cur.peek().is_none() {
            errors.push(Diagnostic::error("unterminated block comment").at(Some(line), Some(column)));
            break;
        }
        if cur.starts_with("*/") {
            text.push_str(&cur.take(2));
            depth -= 1;
        } else if dialect == Dialect::Swift && cur.starts_with("/*") {
            text.push_str(&cur.take(2));
            depth += 1;
        } else {
            text.push_str(&cur.take(1));
        }
    }
    Token::new(TokenKind::Comment, text)
}

fn lex_directive(cur: &mut Cursor) -> Token {
    let mut text = String::new();
    while let Some(c) = cur.peek() {
        if c == '\n' {
            if text.ends_with('\\') {
                text.pop();
                cur.bump();
                continue;
            }
            break;
        }
        text.push(c);
        cur.bump();
    }
    Token::new(TokenKind::Directive, text.trim_end().to_string())
}

/// String, rune or raw literal ending at `delim`; only `multiline` ones may span lines
fn lex_delimited(
    cur: &mut Cursor,
    delim: &str,
    multiline: bool,
    errors: &mut Vec<Diagnostic>,
    line: u32,
    column: u32,
) -> Token {
    let width = delim.chars().count();
    let mut text = cur.take(width);
    let raw = delim == "`";
    loop {
        match cur.peek() {
            None => {
                errors.push(Diagnostic::error("unterminated literal").at(Some(line), Some(column)));
                break;
            }
            Some('\n') if !multiline => {
                errors.push(Diagnostic::error("unterminated literal").at(Some(line), Some(column)));
                break;
            }
            Some('\\') if !raw => {
                text.push_str(&cur.take(2));
            }
            Some(_) if cur.starts_with(delim) => {
                text.push_str(&cur.take(width));
                break;
            }
            Some(_) => text.push_str(&cur.take(1)),
        }
    }
    Token::new(TokenKind::StringLiteral, text)
}
