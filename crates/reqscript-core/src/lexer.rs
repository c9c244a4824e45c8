//! Tokenizer for script source lines.
//!
//! Patterns are tried in priority order at each position: strings, inline
//! JSON, numbers, variables, URLs, operators, brackets, then words. A word
//! that matches the keyword table wins over the generic identifier, so
//! `header` is always the keyword and never a bare identifier.

use crate::error::ScriptError;

/// HTTP method keywords, recognized case-sensitively.
pub const METHODS: &[&str] = &[
    "GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS", "CONNECT", "TRACE",
];

/// Language keywords. Anything else word-shaped lexes as an identifier.
pub const KEYWORDS: &[&str] = &[
    "set", "var", "print", "length", "split", "at", "extract", "as", "jsonpath", "xpath", "regex",
    "status", "response", "if", "then", "else", "endif", "contains", "matches", "exists", "empty",
    "greater", "less", "repeat", "times", "do", "endloop", "while", "foreach", "in", "break",
    "continue", "assert", "expect", "time", "wait", "sleep", "log", "debug", "clear", "cookies",
    "reset", "base", "url", "header", "body", "json", "auth", "basic", "bearer", "timeout", "ms",
    "s", "and", "or", "not",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// An HTTP method keyword (`GET`, `POST`, ...).
    Method,
    /// A language keyword; the lexeme identifies which one.
    Keyword,
    /// Double-quoted string, stored with escapes decoded and quotes removed.
    Str,
    /// Integer or decimal literal.
    Number,
    /// `$name` reference, stored without the `$`.
    Variable,
    /// Literal `http(s)://...` URL up to the next whitespace.
    Url,
    /// Brace-balanced inline JSON object (at most one nested object level).
    JsonInline,
    /// `==`, `!=`, `>=`, `<=`, `>`, `<`.
    Comparison,
    /// `+`, `-`, `*`, `/`.
    Arithmetic,
    /// Bare identifier (lowest priority word match).
    Ident,
    LBracket,
    RBracket,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub line: usize,
    pub column: usize,
}

impl Token {
    fn new(kind: TokenKind, lexeme: impl Into<String>, line: usize, column: usize) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
            line,
            column,
        }
    }
}

pub struct Lexer {
    input: Vec<char>,
    pos: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Lexer {
            input: input.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.input.get(self.pos + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += 1;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn starts_with(&self, prefix: &str) -> bool {
        prefix
            .chars()
            .enumerate()
            .all(|(i, c)| self.peek_at(i) == Some(c))
    }

    pub fn tokenize(&mut self) -> Result<Vec<Token>, ScriptError> {
        let mut tokens = Vec::new();

        while let Some(ch) = self.peek() {
            let (line, column) = (self.line, self.column);
            match ch {
                ' ' | '\t' | '\r' | '\n' => {
                    self.advance();
                }
                '#' => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.advance();
                    }
                }
                '"' => tokens.push(self.scan_string(line, column)?),
                '{' => tokens.push(self.scan_json_inline(line, column)?),
                '0'..='9' => tokens.push(self.scan_number(line, column)),
                '$' => tokens.push(self.scan_variable(line, column)?),
                '=' | '!' | '>' | '<' => tokens.push(self.scan_comparison(line, column)?),
                '+' | '-' | '*' | '/' => {
                    self.advance();
                    tokens.push(Token::new(TokenKind::Arithmetic, ch, line, column));
                }
                '[' => {
                    self.advance();
                    tokens.push(Token::new(TokenKind::LBracket, "[", line, column));
                }
                ']' => {
                    self.advance();
                    tokens.push(Token::new(TokenKind::RBracket, "]", line, column));
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    if self.starts_with("http://") || self.starts_with("https://") {
                        tokens.push(self.scan_url(line, column));
                    } else {
                        tokens.push(self.scan_word(line, column));
                    }
                }
                other => {
                    return Err(ScriptError::Lexical {
                        line,
                        column,
                        near: other.to_string(),
                    });
                }
            }
        }

        Ok(tokens)
    }

    fn scan_string(&mut self, line: usize, column: usize) -> Result<Token, ScriptError> {
        self.advance(); // opening quote
        let mut s = String::new();
        loop {
            match self.advance() {
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('"') => s.push('"'),
                    Some('\\') => s.push('\\'),
                    Some('n') => s.push('\n'),
                    Some('t') => s.push('\t'),
                    Some('r') => s.push('\r'),
                    Some(other) => {
                        // Unknown escapes pass through verbatim.
                        s.push('\\');
                        s.push(other);
                    }
                    None => {
                        return Err(ScriptError::Lexical {
                            line,
                            column,
                            near: "unterminated string".into(),
                        });
                    }
                },
                Some(c) => s.push(c),
                None => {
                    return Err(ScriptError::Lexical {
                        line,
                        column,
                        near: "unterminated string".into(),
                    });
                }
            }
        }
        Ok(Token::new(TokenKind::Str, s, line, column))
    }

    /// Matches one balanced JSON object with at most one nested object
    /// level. Deeper nesting must be written as a quoted string instead.
    fn scan_json_inline(&mut self, line: usize, column: usize) -> Result<Token, ScriptError> {
        let mut raw = String::new();
        let mut depth = 0usize;
        let mut in_string = false;
        let mut escaped = false;
        loop {
            let c = match self.peek() {
                Some(c) => c,
                None => {
                    return Err(ScriptError::Lexical {
                        line,
                        column,
                        near: "unterminated JSON literal".into(),
                    });
                }
            };
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
            } else {
                match c {
                    '"' => in_string = true,
                    '{' => {
                        depth += 1;
                        if depth > 2 {
                            return Err(ScriptError::Lexical {
                                line,
                                column,
                                near: "JSON literal nested deeper than one level".into(),
                            });
                        }
                    }
                    '}' => depth -= 1,
                    _ => {}
                }
            }
            raw.push(c);
            self.advance();
            if depth == 0 && !in_string {
                break;
            }
        }
        Ok(Token::new(TokenKind::JsonInline, raw, line, column))
    }

    fn scan_number(&mut self, line: usize, column: usize) -> Token {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }
        if self.peek() == Some('.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            s.push('.');
            self.advance();
            while let Some(c) = self.peek() {
                if c.is_ascii_digit() {
                    s.push(c);
                    self.advance();
                } else {
                    break;
                }
            }
        }
        Token::new(TokenKind::Number, s, line, column)
    }

    fn scan_variable(&mut self, line: usize, column: usize) -> Result<Token, ScriptError> {
        self.advance(); // '$'
        let mut name = String::new();
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => {
                return Err(ScriptError::Lexical {
                    line,
                    column,
                    near: "$".into(),
                });
            }
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        Ok(Token::new(TokenKind::Variable, name, line, column))
    }

    fn scan_comparison(&mut self, line: usize, column: usize) -> Result<Token, ScriptError> {
        let first = self.advance().unwrap_or_default();
        let two_char = self.peek() == Some('=');
        match (first, two_char) {
            ('=', true) | ('!', true) | ('>', true) | ('<', true) => {
                self.advance();
                Ok(Token::new(
                    TokenKind::Comparison,
                    format!("{}=", first),
                    line,
                    column,
                ))
            }
            ('>', false) => Ok(Token::new(TokenKind::Comparison, ">", line, column)),
            ('<', false) => Ok(Token::new(TokenKind::Comparison, "<", line, column)),
            _ => Err(ScriptError::Lexical {
                line,
                column,
                near: first.to_string(),
            }),
        }
    }

    fn scan_url(&mut self, line: usize, column: usize) -> Token {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                break;
            }
            s.push(c);
            self.advance();
        }
        Token::new(TokenKind::Url, s, line, column)
    }

    fn scan_word(&mut self, line: usize, column: usize) -> Token {
        let mut s = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                s.push(c);
                self.advance();
            } else {
                break;
            }
        }
        let kind = if METHODS.contains(&s.as_str()) {
            TokenKind::Method
        } else if KEYWORDS.contains(&s.as_str()) {
            TokenKind::Keyword
        } else {
            TokenKind::Ident
        };
        Token::new(kind, s, line, column)
    }
}

/// Tokenizes one logical line of script source.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ScriptError> {
    Lexer::new(input).tokenize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<TokenKind> {
        tokenize(input).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn keywords_beat_identifiers() {
        let tokens = tokenize("set header custom_name").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Keyword);
        assert_eq!(tokens[1].kind, TokenKind::Keyword);
        assert_eq!(tokens[2].kind, TokenKind::Ident);
    }

    #[test]
    fn http_methods_are_case_sensitive() {
        let tokens = tokenize("GET get").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Method);
        assert_eq!(tokens[1].kind, TokenKind::Ident);
    }

    #[test]
    fn string_escapes_are_decoded() {
        let tokens = tokenize(r#""a\"b\n\tc""#).unwrap();
        assert_eq!(tokens[0].lexeme, "a\"b\n\tc");
    }

    #[test]
    fn unterminated_string_is_a_lexical_error() {
        assert!(matches!(
            tokenize(r#""abc"#),
            Err(ScriptError::Lexical { .. })
        ));
    }

    #[test]
    fn url_token_runs_to_whitespace() {
        let tokens = tokenize("GET https://example.com/a/b?q=1 header").unwrap();
        assert_eq!(tokens[1].kind, TokenKind::Url);
        assert_eq!(tokens[1].lexeme, "https://example.com/a/b?q=1");
        assert_eq!(tokens[2].kind, TokenKind::Keyword);
    }

    #[test]
    fn variable_strips_dollar() {
        let tokens = tokenize("$name_1").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Variable);
        assert_eq!(tokens[0].lexeme, "name_1");
    }

    #[test]
    fn numbers_integer_and_decimal() {
        let tokens = tokenize("42 3.14").unwrap();
        assert_eq!(tokens[0].lexeme, "42");
        assert_eq!(tokens[1].lexeme, "3.14");
        assert_eq!(kinds("42 3.14"), vec![TokenKind::Number, TokenKind::Number]);
    }

    #[test]
    fn comparison_operators() {
        assert_eq!(
            tokenize("== != >= <= > <")
                .unwrap()
                .iter()
                .map(|t| t.lexeme.clone())
                .collect::<Vec<_>>(),
            vec!["==", "!=", ">=", "<=", ">", "<"]
        );
    }

    #[test]
    fn json_inline_one_nested_level() {
        let tokens = tokenize(r#"json {"user":{"id":42}}"#).unwrap();
        assert_eq!(tokens[1].kind, TokenKind::JsonInline);
        assert_eq!(tokens[1].lexeme, r#"{"user":{"id":42}}"#);
    }

    #[test]
    fn json_inline_rejects_two_nested_levels() {
        assert!(matches!(
            tokenize(r#"json {"a":{"b":{"c":1}}}"#),
            Err(ScriptError::Lexical { .. })
        ));
    }

    #[test]
    fn json_inline_braces_inside_strings_do_not_count() {
        let tokens = tokenize(r#"{"msg":"{curly} text"}"#).unwrap();
        assert_eq!(tokens[0].kind, TokenKind::JsonInline);
    }

    #[test]
    fn comments_are_skipped() {
        let tokens = tokenize("set $x 1 # trailing comment").unwrap();
        assert_eq!(tokens.len(), 3);
    }

    #[test]
    fn unrecognized_character_reports_position() {
        match tokenize("set $x ~") {
            Err(ScriptError::Lexical { line, column, near }) => {
                assert_eq!(line, 1);
                assert_eq!(column, 8);
                assert_eq!(near, "~");
            }
            other => panic!("expected lexical error, got {:?}", other),
        }
    }

    #[test]
    fn bracket_tokens() {
        assert_eq!(
            kinds("$arr [ 0 ]"),
            vec![
                TokenKind::Variable,
                TokenKind::LBracket,
                TokenKind::Number,
                TokenKind::RBracket
            ]
        );
    }
}
