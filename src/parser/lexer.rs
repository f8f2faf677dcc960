//! Hand-written lexer for rule-file text.
//!
//! Tracks 1-based line/column positions for every token. Recognizes
//! `%` and `//` line comments, nested `/* ... */` block comments,
//! single- or double-quoted strings with C-style escapes, signed decimal
//! integers, identifiers, the `:-` arrow, relational operators, and the
//! `.pred` / `.clear_derived` directive tokens.

use crate::error::ParseError;

/// Token kinds produced by [`Lexer::tokenize`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind {
    /// Identifier (any case); `_` and `_`-prefixed names included
    Ident(String),
    /// Decimal integer literal with optional sign
    Int(i64),
    /// Quoted string literal, escapes resolved
    Str(String),
    LParen,
    RParen,
    Comma,
    Dot,
    Colon,
    /// `:-`
    Turnstile,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    /// `not` keyword
    KwNot,
    /// `.pred` directive
    DirPred,
    /// `.clear_derived` directive
    DirClearDerived,
    Eof,
}

impl TokenKind {
    /// Short description used in error messages
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Ident(name) => format!("identifier '{name}'"),
            TokenKind::Int(i) => format!("integer {i}"),
            TokenKind::Str(_) => "string literal".to_string(),
            TokenKind::LParen => "'('".to_string(),
            TokenKind::RParen => "')'".to_string(),
            TokenKind::Comma => "','".to_string(),
            TokenKind::Dot => "'.'".to_string(),
            TokenKind::Colon => "':'".to_string(),
            TokenKind::Turnstile => "':-'".to_string(),
            TokenKind::Eq => "'='".to_string(),
            TokenKind::Ne => "'!='".to_string(),
            TokenKind::Lt => "'<'".to_string(),
            TokenKind::Le => "'<='".to_string(),
            TokenKind::Gt => "'>'".to_string(),
            TokenKind::Ge => "'>='".to_string(),
            TokenKind::KwNot => "'not'".to_string(),
            TokenKind::DirPred => "'.pred'".to_string(),
            TokenKind::DirClearDerived => "'.clear_derived'".to_string(),
            TokenKind::Eof => "end of input".to_string(),
        }
    }
}

/// A token with its 1-based source position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub line: u32,
    pub column: u32,
}

/// Character-level scanner over one source string
pub struct Lexer {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
}

impl Lexer {
    pub fn new(source: &str) -> Self {
        Lexer {
            chars: source.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the whole input, ending with an `Eof` token
    pub fn tokenize(mut self) -> Result<Vec<Token>, ParseError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let at_end = token.kind == TokenKind::Eof;
            tokens.push(token);
            if at_end {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<char> {
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

    fn error(&self, line: u32, column: u32, message: impl Into<String>) -> ParseError {
        ParseError::syntax(line, column, message)
    }

    fn skip_trivia(&mut self) -> Result<(), ParseError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('%') => self.skip_line(),
                Some('/') if self.peek_at(1) == Some('/') => self.skip_line(),
                Some('/') if self.peek_at(1) == Some('*') => self.skip_block_comment()?,
                _ => return Ok(()),
            }
        }
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            if c == '\n' {
                break;
            }
            self.bump();
        }
    }

    /// Block comments nest
    fn skip_block_comment(&mut self) -> Result<(), ParseError> {
        let (line, column) = (self.line, self.column);
        self.bump();
        self.bump();
        let mut depth = 1usize;
        while depth > 0 {
            match (self.peek(), self.peek_at(1)) {
                (Some('/'), Some('*')) => {
                    self.bump();
                    self.bump();
                    depth += 1;
                }
                (Some('*'), Some('/')) => {
                    self.bump();
                    self.bump();
                    depth -= 1;
                }
                (Some(_), _) => {
                    self.bump();
                }
                (None, _) => {
                    return Err(self.error(line, column, "unterminated block comment"));
                }
            }
        }
        Ok(())
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_trivia()?;
        let (line, column) = (self.line, self.column);
        let token = |kind| Token { kind, line, column };

        let Some(c) = self.peek() else {
            return Ok(token(TokenKind::Eof));
        };

        match c {
            '(' => {
                self.bump();
                Ok(token(TokenKind::LParen))
            }
            ')' => {
                self.bump();
                Ok(token(TokenKind::RParen))
            }
            ',' => {
                self.bump();
                Ok(token(TokenKind::Comma))
            }
            '=' => {
                self.bump();
                Ok(token(TokenKind::Eq))
            }
            '!' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(token(TokenKind::Ne))
                } else {
                    Err(self.error(line, column, "expected '=' after '!'"))
                }
            }
            '<' => {
                self.bump();
                match self.peek() {
                    Some('=') => {
                        self.bump();
                        Ok(token(TokenKind::Le))
                    }
                    Some('>') => {
                        self.bump();
                        Ok(token(TokenKind::Ne))
                    }
                    _ => Ok(token(TokenKind::Lt)),
                }
            }
            '>' => {
                self.bump();
                if self.peek() == Some('=') {
                    self.bump();
                    Ok(token(TokenKind::Ge))
                } else {
                    Ok(token(TokenKind::Gt))
                }
            }
            ':' => {
                self.bump();
                if self.peek() == Some('-') {
                    self.bump();
                    Ok(token(TokenKind::Turnstile))
                } else {
                    Ok(token(TokenKind::Colon))
                }
            }
            '.' => {
                // A dot immediately followed by one of the known
                // directive names is a directive token; any other dot is
                // the item terminator.
                let name = self.peek_ident_after_dot();
                match name.as_str() {
                    "pred" => {
                        self.bump();
                        self.lex_ident_text();
                        Ok(token(TokenKind::DirPred))
                    }
                    "clear_derived" => {
                        self.bump();
                        self.lex_ident_text();
                        Ok(token(TokenKind::DirClearDerived))
                    }
                    _ => {
                        self.bump();
                        Ok(token(TokenKind::Dot))
                    }
                }
            }
            '"' | '\'' => {
                let text = self.lex_string(line, column)?;
                Ok(token(TokenKind::Str(text)))
            }
            '-' | '+' => {
                let negative = c == '-';
                if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) {
                    self.bump();
                    let value = self.lex_int(line, column, negative)?;
                    Ok(token(TokenKind::Int(value)))
                } else {
                    Err(self.error(line, column, format!("unexpected character '{c}'")))
                }
            }
            d if d.is_ascii_digit() => {
                let value = self.lex_int(line, column, false)?;
                Ok(token(TokenKind::Int(value)))
            }
            a if a.is_ascii_alphabetic() || a == '_' => {
                let name = self.lex_ident_text();
                if name == "not" {
                    Ok(token(TokenKind::KwNot))
                } else {
                    Ok(token(TokenKind::Ident(name)))
                }
            }
            other => Err(self.error(line, column, format!("unexpected character '{other}'"))),
        }
    }

    /// Identifier text starting one character past the current dot,
    /// without consuming anything
    fn peek_ident_after_dot(&self) -> String {
        let mut name = String::new();
        let mut offset = 1;
        while let Some(c) = self.peek_at(offset) {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                offset += 1;
            } else {
                break;
            }
        }
        name
    }

    fn lex_ident_text(&mut self) -> String {
        let mut name = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.bump();
            } else {
                break;
            }
        }
        name
    }

    fn lex_int(&mut self, line: u32, column: u32, negative: bool) -> Result<i64, ParseError> {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let text = if negative {
            format!("-{digits}")
        } else {
            digits
        };
        text.parse::<i64>()
            .map_err(|_| self.error(line, column, format!("integer literal '{text}' out of range")))
    }

    fn lex_string(&mut self, line: u32, column: u32) -> Result<String, ParseError> {
        let quote = self.bump().unwrap_or('"');
        let mut text = String::new();
        loop {
            match self.bump() {
                None => return Err(self.error(line, column, "unterminated string literal")),
                Some(c) if c == quote => return Ok(text),
                Some('\\') => match self.bump() {
                    Some('n') => text.push('\n'),
                    Some('t') => text.push('\t'),
                    Some('r') => text.push('\r'),
                    Some('0') => text.push('\0'),
                    Some('\\') => text.push('\\'),
                    Some('"') => text.push('"'),
                    Some('\'') => text.push('\''),
                    Some(other) => {
                        return Err(self.error(
                            self.line,
                            self.column,
                            format!("unknown escape '\\{other}'"),
                        ));
                    }
                    None => return Err(self.error(line, column, "unterminated string literal")),
                },
                Some('\n') => return Err(self.error(line, column, "unterminated string literal")),
                Some(c) => text.push(c),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::new(src)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_basic_rule_tokens() {
        let toks = kinds("path(X, Y) :- edge(X, Y).");
        assert_eq!(
            toks,
            vec![
                TokenKind::Ident("path".into()),
                TokenKind::LParen,
                TokenKind::Ident("X".into()),
                TokenKind::Comma,
                TokenKind::Ident("Y".into()),
                TokenKind::RParen,
                TokenKind::Turnstile,
                TokenKind::Ident("edge".into()),
                TokenKind::LParen,
                TokenKind::Ident("X".into()),
                TokenKind::Comma,
                TokenKind::Ident("Y".into()),
                TokenKind::RParen,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_comments_are_trivia() {
        let toks = kinds("% line\n// another\n/* block /* nested */ still */ a(1).");
        assert_eq!(toks[0], TokenKind::Ident("a".into()));
        assert_eq!(toks[2], TokenKind::Int(1));
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = Lexer::new("/* open").tokenize().unwrap_err();
        assert!(err.to_string().contains("unterminated block comment"));
    }

    #[test]
    fn test_string_escapes() {
        let toks = kinds(r#"p("a\n\"b", 'c\'d')."#);
        assert_eq!(toks[2], TokenKind::Str("a\n\"b".into()));
        assert_eq!(toks[4], TokenKind::Str("c'd".into()));
    }

    #[test]
    fn test_unterminated_string_reports_position() {
        let err = Lexer::new("p(\"oops").tokenize().unwrap_err();
        match err {
            ParseError::Syntax { line, column, .. } => {
                assert_eq!(line, 1);
                assert_eq!(column, 3);
            }
            ParseError::Compiled(_) => panic!("expected syntax error"),
        }
    }

    #[test]
    fn test_signed_integers() {
        assert_eq!(
            kinds("p(-3, +7, 0)."),
            vec![
                TokenKind::Ident("p".into()),
                TokenKind::LParen,
                TokenKind::Int(-3),
                TokenKind::Comma,
                TokenKind::Int(7),
                TokenKind::Comma,
                TokenKind::Int(0),
                TokenKind::RParen,
                TokenKind::Dot,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_relational_operators() {
        assert_eq!(
            kinds("= != <> < <= > >="),
            vec![
                TokenKind::Eq,
                TokenKind::Ne,
                TokenKind::Ne,
                TokenKind::Lt,
                TokenKind::Le,
                TokenKind::Gt,
                TokenKind::Ge,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_directives() {
        assert_eq!(
            kinds(".pred p(a: sym)\n.clear_derived()")[0],
            TokenKind::DirPred
        );
        assert!(kinds(".clear_derived()").contains(&TokenKind::DirClearDerived));
        // an unknown name after a dot is an ordinary item terminator
        assert_eq!(
            kinds("p(1).q(2).")[5..7],
            [TokenKind::Ident("q".into()), TokenKind::LParen]
        );
    }

    #[test]
    fn test_not_keyword_and_underscore() {
        let toks = kinds("not _ _x");
        assert_eq!(
            toks,
            vec![
                TokenKind::KwNot,
                TokenKind::Ident("_".into()),
                TokenKind::Ident("_x".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_line_column_tracking() {
        let tokens = Lexer::new("a.\n  b.").tokenize().unwrap();
        let b = tokens
            .iter()
            .find(|t| t.kind == TokenKind::Ident("b".into()))
            .unwrap();
        assert_eq!((b.line, b.column), (2, 3));
    }
}
