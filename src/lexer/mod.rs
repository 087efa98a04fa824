//! Source-to-token cursor.
//!
//! The lexer holds no tokens itself; `Lexer::scan_token` is called on demand
//! by the compiler, one token at a time, matching the single-pass design of
//! the rest of the pipeline.

/// The kind of a scanned token. `Error` owns its diagnostic message directly
/// rather than pointing back into a side table, since the compiler consumes
/// it immediately and discards the token.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    // Single-character punctuation.
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Dot,
    Minus,
    Plus,
    Semicolon,
    Slash,
    Star,

    // One or two character punctuation.
    Bang,
    BangEqual,
    Equal,
    EqualEqual,
    Greater,
    GreaterEqual,
    Less,
    LessEqual,

    // Literals.
    Ident,
    String,
    Number,
    Char,

    // Keywords.
    And,
    Else,
    False,
    For,
    Fun,
    If,
    Null,
    Or,
    Print,
    Return,
    Struct,
    Super,
    This,
    True,
    Let,
    While,

    Error(String),
    Eof,
}

/// A single lexical token borrowing its lexeme from the source buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token<'src> {
    pub kind: TokenKind,
    pub lexeme: &'src str,
    pub line: u32,
    pub col: u32,
}

/// A character cursor over a source string.
pub struct Lexer<'src> {
    source: &'src str,
    bytes: &'src [u8],
    start: usize,
    current: usize,
    line_start: usize,
    line: u32,
}

impl<'src> Lexer<'src> {
    pub fn new(source: &'src str) -> Lexer<'src> {
        Lexer {
            source,
            bytes: source.as_bytes(),
            start: 0,
            current: 0,
            line_start: 0,
            line: 1,
        }
    }

    fn is_at_end(&self) -> bool {
        self.current >= self.bytes.len()
    }

    fn advance(&mut self) -> u8 {
        let c = self.bytes[self.current];
        self.current += 1;
        c
    }

    fn peek(&self) -> u8 {
        if self.is_at_end() {
            0
        } else {
            self.bytes[self.current]
        }
    }

    fn peek_next(&self) -> u8 {
        if self.current + 1 >= self.bytes.len() {
            0
        } else {
            self.bytes[self.current + 1]
        }
    }

    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.bytes[self.current] != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn lexeme(&self) -> &'src str {
        &self.source[self.start..self.current]
    }

    fn col(&self) -> u32 {
        (self.start - self.line_start) as u32
    }

    fn make(&self, kind: TokenKind) -> Token<'src> {
        Token {
            kind,
            lexeme: self.lexeme(),
            line: self.line,
            col: self.col(),
        }
    }

    fn error(&self, msg: impl Into<String>) -> Token<'src> {
        Token {
            kind: TokenKind::Error(msg.into()),
            lexeme: self.lexeme(),
            line: self.line,
            col: self.col(),
        }
    }

    /// Skips whitespace and `// ...` line comments, bumping the line counter
    /// on every newline encountered.
    fn trim(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\r' | b'\t' => {
                    self.current += 1;
                }
                b'\n' => {
                    self.current += 1;
                    self.line += 1;
                    self.line_start = self.current;
                }
                b'/' if self.peek_next() == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.current += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn is_digit(c: u8) -> bool {
        c.is_ascii_digit()
    }

    /// Alphabetic characters plus `_`, `&`, and `|` start and continue an
    /// identifier, so that `&&`/`||` can be recognized as whole two-character
    /// keyword lexemes by the identifier path rather than the punctuation
    /// path. This means `a&&b` lexes as one identifier token, not three
    /// tokens — documented behavior, not an oversight.
    fn is_alpha(c: u8) -> bool {
        c.is_ascii_alphabetic() || c == b'_' || c == b'&' || c == b'|'
    }

    fn number(&mut self) -> Token<'src> {
        while Self::is_digit(self.peek()) || self.peek() == b'_' || self.peek() == b'\'' {
            self.current += 1;
        }
        if self.peek() == b'.' && Self::is_digit(self.peek_next()) {
            self.current += 1;
            while Self::is_digit(self.peek()) || self.peek() == b'_' || self.peek() == b'\'' {
                self.current += 1;
            }
        }
        self.make(TokenKind::Number)
    }

    fn identifier(&mut self) -> Token<'src> {
        while Self::is_alpha(self.peek()) || Self::is_digit(self.peek()) {
            self.current += 1;
        }
        let kind = Self::keyword_kind(self.lexeme());
        self.make(kind)
    }

    fn keyword_kind(text: &str) -> TokenKind {
        match text {
            "&&" => TokenKind::And,
            "||" => TokenKind::Or,
            "struct" => TokenKind::Struct,
            "else" => TokenKind::Else,
            "false" => TokenKind::False,
            "for" => TokenKind::For,
            "fun" => TokenKind::Fun,
            "if" => TokenKind::If,
            "null" => TokenKind::Null,
            "print" => TokenKind::Print,
            "return" => TokenKind::Return,
            "super" => TokenKind::Super,
            "self" => TokenKind::This,
            "true" => TokenKind::True,
            "let" => TokenKind::Let,
            "while" => TokenKind::While,
            _ => TokenKind::Ident,
        }
    }

    fn string(&mut self) -> Token<'src> {
        while self.peek() != b'"' && !self.is_at_end() {
            if self.peek() == b'\n' {
                self.line += 1;
                self.line_start = self.current + 1;
            }
            self.current += 1;
        }
        if self.is_at_end() {
            return self.error("unterminated string");
        }
        self.current += 1; // closing quote
        self.make(TokenKind::String)
    }

    fn character(&mut self) -> Token<'src> {
        // `start` still points at the opening `'`; the character payload is
        // the next byte, so the eventual lexeme conceptually begins there —
        // we keep `start` as-is and let the compiler strip the quotes when
        // it parses the literal.
        if self.is_at_end() {
            return self.error("unterminated character literal");
        }
        self.current += 1; // the character itself
        if self.peek() != b'\'' {
            return self.error("unterminated character literal");
        }
        self.current += 1; // closing quote
        self.make(TokenKind::Char)
    }

    /// Scans and returns the next token, or `Eof` once the source is
    /// exhausted.
    pub fn scan_token(&mut self) -> Token<'src> {
        self.trim();
        self.start = self.current;

        if self.is_at_end() {
            return self.make(TokenKind::Eof);
        }

        let c = self.advance();

        if Self::is_alpha(c) {
            return self.identifier();
        }
        if Self::is_digit(c) {
            return self.number();
        }

        match c {
            b'(' => self.make(TokenKind::LeftParen),
            b')' => self.make(TokenKind::RightParen),
            b'{' => self.make(TokenKind::LeftBrace),
            b'}' => self.make(TokenKind::RightBrace),
            b',' => self.make(TokenKind::Comma),
            b'.' => self.make(TokenKind::Dot),
            b'-' => self.make(TokenKind::Minus),
            b'+' => self.make(TokenKind::Plus),
            b';' => self.make(TokenKind::Semicolon),
            b'/' => self.make(TokenKind::Slash),
            b'*' => self.make(TokenKind::Star),
            b'!' => {
                let kind = if self.matches(b'=') {
                    TokenKind::BangEqual
                } else {
                    TokenKind::Bang
                };
                self.make(kind)
            }
            b'=' => {
                let kind = if self.matches(b'=') {
                    TokenKind::EqualEqual
                } else {
                    TokenKind::Equal
                };
                self.make(kind)
            }
            b'<' => {
                let kind = if self.matches(b'=') {
                    TokenKind::LessEqual
                } else {
                    TokenKind::Less
                };
                self.make(kind)
            }
            b'>' => {
                let kind = if self.matches(b'=') {
                    TokenKind::GreaterEqual
                } else {
                    TokenKind::Greater
                };
                self.make(kind)
            }
            b'"' => self.string(),
            b'\'' => self.character(),
            _ => self.error(format!("unexpected character '{}'", c as char)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_all(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new(source);
        let mut kinds = Vec::new();
        loop {
            let tok = lexer.scan_token();
            let done = tok.kind == TokenKind::Eof;
            kinds.push(tok.kind);
            if done {
                break;
            }
        }
        kinds
    }

    #[test]
    fn scans_arithmetic_expression() {
        let kinds = scan_all("1 + 2 * 3;");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Number,
                TokenKind::Plus,
                TokenKind::Number,
                TokenKind::Star,
                TokenKind::Number,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn recognizes_logical_keywords_only_with_boundaries() {
        let kinds = scan_all("a && b");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Ident,
                TokenKind::And,
                TokenKind::Ident,
                TokenKind::Eof
            ]
        );

        // No surrounding whitespace: lexes as one identifier, by design.
        let kinds = scan_all("a&&b");
        assert_eq!(kinds, vec![TokenKind::Ident, TokenKind::Eof]);
    }

    #[test]
    fn unterminated_string_is_an_error_token() {
        let mut lexer = Lexer::new("\"abc");
        let tok = lexer.scan_token();
        matches!(tok.kind, TokenKind::Error(_));
    }

    #[test]
    fn unterminated_char_is_an_error_token() {
        let mut lexer = Lexer::new("'a");
        let tok = lexer.scan_token();
        assert!(matches!(tok.kind, TokenKind::Error(_)));
    }

    #[test]
    fn skips_line_comments() {
        let kinds = scan_all("// hello\n1;");
        assert_eq!(
            kinds,
            vec![TokenKind::Number, TokenKind::Semicolon, TokenKind::Eof]
        );
    }

    #[test]
    fn keywords_are_recognized() {
        let kinds = scan_all("let print while if else struct fun null return true false self super for");
        assert_eq!(
            kinds,
            vec![
                TokenKind::Let,
                TokenKind::Print,
                TokenKind::While,
                TokenKind::If,
                TokenKind::Else,
                TokenKind::Struct,
                TokenKind::Fun,
                TokenKind::Null,
                TokenKind::Return,
                TokenKind::True,
                TokenKind::False,
                TokenKind::This,
                TokenKind::Super,
                TokenKind::For,
                TokenKind::Eof,
            ]
        );
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// A fixed vocabulary of single lexemes, none of which merge with a
    /// neighbor when separated by whitespace (so joining any sequence of
    /// these with single spaces is unambiguous to re-lex).
    fn lexeme() -> impl Strategy<Value = &'static str> {
        prop_oneof![
            Just("foo"),
            Just("bar_baz"),
            Just("123"),
            Just("4.5"),
            Just("+"),
            Just("-"),
            Just("*"),
            Just("/"),
            Just("("),
            Just(")"),
            Just(";"),
            Just("let"),
            Just("true"),
            Just("false"),
        ]
    }

    proptest! {
        /// Lexing a sequence of whitespace-separated lexemes and reading
        /// back each token's lexeme reproduces the original sequence,
        /// i.e. round-tripping through the lexer loses only whitespace.
        #[test]
        fn round_trip_reconstructs_lexemes(tokens in proptest::collection::vec(lexeme(), 1..12)) {
            let source = tokens.join(" ");
            let mut lexer = Lexer::new(&source);
            let mut reconstructed = Vec::new();
            loop {
                let tok = lexer.scan_token();
                if tok.kind == TokenKind::Eof {
                    break;
                }
                prop_assert!(!matches!(tok.kind, TokenKind::Error(_)));
                reconstructed.push(tok.lexeme.to_string());
            }
            prop_assert_eq!(reconstructed, tokens);
        }
    }
}
