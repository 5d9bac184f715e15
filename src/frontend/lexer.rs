use std::{
    collections::{BTreeMap, VecDeque},
    str::Chars,
};

use itertools::{PeekNth, peek_nth};
use once_cell::sync::Lazy;
use strum::EnumString;

use crate::frontend::SourceFile;

#[derive(Debug)]
pub struct Lexer<'source> {
    source: &'source SourceFile,
    position: usize,
    chars: PeekNth<Chars<'source>>,
    peek_buffer: VecDeque<Token>,
}

#[derive(Debug, Clone, Copy)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /* Words */
    Keyword(Keyword), // phi
    Identifier,       // y$1

    /* Literals */
    IntegerLiteral, // 1
    FloatLiteral,   // 1.0

    /* Delimiters */
    OpenParen,    // (
    CloseParen,   // )
    OpenBracket,  // [
    CloseBracket, // ]
    OpenBrace,    // {
    CloseBrace,   // }
    Comma,        // ,

    /* Other */
    Colon,       // :
    Equals,      // =
    Bang,        // !
    Hash,        // #
    Question,    // ?
    Asterisk,    // *
    LessThan,    // <
    GreaterThan, // >

    /// Character which starts no token
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum Keyword {
    Function,
    End,
    Call,
    Branch,
    For,
    While,
    Break,
    Continue,
    Phi,
    Get,
    SimpleGet,
    Set,
    SimpleSet,
    ValidateTrue,
    Static,
}

/// Table of single char tokens
static SINGLE_TOKENS: Lazy<BTreeMap<char, TokenKind>> = Lazy::new(|| {
    BTreeMap::from([
        ('(', TokenKind::OpenParen),
        (')', TokenKind::CloseParen),
        ('[', TokenKind::OpenBracket),
        (']', TokenKind::CloseBracket),
        ('{', TokenKind::OpenBrace),
        ('}', TokenKind::CloseBrace),
        (',', TokenKind::Comma),
        (':', TokenKind::Colon),
        ('=', TokenKind::Equals),
        ('!', TokenKind::Bang),
        ('#', TokenKind::Hash),
        ('?', TokenKind::Question),
        ('*', TokenKind::Asterisk),
        ('<', TokenKind::LessThan),
        ('>', TokenKind::GreaterThan),
    ])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

fn is_word_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$'
}

fn is_word_continuation(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$'
}

impl<'source> Lexer<'source> {
    pub fn new(source: &'source SourceFile) -> Self {
        Self {
            source,
            chars: peek_nth(source.contents.chars()),
            position: 0,
            peek_buffer: VecDeque::new(),
        }
    }

    pub fn source(&self) -> &'source SourceFile {
        self.source
    }

    /// Position right after the last consumed character
    pub fn position(&self) -> usize {
        self.position
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.chars.next()?;
        self.position += c.len_utf8();
        Some(c)
    }

    fn ignore_line(&mut self) {
        while let Some(c) = self.chars.peek().copied() {
            if c == '\n' {
                break;
            }

            self.advance();
        }
    }

    // Keyword or identifier
    fn read_word(&mut self) -> Token {
        let start_position = self.position;

        while self.chars.peek().is_some_and(|c| is_word_continuation(*c)) {
            self.advance();
        }

        let span = self.new_span(start_position);
        let kind = match self.source.value_of_span(span).parse() {
            Ok(keyword) => TokenKind::Keyword(keyword),
            Err(_) => TokenKind::Identifier,
        };

        Token { kind, span }
    }

    fn read_digits(&mut self) {
        while self.chars.peek().is_some_and(char::is_ascii_digit) {
            self.advance();
        }
    }

    // 1, -2, 1.5, 1e3, 2.5e-1
    fn read_number(&mut self) -> Token {
        let start_position = self.position;
        let mut kind = TokenKind::IntegerLiteral;

        if self.chars.peek() == Some(&'-') {
            self.advance();
        }

        self.read_digits();

        if self.chars.peek() == Some(&'.') {
            kind = TokenKind::FloatLiteral;
            self.advance();
            self.read_digits();
        }

        let has_exponent = matches!(self.chars.peek(), Some('e' | 'E'))
            && (self.chars.peek_nth(1).is_some_and(char::is_ascii_digit)
                || (matches!(self.chars.peek_nth(1), Some('-' | '+'))
                    && self.chars.peek_nth(2).is_some_and(char::is_ascii_digit)));

        if has_exponent {
            kind = TokenKind::FloatLiteral;
            self.advance();
            if matches!(self.chars.peek(), Some('-' | '+')) {
                self.advance();
            }
            self.read_digits();
        }

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn read_single(&mut self, kind: TokenKind) -> Token {
        let start_position = self.position;

        self.advance();

        Token {
            kind,
            span: self.new_span(start_position),
        }
    }

    fn new_span(&self, start: usize) -> Span {
        Span {
            start,
            end: self.position,
        }
    }

    pub fn peek(&mut self) -> Option<Token> {
        self.peek_nth(0)
    }

    pub fn peek_nth(&mut self, n: usize) -> Option<Token> {
        while self.peek_buffer.len() <= n {
            let token = self.read_token()?;
            self.peek_buffer.push_back(token);
        }

        self.peek_buffer.get(n).copied()
    }

    pub fn next(&mut self) -> Option<Token> {
        if let Some(token) = self.peek_buffer.pop_front() {
            return Some(token);
        }

        self.read_token()
    }

    fn read_token(&mut self) -> Option<Token> {
        while let Some(c) = self.chars.peek().copied() {
            let token = match c {
                // Ignore whitespace
                c if c.is_whitespace() => {
                    self.advance();
                    continue;
                }
                // Ignore comments
                '/' if self.chars.peek_nth(1).is_some_and(|c| *c == '/') => {
                    self.ignore_line();
                    continue;
                }

                // Integer and float literals
                n if n.is_ascii_digit() => self.read_number(),
                '-' if self.chars.peek_nth(1).is_some_and(char::is_ascii_digit) => {
                    self.read_number()
                }

                // Identifiers and keywords
                a if is_word_start(a) => self.read_word(),

                s => match SINGLE_TOKENS.get(&s) {
                    Some(kind) => self.read_single(*kind),
                    None => self.read_single(TokenKind::Unknown),
                },
            };

            return Some(token);
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn kinds(text: &str) -> Vec<TokenKind> {
        let source = SourceFile::from_memory(text);
        let mut lexer = Lexer::new(&source);

        std::iter::from_fn(|| lexer.next()).map(|t| t.kind).collect()
    }

    #[test]
    fn words_and_keywords() {
        assert_eq!(
            kinds("y$2 = simple_get $one$1 // trailing"),
            vec![
                TokenKind::Identifier,
                TokenKind::Equals,
                TokenKind::Keyword(Keyword::SimpleGet),
                TokenKind::Identifier,
            ]
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(
            kinds("1 -2 1.5 2e3 3.0e-1 4."),
            vec![
                TokenKind::IntegerLiteral,
                TokenKind::IntegerLiteral,
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
                TokenKind::FloatLiteral,
            ]
        );
    }

    #[test]
    fn punctuation() {
        assert_eq!(
            kinds("#0: [?, *] ~"),
            vec![
                TokenKind::Hash,
                TokenKind::IntegerLiteral,
                TokenKind::Colon,
                TokenKind::OpenBracket,
                TokenKind::Question,
                TokenKind::Comma,
                TokenKind::Asterisk,
                TokenKind::CloseBracket,
                TokenKind::Unknown,
            ]
        );
    }

    #[test]
    fn peeking_does_not_consume() {
        let source = SourceFile::from_memory("a b");
        let mut lexer = Lexer::new(&source);

        let second = lexer.peek_nth(1).unwrap();
        assert_eq!(source.value_of_span(second.span), "b");
        assert_eq!(source.value_of_span(lexer.next().unwrap().span), "a");
        assert_eq!(source.value_of_span(lexer.next().unwrap().span), "b");
        assert!(lexer.next().is_none());
    }
}
