//! Tokenizer shared by the SML and SFDL parsers

use secs_core::ParseError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// One of `<`, `>`, `[`, `]`
    Operator,
    /// A `'` or `"` delimited run, text holds the content without quotes
    Quoted,
    /// Anything else up to whitespace, an operator or a quote
    Word,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    /// 1-based line of the first character
    pub line: usize,
    /// 1-based column of the first character
    pub column: usize,
    /// Width of the token in the source, quotes included
    pub width: usize,
}

impl Token {
    pub fn is_operator(&self, op: char) -> bool {
        self.kind == TokenKind::Operator && self.text.starts_with(op)
    }

    /// Column right after the token
    pub fn end_column(&self) -> usize {
        self.column + self.width
    }
}

const OPERATORS: [char; 4] = ['<', '>', '[', ']'];

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

/// Split `text` into tokens
///
/// # Errors
///
/// An unterminated quote fails with `Closing quote expected`, the caret
/// pointing at the opening quote.
pub fn tokenize(text: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = text.chars().peekable();
    let mut line = 1;
    let mut column = 1;

    while let Some(&c) = chars.peek() {
        if c == '\n' {
            chars.next();
            line += 1;
            column = 1;
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            column += 1;
            continue;
        }

        let (start_line, start_column) = (line, column);

        if OPERATORS.contains(&c) {
            chars.next();
            column += 1;
            tokens.push(Token {
                kind: TokenKind::Operator,
                text: c.to_string(),
                line: start_line,
                column: start_column,
                width: 1,
            });
            continue;
        }

        if is_quote(c) {
            chars.next();
            column += 1;
            let mut content = String::new();
            let mut closed = false;
            for next in chars.by_ref() {
                if next == c {
                    column += 1;
                    closed = true;
                    break;
                }
                if next == '\n' {
                    line += 1;
                    column = 1;
                } else {
                    column += 1;
                }
                content.push(next);
            }
            if !closed {
                return Err(ParseError::at(
                    text,
                    start_line,
                    start_column,
                    "Closing quote expected",
                ));
            }
            let width = content.chars().count() + 2;
            tokens.push(Token {
                kind: TokenKind::Quoted,
                text: content,
                line: start_line,
                column: start_column,
                width,
            });
            continue;
        }

        let mut word = String::new();
        while let Some(&next) = chars.peek() {
            if next.is_whitespace() || OPERATORS.contains(&next) || is_quote(next) {
                break;
            }
            word.push(next);
            chars.next();
            column += 1;
        }
        let width = word.chars().count();
        tokens.push(Token {
            kind: TokenKind::Word,
            text: word,
            line: start_line,
            column: start_column,
            width,
        });
    }

    Ok(tokens)
}

/// Cursor over a token list with error helpers that know the source text
pub(crate) struct TokenStream<'t> {
    text: &'t str,
    tokens: Vec<Token>,
    position: usize,
}

impl<'t> TokenStream<'t> {
    pub(crate) fn new(text: &'t str) -> Result<Self, ParseError> {
        Ok(Self {
            text,
            tokens: tokenize(text)?,
            position: 0,
        })
    }

    pub(crate) fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    pub(crate) fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    pub(crate) fn peek_is(&self, op: char) -> bool {
        self.peek().map(|t| t.is_operator(op)).unwrap_or(false)
    }

    /// Error pointing at `token`
    pub(crate) fn error_at(&self, token: &Token, message: impl Into<String>) -> ParseError {
        ParseError::at(self.text, token.line, token.column, message)
    }

    /// Error pointing at the next token, or right after the last one at end
    /// of input
    pub(crate) fn error_here(&self, message: impl Into<String>) -> ParseError {
        match self.peek() {
            Some(token) => self.error_at(token, message),
            None => self.error_at_end(message),
        }
    }

    pub(crate) fn error_at_end(&self, message: impl Into<String>) -> ParseError {
        match self.tokens.last() {
            Some(last) => ParseError::at(self.text, last.line, last.end_column(), message),
            None => ParseError::at(self.text, 1, 1, message),
        }
    }

    /// Consume the operator `op` or fail with `message`
    pub(crate) fn expect(&mut self, op: char, message: &str) -> Result<Token, ParseError> {
        if self.peek_is(op) {
            self.next().ok_or_else(|| self.error_at_end(message))
        } else {
            Err(self.error_here(message))
        }
    }

    /// Fail with `unexpected token` unless the input is exhausted
    pub(crate) fn expect_end(&self) -> Result<(), ParseError> {
        match self.peek() {
            Some(token) => Err(self.error_at(token, format!("unexpected token '{}'", token.text))),
            None => Ok(()),
        }
    }
}
