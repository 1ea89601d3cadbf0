//! Lexer for Mica
//!
//! The lexer converts source code into a stream of tokens.
//! It uses the `logos` crate for efficient lexing.
//!
//! Two failure modes exist. An unterminated string literal is fatal and
//! aborts lexing, reporting the line of the opening quote. An unrecognized
//! character is a warning: it is recorded, skipped, and lexing continues,
//! so a full token stream can still reach the parser.

use crate::span::Span;
use crate::token::{line_of, Token, TokenKind};
use logos::Logos;
use thiserror::Error;

/// Fatal lexer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("Unterminated string at line {line}")]
    UnterminatedString { line: u32 },
}

/// Non-fatal lexer diagnostics
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexWarning {
    #[error("unexpected character '{ch}' at line {line}")]
    UnexpectedChar { ch: char, line: u32 },
}

/// The lexer for Mica
pub struct Lexer<'src> {
    source: &'src str,
    inner: logos::Lexer<'src, TokenKind>,
    warnings: Vec<LexWarning>,
}

impl<'src> Lexer<'src> {
    /// Create a new lexer for the given source code
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            inner: TokenKind::lexer(source),
            warnings: Vec::new(),
        }
    }

    /// Get the source code
    pub fn source(&self) -> &'src str {
        self.source
    }

    /// Warnings recorded so far
    pub fn warnings(&self) -> &[LexWarning] {
        &self.warnings
    }

    /// Get the next token, skipping unrecognized characters
    pub fn next_token(&mut self) -> Result<Token, LexError> {
        loop {
            match self.inner.next() {
                Some(Ok(kind)) => {
                    let span = self.inner.span();
                    return Ok(Token::new(kind, Span::new(span.start, span.end)));
                }
                Some(Err(())) => {
                    let span = self.inner.span();
                    let slice = self.inner.slice();
                    let line = line_of(self.source, span.start);
                    // A bad slice opening with a quote can only mean the
                    // closing quote never arrived.
                    if slice.starts_with('"') {
                        return Err(LexError::UnterminatedString { line });
                    }
                    let ch = slice.chars().next().unwrap_or('\u{fffd}');
                    self.warnings.push(LexWarning::UnexpectedChar { ch, line });
                    continue;
                }
                None => {
                    let pos = self.source.len();
                    return Ok(Token::new(TokenKind::Eof, Span::new(pos, pos)));
                }
            }
        }
    }

    /// Collect all tokens, ending with an Eof token
    pub fn tokenize(mut self) -> Result<(Vec<Token>, Vec<LexWarning>), LexError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                break;
            }
        }
        Ok((tokens, self.warnings))
    }
}

/// Helper function to lex source code
pub fn lex(source: &str) -> Result<(Vec<Token>, Vec<LexWarning>), LexError> {
    Lexer::new(source).tokenize()
}
