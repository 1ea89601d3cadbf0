//! Token definitions for Mica
//!
//! This module defines all the tokens that the lexer can produce.

use crate::span::Span;
use logos::Logos;
use std::fmt;

/// A token produced by the lexer
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }

    /// Get the text of this token from source
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        self.span.text(source)
    }

    /// 1-indexed line on which this token starts
    pub fn line(&self, source: &str) -> u32 {
        line_of(source, self.span.start)
    }
}

/// 1-indexed line number of a byte offset
pub fn line_of(source: &str, offset: usize) -> u32 {
    let upto = offset.min(source.len());
    source[..upto].bytes().filter(|&b| b == b'\n').count() as u32 + 1
}

/// All possible token types in Mica
///
/// A `-` immediately followed by a digit belongs to the integer literal;
/// longest-match resolves `->` to `Arrow` and a lone `-` to `Minus`.
/// No grammar rule consumes `Minus`, so subtraction is not expressible.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")] // Skip whitespace
#[logos(skip r"//[^\n]*")] // Skip line comments
pub enum TokenKind {
    // ============ Literals ============
    /// Decimal integer literal: 42, -7
    #[regex(r"-?[0-9]+")]
    IntLiteral,

    /// String literal: "hello" (no escape processing, may span lines)
    #[regex(r#""[^"]*""#)]
    StringLiteral,

    /// Boolean literals
    #[token("true")]
    True,
    #[token("false")]
    False,

    // ============ Keywords ============
    #[token("fn")]
    Fn,
    #[token("return")]
    Return,
    #[token("const")]
    Const,
    #[token("var")]
    Var,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("in")]
    In,
    #[token("extern")]
    Extern,
    #[token("export")]
    Export,

    // ============ Types ============
    #[token("u8")]
    U8,
    #[token("i8")]
    I8,
    #[token("u16")]
    U16,
    #[token("i16")]
    I16,
    #[token("u32")]
    U32,
    #[token("i32")]
    I32,
    #[token("bool")]
    Bool,
    #[token("str")]
    Str,

    // ============ Operators ============
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    LtEq,
    #[token(">=")]
    GtEq,
    #[token("=")]
    Eq,
    #[token("->")]
    Arrow,

    // ============ Delimiters ============
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,

    // ============ Punctuation ============
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,

    // ============ Identifiers ============
    /// Identifier: foo, _bar, main
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,

    // ============ Special ============
    /// End of file
    Eof,
}

impl TokenKind {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        matches!(
            self,
            TokenKind::Fn
                | TokenKind::Return
                | TokenKind::Const
                | TokenKind::Var
                | TokenKind::If
                | TokenKind::Else
                | TokenKind::While
                | TokenKind::For
                | TokenKind::Break
                | TokenKind::Continue
                | TokenKind::In
                | TokenKind::Extern
                | TokenKind::Export
                | TokenKind::True
                | TokenKind::False
        )
    }

    /// Check if this token names a primitive type
    pub fn is_primitive_type(&self) -> bool {
        matches!(
            self,
            TokenKind::U8
                | TokenKind::I8
                | TokenKind::U16
                | TokenKind::I16
                | TokenKind::U32
                | TokenKind::I32
                | TokenKind::Bool
                | TokenKind::Str
        )
    }

    /// Check if this token can begin a type (`[]T` or a base name)
    pub fn starts_type(&self) -> bool {
        self.is_primitive_type() || *self == TokenKind::LBracket
    }

    /// Check if this token is a comparison operator
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            TokenKind::EqEq
                | TokenKind::NotEq
                | TokenKind::Lt
                | TokenKind::Gt
                | TokenKind::LtEq
                | TokenKind::GtEq
        )
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TokenKind::IntLiteral => "integer",
            TokenKind::StringLiteral => "string",
            TokenKind::True => "true",
            TokenKind::False => "false",
            TokenKind::Fn => "fn",
            TokenKind::Return => "return",
            TokenKind::Const => "const",
            TokenKind::Var => "var",
            TokenKind::If => "if",
            TokenKind::Else => "else",
            TokenKind::While => "while",
            TokenKind::For => "for",
            TokenKind::Break => "break",
            TokenKind::Continue => "continue",
            TokenKind::In => "in",
            TokenKind::Extern => "extern",
            TokenKind::Export => "export",
            TokenKind::U8 => "u8",
            TokenKind::I8 => "i8",
            TokenKind::U16 => "u16",
            TokenKind::I16 => "i16",
            TokenKind::U32 => "u32",
            TokenKind::I32 => "i32",
            TokenKind::Bool => "bool",
            TokenKind::Str => "str",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::EqEq => "==",
            TokenKind::NotEq => "!=",
            TokenKind::Lt => "<",
            TokenKind::Gt => ">",
            TokenKind::LtEq => "<=",
            TokenKind::GtEq => ">=",
            TokenKind::Eq => "=",
            TokenKind::Arrow => "->",
            TokenKind::LParen => "(",
            TokenKind::RParen => ")",
            TokenKind::LBracket => "[",
            TokenKind::RBracket => "]",
            TokenKind::LBrace => "{",
            TokenKind::RBrace => "}",
            TokenKind::Comma => ",",
            TokenKind::Semicolon => ";",
            TokenKind::Colon => ":",
            TokenKind::Ident => "identifier",
            TokenKind::Eof => "end of file",
        };
        write!(f, "{}", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_of() {
        let source = "a\nb\nc";
        assert_eq!(line_of(source, 0), 1);
        assert_eq!(line_of(source, 2), 2);
        assert_eq!(line_of(source, 4), 3);
    }

    #[test]
    fn test_display_roundtrip_for_punctuation() {
        assert_eq!(TokenKind::Arrow.to_string(), "->");
        assert_eq!(TokenKind::EqEq.to_string(), "==");
        assert_eq!(TokenKind::Eof.to_string(), "end of file");
    }
}
