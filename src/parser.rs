//! Parser for Mica
//!
//! A recursive descent parser that converts tokens into an AST. Parsing is
//! fail-fast: the first unmet grammar expectation aborts the whole parse
//! and no partial AST is produced.
//!
//! The expression grammar is deliberately shallow: at most one comparison
//! over at most one `+` over a primary. There is no precedence climbing
//! and comparisons do not chain; this is a language property, not a
//! parser shortcut.

use crate::ast::{BinOp, Expr, ExprKind, FunctionDecl, Param, Program, TypeName};
use crate::token::{line_of, Token, TokenKind};
use thiserror::Error;

/// Fatal parse errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("{message} at line {line}")]
    Expected { message: String, line: u32 },

    #[error("invalid integer literal '{text}' at line {line}")]
    InvalidIntLiteral { text: String, line: u32 },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// The parser for Mica
pub struct Parser<'src> {
    source: &'src str,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'src> Parser<'src> {
    /// Create a parser over an already-lexed token sequence.
    /// The sequence must end with an `Eof` token.
    pub fn new(source: &'src str, tokens: Vec<Token>) -> Self {
        Self { source, tokens, pos: 0 }
    }

    /// Parse a whole compilation unit: a sequence of function declarations
    pub fn parse_program(&mut self) -> ParseResult<Program> {
        let mut functions = Vec::new();
        while !self.check(TokenKind::Eof) {
            functions.push(self.parse_function()?);
        }
        Ok(functions)
    }

    // ── Token plumbing ──────────────────────────────────────────────

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_nth(&self, n: usize) -> &Token {
        &self.tokens[(self.pos + n).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind, message: &str) -> ParseResult<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(self.error(message))
        }
    }

    fn error(&self, message: &str) -> ParseError {
        ParseError::Expected {
            message: message.to_string(),
            line: line_of(self.source, self.peek().span.start),
        }
    }

    fn text_of(&self, token: &Token) -> &'src str {
        token.text(self.source)
    }

    // ── Declarations ────────────────────────────────────────────────

    fn parse_function(&mut self) -> ParseResult<FunctionDecl> {
        let start_span = self.peek().span;
        let is_extern = self.eat(TokenKind::Extern);
        let is_export = !is_extern && self.eat(TokenKind::Export);

        self.expect(TokenKind::Fn, "Expected 'fn'")?;
        let name_tok = self.expect(TokenKind::Ident, "Expected function name")?;
        let name = self.text_of(&name_tok).to_string();

        self.expect(TokenKind::LParen, "Expected '(' after function name")?;
        let mut params = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                let pname_tok = self.expect(TokenKind::Ident, "Expected parameter name")?;
                let pname = self.text_of(&pname_tok).to_string();
                self.expect(TokenKind::Colon, "Expected ':' after parameter name")?;
                let ty = self.parse_type()?;
                params.push(Param { name: pname, ty });
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen, "Expected ')' after parameters")?;

        let return_type = if self.eat(TokenKind::Arrow) {
            Some(self.parse_type()?)
        } else {
            None
        };

        let body = if is_extern {
            self.expect(TokenKind::Semicolon, "Expected ';' after extern function declaration")?;
            Vec::new()
        } else {
            self.parse_block()?
        };

        let span = start_span.merge(self.tokens[self.pos.saturating_sub(1)].span);
        Ok(FunctionDecl {
            name,
            params,
            return_type,
            body,
            is_extern,
            is_export,
            span,
        })
    }

    /// A base type name or `[]` followed recursively by another type
    fn parse_type(&mut self) -> ParseResult<TypeName> {
        if self.eat(TokenKind::LBracket) {
            self.expect(TokenKind::RBracket, "Expected ']' in slice type")?;
            let inner = self.parse_type()?;
            return Ok(TypeName::Slice(Box::new(inner)));
        }
        if self.peek().kind.is_primitive_type() {
            let tok = self.advance();
            return Ok(TypeName::name(self.text_of(&tok)));
        }
        Err(self.error("Expected type"))
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Expr>> {
        self.expect(TokenKind::LBrace, "Expected '{' before block")?;
        let mut statements = Vec::new();
        while !self.check(TokenKind::RBrace) {
            if self.check(TokenKind::Eof) {
                return Err(self.error("Expected '}' after block"));
            }
            statements.push(self.parse_expression()?);
        }
        self.advance(); // consume '}'
        Ok(statements)
    }

    // ── Statements and expressions ──────────────────────────────────

    /// The shared statement/expression entry point: any construct
    /// recognized as a statement head is dispatched here first.
    pub fn parse_expression(&mut self) -> ParseResult<Expr> {
        match self.peek().kind {
            TokenKind::Return => self.parse_return(),
            TokenKind::Const | TokenKind::Var => self.parse_var_decl(),
            TokenKind::If => self.parse_if(),
            TokenKind::While => self.parse_while(),
            TokenKind::For => self.parse_for(),
            TokenKind::Break => self.parse_break(),
            TokenKind::Continue => self.parse_continue(),
            TokenKind::Ident if self.peek_nth(1).kind == TokenKind::LParen => {
                let call = self.parse_primary()?;
                self.expect(TokenKind::Semicolon, "Expected ';' after expression")?;
                Ok(call)
            }
            _ => self.parse_comparison(),
        }
    }

    fn parse_return(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        let value = self.parse_comparison()?;
        let end = self.expect(TokenKind::Semicolon, "Expected ';' after return value")?;
        Ok(Expr::new(
            ExprKind::Return(Box::new(value)),
            start.merge(end.span),
        ))
    }

    fn parse_var_decl(&mut self) -> ParseResult<Expr> {
        let kw = self.advance();
        let is_const = kw.kind == TokenKind::Const;
        let name_tok = self.expect(TokenKind::Ident, "Expected variable name")?;
        let name = self.text_of(&name_tok).to_string();

        // Unannotated declarations default to u8.
        let ty = if self.eat(TokenKind::Colon) {
            self.parse_type()?
        } else {
            TypeName::name("u8")
        };

        let init = if self.eat(TokenKind::Eq) {
            Some(Box::new(self.parse_comparison()?))
        } else {
            None
        };

        let end = self.expect(TokenKind::Semicolon, "Expected ';' after variable declaration")?;
        Ok(Expr::new(
            ExprKind::VarDecl { name, ty, init, is_const },
            kw.span.merge(end.span),
        ))
    }

    fn parse_if(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        self.expect(TokenKind::LParen, "Expected '(' after 'if'")?;
        let cond = self.parse_comparison()?;
        self.expect(TokenKind::RParen, "Expected ')' after condition")?;
        let then_body = self.parse_block()?;
        let else_body = if self.eat(TokenKind::Else) {
            self.parse_block()?
        } else {
            Vec::new()
        };
        let end = self.tokens[self.pos.saturating_sub(1)].span;
        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then_body,
                else_body,
            },
            start.merge(end),
        ))
    }

    fn parse_while(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        self.expect(TokenKind::LParen, "Expected '(' after 'while'")?;
        let cond = self.parse_comparison()?;
        self.expect(TokenKind::RParen, "Expected ')' after condition")?;
        let body = self.parse_block()?;
        let end = self.tokens[self.pos.saturating_sub(1)].span;
        Ok(Expr::new(
            ExprKind::While { cond: Box::new(cond), body },
            start.merge(end),
        ))
    }

    fn parse_for(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        let var_tok = self.expect(TokenKind::Ident, "Expected loop variable name")?;
        let var = self.text_of(&var_tok).to_string();
        self.expect(TokenKind::In, "Expected 'in' after loop variable")?;
        let range_start = self.parse_comparison()?;
        self.expect(TokenKind::Colon, "Expected ':' in range")?;
        let range_end = self.parse_comparison()?;
        let body = self.parse_block()?;
        let end = self.tokens[self.pos.saturating_sub(1)].span;
        Ok(Expr::new(
            ExprKind::For {
                var,
                start: Box::new(range_start),
                end: Box::new(range_end),
                body,
            },
            start.merge(end),
        ))
    }

    fn parse_break(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        let end = self.expect(TokenKind::Semicolon, "Expected ';' after 'break'")?;
        Ok(Expr::new(ExprKind::Break, start.merge(end.span)))
    }

    fn parse_continue(&mut self) -> ParseResult<Expr> {
        let start = self.advance().span;
        let end = self.expect(TokenKind::Semicolon, "Expected ';' after 'continue'")?;
        Ok(Expr::new(ExprKind::Continue, start.merge(end.span)))
    }

    /// Comparison: exactly one optional comparison operator, non-chaining
    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_addition()?;
        if self.peek().kind.is_comparison() {
            let op_tok = self.advance();
            let op = match op_tok.kind {
                TokenKind::EqEq => BinOp::Eq,
                TokenKind::NotEq => BinOp::Ne,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::LtEq => BinOp::Le,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::GtEq => BinOp::Ge,
                _ => unreachable!("is_comparison covers exactly these"),
            };
            let rhs = self.parse_addition()?;
            let span = lhs.span.merge(rhs.span);
            return Ok(Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            ));
        }
        Ok(lhs)
    }

    /// Addition: exactly one optional `+`
    fn parse_addition(&mut self) -> ParseResult<Expr> {
        let lhs = self.parse_primary()?;
        if self.eat(TokenKind::Plus) {
            let rhs = self.parse_primary()?;
            let span = lhs.span.merge(rhs.span);
            return Ok(Expr::new(
                ExprKind::Binary {
                    op: BinOp::Add,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                span,
            ));
        }
        Ok(lhs)
    }

    fn parse_primary(&mut self) -> ParseResult<Expr> {
        match self.peek().kind {
            TokenKind::IntLiteral => {
                let tok = self.advance();
                let text = self.text_of(&tok);
                let value: i64 = text.parse().map_err(|_| ParseError::InvalidIntLiteral {
                    text: text.to_string(),
                    line: line_of(self.source, tok.span.start),
                })?;
                Ok(Expr::new(ExprKind::IntLiteral(value), tok.span))
            }
            TokenKind::True => {
                let tok = self.advance();
                Ok(Expr::new(ExprKind::BoolLiteral(true), tok.span))
            }
            TokenKind::False => {
                let tok = self.advance();
                Ok(Expr::new(ExprKind::BoolLiteral(false), tok.span))
            }
            TokenKind::StringLiteral => {
                let tok = self.advance();
                let text = self.text_of(&tok);
                // Strip the surrounding quotes; bytes in between are literal.
                let contents = text[1..text.len() - 1].to_string();
                Ok(Expr::new(ExprKind::StringLiteral(contents), tok.span))
            }
            TokenKind::LParen => {
                self.advance();
                let expr = self.parse_comparison()?;
                self.expect(TokenKind::RParen, "Expected ')' after expression")?;
                Ok(expr)
            }
            TokenKind::Ident => {
                let tok = self.advance();
                let name = self.text_of(&tok).to_string();
                if self.eat(TokenKind::LParen) {
                    let mut args = Vec::new();
                    if !self.check(TokenKind::RParen) {
                        loop {
                            args.push(self.parse_comparison()?);
                            if !self.eat(TokenKind::Comma) {
                                break;
                            }
                        }
                    }
                    let end = self.expect(TokenKind::RParen, "Expected ')' after arguments")?;
                    return Ok(Expr::new(
                        ExprKind::Call { callee: name, args },
                        tok.span.merge(end.span),
                    ));
                }
                Ok(Expr::new(ExprKind::Variable(name), tok.span))
            }
            _ => Err(self.error("Expected expression")),
        }
    }
}

/// Parse an already-lexed token sequence into a program
pub fn parse(source: &str, tokens: Vec<Token>) -> ParseResult<Program> {
    Parser::new(source, tokens).parse_program()
}
