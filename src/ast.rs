//! Abstract Syntax Tree (AST) for Mica
//!
//! The node set is closed: the grammar fixes exactly which constructs
//! exist, so lowering can match exhaustively. Statements and expressions
//! share one node type because the parser dispatches them through a single
//! entry point.

use crate::span::Span;
use std::fmt;

/// A parsed expression or statement
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Every construct the grammar can produce
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// Integer literal, possibly negative
    IntLiteral(i64),
    /// `true` or `false`
    BoolLiteral(bool),
    /// String literal contents, quotes stripped, no escape processing
    StringLiteral(String),
    /// Variable reference
    Variable(String),
    /// Binary operation (`+` or one comparison)
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// Function call, as expression or statement
    Call { callee: String, args: Vec<Expr> },
    /// `return <expr>;`
    Return(Box<Expr>),
    /// `const`/`var` declaration; `ty` already defaulted if unannotated
    VarDecl {
        name: String,
        ty: TypeName,
        init: Option<Box<Expr>>,
        is_const: bool,
    },
    /// `if (<cond>) { .. } [else { .. }]`; `else_body` empty when absent
    If {
        cond: Box<Expr>,
        then_body: Vec<Expr>,
        else_body: Vec<Expr>,
    },
    /// `while (<cond>) { .. }`
    While { cond: Box<Expr>, body: Vec<Expr> },
    /// `for <var> in <start>:<end> { .. }`
    For {
        var: String,
        start: Box<Expr>,
        end: Box<Expr>,
        body: Vec<Expr>,
    },
    Break,
    Continue,
}

/// The binary operators the grammar admits
///
/// Being a closed enum, an "invalid operator" cannot reach lowering; the
/// parser simply has no rule that would build one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::Add => "+",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        };
        write!(f, "{}", s)
    }
}

/// A source-level type name: a base name or `[]`-prefixed slice of one
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeName {
    Name(String),
    Slice(Box<TypeName>),
}

impl TypeName {
    pub fn name(s: impl Into<String>) -> Self {
        TypeName::Name(s.into())
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeName::Name(s) => write!(f, "{}", s),
            TypeName::Slice(inner) => write!(f, "[]{}", inner),
        }
    }
}

/// A function parameter
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: TypeName,
}

/// A parsed function declaration
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    /// None means no return value
    pub return_type: Option<TypeName>,
    /// Empty for `extern` functions
    pub body: Vec<Expr>,
    pub is_extern: bool,
    pub is_export: bool,
    pub span: Span,
}

/// A compilation unit: a sequence of function declarations
pub type Program = Vec<FunctionDecl>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type_name_display() {
        assert_eq!(TypeName::name("u8").to_string(), "u8");
        let slice = TypeName::Slice(Box::new(TypeName::name("u32")));
        assert_eq!(slice.to_string(), "[]u32");
        let nested = TypeName::Slice(Box::new(slice));
        assert_eq!(nested.to_string(), "[][]u32");
    }
}
