//! Mica Compiler
//!
//! The compiler for the Mica programming language: a small, statically
//! typed language that compiles ahead of time to native code.
//!
//! # Architecture
//!
//! ```text
//! Source Code (.mi)
//!       │
//!       ▼
//! ┌─────────────┐
//! │    Lexer    │  → Tokens
//! └─────────────┘
//!       │
//!       ▼
//! ┌─────────────┐
//! │   Parser    │  → AST
//! └─────────────┘
//!       │
//!       ▼
//! ┌─────────────┐
//! │  IR Lowering│  → Mica IR
//! └─────────────┘
//!       │
//!       ▼
//! ┌─────────────┐
//! │  Code Gen   │  → Machine Code
//! └─────────────┘
//! ```

pub mod ast;
pub mod backend;
pub mod ir;
pub mod lexer;
pub mod parser;
pub mod span;
pub mod target;
pub mod token;

// Re-exports for convenience
pub use lexer::Lexer;
pub use span::Span;
pub use token::{Token, TokenKind};

/// Compiler version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// File extension for Mica source files
pub const FILE_EXTENSION: &str = "mi";
