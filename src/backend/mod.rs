//! Native code generation
//!
//! The backend consumes a finished IR module. Its contract with the rest
//! of the compiler is thin: the module must be structurally valid with
//! linkage already attributed; everything target-specific happens here,
//! against the host ISA.

mod clif;

pub use clif::{emit_object, run_jit};

use thiserror::Error;

/// Fatal backend errors
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("unsupported host target: {0}")]
    UnsupportedTarget(String),

    #[error("code generation failed: {0}")]
    Codegen(String),

    #[error("missing entry function '{0}'")]
    MissingEntry(String),
}
