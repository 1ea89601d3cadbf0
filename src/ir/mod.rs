//! Mica IR
//!
//! An architecture-neutral representation of a compiled program: functions
//! made of basic blocks, each block a straight-line instruction sequence
//! ending in exactly one terminator. The lowering engine produces it, the
//! backend consumes it, and `print_module` renders it as deterministic
//! text.

pub mod builder;
pub mod instr;
pub mod lower;
pub mod types;

pub use builder::IrBuilder;
pub use instr::{CmpOp, InstrKind, Instruction, Terminator};
pub use lower::{print_module, LowerError, Lowerer};
pub use types::{
    resolve_type, BasicBlock, BlockId, CallConv, Function, Global, IrType, Linkage, Module,
    TypeError, VReg,
};
