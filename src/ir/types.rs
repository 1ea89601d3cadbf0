//! Core IR data types
//!
//! Virtual registers, block identifiers, machine types, and the module
//! structure that holds compiled functions and globals.

use crate::ast::TypeName;
use std::fmt;
use thiserror::Error;

/// A virtual register, numbered per function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VReg(pub u32);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A basic block identifier, numbered per function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bb{}", self.0)
    }
}

/// Machine-level types the IR works with
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IrType {
    Void,
    /// 1-bit boolean
    Bool,
    I8,
    I16,
    I32,
    I64,
    /// An untyped data pointer
    Ptr,
    /// A two-field {data pointer, length} value over elements of the
    /// given type. `str` is `Slice(I8)`.
    Slice(Box<IrType>),
}

impl IrType {
    /// Bit width of an integer type (booleans count as 1)
    pub fn bits(&self) -> u32 {
        match self {
            IrType::Bool => 1,
            IrType::I8 => 8,
            IrType::I16 => 16,
            IrType::I32 => 32,
            IrType::I64 => 64,
            IrType::Ptr => 64,
            IrType::Void | IrType::Slice(_) => 0,
        }
    }

    pub fn is_int(&self) -> bool {
        matches!(
            self,
            IrType::Bool | IrType::I8 | IrType::I16 | IrType::I32 | IrType::I64
        )
    }

    pub fn is_slice(&self) -> bool {
        matches!(self, IrType::Slice(_))
    }

    /// Integer type of the given bit width
    pub fn int_with_bits(bits: u32) -> IrType {
        match bits {
            8 => IrType::I8,
            16 => IrType::I16,
            32 => IrType::I32,
            _ => IrType::I64,
        }
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::Bool => write!(f, "i1"),
            IrType::I8 => write!(f, "i8"),
            IrType::I16 => write!(f, "i16"),
            IrType::I32 => write!(f, "i32"),
            IrType::I64 => write!(f, "i64"),
            IrType::Ptr => write!(f, "ptr"),
            IrType::Slice(elem) => write!(f, "slice<{}>", elem),
        }
    }
}

/// Type resolution errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TypeError {
    #[error("Unknown type: {0}")]
    Unknown(String),
}

/// Resolve a source-level type name to a machine type.
///
/// Pure mapping with no state; an unrecognized name is fatal at the point
/// of use.
pub fn resolve_type(name: &TypeName) -> Result<IrType, TypeError> {
    match name {
        TypeName::Name(s) => match s.as_str() {
            "u8" | "i8" => Ok(IrType::I8),
            "u16" | "i16" => Ok(IrType::I16),
            "u32" | "i32" => Ok(IrType::I32),
            "bool" => Ok(IrType::Bool),
            "str" => Ok(IrType::Slice(Box::new(IrType::I8))),
            other => Err(TypeError::Unknown(other.to_string())),
        },
        TypeName::Slice(inner) => {
            let elem = resolve_type(inner)?;
            Ok(IrType::Slice(Box::new(elem)))
        }
    }
}

/// Function linkage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Linkage {
    /// Externally callable, visible to the linker
    External,
    /// Private to the module
    Internal,
}

impl fmt::Display for Linkage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Linkage::External => write!(f, "external"),
            Linkage::Internal => write!(f, "internal"),
        }
    }
}

/// Calling conventions the IR can attribute to a function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallConv {
    /// The target's native C convention
    C,
    /// The 64-bit Windows convention (MSVC targets)
    Win64,
    Fast,
    Cold,
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallConv::C => write!(f, "ccc"),
            CallConv::Win64 => write!(f, "win64cc"),
            CallConv::Fast => write!(f, "fastcc"),
            CallConv::Cold => write!(f, "coldcc"),
        }
    }
}

/// A read-only byte buffer in the module (string literal storage)
#[derive(Debug, Clone, PartialEq)]
pub struct Global {
    pub name: String,
    pub data: Vec<u8>,
}

/// A compiled or declared function
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub name: String,
    pub params: Vec<(VReg, IrType)>,
    pub ret_type: IrType,
    pub blocks: Vec<BasicBlock>,
    pub linkage: Linkage,
    pub call_conv: CallConv,
    /// Declaration only, no body (extern functions, runtime primitives)
    pub is_external: bool,
    pub is_vararg: bool,
    pub is_inline: bool,
    pub no_return: bool,
}

/// A straight-line instruction sequence ending in one terminator
#[derive(Debug, Clone, PartialEq)]
pub struct BasicBlock {
    pub id: BlockId,
    pub instructions: Vec<super::instr::Instruction>,
    /// Exactly one terminator; `None` only while the block is being built.
    /// A finished function with a `None` here is malformed.
    pub terminator: Option<super::instr::Terminator>,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        Self {
            id,
            instructions: Vec::new(),
            terminator: None,
        }
    }
}

/// An IR module: all functions and globals of one compilation unit
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    pub globals: Vec<Global>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Find a function by name
    pub fn function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }
}
