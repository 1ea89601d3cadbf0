//! IR instructions and terminators

use super::types::{BlockId, IrType, VReg};
use std::fmt;

/// A single IR instruction
///
/// Carries its result type so printing and backend translation never need
/// a separate inference pass. `ty` is `Void` for pure-effect instructions.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub result: Option<VReg>,
    pub ty: IrType,
    pub kind: InstrKind,
}

/// The operations the lowering engine emits
#[derive(Debug, Clone, PartialEq)]
pub enum InstrKind {
    /// Integer constant of the instruction's type
    Const(i64),
    /// Boolean constant
    ConstBool(bool),
    /// Zero value of the instruction's type (used for default inits)
    Zero,
    /// Integer addition; operands share the instruction's type
    Add(VReg, VReg),
    /// Integer comparison; result type is `Bool`
    ICmp(CmpOp, VReg, VReg),
    /// Reserve a stack slot for a value of the given type; result is `Ptr`
    Alloca(IrType),
    /// Load a value of the instruction's type from a pointer
    Load(VReg),
    /// Store `value` (of type `ty`) through `ptr`; no result
    Store { ptr: VReg, value: VReg },
    /// Call a function by name
    Call { func: String, args: Vec<VReg> },
    /// Address of a module global; result is `Ptr`
    GlobalRef(String),
    /// Undefined value of the instruction's type (aggregate seed)
    Undef,
    /// Replace field `index` of an aggregate, yielding the new aggregate
    InsertValue { agg: VReg, value: VReg, index: u32 },
    /// Read field `index` out of an aggregate
    ExtractValue { agg: VReg, index: u32 },
    /// Integer width change to the instruction's type
    Cast { value: VReg, from: IrType, signed: bool },
}

/// Integer comparison operators
///
/// Source-level relational operators all lower to the unsigned forms; the
/// single signed form exists for the `for`-loop bound test.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Ult,
    Ule,
    Ugt,
    Uge,
    Slt,
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Ult => "ult",
            CmpOp::Ule => "ule",
            CmpOp::Ugt => "ugt",
            CmpOp::Uge => "uge",
            CmpOp::Slt => "slt",
        };
        write!(f, "{}", s)
    }
}

/// Control transfers that end a block
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Ret(Option<VReg>),
    Br(BlockId),
    CondBr {
        cond: VReg,
        then_block: BlockId,
        else_block: BlockId,
    },
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Ret(None) => write!(f, "ret void"),
            Terminator::Ret(Some(v)) => write!(f, "ret {}", v),
            Terminator::Br(b) => write!(f, "br {}", b),
            Terminator::CondBr { cond, then_block, else_block } => {
                write!(f, "br {}, {}, {}", cond, then_block, else_block)
            }
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(r) = self.result {
            write!(f, "{} = ", r)?;
        }
        match &self.kind {
            InstrKind::Const(v) => write!(f, "const {} {}", self.ty, v),
            InstrKind::ConstBool(b) => write!(f, "const i1 {}", b),
            InstrKind::Zero => write!(f, "zero {}", self.ty),
            InstrKind::Add(a, b) => write!(f, "add {} {}, {}", self.ty, a, b),
            InstrKind::ICmp(op, a, b) => write!(f, "icmp {} {}, {}", op, a, b),
            InstrKind::Alloca(slot) => write!(f, "alloca {}", slot),
            InstrKind::Load(p) => write!(f, "load {}, {}", self.ty, p),
            InstrKind::Store { ptr, value } => write!(f, "store {} {}, {}", self.ty, value, ptr),
            InstrKind::Call { func, args } => {
                if self.result.is_some() {
                    write!(f, "call {} @{}(", self.ty, func)?;
                } else {
                    write!(f, "call void @{}(", func)?;
                }
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                write!(f, ")")
            }
            InstrKind::GlobalRef(name) => write!(f, "global @{}", name),
            InstrKind::Undef => write!(f, "undef {}", self.ty),
            InstrKind::InsertValue { agg, value, index } => {
                write!(f, "insertvalue {}, {}, {}", agg, value, index)
            }
            InstrKind::ExtractValue { agg, index } => {
                write!(f, "extractvalue {} {}, {}", self.ty, agg, index)
            }
            InstrKind::Cast { value, from, signed } => {
                let op = if self.ty.bits() < from.bits() {
                    "trunc"
                } else if *signed {
                    "sext"
                } else {
                    "zext"
                };
                write!(f, "{} {} {} to {}", op, from, value, self.ty)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instruction_display() {
        let i = Instruction {
            result: Some(VReg(1)),
            ty: IrType::I8,
            kind: InstrKind::Const(42),
        };
        assert_eq!(i.to_string(), "%1 = const i8 42");

        let i = Instruction {
            result: Some(VReg(3)),
            ty: IrType::Bool,
            kind: InstrKind::ICmp(CmpOp::Ult, VReg(1), VReg(2)),
        };
        assert_eq!(i.to_string(), "%3 = icmp ult %1, %2");

        let i = Instruction {
            result: None,
            ty: IrType::I32,
            kind: InstrKind::Store { ptr: VReg(0), value: VReg(4) },
        };
        assert_eq!(i.to_string(), "store i32 %4, %0");
    }

    #[test]
    fn test_cast_display_picks_operation() {
        let sext = Instruction {
            result: Some(VReg(2)),
            ty: IrType::I32,
            kind: InstrKind::Cast { value: VReg(1), from: IrType::I8, signed: true },
        };
        assert_eq!(sext.to_string(), "%2 = sext i8 %1 to i32");

        let trunc = Instruction {
            result: Some(VReg(2)),
            ty: IrType::I8,
            kind: InstrKind::Cast { value: VReg(1), from: IrType::I32, signed: true },
        };
        assert_eq!(trunc.to_string(), "%2 = trunc i32 %1 to i8");
    }

    #[test]
    fn test_terminator_display() {
        assert_eq!(Terminator::Ret(None).to_string(), "ret void");
        assert_eq!(Terminator::Br(BlockId(2)).to_string(), "br bb2");
        let cb = Terminator::CondBr {
            cond: VReg(5),
            then_block: BlockId(1),
            else_block: BlockId(2),
        };
        assert_eq!(cb.to_string(), "br %5, bb1, bb2");
    }
}
