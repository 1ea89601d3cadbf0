//! IR construction helpers
//!
//! `IrBuilder` owns the module under construction and hands out fresh
//! virtual registers, blocks, and global names. All numbering is
//! sequential and driven purely by lowering order, so compiling the same
//! source twice produces byte-identical IR text.

use super::instr::{CmpOp, InstrKind, Instruction, Terminator};
use super::types::{BasicBlock, BlockId, CallConv, Function, Global, IrType, Linkage, Module, VReg};

pub struct IrBuilder {
    module: Module,
    next_vreg: u32,
    next_block: u32,
    next_string: u32,
    current_fn: Option<Function>,
    current_block: Option<BasicBlock>,
    stdio_declared: bool,
    fmt_global: Option<String>,
}

impl IrBuilder {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module: Module::new(module_name),
            next_vreg: 0,
            next_block: 0,
            next_string: 0,
            current_fn: None,
            current_block: None,
            stdio_declared: false,
            fmt_global: None,
        }
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn into_module(self) -> Module {
        self.module
    }

    // ── Fresh names ─────────────────────────────────────────────────

    pub fn fresh_vreg(&mut self) -> VReg {
        let r = VReg(self.next_vreg);
        self.next_vreg += 1;
        r
    }

    pub fn fresh_block(&mut self) -> BlockId {
        let b = BlockId(self.next_block);
        self.next_block += 1;
        b
    }

    // ── Functions and blocks ────────────────────────────────────────

    /// Push a body-less declaration (extern functions, runtime primitives)
    pub fn declare_function(
        &mut self,
        name: impl Into<String>,
        params: Vec<IrType>,
        ret_type: IrType,
        call_conv: CallConv,
        is_vararg: bool,
    ) {
        let params = params.into_iter().map(|ty| (VReg(0), ty)).collect();
        self.module.functions.push(Function {
            name: name.into(),
            params,
            ret_type,
            blocks: Vec::new(),
            linkage: Linkage::External,
            call_conv,
            is_external: true,
            is_vararg,
            is_inline: false,
            no_return: false,
        });
    }

    /// Begin a function definition. Register and block numbering restart;
    /// parameters take the first registers. Returns the parameter
    /// registers and leaves the entry block current.
    pub fn start_function(
        &mut self,
        name: impl Into<String>,
        param_types: Vec<IrType>,
        ret_type: IrType,
        linkage: Linkage,
        call_conv: CallConv,
    ) -> Vec<VReg> {
        self.next_vreg = 0;
        self.next_block = 0;

        let params: Vec<(VReg, IrType)> = param_types
            .into_iter()
            .map(|ty| (self.fresh_vreg(), ty))
            .collect();
        let param_regs = params.iter().map(|(r, _)| *r).collect();

        self.current_fn = Some(Function {
            name: name.into(),
            params,
            ret_type,
            blocks: Vec::new(),
            linkage,
            call_conv,
            is_external: false,
            is_vararg: false,
            is_inline: false,
            no_return: false,
        });

        let entry = self.fresh_block();
        self.current_block = Some(BasicBlock::new(entry));
        param_regs
    }

    /// Flush the block being built and start a new one
    pub fn start_block(&mut self, id: BlockId) {
        self.flush_block();
        self.current_block = Some(BasicBlock::new(id));
    }

    fn flush_block(&mut self) {
        if let Some(block) = self.current_block.take() {
            if let Some(f) = self.current_fn.as_mut() {
                f.blocks.push(block);
            }
        }
    }

    /// Finish the current function and add it to the module
    pub fn finish_function(&mut self) {
        self.flush_block();
        if let Some(f) = self.current_fn.take() {
            self.module.functions.push(f);
        }
    }

    /// Whether the current block already has a terminator
    pub fn is_terminated(&self) -> bool {
        self.current_block
            .as_ref()
            .map(|b| b.terminator.is_some())
            .unwrap_or(true)
    }

    // ── Instructions ────────────────────────────────────────────────

    fn push(&mut self, instr: Instruction) {
        if let Some(block) = self.current_block.as_mut() {
            block.instructions.push(instr);
        }
    }

    fn emit(&mut self, ty: IrType, kind: InstrKind) -> VReg {
        let result = self.fresh_vreg();
        self.push(Instruction { result: Some(result), ty, kind });
        result
    }

    fn emit_void(&mut self, ty: IrType, kind: InstrKind) {
        self.push(Instruction { result: None, ty, kind });
    }

    pub fn const_int(&mut self, ty: IrType, value: i64) -> VReg {
        self.emit(ty, InstrKind::Const(value))
    }

    pub fn const_bool(&mut self, value: bool) -> VReg {
        self.emit(IrType::Bool, InstrKind::ConstBool(value))
    }

    pub fn zero(&mut self, ty: IrType) -> VReg {
        self.emit(ty, InstrKind::Zero)
    }

    pub fn add(&mut self, ty: IrType, lhs: VReg, rhs: VReg) -> VReg {
        self.emit(ty, InstrKind::Add(lhs, rhs))
    }

    pub fn icmp(&mut self, op: CmpOp, lhs: VReg, rhs: VReg) -> VReg {
        self.emit(IrType::Bool, InstrKind::ICmp(op, lhs, rhs))
    }

    pub fn alloca(&mut self, slot_ty: IrType) -> VReg {
        self.emit(IrType::Ptr, InstrKind::Alloca(slot_ty))
    }

    pub fn load(&mut self, ty: IrType, ptr: VReg) -> VReg {
        self.emit(ty, InstrKind::Load(ptr))
    }

    pub fn store(&mut self, ty: IrType, value: VReg, ptr: VReg) {
        self.emit_void(ty, InstrKind::Store { ptr, value });
    }

    /// Call with a result
    pub fn call(&mut self, ret_ty: IrType, func: impl Into<String>, args: Vec<VReg>) -> VReg {
        self.emit(ret_ty, InstrKind::Call { func: func.into(), args })
    }

    /// Call a void function
    pub fn call_void(&mut self, func: impl Into<String>, args: Vec<VReg>) {
        self.emit_void(IrType::Void, InstrKind::Call { func: func.into(), args });
    }

    pub fn global_ref(&mut self, name: impl Into<String>) -> VReg {
        self.emit(IrType::Ptr, InstrKind::GlobalRef(name.into()))
    }

    pub fn undef(&mut self, ty: IrType) -> VReg {
        self.emit(ty, InstrKind::Undef)
    }

    pub fn insert_value(&mut self, ty: IrType, agg: VReg, value: VReg, index: u32) -> VReg {
        self.emit(ty, InstrKind::InsertValue { agg, value, index })
    }

    pub fn extract_value(&mut self, ty: IrType, agg: VReg, index: u32) -> VReg {
        self.emit(ty, InstrKind::ExtractValue { agg, index })
    }

    pub fn cast(&mut self, to: IrType, from: IrType, value: VReg, signed: bool) -> VReg {
        self.emit(to, InstrKind::Cast { value, from, signed })
    }

    // ── Terminators ─────────────────────────────────────────────────

    fn terminate(&mut self, term: Terminator) {
        if let Some(block) = self.current_block.as_mut() {
            if block.terminator.is_none() {
                block.terminator = Some(term);
            }
        }
    }

    pub fn ret(&mut self, value: Option<VReg>) {
        self.terminate(Terminator::Ret(value));
    }

    pub fn br(&mut self, target: BlockId) {
        self.terminate(Terminator::Br(target));
    }

    pub fn cond_br(&mut self, cond: VReg, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::CondBr { cond, then_block, else_block });
    }

    // ── Globals and runtime declarations ────────────────────────────

    /// Intern a read-only byte buffer, returning its `.str.N` name
    pub fn add_string_global(&mut self, data: Vec<u8>) -> String {
        let name = format!(".str.{}", self.next_string);
        self.next_string += 1;
        self.module.globals.push(Global { name: name.clone(), data });
        name
    }

    /// The shared `"%s"` format string, created on first use
    pub fn fmt_global(&mut self) -> String {
        if let Some(name) = &self.fmt_global {
            return name.clone();
        }
        let name = ".fmt".to_string();
        self.module.globals.push(Global {
            name: name.clone(),
            data: b"%s\0".to_vec(),
        });
        self.fmt_global = Some(name.clone());
        name
    }

    /// Declare the printing primitives, at most once per module
    pub fn declare_stdio(&mut self) {
        if self.stdio_declared {
            return;
        }
        self.stdio_declared = true;
        self.declare_function("puts", vec![IrType::Ptr], IrType::I32, CallConv::C, false);
        self.declare_function("printf", vec![IrType::Ptr], IrType::I32, CallConv::C, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vreg_numbering_restarts_per_function() {
        let mut b = IrBuilder::new("t");
        b.start_function("f", vec![], IrType::Void, Linkage::Internal, CallConv::C);
        let r0 = b.const_int(IrType::I8, 1);
        b.ret(None);
        b.finish_function();

        b.start_function("g", vec![], IrType::Void, Linkage::Internal, CallConv::C);
        let r1 = b.const_int(IrType::I8, 2);
        b.ret(None);
        b.finish_function();

        assert_eq!(r0, r1);
    }

    #[test]
    fn test_stdio_declared_once() {
        let mut b = IrBuilder::new("t");
        b.declare_stdio();
        b.declare_stdio();
        let names: Vec<_> = b.module().functions.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["puts", "printf"]);
        assert!(b.module().functions[1].is_vararg);
    }

    #[test]
    fn test_string_globals_get_sequential_names() {
        let mut b = IrBuilder::new("t");
        assert_eq!(b.add_string_global(b"a\0".to_vec()), ".str.0");
        assert_eq!(b.add_string_global(b"b\0".to_vec()), ".str.1");
        assert_eq!(b.fmt_global(), ".fmt");
        assert_eq!(b.fmt_global(), ".fmt");
        assert_eq!(b.module().globals.len(), 3);
    }

    #[test]
    fn test_terminator_is_not_overwritten() {
        let mut b = IrBuilder::new("t");
        b.start_function("f", vec![], IrType::Void, Linkage::Internal, CallConv::C);
        b.ret(None);
        b.br(BlockId(7));
        b.finish_function();
        let f = b.module().function("f").unwrap();
        assert_eq!(f.blocks[0].terminator, Some(Terminator::Ret(None)));
    }
}
