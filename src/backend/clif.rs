//! Cranelift translation of the IR
//!
//! One translator serves both output paths: `emit_object` drives it
//! through an `ObjectModule`, `run_jit` through a `JITModule`. Slice
//! values occupy two Cranelift values (data pointer, length); booleans
//! are materialized as 8-bit integers.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use cranelift_codegen::entity::EntityRef;
use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::{
    types, AbiParam, Block as ClifBlock, Function as ClifFunction, InstBuilder, MemFlags,
    Signature, StackSlotData, StackSlotKind, UserFuncName, Value,
};
use cranelift_codegen::isa;
use cranelift_codegen::settings::{self, Configurable};
use cranelift_codegen::Context;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext, Variable};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{
    default_libcall_names, DataDescription, DataId, FuncId, Linkage as ClifLinkage,
    Module as ClifModule,
};
use cranelift_object::{ObjectBuilder, ObjectModule};
use target_lexicon::Triple;

use super::BackendError;
use crate::ir::{BlockId, CmpOp, Function, InstrKind, IrType, Linkage, Module, Terminator, VReg};

/// Emit a native object file for the host ISA
pub fn emit_object(module: &Module) -> Result<Vec<u8>, BackendError> {
    let isa = host_isa()?;
    let builder = ObjectBuilder::new(isa, module.name.clone(), default_libcall_names())
        .map_err(|e| BackendError::Codegen(e.to_string()))?;
    let mut obj = ObjectModule::new(builder);
    build_module(&mut obj, module)?;
    let product = obj.finish();
    product
        .emit()
        .map_err(|e| BackendError::Codegen(e.to_string()))
}

/// JIT the module in-process and run the entry function.
///
/// Returns the entry function's integer result, or `None` when it
/// returns nothing. The entry is invoked with no arguments.
pub fn run_jit(module: &Module, entry: &str) -> Result<Option<i64>, BackendError> {
    let entry_fn = match module.function(entry) {
        Some(f) if !f.is_external => f,
        _ => return Err(BackendError::MissingEntry(entry.to_string())),
    };
    let ret_type = entry_fn.ret_type.clone();

    let jit_builder =
        JITBuilder::new(default_libcall_names()).map_err(|e| BackendError::Codegen(e.to_string()))?;
    let mut jit = JITModule::new(jit_builder);
    let func_ids = build_module(&mut jit, module)?;
    jit.finalize_definitions()
        .map_err(|e| BackendError::Codegen(e.to_string()))?;

    let id = func_ids[entry];
    let code = jit.get_finalized_function(id);

    // The entry was compiled with the native C convention, so calling it
    // through a C fn pointer of the matching return width is sound.
    let result = unsafe {
        match ret_type {
            IrType::Void => {
                let f: extern "C" fn() = std::mem::transmute(code);
                f();
                None
            }
            IrType::Bool | IrType::I8 => {
                let f: extern "C" fn() -> u8 = std::mem::transmute(code);
                Some(f() as i64)
            }
            IrType::I16 => {
                let f: extern "C" fn() -> u16 = std::mem::transmute(code);
                Some(f() as i64)
            }
            IrType::I32 => {
                let f: extern "C" fn() -> u32 = std::mem::transmute(code);
                Some(f() as i64)
            }
            _ => {
                let f: extern "C" fn() -> i64 = std::mem::transmute(code);
                Some(f())
            }
        }
    };
    Ok(result)
}

fn host_isa() -> Result<std::sync::Arc<dyn isa::TargetIsa>, BackendError> {
    let mut flag_builder = settings::builder();
    flag_builder
        .set("opt_level", "speed")
        .map_err(|e| BackendError::Codegen(e.to_string()))?;
    flag_builder
        .set("is_pic", "true")
        .map_err(|e| BackendError::Codegen(e.to_string()))?;
    let flags = settings::Flags::new(flag_builder);

    let host = target_lexicon::HOST.to_string();
    let triple =
        Triple::from_str(&host).map_err(|_| BackendError::UnsupportedTarget(host.clone()))?;
    isa::lookup(triple)
        .map_err(|_| BackendError::UnsupportedTarget(host))?
        .finish(flags)
        .map_err(|e| BackendError::Codegen(e.to_string()))
}

/// Declare globals and functions, then define every function body.
/// Returns the name → FuncId mapping.
fn build_module<M: ClifModule>(
    clif: &mut M,
    module: &Module,
) -> Result<HashMap<String, FuncId>, BackendError> {
    let mut data_ids: HashMap<String, DataId> = HashMap::new();
    for global in &module.globals {
        // Symbol names must not look like section directives.
        let symbol = format!("__mica{}", global.name.replace('.', "_"));
        let data_id = clif
            .declare_data(&symbol, ClifLinkage::Local, false, false)
            .map_err(|e| BackendError::Codegen(e.to_string()))?;
        let mut desc = DataDescription::new();
        desc.define(global.data.clone().into_boxed_slice());
        clif.define_data(data_id, &desc)
            .map_err(|e| BackendError::Codegen(e.to_string()))?;
        data_ids.insert(global.name.clone(), data_id);
    }

    let mut func_ids: HashMap<String, FuncId> = HashMap::new();
    for f in &module.functions {
        if func_ids.contains_key(&f.name) {
            continue;
        }
        let sig = build_signature(clif, f);
        let linkage = if f.is_external {
            ClifLinkage::Import
        } else if f.linkage == Linkage::External {
            ClifLinkage::Export
        } else {
            ClifLinkage::Local
        };
        let id = clif
            .declare_function(&f.name, linkage, &sig)
            .map_err(|e| BackendError::Codegen(e.to_string()))?;
        func_ids.insert(f.name.clone(), id);
    }

    for f in module.functions.iter().filter(|f| !f.is_external) {
        define_function(clif, f, &func_ids, &data_ids)?;
    }

    Ok(func_ids)
}

fn build_signature<M: ClifModule>(clif: &M, f: &Function) -> Signature {
    let ptr = clif.isa().pointer_type();
    let mut sig = clif.make_signature();
    for (_, ty) in &f.params {
        for cty in flatten(ty, ptr) {
            sig.params.push(AbiParam::new(cty));
        }
    }
    // Cranelift has no native varargs. The only variadic callee the
    // compiler emits is printf, always invoked with one extra pointer,
    // so its signature carries that slot concretely.
    if f.is_vararg {
        sig.params.push(AbiParam::new(ptr));
    }
    for cty in flatten(&f.ret_type, ptr) {
        sig.returns.push(AbiParam::new(cty));
    }
    sig
}

/// The Cranelift type(s) a value of this IR type occupies
fn flatten(ty: &IrType, ptr: types::Type) -> Vec<types::Type> {
    match ty {
        IrType::Void => vec![],
        IrType::Slice(_) => vec![ptr, types::I64],
        other => vec![scalar(other, ptr)],
    }
}

fn scalar(ty: &IrType, ptr: types::Type) -> types::Type {
    match ty {
        IrType::Bool | IrType::I8 => types::I8,
        IrType::I16 => types::I16,
        IrType::I32 => types::I32,
        IrType::I64 => types::I64,
        IrType::Ptr => ptr,
        IrType::Void | IrType::Slice(_) => ptr,
    }
}

/// Slot size in bytes for a stack allocation of this type
fn slot_size(ty: &IrType) -> u32 {
    match ty {
        IrType::Slice(_) => 16,
        IrType::Bool | IrType::I8 => 1,
        IrType::I16 => 2,
        IrType::I32 => 4,
        _ => 8,
    }
}

fn define_function<M: ClifModule>(
    clif: &mut M,
    f: &Function,
    func_ids: &HashMap<String, FuncId>,
    data_ids: &HashMap<String, DataId>,
) -> Result<(), BackendError> {
    let func_id = func_ids[&f.name];
    let sig = build_signature(clif, f);
    let ptr_ty = clif.isa().pointer_type();

    let mut func = ClifFunction::new();
    func.signature = sig;
    func.name = UserFuncName::user(0, func_id.as_u32());

    let mut builder_ctx = FunctionBuilderContext::new();
    let mut builder = FunctionBuilder::new(&mut func, &mut builder_ctx);

    let reachable = reachable_blocks(f);
    let mut blocks: HashMap<BlockId, ClifBlock> = HashMap::new();
    for block in f.blocks.iter().filter(|b| reachable.contains(&b.id)) {
        blocks.insert(block.id, builder.create_block());
    }

    let entry_id = f.blocks[0].id;
    let entry = blocks[&entry_id];
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);

    let mut tr = FnTranslator {
        clif: &mut *clif,
        builder,
        func_ids,
        data_ids,
        blocks,
        ptr_ty,
        vars: HashMap::new(),
        types: HashMap::new(),
        next_var: 0,
    };

    // Parameters arrive as entry block params, flattened like signatures.
    let entry_params: Vec<Value> = tr.builder.block_params(entry).to_vec();
    let mut cursor = 0;
    for (reg, ty) in &f.params {
        let width = flatten(ty, ptr_ty).len();
        let vals = entry_params[cursor..cursor + width].to_vec();
        cursor += width;
        tr.def_vreg(*reg, ty, &vals);
    }

    let ret_flat = flatten(&f.ret_type, ptr_ty);
    for block in f.blocks.iter().filter(|b| reachable.contains(&b.id)) {
        if block.id != entry_id {
            let clif_block = tr.blocks[&block.id];
            tr.builder.switch_to_block(clif_block);
        }
        for instr in &block.instructions {
            tr.translate_instr(instr)?;
        }
        match block.terminator.as_ref() {
            Some(term) => tr.translate_terminator(term, &f.ret_type, &ret_flat),
            None => {
                return Err(BackendError::Codegen(format!(
                    "block {} of '{}' has no terminator",
                    block.id, f.name
                )))
            }
        }
    }

    tr.builder.seal_all_blocks();
    tr.builder.finalize();

    let mut ctx = Context::for_function(func);
    clif.define_function(func_id, &mut ctx)
        .map_err(|e| BackendError::Codegen(e.to_string()))?;
    Ok(())
}

/// Blocks reachable from the entry. Statement sequences cut short by
/// `break`/`return` leave dead blocks behind; those are not translated.
fn reachable_blocks(f: &Function) -> HashSet<BlockId> {
    let mut seen = HashSet::new();
    let mut work = vec![f.blocks[0].id];
    while let Some(id) = work.pop() {
        if !seen.insert(id) {
            continue;
        }
        if let Some(block) = f.blocks.iter().find(|b| b.id == id) {
            match &block.terminator {
                Some(Terminator::Br(t)) => work.push(*t),
                Some(Terminator::CondBr { then_block, else_block, .. }) => {
                    work.push(*then_block);
                    work.push(*else_block);
                }
                _ => {}
            }
        }
    }
    seen
}

struct FnTranslator<'a, M: ClifModule> {
    clif: &'a mut M,
    builder: FunctionBuilder<'a>,
    func_ids: &'a HashMap<String, FuncId>,
    data_ids: &'a HashMap<String, DataId>,
    blocks: HashMap<BlockId, ClifBlock>,
    ptr_ty: types::Type,
    /// VReg → Cranelift variables (two for slices)
    vars: HashMap<VReg, Vec<Variable>>,
    /// VReg → IR type at definition, for width coercion at uses
    types: HashMap<VReg, IrType>,
    next_var: usize,
}

impl<'a, M: ClifModule> FnTranslator<'a, M> {
    fn def_vreg(&mut self, reg: VReg, ty: &IrType, vals: &[Value]) {
        let ctys = flatten(ty, self.ptr_ty);
        let mut vars = Vec::with_capacity(vals.len());
        for (val, cty) in vals.iter().zip(ctys) {
            let var = Variable::new(self.next_var);
            self.next_var += 1;
            self.builder.declare_var(var, cty);
            self.builder.def_var(var, *val);
            vars.push(var);
        }
        self.vars.insert(reg, vars);
        self.types.insert(reg, ty.clone());
    }

    fn use_vreg(&mut self, reg: VReg) -> Vec<Value> {
        let vars = self.vars[&reg].clone();
        vars.iter().map(|v| self.builder.use_var(*v)).collect()
    }

    fn use_scalar(&mut self, reg: VReg) -> Value {
        self.use_vreg(reg)[0]
    }

    /// Bring a scalar to the given IR width. Mismatched widths reach the
    /// backend because lowering records operands untouched; extension is
    /// unsigned, matching the language's comparison semantics.
    fn coerce(&mut self, val: Value, from: &IrType, to: &IrType) -> Value {
        let from_cty = scalar(from, self.ptr_ty);
        let to_cty = scalar(to, self.ptr_ty);
        self.coerce_cty(val, from_cty, to_cty)
    }

    fn coerce_cty(&mut self, val: Value, from: types::Type, to: types::Type) -> Value {
        if from == to {
            val
        } else if from.bits() < to.bits() {
            self.builder.ins().uextend(to, val)
        } else {
            self.builder.ins().ireduce(to, val)
        }
    }

    fn ty_of(&self, reg: VReg) -> IrType {
        self.types[&reg].clone()
    }

    fn translate_instr(
        &mut self,
        instr: &crate::ir::Instruction,
    ) -> Result<(), BackendError> {
        let ty = instr.ty.clone();
        match &instr.kind {
            InstrKind::Const(v) => {
                let val = self.builder.ins().iconst(scalar(&ty, self.ptr_ty), *v);
                self.def_result(instr, &[val]);
            }
            InstrKind::ConstBool(b) => {
                let val = self.builder.ins().iconst(types::I8, *b as i64);
                self.def_result(instr, &[val]);
            }
            InstrKind::Zero => {
                let vals = self.zero_value(&ty);
                self.def_result(instr, &vals);
            }
            InstrKind::Add(a, b) => {
                let a_ty = self.ty_of(*a);
                let b_ty = self.ty_of(*b);
                let av = self.use_scalar(*a);
                let bv = self.use_scalar(*b);
                let av = self.coerce(av, &a_ty, &ty);
                let bv = self.coerce(bv, &b_ty, &ty);
                let val = self.builder.ins().iadd(av, bv);
                self.def_result(instr, &[val]);
            }
            InstrKind::ICmp(op, a, b) => {
                let a_ty = self.ty_of(*a);
                let b_ty = self.ty_of(*b);
                let av = self.use_scalar(*a);
                let bv = self.use_scalar(*b);
                // Compare at the wider operand's width.
                let wide = if a_ty.bits() >= b_ty.bits() { a_ty.clone() } else { b_ty.clone() };
                let av = self.coerce(av, &a_ty, &wide);
                let bv = self.coerce(bv, &b_ty, &wide);
                let cc = match op {
                    CmpOp::Eq => IntCC::Equal,
                    CmpOp::Ne => IntCC::NotEqual,
                    CmpOp::Ult => IntCC::UnsignedLessThan,
                    CmpOp::Ule => IntCC::UnsignedLessThanOrEqual,
                    CmpOp::Ugt => IntCC::UnsignedGreaterThan,
                    CmpOp::Uge => IntCC::UnsignedGreaterThanOrEqual,
                    CmpOp::Slt => IntCC::SignedLessThan,
                };
                let val = self.builder.ins().icmp(cc, av, bv);
                self.def_result(instr, &[val]);
            }
            InstrKind::Alloca(slot_ty) => {
                let slot = self.builder.create_sized_stack_slot(StackSlotData::new(
                    StackSlotKind::ExplicitSlot,
                    slot_size(slot_ty),
                    3,
                ));
                let addr = self.builder.ins().stack_addr(self.ptr_ty, slot, 0);
                self.def_result(instr, &[addr]);
            }
            InstrKind::Load(ptr) => {
                let addr = self.use_scalar(*ptr);
                let flags = MemFlags::trusted();
                let vals = match &ty {
                    IrType::Slice(_) => {
                        let p = self.builder.ins().load(self.ptr_ty, flags, addr, 0);
                        let l = self.builder.ins().load(types::I64, flags, addr, 8);
                        vec![p, l]
                    }
                    other => {
                        vec![self
                            .builder
                            .ins()
                            .load(scalar(other, self.ptr_ty), flags, addr, 0)]
                    }
                };
                self.def_result(instr, &vals);
            }
            InstrKind::Store { ptr, value } => {
                let addr = self.use_scalar(*ptr);
                let vals = self.use_vreg(*value);
                let flags = MemFlags::trusted();
                if vals.len() == 2 {
                    self.builder.ins().store(flags, vals[0], addr, 0);
                    self.builder.ins().store(flags, vals[1], addr, 8);
                } else {
                    // The slot was sized for the declared type; bring the
                    // value to that width so loads read back whole.
                    let from = self.ty_of(*value);
                    let val = self.coerce(vals[0], &from, &ty);
                    self.builder.ins().store(flags, val, addr, 0);
                }
            }
            InstrKind::Call { func, args } => {
                let func_id = *self
                    .func_ids
                    .get(func)
                    .ok_or_else(|| BackendError::Codegen(format!("undeclared callee '{}'", func)))?;
                let sig = self
                    .clif
                    .declarations()
                    .get_function_decl(func_id)
                    .signature
                    .clone();
                let func_ref = self.clif.declare_func_in_func(func_id, self.builder.func);
                let mut arg_vals = Vec::new();
                for arg in args {
                    arg_vals.extend(self.use_vreg(*arg));
                }
                // Arguments arrive at whatever width lowering gave them;
                // bring each to the declared parameter width.
                for (val, param) in arg_vals.iter_mut().zip(&sig.params) {
                    let have = self.builder.func.dfg.value_type(*val);
                    if have != param.value_type {
                        *val = self.coerce_cty(*val, have, param.value_type);
                    }
                }
                let call = self.builder.ins().call(func_ref, &arg_vals);
                if instr.result.is_some() {
                    let results = self.builder.inst_results(call).to_vec();
                    self.def_result(instr, &results);
                }
            }
            InstrKind::GlobalRef(name) => {
                let data_id = *self
                    .data_ids
                    .get(name)
                    .ok_or_else(|| BackendError::Codegen(format!("undeclared global '{}'", name)))?;
                let gv = self.clif.declare_data_in_func(data_id, self.builder.func);
                let addr = self.builder.ins().global_value(self.ptr_ty, gv);
                self.def_result(instr, &[addr]);
            }
            InstrKind::Undef => {
                let vals = self.zero_value(&ty);
                self.def_result(instr, &vals);
            }
            InstrKind::InsertValue { agg, value, index } => {
                let mut vals = self.use_vreg(*agg);
                let new = self.use_scalar(*value);
                vals[*index as usize] = new;
                self.def_result(instr, &vals);
            }
            InstrKind::ExtractValue { agg, index } => {
                let vals = self.use_vreg(*agg);
                let val = vals[*index as usize];
                self.def_result(instr, &[val]);
            }
            InstrKind::Cast { value, from, signed } => {
                let val = self.use_scalar(*value);
                let from_cty = scalar(from, self.ptr_ty);
                let to_cty = scalar(&ty, self.ptr_ty);
                let out = if from_cty == to_cty {
                    val
                } else if from_cty.bits() < to_cty.bits() {
                    if *signed {
                        self.builder.ins().sextend(to_cty, val)
                    } else {
                        self.builder.ins().uextend(to_cty, val)
                    }
                } else {
                    self.builder.ins().ireduce(to_cty, val)
                };
                self.def_result(instr, &[out]);
            }
        }
        Ok(())
    }

    fn translate_terminator(&mut self, term: &Terminator, ret_ty: &IrType, ret_flat: &[types::Type]) {
        match term {
            Terminator::Ret(None) => {
                self.builder.ins().return_(&[]);
            }
            Terminator::Ret(Some(reg)) => {
                if ret_flat.is_empty() {
                    // A value returned from a void function is dropped.
                    self.builder.ins().return_(&[]);
                } else if ret_flat.len() == 2 {
                    let vals = self.use_vreg(*reg);
                    self.builder.ins().return_(&vals);
                } else {
                    let from = self.ty_of(*reg);
                    let val = self.use_scalar(*reg);
                    let val = self.coerce(val, &from, ret_ty);
                    self.builder.ins().return_(&[val]);
                }
            }
            Terminator::Br(target) => {
                let block = self.blocks[target];
                self.builder.ins().jump(block, &[]);
            }
            Terminator::CondBr { cond, then_block, else_block } => {
                let cond_val = self.use_scalar(*cond);
                let t = self.blocks[then_block];
                let e = self.blocks[else_block];
                self.builder.ins().brif(cond_val, t, &[], e, &[]);
            }
        }
    }

    fn def_result(&mut self, instr: &crate::ir::Instruction, vals: &[Value]) {
        if let Some(reg) = instr.result {
            self.def_vreg(reg, &instr.ty, vals);
        }
    }

    fn zero_value(&mut self, ty: &IrType) -> Vec<Value> {
        match ty {
            IrType::Slice(_) => {
                let p = self.builder.ins().iconst(self.ptr_ty, 0);
                let l = self.builder.ins().iconst(types::I64, 0);
                vec![p, l]
            }
            other => vec![self.builder.ins().iconst(scalar(other, self.ptr_ty), 0)],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Lowerer;
    use crate::target::Target;
    use crate::{lexer, parser};

    fn lower(source: &str) -> Module {
        let (tokens, _) = lexer::lex(source).unwrap();
        let program = parser::parse(source, tokens).unwrap();
        Lowerer::new("test", Target::host())
            .lower_program(&program)
            .unwrap()
    }

    #[test]
    fn test_emit_object_produces_bytes() {
        let module = lower("fn main() -> u32 { return 0; }");
        let bytes = emit_object(&module).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn test_jit_returns_constant() {
        let module = lower("fn main() -> u32 { return 42; }");
        assert_eq!(run_jit(&module, "main").unwrap(), Some(42));
    }

    #[test]
    fn test_jit_void_main() {
        let module = lower("fn main() { }");
        assert_eq!(run_jit(&module, "main").unwrap(), None);
    }

    #[test]
    fn test_jit_branches_and_mixed_widths() {
        let module = lower(
            "fn main() -> u32 {
                var x: u32 = 40;
                if (x < 50) { return x + 2; }
                return 0;
            }",
        );
        assert_eq!(run_jit(&module, "main").unwrap(), Some(42));
    }

    #[test]
    fn test_jit_while_break() {
        let module = lower(
            "fn main() -> u32 {
                while (true) { break; }
                return 7;
            }",
        );
        assert_eq!(run_jit(&module, "main").unwrap(), Some(7));
    }

    #[test]
    fn test_jit_for_loop_completes() {
        // The loop has no observable accumulator; completing at all
        // exercises the cond/body/incr/after block plumbing.
        let module = lower(
            "fn main() -> u32 {
                for i in 0:5 { }
                return 3;
            }",
        );
        assert_eq!(run_jit(&module, "main").unwrap(), Some(3));
    }

    #[test]
    fn test_jit_calls_internal_function() {
        let module = lower(
            "fn double(n: u32) -> u32 { return n + n; }
             fn main() -> u32 { return double(21); }",
        );
        assert_eq!(run_jit(&module, "main").unwrap(), Some(42));
    }

    #[test]
    fn test_jit_missing_entry() {
        let module = lower("fn helper() { }");
        let err = run_jit(&module, "main").unwrap_err();
        assert!(matches!(err, BackendError::MissingEntry(_)));
    }

    #[test]
    fn test_object_with_strings_and_prints() {
        let module = lower("fn main() -> u32 { println(\"hello\"); return 0; }");
        let bytes = emit_object(&module).unwrap();
        assert!(!bytes.is_empty());
    }
}
