//! AST → IR lowering
//!
//! The lowering engine walks one function at a time, maintaining a
//! binding table (name → storage location) and a stack of loop contexts,
//! and emits instructions through the builder. Fatal conditions are typed
//! errors that unwind the whole compilation; nothing is recovered.
//!
//! Two behaviors here are deliberate language properties, not bugs:
//! bindings shadow permanently (declarations never restore what they
//! shadowed; only `for`-loop variables do), and relational comparisons
//! are lowered unsigned regardless of the operands' nominal signedness.

use std::collections::HashMap;

use thiserror::Error;

use super::builder::IrBuilder;
use super::instr::CmpOp;
use super::types::{
    resolve_type, BlockId, CallConv, IrType, Linkage, Module, TypeError, VReg,
};
use crate::ast::{BinOp, Expr, ExprKind, FunctionDecl, Program};
use crate::target::Target;

/// Fatal lowering errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LowerError {
    #[error("Unknown variable name: {0}")]
    UnknownVariable(String),

    #[error("Unknown function referenced: {0}")]
    UnknownFunction(String),

    #[error("Incorrect number of arguments passed to {name}: expected {expected}, found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("Complex print formatting not yet implemented")]
    UnsupportedPrint,

    #[error("break statement not inside a loop")]
    BreakOutsideLoop,

    #[error("continue statement not inside a loop")]
    ContinueOutsideLoop,

    #[error("Type mismatch in for loop range")]
    RangeTypeMismatch,

    #[error("void value used in expression")]
    VoidValue,

    #[error("malformed control flow in function '{function}': {block} has no terminator")]
    MissingTerminator { function: String, block: BlockId },

    #[error(transparent)]
    Type(#[from] TypeError),
}

/// A typed expression result
#[derive(Debug, Clone)]
struct Value {
    reg: VReg,
    ty: IrType,
}

/// A variable's storage location and the type stored there
#[derive(Debug, Clone)]
struct Binding {
    ptr: VReg,
    ty: IrType,
}

/// The per-function binding table.
///
/// Flat and non-lexically-scoped: `define` overwrites unconditionally and
/// the overwritten binding is never restored. `replace`/`restore` exist
/// solely for `for`-loop variables, which do put back what they shadowed.
/// A future move to real lexical scoping only touches this type.
#[derive(Default)]
struct Bindings {
    map: HashMap<String, Binding>,
}

impl Bindings {
    fn clear(&mut self) {
        self.map.clear();
    }

    /// Bind a name, permanently shadowing any previous binding
    fn define(&mut self, name: String, binding: Binding) {
        self.map.insert(name, binding);
    }

    fn lookup(&self, name: &str) -> Option<&Binding> {
        self.map.get(name)
    }

    /// Bind a name, returning whatever it shadowed
    fn replace(&mut self, name: &str, binding: Binding) -> Option<Binding> {
        self.map.insert(name.to_string(), binding)
    }

    /// Put back a previously shadowed binding (or unbind if there was none)
    fn restore(&mut self, name: &str, prior: Option<Binding>) {
        match prior {
            Some(binding) => {
                self.map.insert(name.to_string(), binding);
            }
            None => {
                self.map.remove(name);
            }
        }
    }
}

/// The (continue-target, break-target) pair of one enclosing loop
struct LoopContext {
    continue_target: BlockId,
    break_target: BlockId,
}

/// A callable's signature as seen by call sites
struct FnSig {
    param_count: usize,
    ret: IrType,
}

/// Lowers a parsed program into an IR module
pub struct Lowerer {
    builder: IrBuilder,
    target: Target,
    bindings: Bindings,
    loop_stack: Vec<LoopContext>,
    /// Functions declared so far, in source order. A call site only sees
    /// callees that precede it (or itself); forward references fail.
    fn_signatures: HashMap<String, FnSig>,
}

impl Lowerer {
    pub fn new(module_name: impl Into<String>, target: Target) -> Self {
        Self {
            builder: IrBuilder::new(module_name),
            target,
            bindings: Bindings::default(),
            loop_stack: Vec::new(),
            fn_signatures: HashMap::new(),
        }
    }

    /// Lower every function in source order
    pub fn lower_program(mut self, program: &Program) -> Result<Module, LowerError> {
        for decl in program {
            self.lower_function(decl)?;
        }
        Ok(self.builder.into_module())
    }

    fn lower_function(&mut self, decl: &FunctionDecl) -> Result<(), LowerError> {
        let param_types: Vec<IrType> = decl
            .params
            .iter()
            .map(|p| resolve_type(&p.ty))
            .collect::<Result<_, _>>()?;
        let ret_type = match &decl.return_type {
            Some(t) => resolve_type(t)?,
            None => IrType::Void,
        };

        // Registered before the body so recursion resolves.
        self.fn_signatures.insert(
            decl.name.clone(),
            FnSig {
                param_count: param_types.len(),
                ret: ret_type.clone(),
            },
        );

        let externally_callable = decl.is_extern || decl.is_export || decl.name == "main";
        let (linkage, call_conv) = if externally_callable {
            (Linkage::External, self.target.calling_convention())
        } else {
            (Linkage::Internal, CallConv::C)
        };

        if decl.is_extern {
            self.builder
                .declare_function(decl.name.clone(), param_types, ret_type, call_conv, false);
            return Ok(());
        }

        let param_regs = self.builder.start_function(
            decl.name.clone(),
            param_types.clone(),
            ret_type.clone(),
            linkage,
            call_conv,
        );

        // Parameters become mutable locals.
        self.bindings.clear();
        for ((param, reg), ty) in decl.params.iter().zip(param_regs).zip(&param_types) {
            let ptr = self.builder.alloca(ty.clone());
            self.builder.store(ty.clone(), reg, ptr);
            self.bindings
                .define(param.name.clone(), Binding { ptr, ty: ty.clone() });
        }

        self.lower_stmts(&decl.body)?;

        if ret_type == IrType::Void && !self.builder.is_terminated() {
            self.builder.ret(None);
        }
        self.builder.finish_function();
        self.verify_last_function()
    }

    /// The single correctness gate: every block of the finished function
    /// must end in exactly one terminator.
    fn verify_last_function(&self) -> Result<(), LowerError> {
        if let Some(f) = self.builder.module().functions.last() {
            for block in &f.blocks {
                if block.terminator.is_none() {
                    return Err(LowerError::MissingTerminator {
                        function: f.name.clone(),
                        block: block.id,
                    });
                }
            }
        }
        Ok(())
    }

    fn lower_stmts(&mut self, stmts: &[Expr]) -> Result<(), LowerError> {
        for stmt in stmts {
            // Statements after a terminator land in a fresh block; if
            // nothing ever terminates it, verification rejects the
            // function.
            if self.builder.is_terminated() {
                let dead = self.builder.fresh_block();
                self.builder.start_block(dead);
            }
            self.lower_expr(stmt)?;
        }
        Ok(())
    }

    /// Lower an expression in operand position, which must yield a value
    fn lower_operand(&mut self, expr: &Expr) -> Result<Value, LowerError> {
        self.lower_expr(expr)?.ok_or(LowerError::VoidValue)
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<Option<Value>, LowerError> {
        match &expr.kind {
            ExprKind::IntLiteral(value) => {
                let ty = literal_type(*value);
                let reg = self.builder.const_int(ty.clone(), *value);
                Ok(Some(Value { reg, ty }))
            }
            ExprKind::BoolLiteral(b) => {
                let reg = self.builder.const_bool(*b);
                Ok(Some(Value { reg, ty: IrType::Bool }))
            }
            ExprKind::StringLiteral(s) => Ok(Some(self.lower_string(s))),
            ExprKind::Variable(name) => {
                let binding = self
                    .bindings
                    .lookup(name)
                    .cloned()
                    .ok_or_else(|| LowerError::UnknownVariable(name.clone()))?;
                let reg = self.builder.load(binding.ty.clone(), binding.ptr);
                Ok(Some(Value { reg, ty: binding.ty }))
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let l = self.lower_operand(lhs)?;
                let r = self.lower_operand(rhs)?;
                let value = match op {
                    BinOp::Add => {
                        let reg = self.builder.add(l.ty.clone(), l.reg, r.reg);
                        Value { reg, ty: l.ty }
                    }
                    BinOp::Eq => self.cmp(CmpOp::Eq, l.reg, r.reg),
                    BinOp::Ne => self.cmp(CmpOp::Ne, l.reg, r.reg),
                    // Relational operators are always unsigned.
                    BinOp::Lt => self.cmp(CmpOp::Ult, l.reg, r.reg),
                    BinOp::Le => self.cmp(CmpOp::Ule, l.reg, r.reg),
                    BinOp::Gt => self.cmp(CmpOp::Ugt, l.reg, r.reg),
                    BinOp::Ge => self.cmp(CmpOp::Uge, l.reg, r.reg),
                };
                Ok(Some(value))
            }
            ExprKind::Call { callee, args } => self.lower_call(callee, args),
            ExprKind::Return(value) => {
                let v = self.lower_operand(value)?;
                self.builder.ret(Some(v.reg));
                Ok(None)
            }
            ExprKind::VarDecl { name, ty, init, .. } => {
                let ty = resolve_type(ty)?;
                let value = match init {
                    Some(init) => self.lower_operand(init)?,
                    None => {
                        let reg = self.builder.zero(ty.clone());
                        Value { reg, ty: ty.clone() }
                    }
                };
                let ptr = self.builder.alloca(ty.clone());
                self.builder.store(ty.clone(), value.reg, ptr);
                self.bindings.define(name.clone(), Binding { ptr, ty });
                Ok(None)
            }
            ExprKind::If { cond, then_body, else_body } => {
                self.lower_if(cond, then_body, else_body)?;
                Ok(None)
            }
            ExprKind::While { cond, body } => {
                self.lower_while(cond, body)?;
                Ok(None)
            }
            ExprKind::For { var, start, end, body } => {
                self.lower_for(var, start, end, body)?;
                Ok(None)
            }
            ExprKind::Break => match self.loop_stack.last() {
                Some(ctx) => {
                    self.builder.br(ctx.break_target);
                    Ok(None)
                }
                None => Err(LowerError::BreakOutsideLoop),
            },
            ExprKind::Continue => match self.loop_stack.last() {
                Some(ctx) => {
                    self.builder.br(ctx.continue_target);
                    Ok(None)
                }
                None => Err(LowerError::ContinueOutsideLoop),
            },
        }
    }

    fn cmp(&mut self, op: CmpOp, lhs: VReg, rhs: VReg) -> Value {
        let reg = self.builder.icmp(op, lhs, rhs);
        Value { reg, ty: IrType::Bool }
    }

    /// A string literal becomes a private byte buffer (with a trailing
    /// NUL for the printing primitives) plus a slice value carrying the
    /// exact byte length.
    fn lower_string(&mut self, s: &str) -> Value {
        let mut data = s.as_bytes().to_vec();
        data.push(0);
        let global = self.builder.add_string_global(data);

        let slice_ty = IrType::Slice(Box::new(IrType::I8));
        let ptr = self.builder.global_ref(global);
        let agg = self.builder.undef(slice_ty.clone());
        let agg = self.builder.insert_value(slice_ty.clone(), agg, ptr, 0);
        let len = self.builder.const_int(IrType::I64, s.len() as i64);
        let agg = self.builder.insert_value(slice_ty.clone(), agg, len, 1);
        Value { reg: agg, ty: slice_ty }
    }

    fn lower_call(&mut self, callee: &str, args: &[Expr]) -> Result<Option<Value>, LowerError> {
        // The printing names are intercepted before ordinary lookup.
        if matches!(callee, "print" | "println" | "printf") {
            return self.lower_print(callee, args);
        }

        let (param_count, ret) = match self.fn_signatures.get(callee) {
            Some(sig) => (sig.param_count, sig.ret.clone()),
            None => return Err(LowerError::UnknownFunction(callee.to_string())),
        };
        if args.len() != param_count {
            return Err(LowerError::ArityMismatch {
                name: callee.to_string(),
                expected: param_count,
                found: args.len(),
            });
        }

        let mut arg_regs = Vec::with_capacity(args.len());
        for arg in args {
            arg_regs.push(self.lower_operand(arg)?.reg);
        }

        if ret == IrType::Void {
            self.builder.call_void(callee, arg_regs);
            Ok(None)
        } else {
            let reg = self.builder.call(ret.clone(), callee, arg_regs);
            Ok(Some(Value { reg, ty: ret }))
        }
    }

    /// `println(s)` → puts(ptr); `print(s)` → printf("%s", ptr). Anything
    /// else under these names is an acknowledged gap, reported as such.
    fn lower_print(&mut self, name: &str, args: &[Expr]) -> Result<Option<Value>, LowerError> {
        if args.len() != 1 || name == "printf" {
            return Err(LowerError::UnsupportedPrint);
        }
        let arg = self.lower_operand(&args[0])?;
        if !arg.ty.is_slice() {
            return Err(LowerError::UnsupportedPrint);
        }

        self.builder.declare_stdio();
        let ptr = self.builder.extract_value(IrType::Ptr, arg.reg, 0);
        let reg = match name {
            "println" => self.builder.call(IrType::I32, "puts", vec![ptr]),
            _ => {
                let fmt = self.builder.fmt_global();
                let fmt_ptr = self.builder.global_ref(fmt);
                self.builder.call(IrType::I32, "printf", vec![fmt_ptr, ptr])
            }
        };
        Ok(Some(Value { reg, ty: IrType::I32 }))
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_body: &[Expr],
        else_body: &[Expr],
    ) -> Result<(), LowerError> {
        let cond = self.lower_operand(cond)?;
        let zero = self.builder.zero(cond.ty.clone());
        let flag = self.builder.icmp(CmpOp::Ne, cond.reg, zero);

        let then_block = self.builder.fresh_block();
        let else_block = self.builder.fresh_block();
        let merge_block = self.builder.fresh_block();
        self.builder.cond_br(flag, then_block, else_block);

        self.builder.start_block(then_block);
        self.lower_stmts(then_body)?;
        if !self.builder.is_terminated() {
            self.builder.br(merge_block);
        }

        // The else block is materialized even when the body is empty.
        self.builder.start_block(else_block);
        self.lower_stmts(else_body)?;
        if !self.builder.is_terminated() {
            self.builder.br(merge_block);
        }

        self.builder.start_block(merge_block);
        Ok(())
    }

    fn lower_while(&mut self, cond: &Expr, body: &[Expr]) -> Result<(), LowerError> {
        let cond_block = self.builder.fresh_block();
        let body_block = self.builder.fresh_block();
        let after_block = self.builder.fresh_block();

        // The condition lives in its own block so looping re-tests it.
        self.builder.br(cond_block);
        self.builder.start_block(cond_block);
        let cond = self.lower_operand(cond)?;
        let zero = self.builder.zero(cond.ty.clone());
        let flag = self.builder.icmp(CmpOp::Ne, cond.reg, zero);
        self.builder.cond_br(flag, body_block, after_block);

        self.builder.start_block(body_block);
        self.loop_stack.push(LoopContext {
            continue_target: cond_block,
            break_target: after_block,
        });
        let body_result = self.lower_stmts(body);
        self.loop_stack.pop();
        body_result?;
        if !self.builder.is_terminated() {
            self.builder.br(cond_block);
        }

        self.builder.start_block(after_block);
        Ok(())
    }

    fn lower_for(
        &mut self,
        var: &str,
        start: &Expr,
        end: &Expr,
        body: &[Expr],
    ) -> Result<(), LowerError> {
        // Both bounds are evaluated exactly once, before the loop.
        let start_v = self.lower_operand(start)?;
        let mut end_v = self.lower_operand(end)?;
        if !start_v.ty.is_int() || !end_v.ty.is_int() {
            return Err(LowerError::RangeTypeMismatch);
        }
        // The loop variable takes the start bound's type; the end bound
        // is brought to the same width.
        if end_v.ty != start_v.ty {
            let reg = self
                .builder
                .cast(start_v.ty.clone(), end_v.ty.clone(), end_v.reg, true);
            end_v = Value { reg, ty: start_v.ty.clone() };
        }
        let var_ty = start_v.ty.clone();

        let ptr = self.builder.alloca(var_ty.clone());
        self.builder.store(var_ty.clone(), start_v.reg, ptr);
        let prior = self.bindings.replace(
            var,
            Binding { ptr, ty: var_ty.clone() },
        );

        let cond_block = self.builder.fresh_block();
        let body_block = self.builder.fresh_block();
        let incr_block = self.builder.fresh_block();
        let after_block = self.builder.fresh_block();

        self.builder.br(cond_block);
        self.builder.start_block(cond_block);
        let current = self.builder.load(var_ty.clone(), ptr);
        let flag = self.builder.icmp(CmpOp::Slt, current, end_v.reg);
        self.builder.cond_br(flag, body_block, after_block);

        // Unlike while, continue targets the increment step.
        self.builder.start_block(body_block);
        self.loop_stack.push(LoopContext {
            continue_target: incr_block,
            break_target: after_block,
        });
        let body_result = self.lower_stmts(body);
        self.loop_stack.pop();
        if let Err(e) = body_result {
            self.bindings.restore(var, prior);
            return Err(e);
        }
        if !self.builder.is_terminated() {
            self.builder.br(incr_block);
        }

        self.builder.start_block(incr_block);
        let current = self.builder.load(var_ty.clone(), ptr);
        let one = self.builder.const_int(var_ty.clone(), 1);
        let next = self.builder.add(var_ty.clone(), current, one);
        self.builder.store(var_ty, next, ptr);
        self.builder.br(cond_block);

        self.builder.start_block(after_block);
        // The loop variable goes back to whatever it shadowed.
        self.bindings.restore(var, prior);
        Ok(())
    }
}

/// Storage width of an integer literal.
///
/// Ranges are checked unsigned-first at each width; a value that needs a
/// sign bit is widened one step so the chosen width holds it either way.
pub fn literal_type(value: i64) -> IrType {
    if (0..=255).contains(&value) {
        IrType::I8
    } else if (-128..=-1).contains(&value) {
        IrType::I16
    } else if (0..=65535).contains(&value) {
        IrType::I16
    } else if (-32768..=-1).contains(&value) {
        IrType::I32
    } else if (0..=4294967295).contains(&value) {
        IrType::I32
    } else if (-2147483648..=-1).contains(&value) {
        IrType::I32
    } else {
        IrType::I64
    }
}

/// Render a module as deterministic text
pub fn print_module(module: &Module) -> String {
    let mut out = String::new();
    out.push_str(&format!("module {}\n", module.name));

    if !module.globals.is_empty() {
        out.push('\n');
        for g in &module.globals {
            out.push_str(&format!(
                "@{} = private constant b\"{}\"\n",
                g.name,
                escape_bytes(&g.data)
            ));
        }
    }

    for f in module.functions.iter().filter(|f| f.is_external) {
        let mut params: Vec<String> = f.params.iter().map(|(_, ty)| ty.to_string()).collect();
        if f.is_vararg {
            params.push("...".to_string());
        }
        out.push_str(&format!(
            "\ndeclare {} @{}({})\n",
            f.ret_type,
            f.name,
            params.join(", ")
        ));
    }

    for f in module.functions.iter().filter(|f| !f.is_external) {
        let params: Vec<String> = f
            .params
            .iter()
            .map(|(reg, ty)| format!("{} {}", ty, reg))
            .collect();
        let cc = match f.call_conv {
            CallConv::C => String::new(),
            other => format!("{} ", other),
        };
        out.push_str(&format!(
            "\ndefine {} {}{} @{}({}) {{\n",
            f.linkage,
            cc,
            f.ret_type,
            f.name,
            params.join(", ")
        ));
        for block in &f.blocks {
            out.push_str(&format!("  {}:\n", block.id));
            for instr in &block.instructions {
                out.push_str(&format!("    {}\n", instr));
            }
            if let Some(term) = &block.terminator {
                out.push_str(&format!("    {}\n", term));
            }
        }
        out.push_str("}\n");
    }

    out
}

fn escape_bytes(data: &[u8]) -> String {
    let mut s = String::new();
    for &b in data {
        match b {
            0x20..=0x7e if b != b'"' && b != b'\\' => s.push(b as char),
            _ => s.push_str(&format!("\\{:02x}", b)),
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::instr::{InstrKind, Terminator};
    use crate::ir::types::Function;
    use crate::lexer;
    use crate::parser;

    fn lower_with_target(source: &str, triple: &str) -> Result<Module, LowerError> {
        let (tokens, warnings) = lexer::lex(source).unwrap();
        assert!(warnings.is_empty());
        let program = parser::parse(source, tokens).unwrap();
        Lowerer::new("test", Target::from_triple(triple)).lower_program(&program)
    }

    fn lower(source: &str) -> Result<Module, LowerError> {
        lower_with_target(source, "x86_64-unknown-linux-gnu")
    }

    fn body<'m>(module: &'m Module, name: &str) -> &'m Function {
        module.function(name).unwrap()
    }

    /// The alloca feeding the load that produces `reg`, if any
    fn load_source(f: &Function, reg: VReg) -> Option<VReg> {
        for block in &f.blocks {
            for instr in &block.instructions {
                if instr.result == Some(reg) {
                    if let InstrKind::Load(ptr) = instr.kind {
                        return Some(ptr);
                    }
                }
            }
        }
        None
    }

    #[test]
    fn test_literal_width_boundaries() {
        let cases = [
            (255, IrType::I8),
            (256, IrType::I16),
            (-128, IrType::I16),
            (-129, IrType::I32),
            (65535, IrType::I16),
            (65536, IrType::I32),
            (-32768, IrType::I32),
            (-32769, IrType::I32),
            (4294967295, IrType::I32),
            (4294967296, IrType::I64),
            (-2147483648, IrType::I32),
            (-2147483649, IrType::I64),
        ];
        for (value, expected) in cases {
            assert_eq!(literal_type(value), expected, "literal {}", value);
        }
        assert_eq!(literal_type(0), IrType::I8);
        assert_eq!(literal_type(-1), IrType::I16);
    }

    #[test]
    fn test_deterministic_output() {
        let source = r#"
            fn helper(a: u32) -> u32 { return a + 1; }
            fn main() -> u32 {
                var x: u32 = 41;
                if (x < 100) { return helper(x); }
                return 0;
            }
        "#;
        let a = print_module(&lower(source).unwrap());
        let b = print_module(&lower(source).unwrap());
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_linkage_rules() {
        let source = r#"
            extern fn getchar() -> i32;
            export fn api() { }
            fn helper() { }
            fn main() -> u32 { return 0; }
        "#;
        let module = lower(source).unwrap();
        assert_eq!(body(&module, "getchar").linkage, Linkage::External);
        assert!(body(&module, "getchar").is_external);
        assert_eq!(body(&module, "api").linkage, Linkage::External);
        assert_eq!(body(&module, "main").linkage, Linkage::External);
        assert_eq!(body(&module, "main").call_conv, CallConv::C);
        assert_eq!(body(&module, "helper").linkage, Linkage::Internal);
    }

    #[test]
    fn test_msvc_entry_gets_win64_convention() {
        let module =
            lower_with_target("fn main() -> u32 { return 0; }", "x86_64-pc-windows-msvc").unwrap();
        assert_eq!(body(&module, "main").call_conv, CallConv::Win64);
    }

    #[test]
    fn test_unknown_variable() {
        let err = lower("fn f() -> u8 { return nope; }").unwrap_err();
        assert_eq!(err.to_string(), "Unknown variable name: nope");
    }

    #[test]
    fn test_unknown_function() {
        let err = lower("fn f() { missing(); }").unwrap_err();
        assert_eq!(err.to_string(), "Unknown function referenced: missing");
    }

    #[test]
    fn test_forward_reference_is_unknown() {
        // Callees must precede their call sites.
        let err = lower("fn f() { later(); } fn later() { }").unwrap_err();
        assert_eq!(err, LowerError::UnknownFunction("later".to_string()));
    }

    #[test]
    fn test_recursion_resolves() {
        lower("fn f(n: u32) { f(n); }").unwrap();
    }

    #[test]
    fn test_arity_mismatch() {
        let err = lower("fn g(a: u8, b: u8) { } fn f() { g(1); }").unwrap_err();
        assert_eq!(
            err,
            LowerError::ArityMismatch {
                name: "g".to_string(),
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn test_break_outside_loop() {
        let err = lower("fn f() { break; }").unwrap_err();
        assert_eq!(err, LowerError::BreakOutsideLoop);
        let err = lower("fn f() { continue; }").unwrap_err();
        assert_eq!(err, LowerError::ContinueOutsideLoop);
    }

    #[test]
    fn test_relational_comparisons_are_unsigned() {
        let module = lower("fn f(a: i32, b: i32) -> bool { return a < b; }").unwrap();
        let f = body(&module, "f");
        let has_ult = f.blocks.iter().flat_map(|b| &b.instructions).any(|i| {
            matches!(i.kind, InstrKind::ICmp(CmpOp::Ult, _, _))
        });
        assert!(has_ult, "signed operands still compare unsigned");
    }

    #[test]
    fn test_while_continue_targets_condition() {
        let module = lower("fn f() { while (true) { continue; } }").unwrap();
        let f = body(&module, "f");
        // entry bb0 branches to the condition block bb1; the body block
        // bb2 ends with the continue branch back to bb1.
        assert_eq!(f.blocks[0].terminator, Some(Terminator::Br(BlockId(1))));
        let cond = &f.blocks[1];
        assert!(matches!(
            cond.terminator,
            Some(Terminator::CondBr {
                then_block: BlockId(2),
                else_block: BlockId(3),
                ..
            })
        ));
        assert_eq!(f.blocks[2].terminator, Some(Terminator::Br(BlockId(1))));
    }

    #[test]
    fn test_for_continue_targets_increment() {
        let module = lower("fn f() { for i in 0:5 { continue; } }").unwrap();
        let f = body(&module, "f");
        // Blocks: bb0 entry, bb1 cond, bb2 body, bb3 incr, bb4 after.
        let cond = &f.blocks[1];
        assert!(cond.instructions.iter().any(|i| matches!(
            i.kind,
            InstrKind::ICmp(CmpOp::Slt, _, _)
        )));
        assert_eq!(f.blocks[2].terminator, Some(Terminator::Br(BlockId(3))));
        let incr = &f.blocks[3];
        assert!(incr.instructions.iter().any(|i| matches!(i.kind, InstrKind::Add(_, _))));
        assert_eq!(incr.terminator, Some(Terminator::Br(BlockId(1))));
    }

    #[test]
    fn test_break_in_while_exits_only_the_while() {
        let module = lower(
            "fn f() { for i in 0:3 { while (true) { break; continue; } } }",
        )
        .unwrap();
        let f = body(&module, "f");
        // For-loop blocks are bb1..bb4; while blocks are bb5 (cond),
        // bb6 (body), bb7 (after). The break jumps to bb7, not bb4, and
        // the continue re-tests bb5, not the for's increment bb3.
        let while_body = f.blocks.iter().find(|b| b.id == BlockId(6)).unwrap();
        assert_eq!(while_body.terminator, Some(Terminator::Br(BlockId(7))));
        let resumed = f.blocks.iter().find(|b| b.id == BlockId(8)).unwrap();
        assert_eq!(resumed.terminator, Some(Terminator::Br(BlockId(5))));
    }

    #[test]
    fn test_for_restores_shadowed_binding() {
        let module = lower(
            "fn f() -> u32 { var i: u32 = 9; for i in 0:3 { } return i; }",
        )
        .unwrap();
        let f = body(&module, "f");
        let allocas: Vec<VReg> = f
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(i.kind, InstrKind::Alloca(_)))
            .filter_map(|i| i.result)
            .collect();
        assert_eq!(allocas.len(), 2, "outer var and loop var");

        let ret_reg = f
            .blocks
            .iter()
            .find_map(|b| match b.terminator {
                Some(Terminator::Ret(Some(r))) => Some(r),
                _ => None,
            })
            .unwrap();
        // The returned value loads from the outer alloca, not the loop's.
        assert_eq!(load_source(f, ret_reg), Some(allocas[0]));
    }

    #[test]
    fn test_for_removes_fresh_binding() {
        let err = lower("fn f() -> u8 { for i in 0:3 { } return i; }").unwrap_err();
        assert_eq!(err, LowerError::UnknownVariable("i".to_string()));
    }

    #[test]
    fn test_var_decl_shadows_permanently() {
        let module = lower(
            "fn f() -> u8 { var x: u8 = 1; if (true) { var x: u8 = 2; } return x; }",
        )
        .unwrap();
        let f = body(&module, "f");
        let allocas: Vec<VReg> = f
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(i.kind, InstrKind::Alloca(_)))
            .filter_map(|i| i.result)
            .collect();
        let ret_reg = f
            .blocks
            .iter()
            .find_map(|b| match b.terminator {
                Some(Terminator::Ret(Some(r))) => Some(r),
                _ => None,
            })
            .unwrap();
        // The inner declaration's binding survives the if.
        assert_eq!(load_source(f, ret_reg), Some(allocas[1]));
    }

    #[test]
    fn test_for_range_width_cast() {
        let module = lower("fn f() { for i in 0:300 { } }").unwrap();
        let f = body(&module, "f");
        // start is i8, end 300 is i16: the bound is cast to the loop
        // variable's width.
        let has_cast = f
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .any(|i| matches!(i.kind, InstrKind::Cast { signed: true, .. }));
        assert!(has_cast);
    }

    #[test]
    fn test_for_range_type_mismatch() {
        let err = lower("fn f() { for i in \"a\":5 { } }").unwrap_err();
        assert_eq!(err, LowerError::RangeTypeMismatch);
    }

    #[test]
    fn test_string_literal_layout() {
        let module = lower("fn f() { println(\"hi\"); }").unwrap();
        assert_eq!(module.globals[0].name, ".str.0");
        assert_eq!(module.globals[0].data, b"hi\0");
        let f = body(&module, "f");
        let has_exact_len = f
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .any(|i| i.ty == IrType::I64 && matches!(i.kind, InstrKind::Const(2)));
        assert!(has_exact_len, "slice length excludes the NUL");
    }

    #[test]
    fn test_println_lowers_to_puts() {
        let module = lower("fn f() { println(\"a\"); println(\"b\"); }").unwrap();
        let decls: Vec<_> = module
            .functions
            .iter()
            .filter(|f| f.is_external)
            .map(|f| f.name.as_str())
            .collect();
        // Declared lazily, at most once per module.
        assert_eq!(decls, vec!["puts", "printf"]);
        let f = body(&module, "f");
        let puts_calls = f
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .filter(|i| matches!(&i.kind, InstrKind::Call { func, .. } if func == "puts"))
            .count();
        assert_eq!(puts_calls, 2);
    }

    #[test]
    fn test_print_uses_format_string() {
        let module = lower("fn f() { print(\"x\"); }").unwrap();
        assert!(module.globals.iter().any(|g| g.name == ".fmt" && g.data == b"%s\0"));
        let f = body(&module, "f");
        let printf_args = f
            .blocks
            .iter()
            .flat_map(|b| &b.instructions)
            .find_map(|i| match &i.kind {
                InstrKind::Call { func, args } if func == "printf" => Some(args.len()),
                _ => None,
            });
        assert_eq!(printf_args, Some(2));
    }

    #[test]
    fn test_unsupported_print_forms() {
        let err = lower("fn f() { println(\"a\", \"b\"); }").unwrap_err();
        assert_eq!(err, LowerError::UnsupportedPrint);
        let err = lower("fn f() { println(42); }").unwrap_err();
        assert_eq!(err, LowerError::UnsupportedPrint);
        let err = lower("fn f() { printf(\"a\"); }").unwrap_err();
        assert_eq!(err, LowerError::UnsupportedPrint);
    }

    #[test]
    fn test_implicit_void_return() {
        let module = lower("fn f() { }").unwrap();
        let f = body(&module, "f");
        assert_eq!(f.blocks.len(), 1);
        assert_eq!(f.blocks[0].terminator, Some(Terminator::Ret(None)));
    }

    #[test]
    fn test_fall_off_end_of_nonvoid_is_malformed() {
        let err = lower("fn f() -> u32 { var x: u32 = 1; }").unwrap_err();
        assert!(matches!(err, LowerError::MissingTerminator { .. }));
    }

    #[test]
    fn test_if_with_both_branches_returning_leaves_merge_malformed() {
        // The merge block is always materialized; with no fall-through
        // into it and nothing after the if, it has no terminator.
        let err = lower(
            "fn f() -> u8 { if (true) { return 1; } else { return 2; } }",
        )
        .unwrap_err();
        assert!(matches!(err, LowerError::MissingTerminator { .. }));
    }

    #[test]
    fn test_statements_after_return_are_unreachable_but_wellformed() {
        let module = lower("fn f() -> u8 { return 1; return 2; }").unwrap();
        let f = body(&module, "f");
        assert_eq!(f.blocks.len(), 2);
        assert!(f.blocks.iter().all(|b| b.terminator.is_some()));
    }

    #[test]
    fn test_empty_else_still_materialized() {
        let module = lower("fn f() { if (true) { } }").unwrap();
        let f = body(&module, "f");
        // entry, then, else, merge
        assert_eq!(f.blocks.len(), 4);
    }

    #[test]
    fn test_loop_context_restored_after_error() {
        // The outer loop's context must be popped even though the body
        // fails; otherwise this would be a stale-stack panic rather than
        // a clean error.
        let err = lower("fn f() { while (true) { nope(); } }").unwrap_err();
        assert_eq!(err, LowerError::UnknownFunction("nope".to_string()));
    }

    #[test]
    fn test_print_module_format() {
        let source = r#"
            extern fn getchar() -> i32;
            fn main() -> u32 { return 0; }
        "#;
        let text = print_module(&lower(source).unwrap());
        assert!(text.starts_with("module test\n"));
        assert!(text.contains("declare i32 @getchar()"));
        assert!(text.contains("define external i32 @main() {"));
        assert!(text.contains("  bb0:\n"));
        assert!(text.contains("ret %0"));
    }

    #[test]
    fn test_win64_convention_appears_in_text() {
        let module =
            lower_with_target("fn main() -> u32 { return 0; }", "x86_64-pc-windows-msvc").unwrap();
        let text = print_module(&module);
        assert!(text.contains("define external win64cc i32 @main() {"));
    }

    #[test]
    fn test_escape_bytes() {
        assert_eq!(escape_bytes(b"hi\0"), "hi\\00");
        assert_eq!(escape_bytes(b"a\"b\\c\n"), "a\\22b\\5cc\\0a");
    }
}
