//! Recorded IR → Cranelift IR lowering
//!
//! Scalars live in Cranelift variables. Aggregates, and scalars whose address
//! has been taken, live in explicit stack slots and are copied bytewise.
//! Constants are materialized at every use.

use cranelift_codegen::ir::{
    self, condcodes::FloatCC, condcodes::IntCC, types, AbiParam, InstBuilder, MemFlags, StackSlotData,
    StackSlotKind,
};
use cranelift_codegen::isa::CallConv;
use cranelift_frontend::{FunctionBuilder, Variable};
use cranelift_jit::JITModule;
use cranelift_module::{FuncId, Module};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::bridge::stubs::ContextStubs;
use crate::jit::ir::{BinaryOp, CallTarget, CompareOp, FunctionBody, Instr, UnaryOp};
use crate::jit::types::{SignatureType, Type};
use crate::jit::value::{Const, Label, ValueId, ValueKind};

/// Error during Cranelift lowering
#[derive(Debug, thiserror::Error)]
pub enum LowerError {
    #[error("Unsupported instruction: {0}")]
    UnsupportedInstruction(String),
    #[error("Type {0} has no machine representation here")]
    UnsupportedType(String),
    #[error("Aggregate value {0} used where a scalar is required")]
    AggregateAsScalar(ValueId),
    #[error("Value {0} has no storage")]
    NoStorage(ValueId),
    #[error("Branch to label {0} which is never placed")]
    UnplacedLabel(Label),
    #[error("Cranelift error: {0}")]
    CraneliftError(String),
}

/// Module-level state lowering needs to reference other functions
pub struct LowerEnv<'m> {
    pub module: &'m mut JITModule,
    pub stubs: &'m ContextStubs,
}

/// Machine type of a scalar native type
pub fn clif_type(ty: &Type, ptr: ir::Type) -> Option<ir::Type> {
    match ty {
        Type::SByte | Type::UByte => Some(types::I8),
        Type::Short | Type::UShort => Some(types::I16),
        Type::Int | Type::UInt => Some(types::I32),
        Type::Long | Type::ULong => Some(types::I64),
        Type::NInt | Type::NUInt | Type::Pointer(_) | Type::Signature(_) => Some(ptr),
        Type::Float32 => Some(types::F32),
        Type::Float64 => Some(types::F64),
        Type::Void | Type::Struct(_) | Type::Union(_) => None,
    }
}

/// Cranelift signature of a native signature
pub fn clif_signature(sig: &SignatureType, call_conv: CallConv, ptr: ir::Type) -> Result<ir::Signature, LowerError> {
    let mut out = ir::Signature::new(call_conv);
    for param in sig.params() {
        let t = clif_type(param, ptr).ok_or_else(|| LowerError::UnsupportedType(param.to_string()))?;
        out.params.push(AbiParam::new(t));
    }
    if !sig.ret().is_void() {
        let t = clif_type(sig.ret(), ptr).ok_or_else(|| LowerError::UnsupportedType(sig.ret().to_string()))?;
        out.returns.push(AbiParam::new(t));
    }
    Ok(out)
}

/// Signature of the application shim: `extern "C" fn(args: *const u64, ret: *mut u64)`
pub fn apply_shim_signature(call_conv: CallConv, ptr: ir::Type) -> ir::Signature {
    let mut sig = ir::Signature::new(call_conv);
    sig.params.push(AbiParam::new(ptr)); // args
    sig.params.push(AbiParam::new(ptr)); // ret
    sig
}

/// Immediate for `iconst`: the bits above the type width must be zero
fn imm(value: i64, ty: ir::Type) -> i64 {
    let bits = ty.bits();
    if bits >= 64 {
        value
    } else {
        value & ((1i64 << bits) - 1)
    }
}

/// Copy `size` bytes between two addresses with scalar loads and stores
fn copy_bytes(
    builder: &mut FunctionBuilder<'_>,
    dst: ir::Value,
    dst_offset: i32,
    src: ir::Value,
    src_offset: i32,
    size: usize,
) {
    let mut done = 0usize;
    while done < size {
        let chunk = match size - done {
            n if n >= 8 => types::I64,
            n if n >= 4 => types::I32,
            n if n >= 2 => types::I16,
            _ => types::I8,
        };
        let at = done as i32;
        let v = builder.ins().load(chunk, MemFlags::new(), src, src_offset + at);
        builder.ins().store(MemFlags::new(), v, dst, dst_offset + at);
        done += chunk.bytes() as usize;
    }
}

#[derive(Debug, Clone, Copy)]
enum Storage {
    Var(Variable),
    Slot(ir::StackSlot),
    Const(Const, ir::Type),
    None,
}

/// State maintained during lowering of a single function
pub struct LoweringContext<'a> {
    body: &'a FunctionBody,
    storage: Vec<Storage>,
    blocks: FxHashMap<Label, ir::Block>,
    ptr: ir::Type,
    call_conv: CallConv,
    /// The current block already ends in a terminator
    terminated: bool,
}

impl<'a> LoweringContext<'a> {
    /// Lower a function body into Cranelift IR.
    /// Takes ownership of the FunctionBuilder since finalize() consumes it.
    pub fn lower(
        body: &'a FunctionBody,
        mut builder: FunctionBuilder<'_>,
        env: &mut LowerEnv<'_>,
    ) -> Result<(), LowerError> {
        let ptr = env.module.target_config().pointer_type();
        let call_conv = env.module.isa().default_call_conv();

        check_labels(body)?;

        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);

        let mut ctx = LoweringContext {
            body,
            storage: Vec::with_capacity(body.values.len()),
            blocks: FxHashMap::default(),
            ptr,
            call_conv,
            terminated: false,
        };
        ctx.declare_storage(&mut builder)?;

        let entry_params = builder.block_params(entry).to_vec();
        for (id, param) in body.params.iter().zip(entry_params) {
            ctx.def_value(&mut builder, *id, param)?;
        }

        for instr in &body.instrs {
            ctx.lower_instr(instr, &mut builder, env)?;
        }

        if !ctx.terminated {
            ctx.emit_return(&mut builder, None)?;
        }

        builder.seal_all_blocks();
        builder.finalize();
        Ok(())
    }

    /// Pick a home for every value
    fn declare_storage(&mut self, builder: &mut FunctionBuilder<'_>) -> Result<(), LowerError> {
        for info in &self.body.values {
            let storage = match info.kind {
                ValueKind::Constant(c) => {
                    let t = clif_type(&info.ty, self.ptr)
                        .ok_or_else(|| LowerError::UnsupportedType(info.ty.to_string()))?;
                    Storage::Const(c, t)
                }
                _ if info.ty.is_void() => Storage::None,
                _ if info.ty.is_aggregate() || info.addressable => {
                    let size = info.ty.size().max(1) as u32;
                    let align_shift = info.ty.alignment().max(1).trailing_zeros() as u8;
                    let slot = builder.create_sized_stack_slot(StackSlotData::new(
                        StackSlotKind::ExplicitSlot,
                        size,
                        align_shift,
                    ));
                    Storage::Slot(slot)
                }
                _ => {
                    let t = clif_type(&info.ty, self.ptr)
                        .ok_or_else(|| LowerError::UnsupportedType(info.ty.to_string()))?;
                    Storage::Var(builder.declare_var(t))
                }
            };
            self.storage.push(storage);
        }
        Ok(())
    }

    fn ty(&self, id: ValueId) -> &'a Type {
        &self.body.value(id).ty
    }

    fn scalar_type(&self, id: ValueId) -> Result<ir::Type, LowerError> {
        clif_type(self.ty(id), self.ptr).ok_or(LowerError::AggregateAsScalar(id))
    }

    /// Read a value as a Cranelift value
    fn use_value(&self, builder: &mut FunctionBuilder<'_>, id: ValueId) -> Result<ir::Value, LowerError> {
        match self.storage[id.0 as usize] {
            Storage::Var(var) => Ok(builder.use_var(var)),
            Storage::Slot(slot) => {
                let t = self.scalar_type(id)?;
                Ok(builder.ins().stack_load(t, slot, 0))
            }
            Storage::Const(c, t) => Ok(match c {
                Const::Int(v) => builder.ins().iconst(t, imm(v, t)),
                Const::F32(v) => builder.ins().f32const(v),
                Const::F64(v) => builder.ins().f64const(v),
            }),
            Storage::None => Err(LowerError::NoStorage(id)),
        }
    }

    /// Write a Cranelift value to a value
    fn def_value(&self, builder: &mut FunctionBuilder<'_>, id: ValueId, val: ir::Value) -> Result<(), LowerError> {
        match self.storage[id.0 as usize] {
            Storage::Var(var) => {
                builder.def_var(var, val);
                Ok(())
            }
            Storage::Slot(slot) => {
                builder.ins().stack_store(val, slot, 0);
                Ok(())
            }
            Storage::Const(..) | Storage::None => Err(LowerError::NoStorage(id)),
        }
    }

    fn slot_address(&self, builder: &mut FunctionBuilder<'_>, id: ValueId) -> Result<ir::Value, LowerError> {
        match self.storage[id.0 as usize] {
            Storage::Slot(slot) => Ok(builder.ins().stack_addr(self.ptr, slot, 0)),
            _ => Err(LowerError::NoStorage(id)),
        }
    }

    fn block_for(&mut self, builder: &mut FunctionBuilder<'_>, label: Label) -> ir::Block {
        *self.blocks.entry(label).or_insert_with(|| builder.create_block())
    }

    /// Open a fresh block if the previous instruction ended one
    fn ensure_open(&mut self, builder: &mut FunctionBuilder<'_>) {
        if self.terminated {
            let dead = builder.create_block();
            builder.switch_to_block(dead);
            self.terminated = false;
        }
    }

    fn lower_instr(
        &mut self,
        instr: &Instr,
        builder: &mut FunctionBuilder<'_>,
        env: &mut LowerEnv<'_>,
    ) -> Result<(), LowerError> {
        if !matches!(instr, Instr::Label(_)) {
            self.ensure_open(builder);
        }

        match instr {
            // ===== Arithmetic =====
            Instr::Binary { op, dest, lhs, rhs } => {
                let l = self.use_value(builder, *lhs)?;
                let r = self.use_value(builder, *rhs)?;
                let result = self.lower_binary(builder, *op, self.ty(*dest), l, r)?;
                self.def_value(builder, *dest, result)?;
            }
            Instr::Unary { op, dest, operand } => {
                let v = self.use_value(builder, *operand)?;
                let result = self.lower_unary(builder, *op, self.ty(*operand), v)?;
                self.def_value(builder, *dest, result)?;
            }
            Instr::Compare { op, dest, lhs, rhs } => {
                let l = self.use_value(builder, *lhs)?;
                let r = self.use_value(builder, *rhs)?;
                let flag = self.lower_compare(builder, *op, self.ty(*lhs), l, r);
                let result = builder.ins().uextend(types::I32, flag);
                self.def_value(builder, *dest, result)?;
            }
            Instr::Convert { dest, src } => {
                let v = self.use_value(builder, *src)?;
                let result = self.convert(builder, v, self.ty(*src), self.ty(*dest))?;
                self.def_value(builder, *dest, result)?;
            }

            // ===== Memory =====
            Instr::Copy { dest, src } => {
                if self.ty(*dest).is_aggregate() {
                    let d = self.slot_address(builder, *dest)?;
                    let s = self.slot_address(builder, *src)?;
                    copy_bytes(builder, d, 0, s, 0, self.ty(*dest).size());
                } else {
                    let v = self.use_value(builder, *src)?;
                    self.def_value(builder, *dest, v)?;
                }
            }
            Instr::AddressOf { dest, src } => {
                let addr = self.slot_address(builder, *src)?;
                self.def_value(builder, *dest, addr)?;
            }
            Instr::LoadRelative { dest, base, offset } => {
                let b = self.use_value(builder, *base)?;
                self.load_into(builder, *dest, b, *offset)?;
            }
            Instr::StoreRelative { base, offset, src } => {
                let b = self.use_value(builder, *base)?;
                self.store_from(builder, b, *offset, *src)?;
            }
            Instr::AddRelative { dest, base, offset } => {
                let b = self.use_value(builder, *base)?;
                let result = builder.ins().iadd_imm(b, *offset as i64);
                self.def_value(builder, *dest, result)?;
            }
            Instr::LoadElem { dest, base, index, elem } => {
                let addr = self.elem_address(builder, *base, *index, elem.size())?;
                self.load_into(builder, *dest, addr, 0)?;
            }
            Instr::LoadElemAddress { dest, base, index, elem } => {
                let addr = self.elem_address(builder, *base, *index, elem.size())?;
                self.def_value(builder, *dest, addr)?;
            }
            Instr::StoreElem { base, index, src } => {
                let addr = self.elem_address(builder, *base, *index, self.ty(*src).size())?;
                self.store_from(builder, addr, 0, *src)?;
            }

            // ===== Calls =====
            Instr::Call { dest, target, signature, args } => {
                self.lower_call(builder, env, *dest, target, signature, args)?;
            }

            // ===== Control flow =====
            Instr::Label(label) => {
                let block = self.block_for(builder, *label);
                if !self.terminated {
                    builder.ins().jump(block, &[]);
                }
                builder.switch_to_block(block);
                self.terminated = false;
            }
            Instr::Branch(label) => {
                let block = self.block_for(builder, *label);
                builder.ins().jump(block, &[]);
                self.terminated = true;
            }
            Instr::BranchIf { cond, target } | Instr::BranchIfNot { cond, target } => {
                let c = self.use_value(builder, *cond)?;
                let taken = self.block_for(builder, *target);
                let fallthrough = builder.create_block();
                if matches!(instr, Instr::BranchIf { .. }) {
                    builder.ins().brif(c, taken, &[], fallthrough, &[]);
                } else {
                    builder.ins().brif(c, fallthrough, &[], taken, &[]);
                }
                builder.switch_to_block(fallthrough);
            }
            Instr::Return(value) => {
                self.emit_return(builder, *value)?;
            }
        }
        Ok(())
    }

    fn emit_return(&mut self, builder: &mut FunctionBuilder<'_>, value: Option<ValueId>) -> Result<(), LowerError> {
        match (&self.body.ret, value) {
            (Type::Void, _) => {
                builder.ins().return_(&[]);
            }
            (_, Some(v)) => {
                let val = self.use_value(builder, v)?;
                builder.ins().return_(&[val]);
            }
            (ret, None) => {
                let t = clif_type(ret, self.ptr).ok_or_else(|| LowerError::UnsupportedType(ret.to_string()))?;
                let zero = match t {
                    types::F32 => builder.ins().f32const(0.0),
                    types::F64 => builder.ins().f64const(0.0),
                    _ => builder.ins().iconst(t, 0),
                };
                builder.ins().return_(&[zero]);
            }
        }
        self.terminated = true;
        Ok(())
    }

    fn load_into(
        &self,
        builder: &mut FunctionBuilder<'_>,
        dest: ValueId,
        base: ir::Value,
        offset: i32,
    ) -> Result<(), LowerError> {
        let ty = self.ty(dest);
        if ty.is_aggregate() {
            let d = self.slot_address(builder, dest)?;
            copy_bytes(builder, d, 0, base, offset, ty.size());
        } else {
            let t = self.scalar_type(dest)?;
            let v = builder.ins().load(t, MemFlags::new(), base, offset);
            self.def_value(builder, dest, v)?;
        }
        Ok(())
    }

    fn store_from(
        &self,
        builder: &mut FunctionBuilder<'_>,
        base: ir::Value,
        offset: i32,
        src: ValueId,
    ) -> Result<(), LowerError> {
        let ty = self.ty(src);
        if ty.is_aggregate() {
            let s = self.slot_address(builder, src)?;
            copy_bytes(builder, base, offset, s, 0, ty.size());
        } else {
            let v = self.use_value(builder, src)?;
            builder.ins().store(MemFlags::new(), v, base, offset);
        }
        Ok(())
    }

    fn elem_address(
        &self,
        builder: &mut FunctionBuilder<'_>,
        base: ValueId,
        index: ValueId,
        elem_size: usize,
    ) -> Result<ir::Value, LowerError> {
        let b = self.use_value(builder, base)?;
        let i = self.use_value(builder, index)?;
        let it = self.scalar_type(index)?;
        let i = if it.bits() < self.ptr.bits() {
            if self.ty(index).is_signed() {
                builder.ins().sextend(self.ptr, i)
            } else {
                builder.ins().uextend(self.ptr, i)
            }
        } else if it.bits() > self.ptr.bits() {
            builder.ins().ireduce(self.ptr, i)
        } else {
            i
        };
        let scaled = builder.ins().imul_imm(i, elem_size as i64);
        Ok(builder.ins().iadd(b, scaled))
    }

    fn lower_binary(
        &self,
        builder: &mut FunctionBuilder<'_>,
        op: BinaryOp,
        ty: &Type,
        l: ir::Value,
        r: ir::Value,
    ) -> Result<ir::Value, LowerError> {
        let ins = builder.ins();
        if ty.is_float() {
            return Ok(match op {
                BinaryOp::Add => ins.fadd(l, r),
                BinaryOp::Sub => ins.fsub(l, r),
                BinaryOp::Mul => ins.fmul(l, r),
                BinaryOp::Div => ins.fdiv(l, r),
                BinaryOp::Min => ins.fmin(l, r),
                BinaryOp::Max => ins.fmax(l, r),
                _ => {
                    return Err(LowerError::UnsupportedInstruction(format!(
                        "{} on {}",
                        op.mnemonic(),
                        ty
                    )))
                }
            });
        }
        let signed = ty.is_signed();
        Ok(match op {
            BinaryOp::Add => ins.iadd(l, r),
            BinaryOp::Sub => ins.isub(l, r),
            BinaryOp::Mul => ins.imul(l, r),
            BinaryOp::Div if signed => ins.sdiv(l, r),
            BinaryOp::Div => ins.udiv(l, r),
            BinaryOp::Rem if signed => ins.srem(l, r),
            BinaryOp::Rem => ins.urem(l, r),
            BinaryOp::And => ins.band(l, r),
            BinaryOp::Or => ins.bor(l, r),
            BinaryOp::Xor => ins.bxor(l, r),
            BinaryOp::Shl => ins.ishl(l, r),
            BinaryOp::Shr if signed => ins.sshr(l, r),
            BinaryOp::Shr | BinaryOp::Ushr => ins.ushr(l, r),
            BinaryOp::Sshr => ins.sshr(l, r),
            BinaryOp::Min if signed => ins.smin(l, r),
            BinaryOp::Min => ins.umin(l, r),
            BinaryOp::Max if signed => ins.smax(l, r),
            BinaryOp::Max => ins.umax(l, r),
        })
    }

    fn lower_unary(
        &self,
        builder: &mut FunctionBuilder<'_>,
        op: UnaryOp,
        ty: &Type,
        v: ir::Value,
    ) -> Result<ir::Value, LowerError> {
        let float = ty.is_float();
        Ok(match op {
            UnaryOp::Neg if float => builder.ins().fneg(v),
            UnaryOp::Neg => builder.ins().ineg(v),
            UnaryOp::Not if !float => builder.ins().bnot(v),
            UnaryOp::Abs if float => builder.ins().fabs(v),
            UnaryOp::Abs if ty.is_signed() => builder.ins().iabs(v),
            UnaryOp::Abs => v,
            UnaryOp::Sqrt if float => builder.ins().sqrt(v),
            UnaryOp::Floor if float => builder.ins().floor(v),
            UnaryOp::Ceil if float => builder.ins().ceil(v),
            UnaryOp::Trunc if float => builder.ins().trunc(v),
            UnaryOp::Round if float => builder.ins().nearest(v),
            UnaryOp::ToBool | UnaryOp::ToNotBool => {
                let want_nonzero = op == UnaryOp::ToBool;
                let flag = if float {
                    let zero = if ty == &Type::Float32 {
                        builder.ins().f32const(0.0)
                    } else {
                        builder.ins().f64const(0.0)
                    };
                    let cc = if want_nonzero { FloatCC::NotEqual } else { FloatCC::Equal };
                    builder.ins().fcmp(cc, v, zero)
                } else {
                    let cc = if want_nonzero { IntCC::NotEqual } else { IntCC::Equal };
                    builder.ins().icmp_imm(cc, v, 0)
                };
                builder.ins().uextend(types::I32, flag)
            }
            _ => {
                return Err(LowerError::UnsupportedInstruction(format!(
                    "{} on {}",
                    op.mnemonic(),
                    ty
                )))
            }
        })
    }

    fn lower_compare(
        &self,
        builder: &mut FunctionBuilder<'_>,
        op: CompareOp,
        ty: &Type,
        l: ir::Value,
        r: ir::Value,
    ) -> ir::Value {
        if ty.is_float() {
            let cc = match op {
                CompareOp::Eq => FloatCC::Equal,
                CompareOp::Ne => FloatCC::NotEqual,
                CompareOp::Lt => FloatCC::LessThan,
                CompareOp::Le => FloatCC::LessThanOrEqual,
                CompareOp::Gt => FloatCC::GreaterThan,
                CompareOp::Ge => FloatCC::GreaterThanOrEqual,
            };
            return builder.ins().fcmp(cc, l, r);
        }
        let signed = ty.is_signed();
        let cc = match op {
            CompareOp::Eq => IntCC::Equal,
            CompareOp::Ne => IntCC::NotEqual,
            CompareOp::Lt if signed => IntCC::SignedLessThan,
            CompareOp::Lt => IntCC::UnsignedLessThan,
            CompareOp::Le if signed => IntCC::SignedLessThanOrEqual,
            CompareOp::Le => IntCC::UnsignedLessThanOrEqual,
            CompareOp::Gt if signed => IntCC::SignedGreaterThan,
            CompareOp::Gt => IntCC::UnsignedGreaterThan,
            CompareOp::Ge if signed => IntCC::SignedGreaterThanOrEqual,
            CompareOp::Ge => IntCC::UnsignedGreaterThanOrEqual,
        };
        builder.ins().icmp(cc, l, r)
    }

    fn convert(
        &self,
        builder: &mut FunctionBuilder<'_>,
        v: ir::Value,
        from: &Type,
        to: &Type,
    ) -> Result<ir::Value, LowerError> {
        let ft = clif_type(from, self.ptr).ok_or_else(|| LowerError::UnsupportedType(from.to_string()))?;
        let tt = clif_type(to, self.ptr).ok_or_else(|| LowerError::UnsupportedType(to.to_string()))?;
        if ft == tt {
            return Ok(v);
        }
        Ok(match (from.is_float(), to.is_float()) {
            (false, false) if tt.bits() < ft.bits() => builder.ins().ireduce(tt, v),
            (false, false) if from.is_signed() => builder.ins().sextend(tt, v),
            (false, false) => builder.ins().uextend(tt, v),
            (false, true) => {
                // Widen first so narrow unsigned values keep their magnitude
                let wide = match ft.bits() {
                    64 => v,
                    _ if from.is_signed() => builder.ins().sextend(types::I64, v),
                    _ => builder.ins().uextend(types::I64, v),
                };
                if from.is_signed() {
                    builder.ins().fcvt_from_sint(tt, wide)
                } else {
                    builder.ins().fcvt_from_uint(tt, wide)
                }
            }
            (true, false) => {
                let wide = if to.is_signed() {
                    builder.ins().fcvt_to_sint_sat(types::I64, v)
                } else {
                    builder.ins().fcvt_to_uint_sat(types::I64, v)
                };
                if tt.bits() < 64 {
                    builder.ins().ireduce(tt, wide)
                } else {
                    wide
                }
            }
            (true, true) if tt == types::F64 => builder.ins().fpromote(types::F64, v),
            (true, true) => builder.ins().fdemote(types::F32, v),
        })
    }

    fn lower_call(
        &self,
        builder: &mut FunctionBuilder<'_>,
        env: &mut LowerEnv<'_>,
        dest: Option<ValueId>,
        target: &CallTarget,
        signature: &Type,
        args: &[ValueId],
    ) -> Result<(), LowerError> {
        let sig = signature
            .signature()
            .ok_or_else(|| LowerError::UnsupportedType(signature.to_string()))?;
        let mut arg_vals = Vec::with_capacity(args.len());
        for arg in args {
            arg_vals.push(self.use_value(builder, *arg)?);
        }

        let inst = match target {
            CallTarget::Function(id) => {
                let fref = env.module.declare_func_in_func(*id, builder.func);
                builder.ins().call(fref, &arg_vals)
            }
            CallTarget::Stub(kind) => {
                let fref = env.module.declare_func_in_func(env.stubs.func_id(*kind), builder.func);
                builder.ins().call(fref, &arg_vals)
            }
            CallTarget::Native { address, .. } => {
                let sigref = builder.import_signature(clif_signature(sig, self.call_conv, self.ptr)?);
                let callee = builder.ins().iconst(self.ptr, *address as i64);
                builder.ins().call_indirect(sigref, callee, &arg_vals)
            }
            CallTarget::Indirect(addr) => {
                let callee = self.use_value(builder, *addr)?;
                let sigref = builder.import_signature(clif_signature(sig, self.call_conv, self.ptr)?);
                builder.ins().call_indirect(sigref, callee, &arg_vals)
            }
        };

        if let Some(dest) = dest {
            let result = builder
                .inst_results(inst)
                .first()
                .copied()
                .ok_or_else(|| LowerError::CraneliftError(format!("call to {} has no result", target)))?;
            self.def_value(builder, dest, result)?;
        }
        Ok(())
    }
}

/// Every branch target must be placed somewhere in the body
fn check_labels(body: &FunctionBody) -> Result<(), LowerError> {
    let placed: FxHashSet<Label> = body
        .instrs
        .iter()
        .filter_map(|i| match i {
            Instr::Label(l) => Some(*l),
            _ => None,
        })
        .collect();
    for instr in &body.instrs {
        let target = match instr {
            Instr::Branch(l) => l,
            Instr::BranchIf { target, .. } | Instr::BranchIfNot { target, .. } => target,
            _ => continue,
        };
        if !placed.contains(target) {
            return Err(LowerError::UnplacedLabel(*target));
        }
    }
    Ok(())
}

/// Lower the application shim for `target`.
///
/// The shim reads one 64-bit slot per parameter from `args`, calls the
/// target and widens the result into `ret[0]`.
pub fn lower_apply_shim(
    mut builder: FunctionBuilder<'_>,
    env: &mut LowerEnv<'_>,
    target: FuncId,
    params: &[Type],
    ret: &Type,
) -> Result<(), LowerError> {
    let ptr = env.module.target_config().pointer_type();

    let entry = builder.create_block();
    builder.append_block_params_for_function_params(entry);
    builder.switch_to_block(entry);
    builder.seal_block(entry);

    let block_params = builder.block_params(entry).to_vec();
    let (args_ptr, ret_ptr) = (block_params[0], block_params[1]);

    let mut args = Vec::with_capacity(params.len());
    for (i, ty) in params.iter().enumerate() {
        let t = clif_type(ty, ptr).ok_or_else(|| LowerError::UnsupportedType(ty.to_string()))?;
        let raw = builder.ins().load(types::I64, MemFlags::new(), args_ptr, (i * 8) as i32);
        let v = match t {
            types::F64 => builder.ins().bitcast(types::F64, MemFlags::new(), raw),
            types::F32 => {
                let bits = builder.ins().ireduce(types::I32, raw);
                builder.ins().bitcast(types::F32, MemFlags::new(), bits)
            }
            t if t.bits() < 64 => builder.ins().ireduce(t, raw),
            _ => raw,
        };
        args.push(v);
    }

    let fref = env.module.declare_func_in_func(target, builder.func);
    let inst = builder.ins().call(fref, &args);

    if !ret.is_void() {
        let t = clif_type(ret, ptr).ok_or_else(|| LowerError::UnsupportedType(ret.to_string()))?;
        let result = builder
            .inst_results(inst)
            .first()
            .copied()
            .ok_or_else(|| LowerError::CraneliftError("shim callee has no result".to_string()))?;
        let wide = match t {
            types::F64 => builder.ins().bitcast(types::I64, MemFlags::new(), result),
            types::F32 => {
                let bits = builder.ins().bitcast(types::I32, MemFlags::new(), result);
                builder.ins().uextend(types::I64, bits)
            }
            t if t.bits() < 64 && ret.is_signed() => builder.ins().sextend(types::I64, result),
            t if t.bits() < 64 => builder.ins().uextend(types::I64, result),
            _ => result,
        };
        builder.ins().store(MemFlags::new(), wide, ret_ptr, 0);
    }

    builder.ins().return_(&[]);
    builder.finalize();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clif_types() {
        let ptr = types::I64;
        assert_eq!(clif_type(&Type::UByte, ptr), Some(types::I8));
        assert_eq!(clif_type(&Type::Int, ptr), Some(types::I32));
        assert_eq!(clif_type(&Type::NUInt, ptr), Some(ptr));
        assert_eq!(clif_type(&Type::void_ptr(), ptr), Some(ptr));
        assert_eq!(clif_type(&Type::Float32, ptr), Some(types::F32));
        assert_eq!(clif_type(&Type::Void, ptr), None);
        assert_eq!(clif_type(&Type::create_struct(vec![Type::Int]), ptr), None);
    }

    #[test]
    fn test_imm_masks_narrow_types() {
        assert_eq!(imm(-1, types::I8), 0xff);
        assert_eq!(imm(-1, types::I32), 0xffff_ffff);
        assert_eq!(imm(-1, types::I64), -1);
        assert_eq!(imm(300, types::I8), 44);
    }

    #[test]
    fn test_signature_rejects_aggregates() {
        let agg = Type::create_struct(vec![Type::Int, Type::Int]);
        let sig = Type::create_signature(vec![agg], Type::Void);
        let err = clif_signature(sig.signature().unwrap(), CallConv::SystemV, types::I64);
        assert!(matches!(err, Err(LowerError::UnsupportedType(_))));

        let ok = Type::create_signature(vec![Type::Int, Type::Float64], Type::Long);
        let sig = clif_signature(ok.signature().unwrap(), CallConv::SystemV, types::I64).unwrap();
        assert_eq!(sig.params.len(), 2);
        assert_eq!(sig.returns.len(), 1);
    }

    #[test]
    fn test_unplaced_label_detected() {
        let mut body = FunctionBody::new("f".to_string(), Type::Void);
        let l = body.reserve_label();
        body.push(Instr::Branch(l));
        assert!(matches!(check_labels(&body), Err(LowerError::UnplacedLabel(_))));
        body.push(Instr::Label(l));
        assert!(check_labels(&body).is_ok());
    }
}
