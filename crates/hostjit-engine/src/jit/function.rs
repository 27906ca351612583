//! Functions under construction
//!
//! A `Function` records instructions into a [`FunctionBody`] while it is
//! being built. `compile` lowers the body to Cranelift together with an
//! application shim, after which the function can only be run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use cranelift_codegen::ir::UserFuncName;
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_module::{FuncId, Module};

use super::apply::{decode_ret, encode_args, ApplyShim, RunValue};
use super::context::{Context, ContextShared, ModuleState};
use super::ir::{BinaryOp, CallTarget, CompareOp, FunctionBody, Instr, StubKind, UnaryOp};
use super::lower::{apply_shim_signature, clif_signature, lower_apply_shim, LowerEnv, LoweringContext};
use super::types::Type;
use super::value::{Const, Label, Value, ValueId, ValueKind};
use crate::error::{JitError, JitResult};

/// Source of owner ids; values carry the id of the function that made them
static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// Entry points of a compiled function
#[derive(Debug, Clone, Copy)]
struct CompiledCode {
    code: *const u8,
    shim: ApplyShim,
}

// SAFETY: both pointers refer to finalized code that is never written again
// and stays mapped while the owning context lives
unsafe impl Send for CompiledCode {}
unsafe impl Sync for CompiledCode {}

/// A function of a [`Context`]
pub struct Function {
    context: Arc<ContextShared>,
    func_id: FuncId,
    owner: u64,
    body: FunctionBody,
    signature: Type,
    param_types: Vec<Type>,
    params: Vec<Value>,
    compiled: Option<CompiledCode>,
    native_ir: Option<String>,
}

impl Function {
    pub(crate) fn new(
        context: Arc<ContextShared>,
        func_id: FuncId,
        name: String,
        param_types: Vec<Type>,
        ret: Type,
    ) -> Self {
        let owner = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
        let mut body = FunctionBody::new(name, ret.clone());
        let mut params = Vec::with_capacity(param_types.len());
        for (i, ty) in param_types.iter().enumerate() {
            let id = body.alloc_value(ty.clone(), ValueKind::Parameter(i));
            body.params.push(id);
            params.push(Value {
                owner,
                id,
                ty: ty.clone(),
                kind: ValueKind::Parameter(i),
            });
        }
        Function {
            context,
            func_id,
            owner,
            signature: Type::create_signature(param_types.clone(), ret),
            body,
            param_types,
            params,
            compiled: None,
            native_ir: None,
        }
    }

    // ============================================================================
    // Introspection
    // ============================================================================

    pub fn name(&self) -> &str {
        &self.body.name
    }

    /// Signature type of this function
    pub fn signature(&self) -> &Type {
        &self.signature
    }

    pub fn return_type(&self) -> &Type {
        &self.body.ret
    }

    /// Parameter `index`
    pub fn param(&self, index: usize) -> Option<Value> {
        self.params.get(index).cloned()
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    /// The context this function belongs to
    pub fn context(&self) -> Context {
        Context::from_shared(self.context.clone())
    }

    pub fn is_compiled(&self) -> bool {
        self.compiled.is_some()
    }

    /// Number of recorded instructions, label placements excluded
    pub fn instruction_count(&self) -> usize {
        self.body.instr_count()
    }

    /// Recorded IR as text
    pub fn dump(&self) -> String {
        self.body.to_string()
    }

    /// Cranelift IR of the compiled function, when the context captures it
    pub fn native_ir(&self) -> Option<&str> {
        self.native_ir.as_deref()
    }

    /// Raw code address of the compiled function
    pub fn entry_point(&self) -> JitResult<*const u8> {
        self.compiled
            .map(|c| c.code)
            .ok_or_else(|| JitError::NotCompiled(self.body.name.clone()))
    }

    /// Whether `value` lives in memory
    pub fn is_addressable(&self, value: &Value) -> JitResult<bool> {
        let id = self.check(value)?;
        Ok(self.body.value(id).addressable)
    }

    /// Force `value` into memory so its address can be taken later
    pub fn set_addressable(&mut self, value: &Value) -> JitResult<()> {
        self.ensure_building()?;
        let id = self.check(value)?;
        if value.is_constant() {
            return Err(JitError::UnsupportedType(format!("constant {} has no address", value)));
        }
        self.body.value_mut(id).addressable = true;
        Ok(())
    }

    // ============================================================================
    // Internal helpers
    // ============================================================================

    pub(crate) fn ensure_building(&self) -> JitResult<()> {
        if self.compiled.is_some() {
            return Err(JitError::AlreadyCompiled(self.body.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn shared(&self) -> &Arc<ContextShared> {
        &self.context
    }

    /// Validate that `value` was made by this function
    pub(crate) fn check(&self, value: &Value) -> JitResult<ValueId> {
        if value.owner != self.owner || value.id.0 as usize >= self.body.values.len() {
            return Err(JitError::ForeignHandle(format!("value {}", value)));
        }
        Ok(value.id)
    }

    fn check_label(&self, label: &Label) -> JitResult<Label> {
        if label.0 >= self.body.num_labels {
            return Err(JitError::ForeignHandle(format!("label {}", label)));
        }
        Ok(*label)
    }

    fn alloc(&mut self, ty: Type, kind: ValueKind) -> Value {
        let id = self.body.alloc_value(ty.clone(), kind);
        Value {
            owner: self.owner,
            id,
            ty,
            kind,
        }
    }

    fn require_scalar(value: &Value) -> JitResult<()> {
        if value.ty.is_scalar() {
            Ok(())
        } else {
            Err(JitError::UnsupportedType(format!(
                "{} of type {} is not a scalar",
                value, value.ty
            )))
        }
    }

    /// `value` as type `ty`, converting scalars
    pub(crate) fn coerce(&mut self, value: &Value, ty: &Type) -> JitResult<Value> {
        self.check(value)?;
        if &value.ty == ty {
            return Ok(value.clone());
        }
        if value.ty.is_scalar() && ty.is_scalar() {
            let dest = self.alloc(ty.clone(), ValueKind::Temporary);
            self.body.push(Instr::Convert {
                dest: dest.id,
                src: value.id,
            });
            return Ok(dest);
        }
        Err(JitError::ArgumentMismatch(format!(
            "cannot convert {} of type {} to {}",
            value, value.ty, ty
        )))
    }

    // ============================================================================
    // Values and constants
    // ============================================================================

    /// New local of type `ty`
    pub fn create_value(&mut self, ty: Type) -> JitResult<Value> {
        self.ensure_building()?;
        if ty.is_void() {
            return Err(JitError::UnsupportedType("void local".to_string()));
        }
        Ok(self.alloc(ty, ValueKind::Local))
    }

    /// Host-word integer constant
    pub fn create_int_value(&mut self, value: i64) -> JitResult<Value> {
        self.create_nint_constant(Type::NInt, value)
    }

    /// Integer constant of an integer or pointer type
    pub fn create_nint_constant(&mut self, ty: Type, value: i64) -> JitResult<Value> {
        self.ensure_building()?;
        if !ty.is_integer() {
            return Err(JitError::UnsupportedType(format!("integer constant of type {}", ty)));
        }
        Ok(self.alloc(ty, ValueKind::Constant(Const::Int(value))))
    }

    pub fn create_long_constant(&mut self, value: i64) -> JitResult<Value> {
        self.create_nint_constant(Type::Long, value)
    }

    pub fn create_float32_constant(&mut self, value: f32) -> JitResult<Value> {
        self.ensure_building()?;
        Ok(self.alloc(Type::Float32, ValueKind::Constant(Const::F32(value))))
    }

    pub fn create_float64_constant(&mut self, value: f64) -> JitResult<Value> {
        self.ensure_building()?;
        Ok(self.alloc(Type::Float64, ValueKind::Constant(Const::F64(value))))
    }

    /// `void*` constant holding a raw address
    pub fn create_ptr_constant(&mut self, address: usize) -> JitResult<Value> {
        self.create_nint_constant(Type::void_ptr(), address as i64)
    }

    // ============================================================================
    // Labels
    // ============================================================================

    pub fn reserve_label(&mut self) -> JitResult<Label> {
        self.ensure_building()?;
        Ok(self.body.reserve_label())
    }

    /// Place `label` at the current position
    pub fn label(&mut self, label: &Label) -> JitResult<()> {
        self.ensure_building()?;
        let label = self.check_label(label)?;
        if self.body.is_placed(label) {
            return Err(JitError::LabelPlaced(label.to_string()));
        }
        self.body.push(Instr::Label(label));
        Ok(())
    }

    // ============================================================================
    // Arithmetic
    // ============================================================================

    fn binary(&mut self, op: BinaryOp, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.ensure_building()?;
        self.check(lhs)?;
        self.check(rhs)?;
        Self::require_scalar(lhs)?;
        Self::require_scalar(rhs)?;

        let ty = Type::promote(&lhs.ty, &rhs.ty);
        if ty.is_float() && (op.is_bitwise() || op == BinaryOp::Rem) {
            return Err(JitError::UnsupportedType(format!("{} on {}", op.mnemonic(), ty)));
        }
        let l = self.coerce(lhs, &ty)?;
        let r = self.coerce(rhs, &ty)?;
        let dest = self.alloc(ty, ValueKind::Temporary);
        self.body.push(Instr::Binary {
            op,
            dest: dest.id,
            lhs: l.id,
            rhs: r.id,
        });
        Ok(dest)
    }

    pub fn add(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Div, lhs, rhs)
    }

    /// Integer remainder
    pub fn rem(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Rem, lhs, rhs)
    }

    pub fn and(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::And, lhs, rhs)
    }

    pub fn or(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Or, lhs, rhs)
    }

    pub fn xor(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Xor, lhs, rhs)
    }

    pub fn shl(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Shl, lhs, rhs)
    }

    /// Arithmetic for signed operands, logical for unsigned
    pub fn shr(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Shr, lhs, rhs)
    }

    pub fn ushr(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Ushr, lhs, rhs)
    }

    pub fn sshr(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Sshr, lhs, rhs)
    }

    pub fn min(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Min, lhs, rhs)
    }

    pub fn max(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.binary(BinaryOp::Max, lhs, rhs)
    }

    fn unary(&mut self, op: UnaryOp, operand: &Value) -> JitResult<Value> {
        self.ensure_building()?;
        self.check(operand)?;
        Self::require_scalar(operand)?;

        let ty = match op {
            // Integers are computed in float64
            _ if op.is_float_only() && !operand.ty.is_float() => Type::Float64,
            _ if op.is_float_only() => operand.ty.clone(),
            UnaryOp::ToBool | UnaryOp::ToNotBool => operand.ty.clone(),
            _ => Type::promote(&operand.ty, &operand.ty),
        };
        if op == UnaryOp::Not && ty.is_float() {
            return Err(JitError::UnsupportedType(format!("not on {}", ty)));
        }
        let src = self.coerce(operand, &ty)?;
        let dest_ty = match op {
            UnaryOp::ToBool | UnaryOp::ToNotBool => Type::Int,
            _ => ty,
        };
        let dest = self.alloc(dest_ty, ValueKind::Temporary);
        self.body.push(Instr::Unary {
            op,
            dest: dest.id,
            operand: src.id,
        });
        Ok(dest)
    }

    pub fn neg(&mut self, value: &Value) -> JitResult<Value> {
        self.unary(UnaryOp::Neg, value)
    }

    /// Bitwise complement
    pub fn not(&mut self, value: &Value) -> JitResult<Value> {
        self.unary(UnaryOp::Not, value)
    }

    pub fn abs(&mut self, value: &Value) -> JitResult<Value> {
        self.unary(UnaryOp::Abs, value)
    }

    pub fn sqrt(&mut self, value: &Value) -> JitResult<Value> {
        self.unary(UnaryOp::Sqrt, value)
    }

    pub fn floor(&mut self, value: &Value) -> JitResult<Value> {
        self.unary(UnaryOp::Floor, value)
    }

    pub fn ceil(&mut self, value: &Value) -> JitResult<Value> {
        self.unary(UnaryOp::Ceil, value)
    }

    pub fn trunc(&mut self, value: &Value) -> JitResult<Value> {
        self.unary(UnaryOp::Trunc, value)
    }

    /// Round to nearest, ties to even
    pub fn round(&mut self, value: &Value) -> JitResult<Value> {
        self.unary(UnaryOp::Round, value)
    }

    /// 1 if `value` is non-zero, else 0
    pub fn to_bool(&mut self, value: &Value) -> JitResult<Value> {
        self.unary(UnaryOp::ToBool, value)
    }

    /// 1 if `value` is zero, else 0
    pub fn to_not_bool(&mut self, value: &Value) -> JitResult<Value> {
        self.unary(UnaryOp::ToNotBool, value)
    }

    // ============================================================================
    // Comparisons
    // ============================================================================

    fn compare(&mut self, op: CompareOp, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.ensure_building()?;
        self.check(lhs)?;
        self.check(rhs)?;
        Self::require_scalar(lhs)?;
        Self::require_scalar(rhs)?;

        let ty = Type::promote(&lhs.ty, &rhs.ty);
        let l = self.coerce(lhs, &ty)?;
        let r = self.coerce(rhs, &ty)?;
        let dest = self.alloc(Type::Int, ValueKind::Temporary);
        self.body.push(Instr::Compare {
            op,
            dest: dest.id,
            lhs: l.id,
            rhs: r.id,
        });
        Ok(dest)
    }

    pub fn eq(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.compare(CompareOp::Eq, lhs, rhs)
    }

    pub fn ne(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.compare(CompareOp::Ne, lhs, rhs)
    }

    pub fn lt(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.compare(CompareOp::Lt, lhs, rhs)
    }

    pub fn le(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.compare(CompareOp::Le, lhs, rhs)
    }

    pub fn gt(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.compare(CompareOp::Gt, lhs, rhs)
    }

    pub fn ge(&mut self, lhs: &Value, rhs: &Value) -> JitResult<Value> {
        self.compare(CompareOp::Ge, lhs, rhs)
    }

    // ============================================================================
    // Memory and conversion
    // ============================================================================

    /// Convert a scalar to `ty`
    pub fn convert(&mut self, value: &Value, ty: &Type) -> JitResult<Value> {
        self.ensure_building()?;
        self.check(value)?;
        Self::require_scalar(value)?;
        if !ty.is_scalar() {
            return Err(JitError::UnsupportedType(format!("conversion to {}", ty)));
        }
        self.coerce(value, ty)
    }

    /// Assign `value` to `dest`
    pub fn store(&mut self, dest: &Value, value: &Value) -> JitResult<()> {
        self.ensure_building()?;
        let d = self.check(dest)?;
        self.check(value)?;
        if dest.is_constant() {
            return Err(JitError::ArgumentMismatch(format!("store to constant {}", dest)));
        }
        let src = self.coerce(value, &dest.ty)?;
        self.body.push(Instr::Copy { dest: d, src: src.id });
        Ok(())
    }

    /// Copy of `value` in a new temporary
    pub fn load(&mut self, value: &Value) -> JitResult<Value> {
        self.ensure_building()?;
        self.check(value)?;
        let dest = self.alloc(value.ty.clone(), ValueKind::Temporary);
        self.body.push(Instr::Copy {
            dest: dest.id,
            src: value.id,
        });
        Ok(dest)
    }

    fn check_base(&self, base: &Value) -> JitResult<ValueId> {
        let id = self.check(base)?;
        if !base.ty.is_integer() {
            return Err(JitError::UnsupportedType(format!(
                "{} of type {} is not an address",
                base, base.ty
            )));
        }
        Ok(id)
    }

    fn rel_offset(offset: i64) -> JitResult<i32> {
        i32::try_from(offset).map_err(|_| JitError::ArgumentMismatch(format!("offset {} out of range", offset)))
    }

    /// Load a `ty` from `base + offset`
    pub fn load_relative(&mut self, base: &Value, offset: i64, ty: &Type) -> JitResult<Value> {
        self.ensure_building()?;
        let b = self.check_base(base)?;
        let offset = Self::rel_offset(offset)?;
        if ty.is_void() {
            return Err(JitError::UnsupportedType("load of void".to_string()));
        }
        let dest = self.alloc(ty.clone(), ValueKind::Temporary);
        self.body.push(Instr::LoadRelative {
            dest: dest.id,
            base: b,
            offset,
        });
        Ok(dest)
    }

    /// Store `value` at `base + offset`
    pub fn store_relative(&mut self, base: &Value, offset: i64, value: &Value) -> JitResult<()> {
        self.ensure_building()?;
        let b = self.check_base(base)?;
        let src = self.check(value)?;
        let offset = Self::rel_offset(offset)?;
        if value.ty.is_void() {
            return Err(JitError::UnsupportedType("store of void".to_string()));
        }
        self.body.push(Instr::StoreRelative { base: b, offset, src });
        Ok(())
    }

    /// `base + offset`, with the type of `base`
    pub fn add_relative(&mut self, base: &Value, offset: i64) -> JitResult<Value> {
        self.ensure_building()?;
        let b = self.check_base(base)?;
        let offset = Self::rel_offset(offset)?;
        let dest = self.alloc(base.ty.clone(), ValueKind::Temporary);
        self.body.push(Instr::AddRelative {
            dest: dest.id,
            base: b,
            offset,
        });
        Ok(dest)
    }

    fn check_index(&self, index: &Value) -> JitResult<ValueId> {
        let id = self.check(index)?;
        if !index.ty.is_integer() {
            return Err(JitError::UnsupportedType(format!("index of type {}", index.ty)));
        }
        Ok(id)
    }

    /// Load element `index` of an array of `elem` at `base`
    pub fn load_elem(&mut self, base: &Value, index: &Value, elem: &Type) -> JitResult<Value> {
        self.ensure_building()?;
        let b = self.check_base(base)?;
        let i = self.check_index(index)?;
        if elem.is_void() {
            return Err(JitError::UnsupportedType("element of type void".to_string()));
        }
        let dest = self.alloc(elem.clone(), ValueKind::Temporary);
        self.body.push(Instr::LoadElem {
            dest: dest.id,
            base: b,
            index: i,
            elem: elem.clone(),
        });
        Ok(dest)
    }

    /// Address of element `index` of an array of `elem` at `base`
    pub fn load_elem_address(&mut self, base: &Value, index: &Value, elem: &Type) -> JitResult<Value> {
        self.ensure_building()?;
        let b = self.check_base(base)?;
        let i = self.check_index(index)?;
        let dest = self.alloc(Type::create_pointer(elem.clone()), ValueKind::Temporary);
        self.body.push(Instr::LoadElemAddress {
            dest: dest.id,
            base: b,
            index: i,
            elem: elem.clone(),
        });
        Ok(dest)
    }

    /// Store `value` as element `index` of an array of its type at `base`
    pub fn store_elem(&mut self, base: &Value, index: &Value, value: &Value) -> JitResult<()> {
        self.ensure_building()?;
        let b = self.check_base(base)?;
        let i = self.check_index(index)?;
        let src = self.check(value)?;
        if value.ty.is_void() {
            return Err(JitError::UnsupportedType("store of void".to_string()));
        }
        self.body.push(Instr::StoreElem { base: b, index: i, src });
        Ok(())
    }

    /// Address of `value`, which from now on lives in memory
    pub fn address_of(&mut self, value: &Value) -> JitResult<Value> {
        self.ensure_building()?;
        let src = self.check(value)?;
        if value.is_constant() {
            return Err(JitError::UnsupportedType(format!("constant {} has no address", value)));
        }
        self.body.value_mut(src).addressable = true;
        let dest = self.alloc(Type::create_pointer(value.ty.clone()), ValueKind::Temporary);
        self.body.push(Instr::AddressOf { dest: dest.id, src });
        Ok(dest)
    }

    // ============================================================================
    // Control flow
    // ============================================================================

    pub fn branch(&mut self, label: &Label) -> JitResult<()> {
        self.ensure_building()?;
        let label = self.check_label(label)?;
        self.body.push(Instr::Branch(label));
        Ok(())
    }

    fn condition(&mut self, cond: &Value) -> JitResult<ValueId> {
        self.check(cond)?;
        Self::require_scalar(cond)?;
        if cond.ty.is_float() {
            return Ok(self.to_bool(cond)?.id);
        }
        Ok(cond.id)
    }

    /// Branch to `label` if `cond` is non-zero
    pub fn branch_if(&mut self, cond: &Value, label: &Label) -> JitResult<()> {
        self.ensure_building()?;
        let target = self.check_label(label)?;
        let cond = self.condition(cond)?;
        self.body.push(Instr::BranchIf { cond, target });
        Ok(())
    }

    /// Branch to `label` if `cond` is zero
    pub fn branch_if_not(&mut self, cond: &Value, label: &Label) -> JitResult<()> {
        self.ensure_building()?;
        let target = self.check_label(label)?;
        let cond = self.condition(cond)?;
        self.body.push(Instr::BranchIfNot { cond, target });
        Ok(())
    }

    /// Return `value`, converted to the return type
    pub fn ret(&mut self, value: Option<&Value>) -> JitResult<()> {
        self.ensure_building()?;
        let ret = self.body.ret.clone();
        let value = match value {
            None => None,
            Some(_) if ret.is_void() => {
                return Err(JitError::ArgumentMismatch(format!(
                    "{} returns void",
                    self.body.name
                )))
            }
            Some(v) => Some(self.coerce(v, &ret)?.id),
        };
        self.body.push(Instr::Return(value));
        Ok(())
    }

    /// Return the zero value of the return type
    pub fn default_return(&mut self) -> JitResult<()> {
        self.ret(None)
    }

    // ============================================================================
    // Calls
    // ============================================================================

    fn emit_call(&mut self, target: CallTarget, signature: &Type, args: &[Value]) -> JitResult<Option<Value>> {
        let sig = signature
            .signature()
            .ok_or_else(|| JitError::UnsupportedType(format!("{} is not a signature", signature)))?;
        if sig.params().len() != args.len() {
            return Err(JitError::ArgumentMismatch(format!(
                "{} takes {} arguments, got {}",
                target,
                sig.params().len(),
                args.len()
            )));
        }
        let params = sig.params().to_vec();
        let ret = sig.ret().clone();

        let mut arg_ids = Vec::with_capacity(args.len());
        for (arg, ty) in args.iter().zip(&params) {
            if !ty.is_scalar() {
                return Err(JitError::UnsupportedType(format!("parameter of type {}", ty)));
            }
            arg_ids.push(self.coerce(arg, ty)?.id);
        }

        let dest = if ret.is_void() {
            None
        } else if ret.is_scalar() {
            Some(self.alloc(ret, ValueKind::Temporary))
        } else {
            return Err(JitError::UnsupportedType(format!("return of type {}", ret)));
        };
        self.body.push(Instr::Call {
            dest: dest.as_ref().map(|d| d.id),
            target,
            signature: signature.clone(),
            args: arg_ids,
        });
        Ok(dest)
    }

    /// Call another function of the same context
    pub fn call(&mut self, callee: &Function, args: &[Value]) -> JitResult<Option<Value>> {
        self.ensure_building()?;
        if !Arc::ptr_eq(&self.context, &callee.context) {
            return Err(JitError::ForeignHandle(format!("function '{}'", callee.name())));
        }
        let signature = callee.signature.clone();
        self.emit_call(CallTarget::Function(callee.func_id), &signature, args)
    }

    /// Call this function recursively
    pub fn call_self(&mut self, args: &[Value]) -> JitResult<Option<Value>> {
        self.ensure_building()?;
        let signature = self.signature.clone();
        self.emit_call(CallTarget::Function(self.func_id), &signature, args)
    }

    /// Call native code at a fixed address
    pub fn call_native(
        &mut self,
        name: &str,
        address: usize,
        signature: &Type,
        args: &[Value],
    ) -> JitResult<Option<Value>> {
        self.ensure_building()?;
        self.emit_call(
            CallTarget::Native {
                name: name.to_string(),
                address,
            },
            signature,
            args,
        )
    }

    /// Call the native code whose address `address` holds
    pub fn call_indirect(&mut self, address: &Value, signature: &Type, args: &[Value]) -> JitResult<Option<Value>> {
        self.ensure_building()?;
        self.check(address)?;
        Self::require_scalar(address)?;
        let addr = self.coerce(address, &Type::void_ptr())?;
        self.emit_call(CallTarget::Indirect(addr.id), signature, args)
    }

    /// Call one of the context's runtime stubs
    pub(crate) fn call_stub(&mut self, kind: StubKind, args: &[Value]) -> JitResult<Option<Value>> {
        self.ensure_building()?;
        let signature = self.context.stubs.signature(kind).clone();
        self.emit_call(CallTarget::Stub(kind), &signature, args)
    }

    // ============================================================================
    // Compilation and application
    // ============================================================================

    /// Lower, define and finalize this function and its application shim
    pub fn compile(&mut self) -> JitResult<()> {
        self.ensure_building()?;

        let mut state = self.context.module.lock();
        let ModuleState { module, defined } = &mut *state;
        let module = module
            .as_mut()
            .ok_or_else(|| JitError::Module("context module is gone".to_string()))?;

        for instr in &self.body.instrs {
            if let Instr::Call {
                target: CallTarget::Function(id),
                ..
            } = instr
            {
                if *id != self.func_id && !defined.contains(id) {
                    return Err(JitError::UncompiledCallee(format!("fn{}", id.as_u32())));
                }
            }
        }

        let ptr = module.target_config().pointer_type();
        let call_conv = module.isa().default_call_conv();
        let sig = self
            .signature
            .signature()
            .ok_or_else(|| JitError::UnsupportedType(self.signature.to_string()))?;

        let mut ctx = module.make_context();
        let mut fb_ctx = FunctionBuilderContext::new();
        ctx.func.signature = clif_signature(sig, call_conv, ptr)?;
        ctx.func.name = UserFuncName::user(0, self.func_id.as_u32());
        {
            let builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
            let mut env = LowerEnv {
                module: &mut *module,
                stubs: &self.context.stubs,
            };
            LoweringContext::lower(&self.body, builder, &mut env)?;
        }

        tracing::trace!(target: "hostjit::jit", function = %self.body.name, "lowered:\n{}", ctx.func.display());
        let native_ir = self.context.config.capture_native_ir.then(|| ctx.func.display().to_string());

        module.define_function(self.func_id, &mut ctx)?;
        module.clear_context(&mut ctx);

        let shim_sig = apply_shim_signature(call_conv, ptr);
        let shim_id = module.declare_anonymous_function(&shim_sig)?;
        ctx.func.signature = shim_sig;
        ctx.func.name = UserFuncName::user(1, shim_id.as_u32());
        {
            let builder = FunctionBuilder::new(&mut ctx.func, &mut fb_ctx);
            let mut env = LowerEnv {
                module: &mut *module,
                stubs: &self.context.stubs,
            };
            lower_apply_shim(builder, &mut env, self.func_id, sig.params(), sig.ret())?;
        }
        module.define_function(shim_id, &mut ctx)?;
        module.clear_context(&mut ctx);

        module.finalize_definitions()?;
        let code = module.get_finalized_function(self.func_id);
        let shim_ptr = module.get_finalized_function(shim_id);
        defined.insert(self.func_id);
        drop(state);

        // SAFETY: the shim was just defined with the ApplyShim signature
        let shim = unsafe { std::mem::transmute::<*const u8, ApplyShim>(shim_ptr) };
        self.compiled = Some(CompiledCode { code, shim });
        self.native_ir = native_ir;

        tracing::debug!(
            target: "hostjit::jit",
            function = %self.body.name,
            instructions = self.body.instr_count(),
            "compiled"
        );
        Ok(())
    }

    /// Run the compiled function
    pub fn run(&self, args: &[RunValue]) -> JitResult<RunValue> {
        let compiled = self
            .compiled
            .ok_or_else(|| JitError::NotCompiled(self.body.name.clone()))?;
        let slots = encode_args(&self.param_types, args)?;
        let mut ret = 0u64;

        // Inside a host function the pending fault belongs to the enclosing
        // run and is handed back afterwards. At top level it is stale.
        let pending = hostjit_runtime::take_fault();
        let outer = pending.filter(|_| hostjit_runtime::reentry_depth() > 0);
        // SAFETY: the shim reads one slot per parameter and writes one result
        unsafe { (compiled.shim)(slots.as_ptr(), &mut ret) };
        let fault = hostjit_runtime::take_fault();
        if let Some(outer) = outer {
            hostjit_runtime::restore_fault(outer);
        }
        match fault {
            Some(fault) => Err(fault.into()),
            None => Ok(decode_ret(&self.body.ret, ret)),
        }
    }
}

impl std::fmt::Debug for Function {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.body.name)
            .field("signature", &self.signature.to_string())
            .field("compiled", &self.is_compiled())
            .finish()
    }
}
