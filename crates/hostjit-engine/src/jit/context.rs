//! JIT contexts
//!
//! A context owns one Cranelift `JITModule` targeting the host ISA. Every
//! function created from it is compiled into that module, and code memory
//! is released when the last handle (context or function) is dropped.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Module};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;

use super::codegen::{host_isa, target_info, TargetInfo};
use super::function::Function;
use super::lower::clif_signature;
use super::types::Type;
use crate::bridge::entry::{EntryPointResolver, FirstWordResolver};
use crate::bridge::stubs::ContextStubs;
use crate::config::ContextConfig;
use crate::error::{JitError, JitResult};

pub(crate) struct ModuleState {
    pub module: Option<JITModule>,
    /// Functions whose code is final
    pub defined: FxHashSet<FuncId>,
}

// SAFETY: the module is only reached through the context mutex
unsafe impl Send for ModuleState {}

pub(crate) struct ContextShared {
    pub module: Mutex<ModuleState>,
    pub stubs: ContextStubs,
    pub config: ContextConfig,
    pub resolver: Arc<dyn EntryPointResolver>,
    build_lock: Mutex<()>,
    next_function: AtomicU32,
    target: TargetInfo,
}

impl Drop for ContextShared {
    fn drop(&mut self) {
        if let Some(module) = self.module.get_mut().module.take() {
            // SAFETY: every Function holds an Arc to this context, so no
            // compiled code can still be reached
            unsafe { module.free_memory() };
            tracing::debug!(target: "hostjit::jit", "context code memory released");
        }
    }
}

/// Handle to a JIT context; clones share the same module
#[derive(Clone)]
pub struct Context {
    shared: Arc<ContextShared>,
}

impl Context {
    /// Context with the default configuration
    pub fn new() -> JitResult<Self> {
        Self::with_config(ContextConfig::default())
    }

    pub fn with_config(config: ContextConfig) -> JitResult<Self> {
        Self::with_resolver(config, Arc::new(FirstWordResolver))
    }

    /// Context resolving host function entry points with `resolver`
    pub fn with_resolver(config: ContextConfig, resolver: Arc<dyn EntryPointResolver>) -> JitResult<Self> {
        hostjit_runtime::start();

        let isa = host_isa(&config)?;
        let target = target_info(&*isa);
        let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        ContextStubs::install(&mut builder);
        let mut module = JITModule::new(builder);
        let stubs = ContextStubs::declare(&mut module)?;

        tracing::debug!(
            target: "hostjit::jit",
            arch = ?target.arch,
            opt_level = config.opt_level.as_str(),
            "context created"
        );

        Ok(Context {
            shared: Arc::new(ContextShared {
                module: Mutex::new(ModuleState {
                    module: Some(module),
                    defined: FxHashSet::default(),
                }),
                stubs,
                config,
                resolver,
                build_lock: Mutex::new(()),
                next_function: AtomicU32::new(0),
                target,
            }),
        })
    }

    pub(crate) fn from_shared(shared: Arc<ContextShared>) -> Self {
        Context { shared }
    }

    /// Run `f` with construction on this context serialized.
    ///
    /// Not reentrant: calling `build` again from inside `f` deadlocks.
    pub fn build<T>(&self, f: impl FnOnce(&Context) -> JitResult<T>) -> JitResult<T> {
        let _guard = self.shared.build_lock.lock();
        f(self)
    }

    /// New function taking `params` and returning `ret`; both must be
    /// scalar or void
    pub fn create_function(&self, params: &[Type], ret: Type) -> JitResult<Function> {
        let n = self.shared.next_function.fetch_add(1, Ordering::Relaxed);
        self.create_named_function(&format!("f{}", n), params, ret)
    }

    /// Like `create_function`, with a name used in dumps and logs
    pub fn create_named_function(&self, name: &str, params: &[Type], ret: Type) -> JitResult<Function> {
        for ty in params {
            if !ty.is_scalar() {
                return Err(JitError::UnsupportedType(format!("parameter of type {}", ty)));
            }
        }
        if !ret.is_void() && !ret.is_scalar() {
            return Err(JitError::UnsupportedType(format!("return of type {}", ret)));
        }

        let signature = Type::create_signature(params.to_vec(), ret.clone());
        let func_id = {
            let mut state = self.shared.module.lock();
            let module = state
                .module
                .as_mut()
                .ok_or_else(|| JitError::Module("context module is gone".to_string()))?;
            let ptr = module.target_config().pointer_type();
            let call_conv = module.isa().default_call_conv();
            let sig = signature
                .signature()
                .ok_or_else(|| JitError::UnsupportedType(signature.to_string()))?;
            let clif_sig = clif_signature(sig, call_conv, ptr)?;
            module.declare_anonymous_function(&clif_sig)?
        };

        Ok(Function::new(
            self.shared.clone(),
            func_id,
            name.to_string(),
            params.to_vec(),
            ret,
        ))
    }

    pub fn config(&self) -> &ContextConfig {
        &self.shared.config
    }

    pub fn target_info(&self) -> TargetInfo {
        self.shared.target
    }

    /// Number of compiled functions
    pub fn compiled_count(&self) -> usize {
        self.shared.module.lock().defined.len()
    }

    /// Whether two handles share one context
    pub fn same_context(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.shared.config)
            .field("target", &self.shared.target)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_function_rejects_aggregates() {
        let ctx = Context::new().unwrap();
        let agg = Type::create_struct(vec![Type::Int, Type::Int]);
        assert!(matches!(
            ctx.create_function(&[agg.clone()], Type::Void),
            Err(JitError::UnsupportedType(_))
        ));
        assert!(matches!(
            ctx.create_function(&[], agg),
            Err(JitError::UnsupportedType(_))
        ));
    }

    #[test]
    fn test_build_bracket_returns_closure_result() {
        let ctx = Context::new().unwrap();
        let f = ctx
            .build(|ctx| ctx.create_named_function("seven", &[], Type::Int))
            .unwrap();
        assert_eq!(f.name(), "seven");
        assert!(f.context().same_context(&ctx));
    }

    #[test]
    fn test_compiled_count() {
        let ctx = Context::new().unwrap();
        assert_eq!(ctx.compiled_count(), 0);
        let mut f = ctx.create_function(&[], Type::Void).unwrap();
        f.default_return().unwrap();
        f.compile().unwrap();
        assert_eq!(ctx.compiled_count(), 1);
        assert_eq!(ctx.target_info().pointer_size, std::mem::size_of::<usize>());
    }
}
