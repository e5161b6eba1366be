//! Cranelift code generation for the call trampoline
//!
//! Builds and compiles the one fixed function shape the harness exercises,
//! the equivalent of
//!
//! ```c
//! int trampoline(int (*callback)(int), int v) { return callback(v); }
//! ```
//!
//! Each `TrampolineCodegen` is one isolated `JITModule` session. Sessions
//! on different threads share no mutable state beyond what Cranelift
//! synchronizes internally, so they can be created and torn down
//! concurrently.

use std::collections::HashMap;

use cranelift::prelude::*;
use cranelift_codegen::settings;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};

use super::BackendError;

/// Exported name of the generated function.
pub const TRAMPOLINE_SYMBOL: &str = "trampoline";

/// One code generation session
pub struct TrampolineCodegen {
    /// The JIT module being built; owns the code memory
    module: JITModule,
    /// Codegen context (reused across definitions)
    ctx: codegen::Context,
    /// Function builder context (reused)
    builder_ctx: FunctionBuilderContext,
    /// Compiled function pointers by symbol name
    compiled_funcs: HashMap<String, *const u8>,
}

impl TrampolineCodegen {
    /// Create a new session on the host ISA
    pub fn new() -> Result<Self, BackendError> {
        let mut flag_builder = settings::builder();
        flag_builder.set("use_colocated_libcalls", "true").unwrap();
        flag_builder.set("is_pic", "false").unwrap();
        // A panic in the callback can only cross frames that carry unwind
        // tables; both flags must stay on.
        flag_builder.set("unwind_info", "true").unwrap();
        flag_builder.set("preserve_frame_pointers", "true").unwrap();

        let isa_builder = cranelift_native::builder()
            .map_err(|e| BackendError::Cranelift(format!("Failed to create ISA builder: {}", e)))?;

        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| BackendError::Cranelift(format!("Failed to create ISA: {}", e)))?;

        let builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let module = JITModule::new(builder);
        let ctx = module.make_context();

        Ok(Self {
            module,
            ctx,
            builder_ctx: FunctionBuilderContext::new(),
            compiled_funcs: HashMap::new(),
        })
    }

    /// Compile the trampoline and record its entry point.
    ///
    /// Finalizing the definitions maps the code executable and registers
    /// its unwind metadata with the runtime.
    pub fn compile(&mut self) -> Result<(), BackendError> {
        let pointer = self.module.target_config().pointer_type();

        // int callback(int)
        let mut callback_sig = self.module.make_signature();
        callback_sig.params.push(AbiParam::new(types::I32));
        callback_sig.returns.push(AbiParam::new(types::I32));

        // int trampoline(callback*, int)
        let mut sig = self.module.make_signature();
        sig.params.push(AbiParam::new(pointer));
        sig.params.push(AbiParam::new(types::I32));
        sig.returns.push(AbiParam::new(types::I32));

        let func_id = self
            .module
            .declare_function(TRAMPOLINE_SYMBOL, Linkage::Export, &sig)
            .map_err(|e| {
                BackendError::Module(format!("Failed to declare {}: {}", TRAMPOLINE_SYMBOL, e))
            })?;

        self.ctx.clear();
        self.ctx.func.signature = sig;

        {
            let mut builder = FunctionBuilder::new(&mut self.ctx.func, &mut self.builder_ctx);
            let callback_sig_ref = builder.import_signature(callback_sig);

            let block = builder.create_block();
            builder.append_block_params_for_function_params(block);
            builder.switch_to_block(block);
            builder.seal_block(block);

            let callback = builder.block_params(block)[0];
            let v = builder.block_params(block)[1];
            let call = builder.ins().call_indirect(callback_sig_ref, callback, &[v]);
            let result = builder.inst_results(call)[0];
            builder.ins().return_(&[result]);
            builder.finalize();
        }

        self.module.define_function(func_id, &mut self.ctx).map_err(|e| {
            BackendError::Module(format!("Failed to define {}: {}", TRAMPOLINE_SYMBOL, e))
        })?;
        self.module.clear_context(&mut self.ctx);

        self.module
            .finalize_definitions()
            .map_err(|e| BackendError::Module(format!("Failed to finalize definitions: {}", e)))?;

        let ptr = self.module.get_finalized_function(func_id);
        self.compiled_funcs.insert(TRAMPOLINE_SYMBOL.to_string(), ptr);

        Ok(())
    }

    /// Get a compiled function by name
    pub fn get_func(&self, name: &str) -> Option<*const u8> {
        self.compiled_funcs.get(name).copied()
    }

    /// Release the session's code memory and deregister its unwind tables.
    ///
    /// # Safety
    /// Every function pointer resolved from this session dangles afterwards
    /// and must never be called again.
    pub unsafe fn free_memory(self) {
        unsafe { self.module.free_memory() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_compiles_and_resolves_the_trampoline() {
        let mut codegen = TrampolineCodegen::new().unwrap();
        codegen.compile().unwrap();

        let ptr = codegen.get_func(TRAMPOLINE_SYMBOL);
        assert!(ptr.is_some());
        assert!(!ptr.unwrap().is_null());
    }

    #[test]
    fn unknown_symbols_stay_unresolved() {
        let mut codegen = TrampolineCodegen::new().unwrap();
        codegen.compile().unwrap();

        assert!(codegen.get_func("no_such_symbol").is_none());
    }
}
