//! Native code backend for the stress harness
//!
//! This module wraps the Cranelift JIT behind a narrow contract: describe
//! the one fixed function shape, compile it, resolve the symbol, tear the
//! session down. Everything else about code generation stays inside
//! Cranelift.
//!
//! Architecture:
//! - `cranelift.rs` - ISA setup and the trampoline codegen session
//! - `jit.rs` - one owned compilation session with a typed entry point

pub mod cranelift;
pub mod jit;

use std::sync::Once;

/// Errors that can occur while producing the compiled trampoline
#[derive(Debug)]
pub enum BackendError {
    /// Cranelift ISA or builder error
    Cranelift(String),
    /// Module declare/define/finalize error
    Module(String),
    /// A compiled symbol could not be resolved
    Resolve(String),
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Cranelift(msg) => write!(f, "Cranelift error: {}", msg),
            BackendError::Module(msg) => write!(f, "Module error: {}", msg),
            BackendError::Resolve(msg) => write!(f, "Symbol resolution error: {}", msg),
        }
    }
}

impl std::error::Error for BackendError {}

static INIT: Once = Once::new();

/// One-time native-backend startup.
///
/// Probes host ISA support once, before any [`jit::JitUnit`] exists. The
/// entry point calls this exactly once before spawning any orchestration;
/// later calls are no-ops.
pub fn init() -> Result<(), BackendError> {
    let mut probe = Ok(());
    INIT.call_once(|| {
        probe = cranelift_native::builder()
            .map(|_| ())
            .map_err(|msg| BackendError::Cranelift(format!("host target not supported: {}", msg)));
    });
    probe
}
