//! One owned JIT compilation session
//!
//! A `JitUnit` is the harness's unit of churn: construct it and a fresh
//! code generation session compiles the trampoline and resolves its entry
//! point; drop it and the session's code memory and unwind tables are
//! released. Units are exclusively owned, one per thread, and many may be
//! live at once.

use std::mem;

use log::debug;

use super::BackendError;
use super::cranelift::{TRAMPOLINE_SYMBOL, TrampolineCodegen};

/// Callback signature the generated code dispatches to.
///
/// `"C-unwind"` lets a panic raised inside the callback unwind back out
/// through the generated frame instead of aborting at the ABI boundary.
pub type Callback = extern "C-unwind" fn(i32) -> i32;

/// Signature of the generated entry point.
type Entry = extern "C-unwind" fn(Callback, i32) -> i32;

/// An isolated, on-demand compiled trampoline together with the session
/// that owns its code memory
pub struct JitUnit {
    /// Owns the code memory; `None` only transiently during drop
    codegen: Option<TrampolineCodegen>,
    entry: Entry,
}

impl JitUnit {
    /// Run a full compilation session and resolve the entry point by name.
    pub fn new() -> Result<Self, BackendError> {
        let mut codegen = TrampolineCodegen::new()?;
        codegen.compile()?;

        let ptr = codegen.get_func(TRAMPOLINE_SYMBOL).ok_or_else(|| {
            BackendError::Resolve(format!(
                "symbol {} missing after compilation",
                TRAMPOLINE_SYMBOL
            ))
        })?;
        debug!("compiled {} at {:p}", TRAMPOLINE_SYMBOL, ptr);

        // Safety: the symbol was defined with exactly this signature, and
        // the code memory outlives the pointer (freed only in drop).
        let entry: Entry = unsafe { mem::transmute(ptr) };

        Ok(Self {
            codegen: Some(codegen),
            entry,
        })
    }

    /// Call the generated code with `callback` and `v`.
    ///
    /// A panic raised by the callback propagates through the generated
    /// frame to the caller; the unit itself never catches it.
    pub fn invoke(&self, callback: Callback, v: i32) -> i32 {
        (self.entry)(callback, v)
    }
}

impl Drop for JitUnit {
    fn drop(&mut self) {
        if let Some(codegen) = self.codegen.take() {
            debug!("releasing {} session", TRAMPOLINE_SYMBOL);
            // Safety: `entry` is never called again once the unit is gone.
            unsafe { codegen.free_memory() };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle;
    use std::panic::{self, AssertUnwindSafe};

    extern "C-unwind" fn double_it(v: i32) -> i32 {
        v * 2
    }

    extern "C-unwind" fn panic_with_input(v: i32) -> i32 {
        panic::panic_any(v)
    }

    #[test]
    fn invoke_forwards_argument_and_result() {
        let unit = JitUnit::new().unwrap();
        assert_eq!(unit.invoke(double_it, 21), 42);
        assert_eq!(unit.invoke(double_it, -3), -6);
    }

    #[test]
    fn rebuilding_units_reproduces_outcomes() {
        for _ in 0..5 {
            let unit = JitUnit::new().unwrap();
            assert_eq!(unit.invoke(double_it, 8), 16);
        }
    }

    #[test]
    fn independent_units_coexist_and_tear_down_separately() {
        let first = JitUnit::new().unwrap();
        let second = JitUnit::new().unwrap();

        assert_eq!(first.invoke(double_it, 1), 2);
        assert_eq!(second.invoke(double_it, 2), 4);

        // Dropping one session must not invalidate the other.
        drop(first);
        assert_eq!(second.invoke(double_it, 3), 6);
    }

    #[test]
    fn panic_crosses_the_generated_frame() {
        oracle::silence_injected_panics();

        let unit = JitUnit::new().unwrap();
        let caught = panic::catch_unwind(AssertUnwindSafe(|| unit.invoke(panic_with_input, 7)));

        let payload = caught.expect_err("callback panic should unwind out of the generated code");
        assert_eq!(payload.downcast_ref::<i32>(), Some(&7));

        // The unit stays usable after an unwind passed through its frame.
        assert_eq!(unit.invoke(double_it, 5), 10);
    }
}
