//! JIT unwinding stress harness
//!
//! Repeatedly compiles a tiny call trampoline with Cranelift and drives
//! panics from a native callback through the generated frames, on many
//! threads at once. Every compiled unit is torn down and rebuilt at a fixed
//! cadence to churn the engine's symbol and unwind-table registration,
//! which is where concurrency bugs would show up.
//!
//! A correctness mismatch anywhere kills the process with status 1: the
//! tool exists to surface unwind-metadata bugs as loudly as possible, not
//! to survive them.

pub mod backend;
pub mod oracle;
pub mod rng;
pub mod stress;
