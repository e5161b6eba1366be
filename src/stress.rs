//! Runner, orchestrator, and sweep driver
//!
//! A stress pass rebuilds its JIT unit at a fixed cadence and checks every
//! invocation against the pure oracle. The multithreaded orchestrator runs
//! one pass per thread and keeps only the slowest duration, aggregated
//! lock-free, since the slowest thread is the one that shows contention
//! cost from concurrent compilation churn.

use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::process;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Instant;

use log::info;

use crate::backend::jit::JitUnit;
use crate::oracle;
use crate::rng::XorShift64;

/// Unit rebuilds per stress pass. Every rebuild churns the engine's symbol
/// and unwind-table registration.
const UNIT_REBUILDS: u32 = 10;
/// Invocations per rebuilt unit.
const CALLS_PER_UNIT: u32 = 10_000;

/// Failure-injection rates swept by the driver, in parts per thousand.
pub const FAILURE_RATES: [u32; 4] = [0, 1, 10, 100];

/// Build a unit or die. A backend that cannot produce the trampoline is a
/// harness-level defect; there is nothing to test without it.
fn build_unit() -> JitUnit {
    match JitUnit::new() {
        Ok(unit) => unit,
        Err(e) => {
            eprintln!("trampoline compilation failed: {}", e);
            process::exit(1);
        }
    }
}

/// Run one checked invocation.
///
/// The outcome (return value or panic) must match the pure oracle applied
/// to the same input; any disagreement is reported to stderr and kills the
/// process with status 1. Miscompiled unwind metadata is not a condition
/// to recover from.
pub fn check(unit: &JitUnit, input: i32) {
    let expected = oracle::expected(input);

    match panic::catch_unwind(AssertUnwindSafe(|| unit.invoke(oracle::collatz_step, input))) {
        Ok(got) => {
            if got < 0 || got != expected {
                eprintln!(
                    "unexpected result for input {}, expected {}, got {}",
                    input, expected, got
                );
                process::exit(1);
            }
        }
        Err(payload) => match payload.downcast_ref::<i32>() {
            Some(&carried) => {
                if expected >= 0 {
                    eprintln!(
                        "unexpected result for input {}, expected {}, got exception",
                        input, expected
                    );
                    process::exit(1);
                }
                if carried != input {
                    eprintln!("exception for input {} carried {}", input, carried);
                    process::exit(1);
                }
            }
            // Not the oracle's payload: a defect in the harness itself.
            None => panic::resume_unwind(payload),
        },
    }
}

/// Fixed scenarios run once before the sweep: one even, one odd, two
/// unwinding.
pub fn sanity_check() {
    let unit = build_unit();
    for input in [2, 1, 0, -1] {
        check(&unit, input);
    }
}

/// One thread's full pass: rebuild the unit [`UNIT_REBUILDS`] times, drive
/// [`CALLS_PER_UNIT`] checked invocations through each, and return the
/// wall-clock duration in milliseconds.
pub fn stress_pass(error_rate: u32, seed: u64) -> u64 {
    let mut random = XorShift64::new(seed);

    let start = Instant::now();
    for _ in 0..UNIT_REBUILDS {
        let unit = build_unit();

        for _ in 0..CALLS_PER_UNIT {
            // Force the unwinding path with probability error_rate/1000,
            // otherwise draw a positive input in [1, 65536].
            let r = random.next();
            let input = if r % 1000 < u64::from(error_rate) {
                -1
            } else {
                ((r & 0xFFFF) + 1) as i32
            };
            check(&unit, input);
        }
    }
    start.elapsed().as_millis() as u64
}

/// Publish `duration` into the shared maximum, lock-free: read the current
/// value and retry the swap until it succeeds or the observed value is no
/// longer smaller.
fn store_max(slot: &AtomicU64, duration: u64) {
    let mut current = slot.load(Ordering::Relaxed);
    while duration > current {
        match slot.compare_exchange_weak(current, duration, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(seen) => current = seen,
        }
    }
}

/// Run one pass per thread and return the slowest duration.
///
/// Each thread owns its unit and generator for the whole pass; the thread
/// index is the seed, so runs are reproducible per thread count. A count
/// of one runs inline with seed 0.
pub fn run_threads(error_rate: u32, thread_count: u32) -> u64 {
    if thread_count <= 1 {
        return stress_pass(error_rate, 0);
    }

    let max_duration = AtomicU64::new(0);
    thread::scope(|s| {
        let workers: Vec<_> = (0..thread_count)
            .map(|index| {
                let max_duration = &max_duration;
                s.spawn(move || {
                    let duration = stress_pass(error_rate, u64::from(index));
                    store_max(max_duration, duration);
                })
            })
            .collect();

        for worker in workers {
            // A worker dying for any reason other than the exits above is
            // still fatal; nothing here is recoverable.
            if worker.join().is_err() {
                process::exit(1);
            }
        }
    });
    max_duration.load(Ordering::Relaxed)
}

/// Sweep every failure rate across every thread count and print the
/// timings as cells complete.
pub fn run_sweep(thread_counts: &[u32]) {
    info!(
        "sweeping failure rates {:?} over thread counts {:?}",
        FAILURE_RATES, thread_counts
    );

    print!("testing using");
    for count in thread_counts {
        print!(" {}", count);
    }
    println!(" threads");

    for rate in FAILURE_RATES {
        print!("failure rate {}%:", f64::from(rate) / 10.0);
        io::stdout().flush().ok();
        for &count in thread_counts {
            print!(" {}", run_threads(rate, count));
            io::stdout().flush().ok();
        }
        println!();
    }
}

/// Default sweep list: double from 1 up to the physical core count.
pub fn default_thread_counts() -> Vec<u32> {
    let max = num_cpus::get_physical().max(1) as u32;
    let mut counts = Vec::new();
    let mut next = 1;
    loop {
        counts.push(next);
        if next >= max {
            break;
        }
        next = (next * 2).min(max);
    }
    counts
}

/// Parse an explicit space-separated thread-count list. Zero counts are
/// discarded; a malformed token or an empty result is `None`.
pub fn parse_thread_counts(desc: &str) -> Option<Vec<u32>> {
    let mut counts = Vec::new();
    for token in desc.split_whitespace() {
        match token.parse::<u32>() {
            Ok(0) => {}
            Ok(count) => counts.push(count),
            Err(_) => return None,
        }
    }
    if counts.is_empty() { None } else { Some(counts) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_scenarios_hold_through_generated_code() {
        oracle::silence_injected_panics();
        let unit = build_unit();
        for input in [2, 1, 0, -1] {
            check(&unit, input);
        }
    }

    #[test]
    fn single_thread_pass_completes() {
        oracle::silence_injected_panics();
        // Scenario: no injected failures, one thread, full cadence.
        let _millis = stress_pass(0, 0);
    }

    #[test]
    fn concurrent_passes_stay_consistent() {
        oracle::silence_injected_panics();
        // Two threads with a 1% injection rate; completing without a fatal
        // exit is the pass condition.
        let _millis = run_threads(10, 2);
    }

    #[test]
    fn smaller_candidates_never_overwrite_the_maximum() {
        let slot = AtomicU64::new(50);
        store_max(&slot, 20);
        assert_eq!(slot.load(Ordering::Relaxed), 50);
        store_max(&slot, 60);
        assert_eq!(slot.load(Ordering::Relaxed), 60);
    }

    #[test]
    fn concurrent_updates_keep_the_maximum() {
        let slot = AtomicU64::new(0);
        thread::scope(|s| {
            for duration in [3, 41, 7, 29, 41, 12, 40, 5] {
                let slot = &slot;
                s.spawn(move || store_max(slot, duration));
            }
        });
        assert_eq!(slot.load(Ordering::Relaxed), 41);
    }

    #[test]
    fn explicit_thread_list_parses_in_order() {
        assert_eq!(parse_thread_counts("1 2 4"), Some(vec![1, 2, 4]));
    }

    #[test]
    fn zero_thread_counts_are_discarded() {
        assert_eq!(parse_thread_counts("0 3 0"), Some(vec![3]));
    }

    #[test]
    fn malformed_or_empty_thread_lists_are_rejected() {
        assert_eq!(parse_thread_counts("two"), None);
        assert_eq!(parse_thread_counts("2 4x"), None);
        assert_eq!(parse_thread_counts(""), None);
        assert_eq!(parse_thread_counts("0"), None);
    }

    #[test]
    fn default_thread_counts_double_up_to_the_core_count() {
        let counts = default_thread_counts();
        assert_eq!(counts[0], 1);
        for pair in counts.windows(2) {
            assert!(pair[1] > pair[0]);
            assert!(pair[1] <= pair[0] * 2);
        }
        assert_eq!(
            *counts.last().unwrap(),
            num_cpus::get_physical().max(1) as u32
        );
    }
}
