use std::env;
use std::process;

use unwind_stress::{backend, oracle, stress};

fn main() {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let mut thread_counts = stress::default_thread_counts();
    let mut index = 1;
    while index < args.len() {
        if args[index] == "--threads" && index + 1 < args.len() {
            index += 1;
            thread_counts = match stress::parse_thread_counts(&args[index]) {
                Some(counts) => counts,
                None => {
                    println!("invalid thread count list {:?}", args[index]);
                    process::exit(1);
                }
            };
        } else {
            println!("unknown option {}", args[index]);
            process::exit(1);
        }
        index += 1;
    }

    if let Err(e) = backend::init() {
        eprintln!("backend initialization failed: {}", e);
        process::exit(1);
    }
    oracle::silence_injected_panics();

    stress::sanity_check();
    stress::run_sweep(&thread_counts);
}
