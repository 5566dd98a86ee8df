//! Paging simulator - Main Entry Point
//!
//! Usage: vm-paging-sim [OPTIONS] <workload> [output]
//!
//! Arguments:
//!   workload - Machine settings and per-process operation scripts
//!   output   - File to write per-process results (stdout when omitted)
//!
//! Options:
//!   -v, --verbose  Print a run summary with TLB statistics
//!   -t, --tlb      Route every operation through the TLB
//!
//! Set `LOG=DEBUG` (or `TRACE`) for allocator and fault tracing.

use std::process;
use std::sync::Arc;
use std::thread;

use clap::{App, Arg};
use log::info;

use vm_paging_sim::Pid;
use vm_paging_sim::io::{format_results, write_results, Workload};
use vm_paging_sim::logger;
use vm_paging_sim::mmu::{MemoryContext, MemorySystem};

/// Command-line configuration
struct Config {
    workload: String,
    output: Option<String>,
    verbose: bool,
    use_tlb: bool,
}

fn main() {
    let config = parse_args();

    if let Err(e) = logger::init(config.verbose) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(&config) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn parse_args() -> Config {
    let matches = App::new("vm-paging-sim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Simulates demand-paged memory with FIFO replacement, swap and a TLB")
        .arg(
            Arg::with_name("workload")
                .help("Workload file with machine settings and process scripts")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .help("Output file for per-process results")
                .index(2),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Print a run summary"),
        )
        .arg(
            Arg::with_name("tlb")
                .short("t")
                .long("tlb")
                .help("Use the TLB-backed operations"),
        )
        .get_matches();

    Config {
        workload: matches.value_of("workload").unwrap_or_default().to_string(),
        output: matches.value_of("output").map(str::to_string),
        verbose: matches.is_present("verbose"),
        use_tlb: matches.is_present("tlb"),
    }
}

fn run(config: &Config) -> Result<(), String> {
    // Step 1: Parse the workload
    let workload = Workload::from_file(&config.workload)?;
    info!(
        "workload {}: {} processes, TLB {}",
        config.workload,
        workload.processes.len(),
        if config.use_tlb { "on" } else { "off" }
    );

    // Step 2: Build the shared machine
    let system = Arc::new(MemorySystem::new(workload.config.clone()).map_err(|e| e.to_string())?);

    // Step 3: One thread per process
    let results = run_processes(&workload, &system, config.use_tlb)?;

    if config.verbose {
        print_summary(&system, &results);
    }
    if log::log_enabled!(log::Level::Trace) {
        system.ram().dump();
        system.tlb().dump();
    }

    // Step 4: Write results
    match &config.output {
        Some(path) => write_results(path, &results)?,
        None => print!("{}", format_results(&results)),
    }
    Ok(())
}

fn run_processes(
    workload: &Workload,
    system: &Arc<MemorySystem>,
    use_tlb: bool,
) -> Result<Vec<(Pid, Vec<i32>)>, String> {
    thread::scope(|s| {
        let handles = workload
            .processes
            .iter()
            .map(|script| {
                let system = Arc::clone(system);
                thread::Builder::new()
                    .name(format!("pid{}", script.pid))
                    .spawn_scoped(s, move || {
                        let ctx = MemoryContext::new(script.pid, system);
                        let values = script.run(&ctx, use_tlb);
                        ctx.exit();
                        (script.pid, values)
                    })
                    .map_err(|e| format!("Failed to spawn process {}: {}", script.pid, e))
            })
            .collect::<Result<Vec<_>, String>>()?;

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| "Process thread panicked".to_string()))
            .collect()
    })
}

fn print_summary(system: &MemorySystem, results: &[(Pid, Vec<i32>)]) {
    let ops: usize = results.iter().map(|(_, v)| v.len()).sum();
    let failures = results.iter().flat_map(|(_, v)| v).filter(|&&v| v < 0).count();
    let stats = system.tlb().stats();
    let lookups = stats.hits + stats.misses;

    eprintln!();
    eprintln!("=== Summary ===");
    eprintln!("Processes:        {}", results.len());
    eprintln!("Operations:       {}", ops);
    eprintln!("Failed:           {}", failures);
    eprintln!("RAM frames free:  {}/{}", system.ram().free_count(), system.ram().frame_count());
    for swap in system.swaps() {
        let label = format!("{} frames free:", swap.kind());
        eprintln!("{:<18}{}/{}", label, swap.free_count(), swap.frame_count());
    }
    if lookups > 0 {
        eprintln!(
            "TLB hits/misses:  {}/{} ({:.1}% hit rate)",
            stats.hits,
            stats.misses,
            stats.hits as f64 * 100.0 / lookups as f64
        );
    }
    eprintln!();
}
