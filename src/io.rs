//! Workload files and result output for the simulator binary.
//!
//! A workload holds optional machine settings followed by one script per
//! process:
//!
//! ```text
//! # settings
//! ram 0x10000
//! swap 0x100000
//! evict on
//!
//! proc 1
//! alloc 300 0
//! write 0 20 100
//! read 0 20
//! free 0
//! ```

use std::fs;
use std::path::Path;

use crate::Pid;
use crate::config::MmConfig;
use crate::constants::INVALID_VALUE;
use crate::mmu::MemoryContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Alloc { size: usize, region: usize },
    Free { region: usize },
    Write { region: usize, offset: usize, value: u8 },
    Read { region: usize, offset: usize },
}

impl Op {
    /// Run against `ctx`; the address for alloc, the byte for read, 0 otherwise
    pub fn apply(&self, ctx: &MemoryContext, use_tlb: bool) -> crate::error::Result<i32> {
        match (*self, use_tlb) {
            (Op::Alloc { size, region }, false) => ctx.allocate(size, region).map(|a| a as i32),
            (Op::Alloc { size, region }, true) => ctx.tlb_allocate(size, region).map(|a| a as i32),
            (Op::Free { region }, false) => ctx.free(region).map(|_| 0),
            (Op::Free { region }, true) => ctx.tlb_free(region).map(|_| 0),
            (Op::Write { region, offset, value }, false) => {
                ctx.write_region(region, offset, value).map(|_| 0)
            }
            (Op::Write { region, offset, value }, true) => {
                ctx.tlb_write(region, offset, value).map(|_| 0)
            }
            (Op::Read { region, offset }, false) => ctx.read_region(region, offset).map(i32::from),
            (Op::Read { region, offset }, true) => ctx.tlb_read(region, offset).map(i32::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessScript {
    pub pid: Pid,
    pub ops: Vec<Op>,
}

impl ProcessScript {
    /// One result per op, `-1` where the op failed
    pub fn run(&self, ctx: &MemoryContext, use_tlb: bool) -> Vec<i32> {
        self.ops
            .iter()
            .map(|op| op.apply(ctx, use_tlb).unwrap_or(INVALID_VALUE))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Workload {
    pub config: MmConfig,
    pub processes: Vec<ProcessScript>,
}

impl Workload {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let content = fs::read_to_string(path.as_ref())
            .map_err(|e| format!("Failed to read workload file: {}", e))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, String> {
        let mut workload = Workload::default();

        for (idx, raw) in content.lines().enumerate() {
            let lineno = idx + 1;
            let line = raw.split('#').next().unwrap_or("").trim();
            let tokens: Vec<&str> = line.split_whitespace().collect();
            let Some((&keyword, args)) = tokens.split_first() else {
                continue;
            };

            if keyword == "proc" {
                let pid: Pid = parse_arg(args, 0, "pid", lineno)?;
                if workload.processes.iter().any(|p| p.pid == pid) {
                    return Err(format!("Line {}: duplicate process {}", lineno, pid));
                }
                workload.processes.push(ProcessScript { pid, ops: Vec::new() });
                continue;
            }

            match workload.processes.last_mut() {
                None => workload
                    .config
                    .set(keyword, args)
                    .map_err(|e| format!("Line {}: {}", lineno, e))?,
                Some(script) => script.ops.push(Self::parse_op(keyword, args, lineno)?),
            }
        }

        workload
            .config
            .validate()
            .map_err(|e| format!("Invalid machine settings: {}", e))?;
        Ok(workload)
    }

    fn parse_op(keyword: &str, args: &[&str], lineno: usize) -> Result<Op, String> {
        let expected = match keyword {
            "alloc" | "read" => 2,
            "free" => 1,
            "write" => 3,
            _ => return Err(format!("Line {}: unknown operation '{}'", lineno, keyword)),
        };
        if args.len() != expected {
            return Err(format!(
                "Line {}: '{}' takes {} arguments, got {}",
                lineno,
                keyword,
                expected,
                args.len()
            ));
        }
        let op = match keyword {
            "alloc" => Op::Alloc {
                size: parse_arg(args, 0, "size", lineno)?,
                region: parse_arg(args, 1, "region", lineno)?,
            },
            "free" => Op::Free { region: parse_arg(args, 0, "region", lineno)? },
            "write" => Op::Write {
                region: parse_arg(args, 0, "region", lineno)?,
                offset: parse_arg(args, 1, "offset", lineno)?,
                value: parse_arg(args, 2, "value", lineno)?,
            },
            _ => Op::Read {
                region: parse_arg(args, 0, "region", lineno)?,
                offset: parse_arg(args, 1, "offset", lineno)?,
            },
        };
        Ok(op)
    }
}

fn parse_arg<T: std::str::FromStr>(
    args: &[&str],
    idx: usize,
    what: &str,
    lineno: usize,
) -> Result<T, String> {
    let token = args
        .get(idx)
        .ok_or_else(|| format!("Line {}: missing {}", lineno, what))?;
    token
        .parse()
        .map_err(|_| format!("Line {}: invalid {}: {}", lineno, what, token))
}

/// One line per process: `pid: r0 r1 ...`
pub fn format_results(results: &[(Pid, Vec<i32>)]) -> String {
    results
        .iter()
        .map(|(pid, values)| {
            let values: Vec<String> = values.iter().map(|v| v.to_string()).collect();
            format!("{}: {}\n", pid, values.join(" "))
        })
        .collect()
}

pub fn write_results<P: AsRef<Path>>(path: P, results: &[(Pid, Vec<i32>)]) -> Result<(), String> {
    fs::write(path.as_ref(), format_results(results))
        .map_err(|e| format!("Failed to write output file: {}", e))
}
