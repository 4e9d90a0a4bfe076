//! Syscall selection for -e trace= expressions
//!
//! Supports strace-compatible selections:
//! - Individual syscalls: -e trace=open,read,write
//! - Syscall classes: -e trace=file, -e trace=network, -e trace=process
//! - Everything: -e trace=all
//!
//! The agent registers one callback per selected syscall number.

use anyhow::{bail, Result};
use std::collections::BTreeSet;

use crate::syscalls;

const FILE_CLASS: &[&str] = &[
    "open", "openat", "close", "read", "write", "lseek", "stat", "fstat", "newfstatat", "access",
    "mkdir", "rmdir", "unlink",
];

const NETWORK_CLASS: &[&str] = &[
    "socket", "connect", "accept", "bind", "listen", "sendto", "recvfrom", "sendmsg", "recvmsg",
    "setsockopt", "getsockopt",
];

const PROCESS_CLASS: &[&str] = &[
    "fork", "vfork", "clone", "execve", "exit", "exit_group", "wait4", "kill",
];

const MEMORY_CLASS: &[&str] = &["mmap", "munmap", "mprotect", "mremap", "brk"];

/// Set of syscalls selected for callbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyscallFilter {
    /// Selected syscall names (None = all syscalls)
    include: Option<BTreeSet<String>>,
}

impl Default for SyscallFilter {
    /// The agent's historical default: watch `read`
    fn default() -> Self {
        Self {
            include: Some(BTreeSet::from(["read".to_string()])),
        }
    }
}

impl SyscallFilter {
    /// Create a filter that includes all syscalls
    pub fn all() -> Self {
        Self { include: None }
    }

    /// Parse a filter expression like "trace=open,read,write" or "trace=file"
    pub fn from_expr(expr: &str) -> Result<Self> {
        if let Some(trace_spec) = expr.strip_prefix("trace=") {
            Self::from_trace_spec(trace_spec)
        } else {
            bail!(
                "Invalid filter expression: {}. Expected format: trace=SPEC",
                expr
            );
        }
    }

    /// Parse a trace specification (the part after "trace=")
    fn from_trace_spec(spec: &str) -> Result<Self> {
        let mut names = BTreeSet::new();

        for part in spec.split(',').map(str::trim).filter(|part| !part.is_empty()) {
            let class = match part {
                "all" => return Ok(Self::all()),
                "file" => FILE_CLASS,
                "network" => NETWORK_CLASS,
                "process" => PROCESS_CLASS,
                "memory" => MEMORY_CLASS,
                name => {
                    if syscalls::syscall_number(name).is_none() {
                        bail!("Unknown syscall in filter: {}", name);
                    }
                    names.insert(name.to_string());
                    continue;
                }
            };
            names.extend(class.iter().map(|name| name.to_string()));
        }

        Ok(Self {
            include: Some(names),
        })
    }

    /// Check if a syscall is selected
    pub fn should_trace(&self, syscall_name: &str) -> bool {
        match &self.include {
            None => true,
            Some(set) => set.contains(syscall_name),
        }
    }

    /// Numbers of all selected syscalls that the name table knows, ascending
    pub fn syscall_numbers(&self) -> Vec<u64> {
        syscalls::SYSCALLS
            .iter()
            .filter(|&&(_, name)| self.should_trace(name))
            .map(|&(nr, _)| nr as u64)
            .collect()
    }
}
