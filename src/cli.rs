//! CLI argument parsing for potion-agent

use clap::{Parser, ValueEnum};

use crate::config::MonitorConfig;

/// Output format for trace records
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable log lines on stderr (default)
    Text,
    /// One JSON object per record on stdout
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "potion-agent")]
#[command(version)]
#[command(about = "Trace a command and every thread it spawns, reporting selected syscalls", long_about = None)]
pub struct Cli {
    /// Syscalls to report (e.g., -e trace=read,write or -e trace=file); default trace=read
    #[arg(short = 'e', long = "expr", value_name = "EXPR")]
    pub filter: Option<String>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Kill the traced processes if the agent dies
    #[arg(long = "exit-kill")]
    pub exit_kill: bool,

    /// Only trace the launched process, not the children it forks
    #[arg(long = "no-follow-forks")]
    pub no_follow_forks: bool,

    /// Log out-of-order syscall stops instead of aborting the trace
    #[arg(long = "lenient")]
    pub lenient: bool,

    /// Enable trace-level logging
    #[arg(short, long)]
    pub debug: bool,

    /// Command to trace (everything after --)
    #[arg(last = true)]
    pub command: Option<Vec<String>>,
}

impl Cli {
    /// Session settings selected by the flags
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig::new()
            .follow_forks(!self.no_follow_forks)
            .exit_kill(self.exit_kill)
            .strict_syscall_pairing(!self.lenient)
    }
}
