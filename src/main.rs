use anyhow::{bail, Context, Result};
use clap::Parser;
use potion::cli::{Cli, OutputFormat};
use potion::{filter::SyscallFilter, syscalls, JsonLinesSink, Monitor};
use std::process::Command;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber; log output goes to stderr
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Build the monitor for `command` with one reporting callback per selected syscall
fn build_monitor(args: &Cli, command: &[String], filter: &SyscallFilter) -> Monitor {
    let mut cmd = Command::new(&command[0]);
    cmd.args(&command[1..]);

    let mut monitor = Monitor::new(cmd).with_config(args.monitor_config());
    if args.format == OutputFormat::Json {
        monitor = monitor.with_sink(JsonLinesSink::new(std::io::stdout()));
    }

    for nr in filter.syscall_numbers() {
        monitor.add_syscall_callback(nr, |nr| {
            info!("{} called!", syscalls::syscall_name(nr as i64));
        });
    }

    monitor
}

fn main() -> Result<()> {
    let args = Cli::parse();

    init_tracing(args.debug);

    let command = match &args.command {
        Some(command) if !command.is_empty() => command.clone(),
        _ => bail!("Must specify a command. Usage: potion-agent -- COMMAND [ARGS...]"),
    };

    let filter = match &args.filter {
        Some(expr) => SyscallFilter::from_expr(expr)?,
        None => SyscallFilter::default(),
    };

    info!("starting: {:?}", command);
    let mut monitor = build_monitor(&args, &command, &filter);

    monitor
        .start()
        .with_context(|| format!("failed to start process {}", command[0]))?;
    monitor.run().context("failed to watch process")?;

    // Exit with traced program's exit code
    std::process::exit(monitor.exit_code().unwrap_or(0));
}
