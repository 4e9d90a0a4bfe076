//! Potion - ptrace syscall monitor
//!
//! Launches a workload under `ptrace`, follows every thread and child it
//! creates, and calls handlers registered per syscall number whenever a
//! traced thread enters that syscall.
//!
//! ```no_run
//! use potion::Monitor;
//! use std::process::Command;
//!
//! let mut monitor = Monitor::new(Command::new("/bin/ls"));
//! // 0 is read on x86_64
//! monitor.add_syscall_callback(0, |nr| println!("read ({})", nr));
//! monitor.start()?;
//! monitor.run()?;
//! # Ok::<(), potion::MonitorError>(())
//! ```

pub mod backend;
pub mod callbacks;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod filter;
pub mod interceptor;
pub mod lifecycle;
pub mod monitor;
pub mod options;
pub mod record;
pub mod syscalls;
pub mod thread;

pub use backend::{LinuxPtrace, PtraceBackend};
pub use callbacks::CallbackRegistry;
pub use config::MonitorConfig;
pub use error::MonitorError;
pub use event::{classify, TraceEvent, TrapCause};
pub use monitor::{Monitor, Session};
pub use record::{EventSink, JsonLinesSink, LogSink, TraceRecord};
pub use thread::{SyscallState, SyscallStop, Thread, ThreadTable};
