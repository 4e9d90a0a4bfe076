//! Error taxonomy for trace sessions
//!
//! Every fatal condition of the event loop maps to exactly one variant, with
//! the thread id and the OS error attached, so callers can branch on the kind
//! instead of parsing messages.

use nix::errno::Errno;
use nix::unistd::Pid;
use thiserror::Error;

use crate::thread::SyscallStop;

/// Errors raised while launching or tracing a workload
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Failed to spawn traced command: {0}")]
    SpawnFailed(#[from] std::io::Error),

    #[error("Failed to wait for traced threads: {source}")]
    WaitFailed {
        #[source]
        source: Errno,
    },

    #[error("Failed to read ptrace event message from thread {pid}: {source}")]
    EventMessageFailed {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("Failed to attach new child {pid} of thread {parent}: {source}")]
    AttachFailed {
        pid: Pid,
        parent: Pid,
        #[source]
        source: Errno,
    },

    #[error("Failed to set ptrace options on thread {pid}: {source}")]
    ConfigureFailed {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("Failed to resume thread {pid} until next syscall: {source}")]
    ResumeFailed {
        pid: Pid,
        #[source]
        source: Errno,
    },

    /// Not fatal: the loop logs it and skips callback dispatch
    #[error("Caught syscall from thread {pid}, but failed to read registers: {source}")]
    RegisterReadFailed {
        pid: Pid,
        #[source]
        source: Errno,
    },

    #[error("Syscall stop of thread {pid} out of order: expected {expected:?}, kernel reported {observed:?}")]
    ProtocolViolation {
        pid: Pid,
        expected: SyscallStop,
        observed: SyscallStop,
    },

    #[error("Traced command {pid} did not stop after exec (raw wait status {status:#x})")]
    UnexpectedLaunchStatus { pid: Pid, status: i32 },

    #[error("Trace session has not been started")]
    NotStarted,

    #[error("Trace session was already started")]
    AlreadyStarted,
}

impl MonitorError {
    /// Thread id the error is about, if any
    pub fn pid(&self) -> Option<Pid> {
        match self {
            Self::EventMessageFailed { pid, .. }
            | Self::AttachFailed { pid, .. }
            | Self::ConfigureFailed { pid, .. }
            | Self::ResumeFailed { pid, .. }
            | Self::RegisterReadFailed { pid, .. }
            | Self::ProtocolViolation { pid, .. }
            | Self::UnexpectedLaunchStatus { pid, .. } => Some(*pid),
            _ => None,
        }
    }

    /// Underlying OS error code, if the error came from a ptrace or wait call
    pub fn errno(&self) -> Option<Errno> {
        match self {
            Self::WaitFailed { source }
            | Self::EventMessageFailed { source, .. }
            | Self::AttachFailed { source, .. }
            | Self::ConfigureFailed { source, .. }
            | Self::ResumeFailed { source, .. }
            | Self::RegisterReadFailed { source, .. } => Some(*source),
            _ => None,
        }
    }

    /// True when the tracee vanished underneath us (`ESRCH`).
    ///
    /// Usually a thread that died between its stop and our request, which is
    /// often benign, as opposed to a broken tracing subsystem.
    pub fn is_lost_race(&self) -> bool {
        self.errno() == Some(Errno::ESRCH)
    }
}

/// Result type for trace session operations
pub type Result<T> = std::result::Result<T, MonitorError>;
