//! Decoding of raw wait statuses into trace events
//!
//! The status layout is the Linux one returned by `wait4(2)`:
//! - exit:   `code << 8`
//! - killed: `signal` (plus `0x80` for a core dump)
//! - stop:   `event << 16 | signal << 8 | 0x7f`
//!
//! With `PTRACE_O_TRACESYSGOOD` a syscall-stop carries `SIGTRAP | 0x80` as
//! its stop signal, which is what tells it apart from a real `SIGTRAP`.

use nix::unistd::Pid;

/// Bit or-ed into `SIGTRAP` for syscall-stops under `PTRACE_O_TRACESYSGOOD`
pub const SYSCALL_TRAP_BIT: i32 = 0x80;

/// Why a thread entered a trace-stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapCause {
    /// Plain signal-delivery-stop or syscall-stop
    None,
    Fork,
    VFork,
    Clone,
    /// `PTRACE_EVENT_EXIT`: the thread is about to exit
    Exit,
    /// Any other `PTRACE_EVENT_*` value
    Other(i32),
}

impl TrapCause {
    /// Decode the event number found in bits 16.. of a stop status
    pub fn from_event(event: i32) -> Self {
        match event {
            0 => Self::None,
            libc::PTRACE_EVENT_FORK => Self::Fork,
            libc::PTRACE_EVENT_VFORK => Self::VFork,
            libc::PTRACE_EVENT_CLONE => Self::Clone,
            libc::PTRACE_EVENT_EXIT => Self::Exit,
            other => Self::Other(other),
        }
    }

    /// True for the events that announce a new traced thread or process
    pub fn creates_thread(self) -> bool {
        matches!(self, Self::Fork | Self::VFork | Self::Clone)
    }
}

/// A decoded wait result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// The thread exited normally
    Exited { pid: Pid, exit_code: i32 },
    /// The thread was terminated by a signal
    Killed { pid: Pid, signal: i32 },
    /// The thread is in a trace-stop and waits to be resumed
    Stopped {
        pid: Pid,
        /// Stop signal with the syscall-trap bit stripped
        signal: i32,
        cause: TrapCause,
        syscall_trap: bool,
    },
    /// A status that is neither exit, kill nor stop
    Unknown { pid: Pid, status: i32 },
}

impl TraceEvent {
    pub fn pid(&self) -> Pid {
        match *self {
            Self::Exited { pid, .. }
            | Self::Killed { pid, .. }
            | Self::Stopped { pid, .. }
            | Self::Unknown { pid, .. } => pid,
        }
    }

    /// True if the thread is gone after this event
    pub fn is_termination(&self) -> bool {
        matches!(self, Self::Exited { .. } | Self::Killed { .. })
    }

    /// Exit code reported to observers; signal deaths map to `128 + signal`
    pub fn exit_code(&self) -> Option<i32> {
        match *self {
            Self::Exited { exit_code, .. } => Some(exit_code),
            Self::Killed { signal, .. } => Some(128 + signal),
            _ => None,
        }
    }
}

/// Decode `status` as returned by `wait4` for thread `pid`
pub fn classify(pid: Pid, status: i32) -> TraceEvent {
    if libc::WIFEXITED(status) {
        return TraceEvent::Exited {
            pid,
            exit_code: libc::WEXITSTATUS(status),
        };
    }

    if libc::WIFSIGNALED(status) {
        return TraceEvent::Killed {
            pid,
            signal: libc::WTERMSIG(status),
        };
    }

    if libc::WIFSTOPPED(status) {
        let stop_signal = libc::WSTOPSIG(status);
        let syscall_trap = stop_signal == libc::SIGTRAP | SYSCALL_TRAP_BIT;
        return TraceEvent::Stopped {
            pid,
            signal: stop_signal & !SYSCALL_TRAP_BIT,
            cause: TrapCause::from_event((status >> 16) & 0xffff),
            syscall_trap,
        };
    }

    TraceEvent::Unknown { pid, status }
}

#[cfg(test)]
pub(crate) mod status {
    //! Builders for raw wait statuses, used by tests across the crate

    pub fn exited(code: i32) -> i32 {
        (code & 0xff) << 8
    }

    pub fn killed(signal: i32) -> i32 {
        signal & 0x7f
    }

    pub fn stopped(signal: i32) -> i32 {
        (signal << 8) | 0x7f
    }

    pub fn event(event: i32) -> i32 {
        (event << 16) | (libc::SIGTRAP << 8) | 0x7f
    }

    pub fn syscall_trap() -> i32 {
        stopped(libc::SIGTRAP | super::SYSCALL_TRAP_BIT)
    }
}
