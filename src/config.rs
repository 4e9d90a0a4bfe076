//! Trace session configuration

use nix::sys::ptrace::Options;

/// Settings for one trace session
///
/// The defaults follow every fork/clone/vfork and fail the session on an
/// out-of-order syscall-stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Trace children created through fork, vfork and clone
    pub follow_forks: bool,
    /// Kill all tracees if the tracer exits (`PTRACE_O_EXITKILL`)
    pub exit_kill: bool,
    /// Treat a syscall-stop whose direction disagrees with the tracked
    /// state as fatal instead of logging it
    pub strict_syscall_pairing: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            follow_forks: true,
            exit_kill: false,
            strict_syscall_pairing: true,
        }
    }
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow_forks(mut self, enabled: bool) -> Self {
        self.follow_forks = enabled;
        self
    }

    pub fn exit_kill(mut self, enabled: bool) -> Self {
        self.exit_kill = enabled;
        self
    }

    pub fn strict_syscall_pairing(mut self, enabled: bool) -> Self {
        self.strict_syscall_pairing = enabled;
        self
    }

    /// Ptrace options applied to every traced thread
    pub fn trace_options(&self) -> Options {
        // Set status = status | 0x80 on syscalls, and report exits so
        // records for former threads can be released
        let mut options = Options::PTRACE_O_TRACESYSGOOD | Options::PTRACE_O_TRACEEXIT;

        if self.follow_forks {
            options |= Options::PTRACE_O_TRACECLONE
                | Options::PTRACE_O_TRACEFORK
                | Options::PTRACE_O_TRACEVFORK;
        }

        if self.exit_kill {
            options |= Options::PTRACE_O_EXITKILL;
        }

        options
    }
}
