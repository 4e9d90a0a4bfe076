//! Platform capability interface for the event loop
//!
//! Everything the loop asks of the kernel goes through [`PtraceBackend`]:
//! spawning the tracee, waiting, reading event messages and registers,
//! attaching, configuring, resuming and killing. [`LinuxPtrace`] is the real
//! implementation on top of `nix`; tests drive the loop with a scripted one.

use nix::errno::Errno;
use nix::sys::ptrace::{self, Options};
use nix::sys::signal::{self, Signal};
use nix::unistd::{gettid, Pid};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command};

use crate::thread::SyscallStop;

/// Tracing primitives used by a trace session
///
/// All calls for a session must come from the thread that spawned the
/// tracee, since that thread is the one the kernel recognises as tracer.
pub trait PtraceBackend {
    /// Spawn `command` so that it stops at its first instruction after exec
    fn spawn(&mut self, command: &mut Command) -> std::io::Result<Pid>;

    /// Block until any traced thread changes state; returns the raw status
    fn wait_any(&mut self) -> nix::Result<(Pid, i32)>;

    /// `PTRACE_GETEVENTMSG` for a thread in a ptrace-event-stop
    fn event_message(&mut self, pid: Pid) -> nix::Result<u64>;

    /// Make sure this process traces `pid`
    fn attach(&mut self, pid: Pid) -> nix::Result<()>;

    fn set_options(&mut self, pid: Pid, options: Options) -> nix::Result<()>;

    /// Syscall number of a thread stopped at syscall entry
    fn syscall_number(&mut self, pid: Pid) -> nix::Result<u64>;

    /// Direction of the current syscall-stop, when the platform can tell
    fn syscall_stop(&mut self, _pid: Pid) -> Option<SyscallStop> {
        None
    }

    /// Resume a stopped thread until its next syscall boundary, no signal
    fn resume(&mut self, pid: Pid) -> nix::Result<()>;

    /// Terminate a traced thread's process with `SIGKILL`
    fn kill(&mut self, pid: Pid) -> nix::Result<()>;
}

/// `PTRACE_GET_SYSCALL_INFO` (Linux 5.3+)
const PTRACE_GET_SYSCALL_INFO: libc::c_long = 0x420e;
const PTRACE_SYSCALL_INFO_ENTRY: u8 = 1;
const PTRACE_SYSCALL_INFO_EXIT: u8 = 2;
/// `sizeof(struct ptrace_syscall_info)`
const SYSCALL_INFO_SIZE: usize = 88;

/// Linux ptrace backend
#[derive(Debug, Default)]
pub struct LinuxPtrace {
    child: Option<Child>,
}

impl LinuxPtrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle of the spawned root process, keeping its stdio pipes alive
    pub fn child_mut(&mut self) -> Option<&mut Child> {
        self.child.as_mut()
    }
}

impl PtraceBackend for LinuxPtrace {
    fn spawn(&mut self, command: &mut Command) -> std::io::Result<Pid> {
        // SAFETY: traceme is a single raw syscall, async-signal-safe
        unsafe {
            command.pre_exec(|| ptrace::traceme().map_err(std::io::Error::from));
        }
        let child = command.spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        self.child = Some(child);
        Ok(pid)
    }

    fn wait_any(&mut self) -> nix::Result<(Pid, i32)> {
        let mut status: libc::c_int = 0;
        loop {
            // SAFETY: status is a valid out pointer for the whole call
            let ret = unsafe { libc::waitpid(-1, &mut status, libc::__WALL) };
            if ret >= 0 {
                return Ok((Pid::from_raw(ret), status));
            }
            match Errno::last() {
                Errno::EINTR => continue,
                err => return Err(err),
            }
        }
    }

    fn event_message(&mut self, pid: Pid) -> nix::Result<u64> {
        ptrace::getevent(pid).map(|msg| msg as u64)
    }

    fn attach(&mut self, pid: Pid) -> nix::Result<()> {
        match ptrace::attach(pid) {
            Ok(()) => Ok(()),
            // Children of a thread traced with PTRACE_O_TRACE{FORK,VFORK,CLONE}
            // are attached by the kernel already. TracerPid names the tracing
            // thread, which is the one that spawned the root.
            Err(Errno::EPERM) if tracer_of(pid) == Some(gettid()) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn set_options(&mut self, pid: Pid, options: Options) -> nix::Result<()> {
        ptrace::setoptions(pid, options)
    }

    #[cfg(target_arch = "x86_64")]
    fn syscall_number(&mut self, pid: Pid) -> nix::Result<u64> {
        // rax already holds -ENOSYS at entry; the number survives in orig_rax
        ptrace::getregs(pid).map(|regs| regs.orig_rax)
    }

    #[cfg(target_arch = "aarch64")]
    fn syscall_number(&mut self, pid: Pid) -> nix::Result<u64> {
        ptrace::getregs(pid).map(|regs| regs.regs[8])
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    fn syscall_number(&mut self, _pid: Pid) -> nix::Result<u64> {
        Err(Errno::ENOSYS)
    }

    fn syscall_stop(&mut self, pid: Pid) -> Option<SyscallStop> {
        let mut info = [0u8; SYSCALL_INFO_SIZE];
        // SAFETY: the kernel writes at most SYSCALL_INFO_SIZE bytes to info
        let ret = unsafe {
            libc::syscall(
                libc::SYS_ptrace,
                PTRACE_GET_SYSCALL_INFO,
                pid.as_raw() as libc::c_long,
                SYSCALL_INFO_SIZE as libc::c_ulong,
                info.as_mut_ptr() as libc::c_ulong,
            )
        };
        if ret <= 0 {
            return None;
        }
        match info[0] {
            PTRACE_SYSCALL_INFO_ENTRY => Some(SyscallStop::Entry),
            PTRACE_SYSCALL_INFO_EXIT => Some(SyscallStop::Exit),
            _ => None,
        }
    }

    fn resume(&mut self, pid: Pid) -> nix::Result<()> {
        ptrace::syscall(pid, None)
    }

    fn kill(&mut self, pid: Pid) -> nix::Result<()> {
        signal::kill(pid, Signal::SIGKILL)
    }
}

/// Tracer of `pid` according to `/proc/<pid>/status`
fn tracer_of(pid: Pid) -> Option<Pid> {
    let status = std::fs::read_to_string(format!("/proc/{}/status", pid)).ok()?;
    parse_tracer_pid(&status)
}

fn parse_tracer_pid(status: &str) -> Option<Pid> {
    let raw = status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))?
        .trim()
        .parse::<i32>()
        .ok()?;
    (raw != 0).then(|| Pid::from_raw(raw))
}
