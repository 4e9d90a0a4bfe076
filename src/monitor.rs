//! Trace session driver
//!
//! [`Monitor`] is the collaborator-facing handle: register callbacks, then
//! `start()` the traced command and `run()` the event loop. The loop waits
//! for the next stop of any traced thread, routes it through the lifecycle
//! handler and the syscall interceptor, and resumes the thread until its
//! next syscall boundary. It ends when the last traced thread has exited.
//!
//! All ptrace requests of a session must be issued from the thread that
//! called `start()`; `Monitor` is not `Send` for that reason.

use nix::errno::Errno;
use nix::unistd::Pid;
use std::collections::BTreeSet;
use std::process::Command;
use tracing::{debug, info, trace, warn};

use crate::backend::{LinuxPtrace, PtraceBackend};
use crate::callbacks::CallbackRegistry;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::event::{classify, TraceEvent};
use crate::interceptor;
use crate::lifecycle;
use crate::options;
use crate::record::{EventSink, LogSink};
use crate::thread::{Thread, ThreadTable};

/// State of one trace session: the root process and every traced thread
#[derive(Debug)]
pub struct Session {
    root: Pid,
    threads: ThreadTable,
    root_exit_code: Option<i32>,
}

impl Session {
    /// Spawn `command` traced and bring its first thread under control
    ///
    /// The new process stops at its first instruction after exec; options
    /// are set at that stop before it is resumed.
    pub fn launch<B: PtraceBackend>(
        backend: &mut B,
        command: &mut Command,
        config: &MonitorConfig,
    ) -> Result<Self> {
        let root = backend.spawn(command)?;
        debug!("spawned traced process {}", root);

        let (pid, status) = backend
            .wait_any()
            .map_err(|source| MonitorError::WaitFailed { source })?;
        match classify(pid, status) {
            TraceEvent::Stopped { pid, .. } if pid == root => {}
            _ => return Err(MonitorError::UnexpectedLaunchStatus { pid, status }),
        }

        let mut threads = ThreadTable::new();
        threads.insert(Thread::new(root));
        let session = Self {
            root,
            threads,
            root_exit_code: None,
        };

        if let Err(err) = session.release_root(backend, config) {
            session.teardown(backend);
            return Err(err);
        }
        info!("tracing process {}", root);

        Ok(session)
    }

    /// Configure the root at its post-exec stop and let it run
    fn release_root<B: PtraceBackend>(&self, backend: &mut B, config: &MonitorConfig) -> Result<()> {
        options::configure(backend, self.root, config)?;
        backend
            .resume(self.root)
            .map_err(|source| MonitorError::ResumeFailed {
                pid: self.root,
                source,
            })
    }

    /// Kill every traced and parked thread, then reap them
    ///
    /// The thread table is not touched, so it keeps showing the threads that
    /// were live when the session failed.
    pub fn teardown<B: PtraceBackend>(&self, backend: &mut B) {
        let mut remaining: BTreeSet<Pid> = self
            .threads
            .ids()
            .into_iter()
            .chain(self.threads.parked_ids())
            .collect();
        warn!("killing {} traced threads of {}", remaining.len(), self.root);

        for &pid in &remaining {
            kill_tracee(backend, pid);
        }

        while !remaining.is_empty() {
            let (pid, status) = match backend.wait_any() {
                Ok(waited) => waited,
                Err(err) => {
                    debug!("stopped reaping with {} threads left: {}", remaining.len(), err);
                    break;
                }
            };
            match classify(pid, status) {
                TraceEvent::Exited { .. } | TraceEvent::Killed { .. } => {
                    remaining.remove(&pid);
                }
                TraceEvent::Stopped { .. } => {
                    // a child whose creation event was never handled
                    if remaining.insert(pid) {
                        kill_tracee(backend, pid);
                    }
                    if let Err(err) = backend.resume(pid) {
                        debug!("resume of dying thread {} failed: {}", pid, err);
                    }
                }
                TraceEvent::Unknown { .. } => {}
            }
        }
    }

    pub fn root(&self) -> Pid {
        self.root
    }

    pub fn threads(&self) -> &ThreadTable {
        &self.threads
    }

    /// Exit code of the root process, once it has exited
    pub fn root_exit_code(&self) -> Option<i32> {
        self.root_exit_code
    }

    /// Run the event loop until the thread table is empty
    pub fn run<B: PtraceBackend>(
        &mut self,
        backend: &mut B,
        callbacks: &mut CallbackRegistry,
        sink: &mut dyn EventSink,
        config: &MonitorConfig,
    ) -> Result<()> {
        while !self.step(backend, callbacks, sink, config)? {}
        Ok(())
    }

    /// Wait for and process one event; returns true once the session is over
    pub fn step<B: PtraceBackend>(
        &mut self,
        backend: &mut B,
        callbacks: &mut CallbackRegistry,
        sink: &mut dyn EventSink,
        config: &MonitorConfig,
    ) -> Result<bool> {
        let (pid, status) = backend
            .wait_any()
            .map_err(|source| MonitorError::WaitFailed { source })?;
        let event = classify(pid, status);
        trace!("wait: {:?}", event);

        match event {
            TraceEvent::Exited { .. } | TraceEvent::Killed { .. } => {
                let exit_code = event.exit_code().unwrap_or_default();
                if pid == self.root {
                    self.root_exit_code = Some(exit_code);
                }
                Ok(lifecycle::handle_exit(&mut self.threads, sink, pid, exit_code))
            }
            TraceEvent::Unknown { status, .. } => {
                warn!("ignoring wait status {:#x} of thread {}", status, pid);
                Ok(false)
            }
            TraceEvent::Stopped {
                cause,
                syscall_trap,
                ..
            } => {
                if lifecycle::park_if_unannounced(&mut self.threads, self.root, &event) {
                    return Ok(false);
                }

                let mut thread = self.threads.get_or_create(pid);
                debug!("process {} stopped with trapcause {:?}", pid, cause);

                if !thread.options_configured {
                    thread.options_configured = options::configure_child(backend, pid, config);
                }

                if cause.creates_thread() {
                    lifecycle::handle_new_child(backend, &mut self.threads, sink, config, pid)?;
                }

                if syscall_trap {
                    interceptor::handle_syscall_stop(backend, &mut thread, callbacks, sink, config)?;
                }

                self.threads.insert(thread);

                backend
                    .resume(pid)
                    .map_err(|source| MonitorError::ResumeFailed { pid, source })?;
                Ok(false)
            }
        }
    }
}

fn kill_tracee<B: PtraceBackend>(backend: &mut B, pid: Pid) {
    match backend.kill(pid) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(err) => warn!("failed to kill traced thread {}: {}", pid, err),
    }
}

/// Where a monitor is in its lifetime
#[derive(Debug)]
enum Phase {
    Idle,
    Tracing(Session),
    /// The loop hit a fatal error; the session is kept as it was
    Failed(Session),
    Finished { root_exit_code: Option<i32> },
}

/// Traces a command and dispatches syscall callbacks
pub struct Monitor<B: PtraceBackend = LinuxPtrace> {
    command: Command,
    config: MonitorConfig,
    callbacks: CallbackRegistry,
    sink: Box<dyn EventSink>,
    backend: B,
    phase: Phase,
}

impl Monitor<LinuxPtrace> {
    /// Monitor for `command`; its stdio wiring is used as configured
    pub fn new(command: Command) -> Self {
        Self::with_backend(command, LinuxPtrace::new())
    }
}

impl<B: PtraceBackend> Monitor<B> {
    pub fn with_backend(command: Command, backend: B) -> Self {
        Self {
            command,
            config: MonitorConfig::default(),
            callbacks: CallbackRegistry::new(),
            sink: Box::new(LogSink),
            backend,
            phase: Phase::Idle,
        }
    }

    pub fn with_config(mut self, config: MonitorConfig) -> Self {
        self.config = config;
        self
    }

    /// Send trace records to `sink` instead of the log
    pub fn with_sink<S: EventSink + 'static>(mut self, sink: S) -> Self {
        self.sink = Box::new(sink);
        self
    }

    /// Call `callback` at every entry of syscall `syscall_number`
    ///
    /// Replaces any callback registered earlier for the same number.
    pub fn add_syscall_callback<F>(&mut self, syscall_number: u64, callback: F)
    where
        F: FnMut(u64) + 'static,
    {
        self.callbacks.register(syscall_number, callback);
    }

    /// Spawn the traced command
    pub fn start(&mut self) -> Result<()> {
        if !matches!(self.phase, Phase::Idle) {
            return Err(MonitorError::AlreadyStarted);
        }
        let session = Session::launch(&mut self.backend, &mut self.command, &self.config)?;
        self.phase = Phase::Tracing(session);
        Ok(())
    }

    /// Drive the event loop until every traced thread has exited
    ///
    /// On error every traced process is killed and reaped. The session is
    /// kept, so [`Monitor::threads`] shows the threads that were live when
    /// it failed.
    pub fn run(&mut self) -> Result<()> {
        let mut session = match std::mem::replace(&mut self.phase, Phase::Idle) {
            Phase::Tracing(session) => session,
            other => {
                self.phase = other;
                return Err(MonitorError::NotStarted);
            }
        };

        match session.run(
            &mut self.backend,
            &mut self.callbacks,
            self.sink.as_mut(),
            &self.config,
        ) {
            Ok(()) => {
                self.phase = Phase::Finished {
                    root_exit_code: session.root_exit_code(),
                };
                Ok(())
            }
            Err(err) => {
                warn!("trace session of {} failed: {}", session.root(), err);
                session.teardown(&mut self.backend);
                self.phase = Phase::Failed(session);
                Err(err)
            }
        }
    }

    /// Thread table of an active or failed session
    pub fn threads(&self) -> Option<&ThreadTable> {
        match &self.phase {
            Phase::Tracing(session) | Phase::Failed(session) => Some(session.threads()),
            _ => None,
        }
    }

    /// Id of the traced root process, while its session exists
    pub fn root(&self) -> Option<Pid> {
        match &self.phase {
            Phase::Tracing(session) | Phase::Failed(session) => Some(session.root()),
            _ => None,
        }
    }

    /// Exit code of the root process, `128 + signal` if it was killed
    pub fn exit_code(&self) -> Option<i32> {
        match &self.phase {
            Phase::Tracing(session) | Phase::Failed(session) => session.root_exit_code(),
            Phase::Finished { root_exit_code } => *root_exit_code,
            Phase::Idle => None,
        }
    }

    /// True once the event loop ended normally
    pub fn is_finished(&self) -> bool {
        matches!(self.phase, Phase::Finished { .. })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
