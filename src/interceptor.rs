//! Syscall entry/exit tracking and callback dispatch
//!
//! Every syscall produces two syscall-stops, entry then exit. The thread's
//! [`SyscallState`] says which one comes next. Callbacks fire at entry only,
//! while the tracee is still stopped before the kernel runs the syscall.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use tracing::{trace, warn};

use crate::backend::PtraceBackend;
use crate::callbacks::CallbackRegistry;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::record::{EventSink, TraceRecord};
use crate::thread::{SyscallState, SyscallStop, Thread};

/// Handle a syscall-stop of `thread`, updating its state in place
///
/// Returns the direction the stop was handled as.
pub fn handle_syscall_stop<B: PtraceBackend>(
    backend: &mut B,
    thread: &mut Thread,
    callbacks: &mut CallbackRegistry,
    sink: &mut dyn EventSink,
    config: &MonitorConfig,
) -> Result<SyscallStop> {
    let pid = thread.id;
    let expected = thread.state.expected_stop();

    let stop = match backend.syscall_stop(pid) {
        Some(observed) if observed != expected => {
            if config.strict_syscall_pairing {
                return Err(MonitorError::ProtocolViolation {
                    pid,
                    expected,
                    observed,
                });
            }
            warn!(
                "thread {} reported syscall {:?} while {:?} was expected; resynchronising",
                pid, observed, expected
            );
            observed
        }
        _ => expected,
    };

    match stop {
        SyscallStop::Exit => {
            trace!("return from syscall in thread {}", pid);
            thread.state = SyscallState::AwaitingEntry;
        }
        SyscallStop::Entry => {
            thread.state = SyscallState::AwaitingExit;
            match backend.syscall_number(pid) {
                Ok(syscall_number) => {
                    sink.record(&TraceRecord::SyscallEntry {
                        id: pid.as_raw(),
                        syscall_number,
                    });
                    dispatch(callbacks, syscall_number);
                }
                Err(source) => {
                    warn!("{}", MonitorError::RegisterReadFailed { pid, source });
                }
            }
        }
    }

    Ok(stop)
}

/// Invoke the handler registered for `syscall_number`, if any
///
/// A panicking handler is logged and otherwise ignored.
fn dispatch(callbacks: &mut CallbackRegistry, syscall_number: u64) {
    let Some(handler) = callbacks.lookup(syscall_number) else {
        return;
    };

    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| handler(syscall_number))) {
        warn!(
            "callback for syscall {} panicked: {}",
            syscall_number,
            panic_message(payload.as_ref())
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
