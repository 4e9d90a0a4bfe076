//! Thread creation and exit handling
//!
//! A fork/clone/vfork event stops the parent; the new id comes from the
//! event message. The child's own first stop (`SIGSTOP`) may be reported
//! before or after that event. If it comes first the child is parked, and
//! it is only resumed once the parent's event has registered it, so no
//! record about a child ever precedes its `new_thread` record.

use nix::unistd::Pid;
use tracing::{debug, info};

use crate::backend::PtraceBackend;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::event::{TraceEvent, TrapCause};
use crate::options;
use crate::record::{EventSink, TraceRecord};
use crate::thread::{Thread, ThreadTable};

/// Register the child announced by a fork/clone/vfork stop of `parent`
///
/// Returns the child's id.
pub fn handle_new_child<B: PtraceBackend>(
    backend: &mut B,
    threads: &mut ThreadTable,
    sink: &mut dyn EventSink,
    config: &MonitorConfig,
    parent: Pid,
) -> Result<Pid> {
    let msg = backend
        .event_message(parent)
        .map_err(|source| MonitorError::EventMessageFailed { pid: parent, source })?;
    let child = Pid::from_raw(msg as i32);

    backend
        .attach(child)
        .map_err(|source| MonitorError::AttachFailed {
            pid: child,
            parent,
            source,
        })?;

    // A child that raced ahead is already in its initial stop
    let parked = threads.unpark(child);

    threads.insert(Thread::new(child));
    sink.record(&TraceRecord::NewThread {
        id: child.as_raw(),
        parent_id: parent.as_raw(),
    });

    if !options::configure_child(backend, child, config) {
        if let Some(thread) = threads.get_mut(child) {
            thread.options_configured = false;
        }
    }

    if parked {
        debug!("releasing parked child {}", child);
        backend
            .resume(child)
            .map_err(|source| MonitorError::ResumeFailed { pid: child, source })?;
    }

    Ok(child)
}

/// Whether a stop belongs to a child whose creation event is still pending
///
/// That is the initial `SIGSTOP` of an id we do not know yet, other than
/// the root. Such a stop is parked instead of resumed.
pub fn park_if_unannounced(threads: &mut ThreadTable, root: Pid, event: &TraceEvent) -> bool {
    match *event {
        TraceEvent::Stopped {
            pid,
            signal,
            cause: TrapCause::None,
            syscall_trap: false,
        } if signal == libc::SIGSTOP && pid != root && !threads.contains(pid) => {
            debug!("thread {} stopped before its creation event, parking", pid);
            threads.park(pid);
            true
        }
        _ => false,
    }
}

/// Drop an exited thread; returns true when it was the last one
pub fn handle_exit(
    threads: &mut ThreadTable,
    sink: &mut dyn EventSink,
    pid: Pid,
    exit_code: i32,
) -> bool {
    sink.record(&TraceRecord::Exit {
        id: pid.as_raw(),
        exit_code,
    });

    if threads.remove(pid).is_none() {
        debug!("exit of untracked thread {}", pid);
    }

    if threads.is_empty() {
        info!("last thread exited; stopping trace");
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::{Call, ScriptedBackend};
    use crate::event::{classify, status};
    use nix::errno::Errno;

    fn pid(raw: i32) -> Pid {
        Pid::from_raw(raw)
    }

    #[test]
    fn test_new_child_registered_and_configured() {
        let mut backend = ScriptedBackend::new(100).event_message(101);
        let mut threads = ThreadTable::new();
        threads.insert(Thread::new(pid(100)));
        let mut records: Vec<TraceRecord> = Vec::new();

        let child = handle_new_child(
            &mut backend,
            &mut threads,
            &mut records,
            &MonitorConfig::default(),
            pid(100),
        )
        .unwrap();

        assert_eq!(child, pid(101));
        assert!(threads.contains(pid(101)));
        assert!(threads.get(pid(101)).unwrap().options_configured);
        assert_eq!(records, vec![TraceRecord::NewThread { id: 101, parent_id: 100 }]);
        assert_eq!(
            backend.calls,
            vec![
                Call::EventMessage(pid(100)),
                Call::Attach(pid(101)),
                Call::SetOptions(pid(101)),
            ]
        );
    }

    #[test]
    fn test_event_message_failure_is_fatal() {
        let mut backend = ScriptedBackend::new(100);
        backend.event_messages.push_back(Err(Errno::ESRCH));
        let mut threads = ThreadTable::new();
        let mut records: Vec<TraceRecord> = Vec::new();

        let err = handle_new_child(
            &mut backend,
            &mut threads,
            &mut records,
            &MonitorConfig::default(),
            pid(100),
        )
        .unwrap_err();

        assert!(matches!(err, MonitorError::EventMessageFailed { .. }));
        assert_eq!(err.pid(), Some(pid(100)));
        assert!(records.is_empty());
    }

    #[test]
    fn test_attach_failure_is_fatal() {
        let mut backend = ScriptedBackend::new(100).event_message(101);
        backend.attach_results.push_back(Err(Errno::ESRCH));
        let mut threads = ThreadTable::new();
        let mut records: Vec<TraceRecord> = Vec::new();

        let err = handle_new_child(
            &mut backend,
            &mut threads,
            &mut records,
            &MonitorConfig::default(),
            pid(100),
        )
        .unwrap_err();

        assert!(matches!(
            err,
            MonitorError::AttachFailed { pid: child, parent, .. } if child == pid(101) && parent == pid(100)
        ));
        assert!(err.is_lost_race());
        assert!(!threads.contains(pid(101)));
        assert_eq!(backend.calls_to(Call::Attach(pid(101))), 1);
    }

    #[test]
    fn test_deferred_options_marked_unconfigured() {
        let mut backend = ScriptedBackend::new(100).event_message(101);
        backend.options_results.push_back(Err(Errno::ESRCH));
        let mut threads = ThreadTable::new();
        let mut records: Vec<TraceRecord> = Vec::new();

        handle_new_child(
            &mut backend,
            &mut threads,
            &mut records,
            &MonitorConfig::default(),
            pid(100),
        )
        .unwrap();

        assert!(!threads.get(pid(101)).unwrap().options_configured);
    }

    #[test]
    fn test_parked_child_released_after_registration() {
        let mut backend = ScriptedBackend::new(100).event_message(101);
        let mut threads = ThreadTable::new();
        threads.park(pid(101));
        let mut records: Vec<TraceRecord> = Vec::new();

        handle_new_child(
            &mut backend,
            &mut threads,
            &mut records,
            &MonitorConfig::default(),
            pid(100),
        )
        .unwrap();

        assert!(!threads.is_parked(pid(101)));
        let configured = backend.first(Call::SetOptions(pid(101))).unwrap();
        let resumed = backend.first(Call::Resume(pid(101))).unwrap();
        assert!(configured < resumed);
    }

    #[test]
    fn test_park_only_unknown_sigstop() {
        let mut threads = ThreadTable::new();
        threads.insert(Thread::new(pid(100)));

        let early_child = classify(pid(101), status::stopped(libc::SIGSTOP));
        assert!(park_if_unannounced(&mut threads, pid(100), &early_child));
        assert!(threads.is_parked(pid(101)));

        let known = classify(pid(100), status::stopped(libc::SIGSTOP));
        assert!(!park_if_unannounced(&mut threads, pid(100), &known));

        let syscall = classify(pid(102), status::syscall_trap());
        assert!(!park_if_unannounced(&mut threads, pid(100), &syscall));
    }

    #[test]
    fn test_root_never_parked() {
        let mut threads = ThreadTable::new();
        let root_stop = classify(pid(100), status::stopped(libc::SIGSTOP));
        assert!(!park_if_unannounced(&mut threads, pid(100), &root_stop));
    }

    #[test]
    fn test_exit_removes_and_reports_last() {
        let mut threads = ThreadTable::new();
        threads.insert(Thread::new(pid(1)));
        threads.insert(Thread::new(pid(2)));
        let mut records: Vec<TraceRecord> = Vec::new();

        assert!(!handle_exit(&mut threads, &mut records, pid(2), 0));
        assert!(handle_exit(&mut threads, &mut records, pid(1), 3));
        assert!(threads.is_empty());
        assert_eq!(
            records,
            vec![
                TraceRecord::Exit { id: 2, exit_code: 0 },
                TraceRecord::Exit { id: 1, exit_code: 3 },
            ]
        );
    }
}
