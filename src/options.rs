//! Applying ptrace options to traced threads
//!
//! Options are requested on the root thread once it reaches its first stop,
//! and again on every child discovered through a fork/clone/vfork event.
//! The kernel already copies them to auto-attached children, so repeating
//! the request is harmless; for children it is best effort.

use nix::errno::Errno;
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::backend::PtraceBackend;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};

/// Request follow-forks, syscall-stop marking and exit reporting for `pid`
pub fn configure<B: PtraceBackend>(backend: &mut B, pid: Pid, config: &MonitorConfig) -> Result<()> {
    let options = config.trace_options();
    backend
        .set_options(pid, options)
        .map_err(|source| MonitorError::ConfigureFailed { pid, source })?;
    debug!("configured ptrace options {:?} on thread {}", options, pid);
    Ok(())
}

/// Configure a newly discovered child
///
/// Returns whether the options were applied. `ESRCH` means the child has
/// not reached its first stop yet; the caller retries at that stop. Any
/// other failure is logged and ignored, the child keeps the options it
/// inherited from its parent.
pub fn configure_child<B: PtraceBackend>(backend: &mut B, pid: Pid, config: &MonitorConfig) -> bool {
    match configure(backend, pid, config) {
        Ok(()) => true,
        Err(err) if err.errno() == Some(Errno::ESRCH) => {
            debug!("thread {} not stopped yet, deferring option setup", pid);
            false
        }
        Err(err) => {
            warn!("{}; keeping inherited options", err);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::{Call, ScriptedBackend};

    #[test]
    fn test_configure_success() {
        let mut backend = ScriptedBackend::new(1);
        configure(&mut backend, Pid::from_raw(1), &MonitorConfig::default()).unwrap();
        assert_eq!(backend.calls, vec![Call::SetOptions(Pid::from_raw(1))]);
    }

    #[test]
    fn test_configure_failure_is_typed() {
        let mut backend = ScriptedBackend::new(1);
        backend.options_results.push_back(Err(Errno::EPERM));
        let err = configure(&mut backend, Pid::from_raw(1), &MonitorConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            MonitorError::ConfigureFailed { source: Errno::EPERM, .. }
        ));
    }

    #[test]
    fn test_configure_is_repeatable() {
        let mut backend = ScriptedBackend::new(1);
        let config = MonitorConfig::default();
        configure(&mut backend, Pid::from_raw(1), &config).unwrap();
        configure(&mut backend, Pid::from_raw(1), &config).unwrap();
        assert_eq!(backend.calls_to(Call::SetOptions(Pid::from_raw(1))), 2);
    }

    #[test]
    fn test_child_not_yet_stopped_is_deferred() {
        let mut backend = ScriptedBackend::new(1);
        backend.options_results.push_back(Err(Errno::ESRCH));
        assert!(!configure_child(&mut backend, Pid::from_raw(2), &MonitorConfig::default()));
    }

    #[test]
    fn test_child_other_failure_keeps_inherited() {
        let mut backend = ScriptedBackend::new(1);
        backend.options_results.push_back(Err(Errno::EINVAL));
        assert!(configure_child(&mut backend, Pid::from_raw(2), &MonitorConfig::default()));
    }
}
