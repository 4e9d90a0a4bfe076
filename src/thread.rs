//! Per-thread trace state and the table of traced threads

use nix::unistd::Pid;
use std::collections::{BTreeSet, HashMap};

/// Which syscall-stop a thread is expected to report next
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyscallState {
    /// Running user code; the next syscall-stop is an entry
    #[default]
    AwaitingEntry,
    /// Inside a syscall; the next syscall-stop is the matching exit
    AwaitingExit,
}

impl SyscallState {
    /// Direction of the next syscall-stop in this state
    pub fn expected_stop(self) -> SyscallStop {
        match self {
            Self::AwaitingEntry => SyscallStop::Entry,
            Self::AwaitingExit => SyscallStop::Exit,
        }
    }
}

/// Direction of a syscall-stop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyscallStop {
    Entry,
    Exit,
}

/// One kernel-schedulable thread under trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thread {
    pub id: Pid,
    pub state: SyscallState,
    /// False while ptrace options still have to be applied at the next stop
    pub options_configured: bool,
}

impl Thread {
    pub fn new(id: Pid) -> Self {
        Self {
            id,
            state: SyscallState::AwaitingEntry,
            options_configured: true,
        }
    }

    /// True strictly between a syscall-entry stop and its exit stop
    pub fn handling_syscall(&self) -> bool {
        self.state == SyscallState::AwaitingExit
    }
}

/// Mapping from thread id to trace state
///
/// Besides the live threads the table remembers "parked" ids: new children
/// whose first stop was reported before the creation event of their parent.
/// Those stay stopped until the parent's event is handled.
#[derive(Debug, Default)]
pub struct ThreadTable {
    threads: HashMap<Pid, Thread>,
    parked: BTreeSet<Pid>,
}

impl ThreadTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing record for `id`, or a fresh one that is not inserted yet
    pub fn get_or_create(&self, id: Pid) -> Thread {
        self.threads
            .get(&id)
            .cloned()
            .unwrap_or_else(|| Thread::new(id))
    }

    pub fn get(&self, id: Pid) -> Option<&Thread> {
        self.threads.get(&id)
    }

    pub fn get_mut(&mut self, id: Pid) -> Option<&mut Thread> {
        self.threads.get_mut(&id)
    }

    /// Store a record, replacing any previous one for the same id
    pub fn insert(&mut self, thread: Thread) {
        self.threads.insert(thread.id, thread);
    }

    pub fn remove(&mut self, id: Pid) -> Option<Thread> {
        self.parked.remove(&id);
        self.threads.remove(&id)
    }

    pub fn contains(&self, id: Pid) -> bool {
        self.threads.contains_key(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.threads.is_empty()
    }

    pub fn len(&self) -> usize {
        self.threads.len()
    }

    /// Ids of all tracked threads, sorted
    pub fn ids(&self) -> Vec<Pid> {
        let mut ids: Vec<Pid> = self.threads.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn park(&mut self, id: Pid) {
        self.parked.insert(id);
    }

    /// Forget a parked id; returns whether it was parked
    pub fn unpark(&mut self, id: Pid) -> bool {
        self.parked.remove(&id)
    }

    pub fn is_parked(&self, id: Pid) -> bool {
        self.parked.contains(&id)
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    /// Parked ids, sorted
    pub fn parked_ids(&self) -> Vec<Pid> {
        self.parked.iter().copied().collect()
    }
}
