//! Syscall callback registry

use std::collections::HashMap;
use std::fmt;

/// Handler invoked with the syscall number at syscall entry
pub type SyscallHandler = Box<dyn FnMut(u64)>;

/// One handler per syscall number; registering again replaces the handler
#[derive(Default)]
pub struct CallbackRegistry {
    syscall: HashMap<u64, SyscallHandler>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `syscall_number`, dropping any previous one
    pub fn register<F>(&mut self, syscall_number: u64, handler: F)
    where
        F: FnMut(u64) + 'static,
    {
        self.syscall.insert(syscall_number, Box::new(handler));
    }

    pub fn lookup(&mut self, syscall_number: u64) -> Option<&mut SyscallHandler> {
        self.syscall.get_mut(&syscall_number)
    }

    pub fn contains(&self, syscall_number: u64) -> bool {
        self.syscall.contains_key(&syscall_number)
    }

    pub fn len(&self) -> usize {
        self.syscall.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syscall.is_empty()
    }
}

impl fmt::Debug for CallbackRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut numbers: Vec<&u64> = self.syscall.keys().collect();
        numbers.sort();
        f.debug_struct("CallbackRegistry")
            .field("syscalls", &numbers)
            .finish()
    }
}
