//! Structured records emitted by a trace session
//!
//! The session persists nothing itself; every observation is handed to an
//! [`EventSink`] which formats or stores it.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use tracing::{debug, info};

use crate::syscalls;

/// One observation made by the event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceRecord {
    /// A traced thread exited; signal deaths carry `128 + signal`
    Exit { id: i32, exit_code: i32 },
    /// A fork/clone/vfork produced a new traced thread
    NewThread { id: i32, parent_id: i32 },
    /// A thread entered a syscall
    SyscallEntry { id: i32, syscall_number: u64 },
}

impl TraceRecord {
    /// Thread the record is about
    pub fn id(&self) -> i32 {
        match *self {
            Self::Exit { id, .. } | Self::NewThread { id, .. } | Self::SyscallEntry { id, .. } => id,
        }
    }
}

/// Consumer of trace records
pub trait EventSink {
    fn record(&mut self, record: &TraceRecord);
}

/// Keeps every record in memory
impl EventSink for Vec<TraceRecord> {
    fn record(&mut self, record: &TraceRecord) {
        self.push(*record);
    }
}

/// Shares a sink with the caller, who can inspect it once the session ends
impl<S: EventSink + ?Sized> EventSink for Rc<RefCell<S>> {
    fn record(&mut self, record: &TraceRecord) {
        self.borrow_mut().record(record);
    }
}

/// Emits records as `tracing` events
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&mut self, record: &TraceRecord) {
        match *record {
            TraceRecord::Exit { id, exit_code } => {
                info!(id, exit_code, "process {} exited with status {}", id, exit_code);
            }
            TraceRecord::NewThread { id, parent_id } => {
                info!(id, parent_id, "new thread {} from {}", id, parent_id);
            }
            TraceRecord::SyscallEntry { id, syscall_number } => {
                debug!(
                    id,
                    syscall_number,
                    "caught syscall {} ({:#x}) from {}",
                    syscalls::syscall_name(syscall_number as i64),
                    syscall_number,
                    id
                );
            }
        }
    }
}

/// Writes one JSON object per record, newline separated
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> EventSink for JsonLinesSink<W> {
    fn record(&mut self, record: &TraceRecord) {
        let written = serde_json::to_writer(&mut self.writer, record)
            .map_err(std::io::Error::from)
            .and_then(|()| self.writer.write_all(b"\n"))
            .and_then(|()| self.writer.flush());
        if let Err(e) = written {
            tracing::warn!("Failed to write trace record: {}", e);
        }
    }
}
