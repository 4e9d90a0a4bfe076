//! Trace sessions against real processes
//!
//! Every test here waits on "any child" of the test process, so they must
//! not run concurrently with each other.

use potion::{Monitor, MonitorConfig, MonitorError, TraceRecord};
use serial_test::serial;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::Read;
use std::process::{Command, Stdio};
use std::rc::Rc;
use std::thread;

/// Threads started by `threaded_workload`
const WORKLOAD_THREADS: usize = 4;

type Records = Rc<RefCell<Vec<TraceRecord>>>;

fn traced(program: &str, args: &[&str]) -> (Monitor, Records) {
    let mut cmd = Command::new(program);
    cmd.args(args).stdout(Stdio::null());
    let records = Rc::new(RefCell::new(Vec::new()));
    let monitor = Monitor::new(cmd).with_sink(Rc::clone(&records));
    (monitor, records)
}

fn exits(records: &[TraceRecord]) -> Vec<(i32, i32)> {
    records
        .iter()
        .filter_map(|record| match *record {
            TraceRecord::Exit { id, exit_code } => Some((id, exit_code)),
            _ => None,
        })
        .collect()
}

#[test]
#[serial]
fn test_trace_true_exits_once() {
    let (mut monitor, records) = traced("true", &[]);

    monitor.start().unwrap();
    let root = monitor.root().unwrap().as_raw();
    monitor.run().unwrap();

    assert!(monitor.is_finished());
    assert_eq!(monitor.exit_code(), Some(0));
    assert_eq!(exits(&records.borrow()), vec![(root, 0)]);
}

#[test]
#[serial]
fn test_exit_code_preserved() {
    let (mut monitor, _) = traced("sh", &["-c", "exit 42"]);

    monitor.start().unwrap();
    monitor.run().unwrap();

    assert_eq!(monitor.exit_code(), Some(42));
}

#[test]
#[serial]
fn test_read_callback_matches_entries() {
    let (mut monitor, records) = traced("cat", &["/dev/null"]);
    let read = libc::SYS_read as u64;
    let calls = Rc::new(RefCell::new(Vec::new()));
    let seen = Rc::clone(&calls);
    monitor.add_syscall_callback(read, move |nr| seen.borrow_mut().push(nr));

    monitor.start().unwrap();
    monitor.run().unwrap();

    let entries = records
        .borrow()
        .iter()
        .filter(|record| {
            matches!(record, TraceRecord::SyscallEntry { syscall_number, .. } if *syscall_number == read)
        })
        .count();
    assert!(entries >= 1);
    assert_eq!(calls.borrow().len(), entries);
    assert!(calls.borrow().iter().all(|&nr| nr == read));
}

#[test]
#[serial]
fn test_fork_is_followed() {
    let (mut monitor, records) = traced("sh", &["-c", "/bin/true; exit 3"]);

    monitor.start().unwrap();
    let root = monitor.root().unwrap().as_raw();
    monitor.run().unwrap();

    let records = records.borrow();
    let children: Vec<i32> = records
        .iter()
        .filter_map(|record| match *record {
            TraceRecord::NewThread { id, .. } => Some(id),
            _ => None,
        })
        .collect();
    assert!(!children.is_empty(), "no child traced: {:?}", records);

    // a child's new_thread record comes before anything else about it
    for child in &children {
        let first = records.iter().position(|record| record.id() == *child).unwrap();
        assert!(matches!(records[first], TraceRecord::NewThread { .. }));
    }

    // every traced thread exited, the root last
    assert_eq!(exits(&records).len(), children.len() + 1);
    assert_eq!(*records.last().unwrap(), TraceRecord::Exit { id: root, exit_code: 3 });
    assert_eq!(monitor.exit_code(), Some(3));
}

#[test]
#[serial]
fn test_no_follow_forks_sees_root_only() {
    let (monitor, records) = traced("sh", &["-c", "/bin/true; exit 0"]);
    let mut monitor = monitor.with_config(MonitorConfig::new().follow_forks(false));

    monitor.start().unwrap();
    let root = monitor.root().unwrap().as_raw();
    monitor.run().unwrap();

    let records = records.borrow();
    assert!(records.iter().all(|record| record.id() == root));
    assert_eq!(exits(&records), vec![(root, 0)]);
}

/// Exit records per id, and the ids announced by `new_thread` records
fn lifecycle_summary(records: &[TraceRecord]) -> (BTreeMap<i32, usize>, Vec<i32>) {
    let mut exits = BTreeMap::new();
    let mut created = Vec::new();
    for record in records {
        match *record {
            TraceRecord::Exit { id, .. } => *exits.entry(id).or_insert(0) += 1,
            TraceRecord::NewThread { id, .. } => created.push(id),
            TraceRecord::SyscallEntry { .. } => {}
        }
    }
    (exits, created)
}

#[test]
#[serial]
fn test_fork_followed_from_spawned_thread() {
    // the tracer is the thread that spawned the root, not the main thread
    let outcome = thread::spawn(|| {
        let (mut monitor, records) = traced("sh", &["-c", "/bin/true; exit 3"]);
        monitor.start().map_err(|e| e.to_string())?;
        monitor.run().map_err(|e| e.to_string())?;
        let records = records.borrow().clone();
        Ok::<_, String>((monitor.exit_code(), records))
    })
    .join()
    .unwrap();

    let (exit_code, records) = outcome.unwrap();
    assert_eq!(exit_code, Some(3));
    let (exits, created) = lifecycle_summary(&records);
    assert!(!created.is_empty());
    assert_eq!(exits.len(), created.len() + 1);
    assert!(exits.values().all(|&count| count == 1));
}

/// Started by `test_threads_are_followed` inside a traced copy of this binary
#[test]
#[ignore = "workload traced by test_threads_are_followed"]
fn threaded_workload() {
    let workers: Vec<_> = (0..WORKLOAD_THREADS)
        .map(|_| thread::spawn(|| std::fs::metadata("/").is_ok()))
        .collect();
    for worker in workers {
        assert!(worker.join().unwrap());
    }
}

#[test]
#[serial]
fn test_threads_are_followed() {
    let exe = std::env::current_exe().unwrap();
    let mut cmd = Command::new(exe);
    cmd.args(["threaded_workload", "--exact", "--ignored", "--test-threads=1"])
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    let records = Rc::new(RefCell::new(Vec::new()));
    let mut monitor = Monitor::new(cmd).with_sink(Rc::clone(&records));

    monitor.start().unwrap();
    let root = monitor.root().unwrap().as_raw();
    monitor.run().unwrap();

    assert_eq!(monitor.exit_code(), Some(0));
    let records = records.borrow();
    let (exits, created) = lifecycle_summary(&records);

    // the harness may add threads of its own on top of the workload's
    assert!(created.len() >= WORKLOAD_THREADS, "only {} threads traced", created.len());
    for id in &created {
        assert_eq!(exits.get(id), Some(&1), "thread {} exit records", id);
    }
    assert_eq!(exits.get(&root), Some(&1));
    assert_eq!(exits.len(), created.len() + 1);
}

#[test]
#[serial]
fn test_piped_stdout_is_readable_after_run() {
    let mut cmd = Command::new("echo");
    cmd.arg("potion").stdout(Stdio::piped());
    let mut monitor = Monitor::new(cmd);

    monitor.start().unwrap();
    monitor.run().unwrap();

    let mut output = String::new();
    monitor
        .backend_mut()
        .child_mut()
        .and_then(|child| child.stdout.take())
        .unwrap()
        .read_to_string(&mut output)
        .unwrap();
    assert_eq!(output, "potion\n");
}

#[test]
#[serial]
fn test_missing_binary_fails_to_spawn() {
    let (mut monitor, _) = traced("/nonexistent/potion-test-binary", &[]);

    let err = monitor.start().unwrap_err();
    assert!(matches!(err, MonitorError::SpawnFailed(_)));
    assert!(matches!(monitor.run(), Err(MonitorError::NotStarted)));
}
