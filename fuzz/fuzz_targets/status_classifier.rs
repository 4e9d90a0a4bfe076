#![no_main]

use libfuzzer_sys::fuzz_target;
use nix::unistd::Pid;
use potion::classify;

fuzz_target!(|data: [u8; 8]| {
    let pid = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let status = i32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    let event = classify(Pid::from_raw(pid), status);
    assert_eq!(event.pid().as_raw(), pid);
    let _ = event.exit_code();
});
