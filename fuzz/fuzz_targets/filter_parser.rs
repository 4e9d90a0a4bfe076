#![no_main]

use libfuzzer_sys::fuzz_target;
use potion::filter::SyscallFilter;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        if let Ok(filter) = SyscallFilter::from_expr(input) {
            let _ = filter.syscall_numbers();
        }
    }
});
