#![no_main]

use libfuzzer_sys::fuzz_target;

use cachefill::populate::fuzzing::parse_status_line;

fuzz_target!(|data: &[u8]| {
    let line = String::from_utf8_lossy(data);
    let _ = parse_status_line(line.as_ref());
});
