#![no_main]

use libfuzzer_sys::fuzz_target;
use protocol_wire::Request;

fuzz_target!(|data: &[u8]| {
    if let Ok((request, consumed)) = Request::parse(data) {
        assert!(consumed <= data.len());
        // Every argument must be a slice of the input.
        for arg in &request.args {
            assert!(arg.len() <= data.len());
        }
    }
});
