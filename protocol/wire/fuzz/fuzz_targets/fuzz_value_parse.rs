#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use protocol_wire::Value;

fuzz_target!(|data: &[u8]| {
    if let Ok((value, consumed)) = Value::parse(data) {
        assert!(consumed <= data.len());
        // Decoded values must re-encode to what was consumed.
        let mut out = BytesMut::new();
        value.put(&mut out);
        assert_eq!(&out[..], &data[..consumed]);
    }
});
