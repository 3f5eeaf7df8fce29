#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|frame: &[u8]| {
    if let Ok(w) = trickler_core::decode_frame(frame) {
        // eight characters from '.'..='9' cannot spell anything unbounded
        assert!(w.is_finite());
        assert!(w.abs() <= 1.0e8);
    }
});
