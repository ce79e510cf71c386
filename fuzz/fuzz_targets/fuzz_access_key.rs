#![no_main]

use comprobantes::core::AccessKey;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(key) = AccessKey::parse(s) {
            // A key that parses has a valid check digit; decomposing it may
            // still fail on impossible dates or unknown codes, never panic.
            assert!(AccessKey::validate(key.as_str()));
            let _ = key.parts();
        }
    }
});
