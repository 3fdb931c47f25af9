//! Fuzz the upload inspection path.
//!
//! Arbitrary bytes are fed through signature detection, the pattern scan,
//! and header-only dimension decoding. None of them may panic, and a buffer
//! that passes validation must start with a known signature.
//!
//! ```bash
//! cargo +nightly fuzz run fuzz_payload -- -max_total_time=60
//! ```

#![no_main]

use inference_gate::validation::{
    PayloadValidator, decode_dimensions, detect_signature, find_suspicious_pattern,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let outcome = PayloadValidator::new().validate(data);

    if let Ok(signature) = outcome {
        assert_eq!(detect_signature(data), Some(signature));
        assert!(find_suspicious_pattern(data).is_none());
        let _ = decode_dimensions(data);
    }
});
