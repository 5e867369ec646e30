//! Fuzz target: manifest path normalisation and wildcard matching.
//!
//! The first line of the input is a manifest path, the rest a candidate
//! guest path. Compilation must never fail on a normalised path, and a
//! wildcard match never crosses a directory boundary the pattern lacks.
#![no_main]

use libfuzzer_sys::fuzz_target;
use vmprobe_scanner::{normalize_path, PathPattern};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let (raw, candidate) = text.split_once('\n').unwrap_or((text, ""));

    let normalized = normalize_path(raw);
    assert!(normalized.starts_with('/'));

    let pattern = PathPattern::compile(raw).expect("escaped patterns always compile");
    assert!(pattern.prefix_dir().starts_with('/'));
    if pattern.matches(candidate) {
        assert_eq!(
            candidate.matches('/').count(),
            pattern.normalized().matches('/').count(),
            "'*' must not match '/'"
        );
    }
});
