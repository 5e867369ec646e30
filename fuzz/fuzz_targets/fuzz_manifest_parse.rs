//! Fuzz target: manifest JSON parsing and pattern compilation.
//!
//! Arbitrary bytes must never panic the parser, and every manifest that
//! parses must compile into a matcher.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vmprobe_core::Manifest;
use vmprobe_scanner::ManifestMatcher;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(manifest) = Manifest::from_json(text) else {
        return;
    };
    let matcher = ManifestMatcher::new(&manifest).expect("parsed manifests must compile");
    assert_eq!(matcher.len(), manifest.len());
});
