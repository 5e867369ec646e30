//! Fuzz target: JSON deserialization and validation of `ScanRequestBody`.
//!
//! A request that validates must carry a VM identifier usable as a single
//! path component.

#![no_main]

use libfuzzer_sys::fuzz_target;
use vmprobe_core::{ScanRequest, ScanRequestBody};

fuzz_target!(|data: &[u8]| {
    let Ok(body) = serde_json::from_slice::<ScanRequestBody>(data) else {
        return;
    };
    if let Ok(request) = ScanRequest::try_from(body) {
        let id = request.vm_id.as_str();
        assert!(!id.is_empty());
        assert!(!id.contains('/') && !id.contains('\\') && !id.contains('\0'));
        assert!(id != "." && id != "..");
    }
});
