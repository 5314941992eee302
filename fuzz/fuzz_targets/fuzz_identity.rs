#![no_main]

use axum::http::{HeaderMap, HeaderValue};
use libfuzzer_sys::fuzz_target;
use rehearsal::security::SessionIdentity;

fuzz_target!(|data: &[u8]| {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_bytes(data) {
        headers.insert("user-agent", value.clone());
        headers.insert("x-forwarded-for", value);
    }
    for trust in [false, true] {
        let subject = SessionIdentity::new(trust).resolve_or_fallback(&headers, None);
        assert!(!subject.as_str().is_empty());
    }
});
