//! Fuzz testing for request validation functions.
//!
//! Ensures the validators never panic on arbitrary input: paths, content
//! types and request bodies all come straight from untrusted clients.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the validation fuzz target
//! cargo +nightly fuzz run fuzz_validation
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_validation -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `validate_endpoint_path`: endpoint path rules
//! - `validate_json_content_type`: Content-Type header parsing
//! - `validate_json_body`: JSON body parsing
//! - `RateLimitKey::new`: key construction from identity and path

#![no_main]

use axum::http::{HeaderMap, HeaderValue, header};
use courtside_gateway::ratelimit::RateLimitKey;
use courtside_gateway::validation::{
    validate_endpoint_path,
    validate_json_body,
    validate_json_content_type,
};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Raw bytes are a request body
    let _ = validate_json_body(data);

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = validate_endpoint_path(s);

        if let Ok(value) = HeaderValue::from_str(s) {
            let mut headers = HeaderMap::new();
            headers.insert(header::CONTENT_TYPE, value);
            let _ = validate_json_content_type(&headers);
        }

        // Split into identity and path at the first '/'
        let (identity, path) = s.split_at(s.find('/').unwrap_or(s.len()));
        let _ = RateLimitKey::new(identity, path);
    }
});
