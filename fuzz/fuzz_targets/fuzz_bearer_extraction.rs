#![no_main]

use http::HeaderValue;
use identity_gateway::gate::{extract_bearer, requires_auth, Operation};
use identity_gateway::Environment;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(value) = HeaderValue::from_bytes(data) {
        let _ = extract_bearer(Some(&value));
    }

    if let Ok(path) = std::str::from_utf8(data) {
        let _ = requires_auth(Operation::Rpc { path }, Environment::Production);
        let _ = requires_auth(
            Operation::Http {
                method: "GET",
                path,
            },
            Environment::Development,
        );
    }
});
