#![no_main]

use identity_gateway::{AuthSecret, TokenService};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(token) = std::str::from_utf8(data) {
        let tokens = TokenService::new(AuthSecret::new("fuzz-secret"));
        let _ = tokens.validate(token);
    }
});
