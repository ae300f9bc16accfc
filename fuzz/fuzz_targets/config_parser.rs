#![no_main]

use libfuzzer_sys::fuzz_target;
use muestreo::config::AgentConfig;

fuzz_target!(|data: &[u8]| {
    // Configuration parsing must reject bad input with an error, never a
    // panic.
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = AgentConfig::from_json(input);
    }
});
