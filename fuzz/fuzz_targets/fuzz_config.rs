//! Fuzz target: `SystemConfig::from_json`
//!
//! Any byte string must either be rejected or yield a config that passes
//! its own validation.
//!
//! cargo fuzz run fuzz_config

#![no_main]

use charger::config::SystemConfig;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    if let Ok(config) = SystemConfig::from_json(text) {
        assert!(config.validate().is_ok());
    }
});
