#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Parse and validate arbitrary TOML; errors are fine, panics are not.
    if let Ok(cfg) = filabuf_config::load_toml(data) {
        if cfg.validate().is_ok() {
            // anything that validates must map onto runtime config
            let _ = filabuf_core::BufferConfig::from(&cfg);
        }
    }
});
