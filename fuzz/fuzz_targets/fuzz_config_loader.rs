#![no_main]
use libfuzzer_sys::fuzz_target;

// Arbitrary TOML must either fail to parse, fail validation, or load; never panic.
fuzz_target!(|data: &str| {
    if let Ok(cfg) = trickler_config::load_toml(data) {
        let _: eyre::Result<()> = cfg.validate();
    }
});
