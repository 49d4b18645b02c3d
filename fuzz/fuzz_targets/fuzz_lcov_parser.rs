#![no_main]

use diffcov_adapters_coverage::{parse_lcov_with_strip, to_raw_units};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Errors are expected; panics are not.
        let strip = vec!["/build".to_string()];
        if let Ok(map) = parse_lcov_with_strip(text, &strip) {
            for unit in to_raw_units(&map) {
                assert!(unit.lines.iter().all(|l| l.branches_covered <= l.branches_total));
            }
        }
    }
});
