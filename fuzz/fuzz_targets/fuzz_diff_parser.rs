#![no_main]

use diffcov_adapters_diff::parse_diff_with_meta;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        // Malformed input must come back as an error, never a panic.
        if let Ok(parsed) = parse_diff_with_meta(text) {
            for path in &parsed.binary_files {
                assert!(!parsed.index.contains_file(path));
            }
            for (_, lines) in parsed.index.iter() {
                assert!(lines.iter().all(|&line| line > 0));
            }
        }
    }
});
