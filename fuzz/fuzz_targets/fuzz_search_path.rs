#![no_main]

use libfuzzer_sys::fuzz_target;

/// Search paths come from the environment; cap them so pathological inputs
/// cannot drive huge allocations.
const MAX_INPUT_SIZE: usize = 64 * 1024;

const CHECKSUM: &str = "ac37ec46683600f808cdd41eac1d55cd";

fuzz_target!(|data: &[u8]| {
    let data = &data[..data.len().min(MAX_INPUT_SIZE)];
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    for separator in [':', ';'] {
        let entries = hts_ref::tokenize_with_separator(text, separator);
        assert_eq!(
            entries.last().map(|entry| entry.template()),
            Some(hts_ref::IMPLICIT_FALLBACK)
        );
        for entry in &entries {
            let expanded = hts_ref::expand(entry.template(), CHECKSUM);
            assert!(expanded.len() <= entry.template().len() + CHECKSUM.len() + 1);
        }
    }

    // Any text is a valid template; output stays bounded by the inputs.
    let expanded = hts_ref::expand(text, CHECKSUM);
    assert!(expanded.len() <= text.len() + CHECKSUM.len() + 1);
});
