/*
 * fuzz_targets/parse_timeout.rs
 *
 * fuzz target for timeout parsing. parse_timeout must never panic, and
 * anything it accepts must be a positive duration on the microsecond grid.
 *
 * edge cases: "", "1e309", "-0", "1.2.3", "0.0000001", unicode, "nan", "inf"
 */

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    /* invalid UTF-8 can't come from a shell argument we accept anyway */
    if let Ok(s) = core::str::from_utf8(data) {
        if let Ok(d) = maxtime::duration::parse_timeout(s) {
            assert!(!d.is_zero());
            assert_eq!(d.subsec_nanos() % 1000, 0);
        }
    }
});
