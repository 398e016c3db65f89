/*
 * fuzz_targets/parse_args.rs
 *
 * fuzz target for CLI argument parsing. parse_from plus RunConfig::from_args
 * must never panic, and every failure must map to a reserved exit code.
 *
 * edge cases: "-gkvw", "--unknown", "--", "-1", "-0.5", very long args
 */

#![no_main]

use libfuzzer_sys::fuzz_target;
use maxtime::args::{self, Cli};
use maxtime::error::exit_codes;
use maxtime::runner::RunConfig;

fuzz_target!(|data: &[u8]| {
    /* split input on null bytes to simulate multiple arguments */
    let argv: Vec<String> = core::iter::once("maxtime".to_string())
        .chain(
            data.split(|&b| b == 0)
                .filter_map(|chunk| core::str::from_utf8(chunk).ok())
                .map(String::from),
        )
        .collect();

    let code = match args::parse_from(&argv) {
        /* help/version come back as a value, nothing exits */
        Ok(Cli::Info(_)) => return,
        Ok(Cli::Run(parsed)) => match RunConfig::from_args(&parsed) {
            Ok(config) => {
                assert!(!config.timeout.is_zero());
                return;
            }
            Err(e) => e.exit_code(),
        },
        Err(e) => e.exit_code(),
    };

    assert!((exit_codes::RESERVED_MIN..=exit_codes::RESERVED_MAX).contains(&code));
});
