/*
 * main.rs
 *
 * Parse args, call runner, exit with its code. Boring on purpose.
 * The interesting stuff is in runner.rs.
 *
 * Quiet unless -v: without a subscriber the tracing macros go nowhere. The
 * only unconditional output is usage on 101/102, and clap's help/version.
 */

use std::io::IsTerminal;

use maxtime::args::{self, Cli};
use maxtime::error::MaxtimeError;
use maxtime::runner::{RunConfig, run_command};
use tracing_subscriber::EnvFilter;

/* tracing filter override, used only with -v */
const LOG_ENV: &str = "MAXTIME_LOG";

fn main() {
    std::process::exit(i32::from(run_main()));
}

fn run_main() -> u8 {
    let args = match args::parse_from(std::env::args_os()) {
        Ok(Cli::Run(args)) => args,
        Ok(Cli::Info(info)) => {
            let _ = info.print();
            return 0;
        }
        Err(e) => return usage_error(&e),
    };

    let config = match RunConfig::from_args(&args) {
        Ok(config) => config,
        Err(e @ MaxtimeError::TooFewArguments) => return usage_error(&e),
        Err(e) => {
            if args.verbose {
                init_logging();
                tracing::error!("{e}");
            }
            return e.exit_code();
        }
    };

    if config.verbose {
        init_logging();
    }

    match run_command(&config) {
        Ok(result) => {
            let outcome = result.outcome();
            tracing::debug!(
                pid = result.pid(),
                elapsed_ms = result.elapsed().as_millis(),
                ?outcome,
                "done"
            );
            outcome.exit_code()
        }
        Err(e) => {
            tracing::error!("{e}");
            e.exit_code()
        }
    }
}

fn usage_error(err: &MaxtimeError) -> u8 {
    eprintln!("maxtime: {err}");
    eprintln!("{}", args::usage());
    eprintln!("Try 'maxtime --help' for more information.");
    err.exit_code()
}

/* stderr, no timestamps, no target */
fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .without_time()
        .with_target(false)
        .try_init();
}
