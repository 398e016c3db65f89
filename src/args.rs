/*
 * args.rs
 *
 * Clap derive macros handle parsing. Four flags and a list of operands.
 *
 * Short flags only, -gkvw. Anything else before the timeout is 102, except
 * clap's own -h/--help and -V/--version.
 *
 * Flags must come before the timeout. trailing_var_arg makes clap stop
 * looking for flags once the first operand shows up, so
 * `maxtime 5 sh -c 'exit 1'` hands -c to sh. allow_negative_numbers lets
 * `maxtime -1 true` through as an operand so the timeout parser can say 109
 * instead of clap calling it an unknown flag.
 *
 * The timeout and command stay in one Vec on purpose: "too few operands" is
 * its own exit code (101) and clap's missing-argument error can't carry it.
 */

use clap::error::{ContextKind, ErrorKind};
use clap::{CommandFactory, Parser};

use crate::error::{MaxtimeError, Result};

#[derive(Parser, Debug)]
#[command(
    name = "maxtime",
    version,
    about = "Run a command with a wall-clock time limit",
    long_about = "Start COMMAND and send it TERM if it is still running after TIMEOUT.\n\n\
                  TIMEOUT is a positive number of seconds, fractions allowed (0.5, 2.25).",
    after_help = "Exit status:\n\
                  101 too few arguments\n\
                  102 invalid option\n\
                  103 could not install signal handler\n\
                  104 could not create child process\n\
                  105 could not execute COMMAND\n\
                  106 COMMAND terminated by timeout or by a signal\n\
                  107 out of memory\n\
                  108 TIMEOUT is not a number\n\
                  109 TIMEOUT is not positive\n\
                  110 could not arm timer\n\
                  the exit status of COMMAND otherwise"
)]
pub struct Args {
    /// Run COMMAND in its own process group and signal the whole group.
    #[arg(short = 'g')]
    pub process_group: bool,

    /// Send KILL shortly after TERM if TERM could be delivered.
    #[arg(short = 'k')]
    pub force_kill: bool,

    /// Diagnose to stderr what maxtime is doing.
    #[arg(short = 'v')]
    pub verbose: bool,

    /// After a timeout, wait until COMMAND has actually terminated.
    #[arg(short = 'w')]
    pub wait: bool,

    /// TIMEOUT, then COMMAND and its arguments.
    #[arg(
        value_name = "TIMEOUT COMMAND [ARG]",
        num_args = 0..,
        trailing_var_arg = true,
        allow_negative_numbers = true
    )]
    pub operands: Vec<String>,
}

/// What the command line asked for.
#[derive(Debug)]
pub enum Cli {
    /// Run a command.
    Run(Args),
    /// `-h` or `-V`: print this and exit 0.
    Info(clap::Error),
}

/// Parse `argv` (program name first).
///
/// # Errors
///
/// [`MaxtimeError::InvalidOption`] for anything clap rejects.
/// Missing operands are not an error here, see [`crate::RunConfig::from_args`].
pub fn parse_from<I, T>(argv: I) -> Result<Cli>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    match Args::try_parse_from(argv) {
        Ok(args) => Ok(Cli::Run(args)),
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            Ok(Cli::Info(e))
        }
        Err(e) => Err(MaxtimeError::InvalidOption(offending_arg(&e))),
    }
}

/* the token clap choked on, or the kind of failure if it didn't say */
fn offending_arg(err: &clap::Error) -> String {
    err.get(ContextKind::InvalidArg)
        .map_or_else(|| err.kind().to_string(), ToString::to_string)
}

/// One-line usage, printed with usage errors.
#[must_use]
pub fn usage() -> String {
    Args::command().render_usage().to_string()
}
