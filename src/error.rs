/*
 * error.rs
 *
 * Exit codes 101-110 are the contract with calling scripts. Anything above
 * 100 means "maxtime itself is reporting", the rest is the command's own code.
 *
 * Don't renumber them. Scripts test for 105 and 106 by value.
 */

use thiserror::Error;

use crate::process::SpawnError;
use crate::timer::TimerError;

/// exit codes reserved by maxtime. don't change these.
pub mod exit_codes {
    /// Fewer than two operands (timeout + command)
    pub const TOO_FEW_ARGUMENTS: u8 = 101;
    /// Unknown flag before the timeout operand
    pub const INVALID_OPTION: u8 = 102;
    /// Child-termination disposition could not be reset
    pub const SIGNAL_SETUP: u8 = 103;
    /// Process creation failed
    pub const FORK_FAILED: u8 = 104;
    /// Target program could not be executed (not found, not executable)
    pub const EXEC_FAILED: u8 = 105;
    /// Command was terminated: timed out or killed by a signal
    pub const TERMINATED: u8 = 106;
    /// Allocation failure
    pub const OUT_OF_MEMORY: u8 = 107;
    /// Timeout operand isn't a number
    pub const INVALID_TIMEOUT: u8 = 108;
    /// Timeout operand is zero or negative
    pub const NON_POSITIVE_TIMEOUT: u8 = 109;
    /// Timer could not be armed
    pub const TIMER_FAILED: u8 = 110;

    /// Lowest code maxtime reserves for itself. Command codes at or above
    /// this value can't be told apart from ours.
    pub const RESERVED_MIN: u8 = TOO_FEW_ARGUMENTS;
    /// Highest reserved code.
    pub const RESERVED_MAX: u8 = TIMER_FAILED;
}

/* everything that can stop a run before the command reports a status */
#[derive(Debug, Error)]
pub enum MaxtimeError {
    #[error("too few arguments")]
    TooFewArguments,
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("timeout is not a valid number: {0}")]
    InvalidTimeout(String),
    #[error("timeout must be positive: {0}")]
    NonPositiveTimeout(String),
    #[error("cannot install SIGCHLD disposition: errno {0}")]
    SignalSetup(i32),
    #[error("out of memory")]
    OutOfMemory,
    #[error(transparent)]
    Spawn(#[from] SpawnError),
    #[error("cannot arm timer: {0}")]
    Timer(#[from] TimerError),
    #[error("cannot wait for child: errno {0}")]
    Wait(i32),
}

impl MaxtimeError {
    /* map errors to exit codes. 104 vs 105 matters to scripts. */
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::TooFewArguments => exit_codes::TOO_FEW_ARGUMENTS,
            Self::InvalidOption(_) => exit_codes::INVALID_OPTION,
            Self::InvalidTimeout(_) => exit_codes::INVALID_TIMEOUT,
            Self::NonPositiveTimeout(_) => exit_codes::NON_POSITIVE_TIMEOUT,
            Self::SignalSetup(_) => exit_codes::SIGNAL_SETUP,
            Self::OutOfMemory => exit_codes::OUT_OF_MEMORY,
            Self::Spawn(e) => match e {
                SpawnError::Fork(_) => exit_codes::FORK_FAILED,
                SpawnError::OutOfMemory => exit_codes::OUT_OF_MEMORY,
                SpawnError::Exec { .. } | SpawnError::InvalidArg => exit_codes::EXEC_FAILED,
            },
            Self::Timer(_) => exit_codes::TIMER_FAILED,
            // the child exists but we lost track of it: no useful status
            Self::Wait(_) => exit_codes::TERMINATED,
        }
    }
}

pub type Result<T> = core::result::Result<T, MaxtimeError>;
