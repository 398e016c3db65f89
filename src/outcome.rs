/*
 * outcome.rs
 *
 * Final state -> one exit code.
 *
 * Exited(code), not timed out: pass the code through untouched.
 * Timed out, or died from any signal: 106. We never invent 128+n; a code
 * above 127 only shows up when the command itself exits with one.
 *
 * Known ambiguity: a command exiting 101..=110 looks exactly like one of
 * our own errors. Scripts that care should keep their commands under 101.
 */

use crate::error::exit_codes;
use crate::process::ChildState;

/// How the run ended, as far as the exit code is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The command exited on its own with this code.
    Completed(i32),
    /// The deadline fired. `killed_by_timeout` wins over whatever the
    /// final wait saw.
    TimedOut,
    /// The command died from a signal nobody here sent.
    Signaled(i32),
}

impl Outcome {
    /// Classify the final observation.
    ///
    /// `state` is `None` when the child was never reaped by us (escalation
    /// without waiting) or was collected elsewhere.
    #[must_use]
    pub fn classify(state: Option<ChildState>, killed_by_timeout: bool) -> Self {
        match (killed_by_timeout, state) {
            (true, _) => Self::TimedOut,
            (false, Some(ChildState::Exited(code))) => Self::Completed(code),
            (false, Some(ChildState::Signaled(sig))) => Self::Signaled(sig),
            /* no status and no timeout: nothing useful came back */
            (false, None) => Self::TimedOut,
        }
    }

    /* exit code for maxtime's own process */
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Completed(code) => (code & 0xFF) as u8,
            Self::TimedOut | Self::Signaled(_) => exit_codes::TERMINATED,
        }
    }

    /// Whether a command's own code collides with a reserved maxtime code.
    #[must_use]
    pub fn is_ambiguous(self) -> bool {
        matches!(self, Self::Completed(code)
            if (i32::from(exit_codes::RESERVED_MIN)..=i32::from(exit_codes::RESERVED_MAX)).contains(&code))
    }
}
