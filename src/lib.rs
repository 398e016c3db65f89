/*
 * lib.rs
 *
 * Exists mostly for testing. Integration tests need our types, doc tests
 * need a lib. You can drive run_command directly, but the binary is the
 * real interface: scripts read its exit code.
 */

//! # maxtime
//!
//! Run a command under a wall-clock limit. On expiry send TERM (optionally to
//! its whole process group), optionally escalate to KILL, and report one exit
//! code that tells "finished", "terminated" and "never started" apart.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use maxtime::{RunConfig, run_command};
//! use std::time::Duration;
//!
//! let config = RunConfig {
//!     timeout: Duration::from_secs(2),
//!     command: "sleep".to_string(),
//!     args: vec!["5".to_string()],
//!     ..RunConfig::default()
//! };
//! let result = run_command(&config).unwrap();
//! assert_eq!(result.exit_code(), 106);
//! ```

pub mod args;
pub mod duration;
pub mod error;
pub mod outcome;
pub mod process;
pub mod runner;
pub mod signal;
pub mod timer;

pub use args::{Args, Cli};
pub use duration::parse_timeout;
pub use error::{MaxtimeError, Result, exit_codes};
pub use outcome::Outcome;
pub use process::{ChildProcess, ChildState};
pub use runner::{GRACE_INTERVAL, RunConfig, RunResult, run_command};
pub use signal::{Signal, SignalTarget};
pub use timer::DeadlineTimer;
