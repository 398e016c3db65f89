/*
 * runner.rs
 *
 * Spawn child, watch clock, kill if needed. All the tricky bits live here.
 *
 *   Idle -> Spawned -> Waiting -> NormalExit
 *                              -> TimedOut
 *
 * The wait is a select over two things: the exit watcher's message and the
 * deadline. The watcher sits in waitid(WNOWAIT), so when it reports, the child
 * is a zombie we haven't reaped yet. That is what makes the race safe:
 * - child exits first: we disarm the timer, then reap. Disarm and fire are
 *   one CAS, so the timer can't sneak in afterwards.
 * - deadline first: killed_by_timeout is set (timer FIRED) before any
 *   signal goes out. Whatever the reap sees later, the answer is 106.
 * - both at once: right at the deadline the child is checked directly with
 *   waitid(WNOHANG | WNOWAIT). Already dead means a normal exit, even if the
 *   watcher hasn't been scheduled yet. Past that point a pid we haven't
 *   reaped can't be recycled, so the TERM lands on our own zombie at worst.
 *
 * SIGCHLD is reset to SIG_DFL before the spawn. With SIGCHLD ignored the
 * kernel reaps for us and the waits below would never see our child.
 *
 * Without -w we don't hang around after escalation: TERM (and KILL) are
 * out, the answer is 106, whatever the child does next is its business.
 */

use std::thread;
use std::time::{Duration, Instant};

use crate::args::Args;
use crate::duration::parse_timeout;
use crate::error::{MaxtimeError, Result};
use crate::outcome::Outcome;
use crate::process::{ChildExit, ChildProcess, ChildState, WaitStatus};
use crate::signal::{self, Signal, SignalTarget};
use crate::timer::{DeadlineTimer, TimerError};

/// Pause between TERM and KILL with `-k`. Not configurable.
pub const GRACE_INTERVAL: Duration = Duration::from_millis(100);

/* runtime config built from CLI args. immutable once built. */
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub timeout: Duration,        /* wall-clock limit, positive */
    pub use_process_group: bool,  /* -g: own group, signal the group */
    pub force_kill: bool,         /* -k: KILL after the grace interval */
    pub verbose: bool,            /* -v: diagnostics on stderr */
    pub wait_for_child: bool,     /* -w: reap even after a timeout */
    pub command: String,          /* program, looked up in PATH */
    pub args: Vec<String>,        /* its arguments */
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            use_process_group: false,
            force_kill: false,
            verbose: false,
            wait_for_child: false,
            command: String::new(),
            args: Vec::new(),
        }
    }
}

impl RunConfig {
    /* build config from CLI args. fails if operands are missing or the timeout is bogus. */
    pub fn from_args(args: &Args) -> Result<Self> {
        let [timeout, command, rest @ ..] = args.operands.as_slice() else {
            return Err(MaxtimeError::TooFewArguments);
        };

        let timeout = parse_timeout(timeout)?;

        Ok(Self {
            timeout,
            use_process_group: args.process_group,
            force_kill: args.force_kill,
            verbose: args.verbose,
            wait_for_child: args.wait,
            command: command.clone(),
            args: rest.to_vec(),
        })
    }
}

/// Where the controller is. Logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Spawned,
    Waiting,
    NormalExit,
    TimedOut,
}

/// What the timeout path did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escalation {
    pub target: SignalTarget,
    pub term_delivered: bool,
    pub kill_sent: bool,
}

/* what happened when we ran the command */
#[derive(Debug)]
pub enum RunResult {
    Completed {
        pid: libc::pid_t,
        state: ChildState,
        elapsed: Duration,
    },
    TimedOut {
        pid: libc::pid_t,
        escalation: Escalation,
        /* None unless the child was reaped (with -w, or it died right away) */
        state: Option<ChildState>,
        elapsed: Duration,
    },
}

impl RunResult {
    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            Self::Completed { state, .. } => Outcome::classify(Some(*state), false),
            Self::TimedOut { state, .. } => Outcome::classify(*state, true),
        }
    }

    #[must_use]
    pub fn exit_code(&self) -> u8 {
        self.outcome().exit_code()
    }

    #[must_use]
    pub fn pid(&self) -> libc::pid_t {
        match self {
            Self::Completed { pid, .. } | Self::TimedOut { pid, .. } => *pid,
        }
    }

    #[must_use]
    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Completed { elapsed, .. } | Self::TimedOut { elapsed, .. } => *elapsed,
        }
    }
}

/// Owns the timer and the child for one run.
pub struct Supervisor<'a> {
    config: &'a RunConfig,
    timer: DeadlineTimer,
    state: RunState,
}

impl<'a> Supervisor<'a> {
    #[must_use]
    pub fn new(config: &'a RunConfig) -> Self {
        Self {
            config,
            timer: DeadlineTimer::new(),
            state: RunState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> RunState {
        self.state
    }

    fn transition(&mut self, next: RunState) {
        tracing::debug!(from = ?self.state, to = ?next, "state");
        self.state = next;
    }

    /// Spawn, arm, wait, escalate if needed.
    ///
    /// # Errors
    ///
    /// Anything that happens before the command can report a status:
    /// SIGCHLD setup, spawn/exec failure, timer setup, wait failure.
    pub fn run(mut self) -> Result<RunResult> {
        let config = self.config;
        let start = Instant::now();

        signal::reset_child_disposition().map_err(MaxtimeError::SignalSetup)?;

        let mut child =
            ChildProcess::spawn(&config.command, &config.args, config.use_process_group)?;
        tracing::debug!(pid = child.id(), group = ?child.group(), "spawned {}", config.command);
        self.transition(RunState::Spawned);

        let spec = match self.timer.arm(config.timeout) {
            Ok(spec) => spec,
            Err(e) => {
                abandon(&mut child, config.use_process_group);
                return Err(e.into());
            }
        };
        tracing::info!("setting timer to {spec} seconds");

        let exits = match child.watch_exit() {
            Ok(rx) => rx,
            Err(e) => {
                abandon(&mut child, config.use_process_group);
                return Err(TimerError::Install(e).into());
            }
        };
        self.transition(RunState::Waiting);

        let woke = self.timer.wait_for(&exits, || exit_notice(&child));
        let exited = match woke {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                abandon(&mut child, config.use_process_group);
                return Err(e.into());
            }
        };

        /* the exit was seen first, but only a successful disarm makes it a normal exit */
        if exited && self.timer.disarm() {
            return self.finish_exited(&mut child, start);
        }

        let (escalation, reaped) = self.escalate(&mut child);
        self.transition(RunState::TimedOut);
        tracing::info!("child was killed");

        /* without -w: collect it only if it is already gone */
        let state = reaped.or_else(|| child.try_wait());

        Ok(RunResult::TimedOut {
            pid: child.id(),
            escalation,
            state,
            elapsed: start.elapsed(),
        })
    }

    /* child went first: reap it and classify */
    fn finish_exited(&mut self, child: &mut ChildProcess, start: Instant) -> Result<RunResult> {
        let state = match child.wait().map_err(|e| MaxtimeError::Wait(e.0))? {
            WaitStatus::Reaped(state) => state,
            WaitStatus::AlreadyReaped => return Err(MaxtimeError::Wait(libc::ECHILD)),
        };

        match state {
            ChildState::Exited(code) => {
                self.transition(RunState::NormalExit);
                tracing::info!("child exited with status {code}");
                if self.config.verbose && Outcome::Completed(code).is_ambiguous() {
                    tracing::warn!("command exit code {code} overlaps maxtime's reserved codes");
                }
            }
            ChildState::Signaled(sig) => {
                self.transition(RunState::TimedOut);
                tracing::info!("child was killed by signal {sig}");
            }
        }

        Ok(RunResult::Completed {
            pid: child.id(),
            state,
            elapsed: start.elapsed(),
        })
    }

    /*
     * deadline fired. the timer is FIRED before anything below runs, so
     * killed_by_timeout is already true no matter how the child ends.
     */
    fn escalate(&self, child: &mut ChildProcess) -> (Escalation, Option<ChildState>) {
        let config = self.config;
        let group = config.use_process_group;
        let target = child.target(group);

        tracing::info!("caught deadline, killing child process {target}");
        tracing::info!("sending TERM");
        let term_delivered = child.signal(Signal::Term, group);

        let mut kill_sent = false;
        if term_delivered && config.force_kill {
            thread::sleep(GRACE_INTERVAL);
            tracing::info!("sending KILL");
            /* unconditional: a dead target just makes this a no-op */
            let _ = child.signal(Signal::Kill, group);
            kill_sent = true;
        }

        let mut reaped = None;
        if config.wait_for_child {
            tracing::info!("waiting for child to finish..");
            match child.wait() {
                Ok(WaitStatus::Reaped(state)) => reaped = Some(state),
                Ok(WaitStatus::AlreadyReaped) => {}
                Err(e) => tracing::warn!("wait after escalation failed: {e}"),
            }
        }

        let escalation = Escalation {
            target,
            term_delivered,
            kill_sent,
        };
        (escalation, reaped)
    }
}

/* the watcher's message may still be in flight; ask the kernel directly */
fn exit_notice(child: &ChildProcess) -> Option<ChildExit> {
    child.has_exited().then(|| ChildExit { pid: child.id() })
}

/* setup failed after the spawn: don't leave the command running unsupervised */
fn abandon(child: &mut ChildProcess, group: bool) {
    let _ = child.signal(Signal::Kill, group);
    let _ = child.wait();
}

/// Spawn command and enforce timeout.
///
/// Errors: SIGCHLD setup, spawn or exec failure, timer setup, wait failure.
pub fn run_command(config: &RunConfig) -> Result<RunResult> {
    Supervisor::new(config).run()
}
