/*
 * signal.rs
 *
 * Two signals, two targets. TERM asks, KILL insists.
 *
 * The target is either the child pid or its process group, one kill(2)
 * either way (a group is the negated pid). Delivery failure is reported,
 * never raised: the child racing us to the exit is the normal case.
 *
 * Also owns the SIGCHLD reset. Some environments start us with SIGCHLD
 * ignored, and then the kernel auto-reaps the child and waitpid blocks until
 * every child is gone. Reset to SIG_DFL before spawning.
 */

use std::fmt;

/* the only signals maxtime ever sends */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Signal {
    Term = libc::SIGTERM,
    Kill = libc::SIGKILL,
}

impl Signal {
    /* get raw signal number */
    #[inline]
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self as i32
    }

    /* short name for diagnostics, "TERM" / "KILL" like kill -l */
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Term => "TERM",
            Self::Kill => "KILL",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Who receives a signal: one process or every process in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalTarget {
    Process(libc::pid_t),
    Group(libc::pid_t),
}

impl SignalTarget {
    /* raw kill(2) argument: negative pid addresses the group */
    #[must_use]
    pub const fn as_kill_arg(self) -> libc::pid_t {
        match self {
            Self::Process(pid) => pid,
            Self::Group(pgid) => -pgid,
        }
    }
}

impl fmt::Display for SignalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process(pid) => write!(f, "{pid}"),
            Self::Group(pgid) => write!(f, "group {pgid}"),
        }
    }
}

/// Send `signal` to `target`. Returns whether the kernel accepted it.
///
/// ESRCH (already gone) and EPERM both come back as `false`.
#[must_use]
pub fn send(target: SignalTarget, signal: Signal) -> bool {
    // SAFETY: kill() is safe with any pid/signal combo, returns -1 on error.
    let ret = unsafe { libc::kill(target.as_kill_arg(), signal.as_raw()) };
    ret == 0
}

/// Reset SIGCHLD to its default disposition.
///
/// # Errors
///
/// Returns the errno from `sigaction` if the disposition can't be installed.
pub fn reset_child_disposition() -> Result<(), i32> {
    // SAFETY: a zeroed sigaction is a valid "no flags, empty mask" value;
    // SIG_DFL is the standard default handler. sigemptyset and sigaction are
    // standard POSIX calls with valid pointers. All ops share the invariant of
    // building and installing one sigaction struct.
    #[allow(clippy::multiple_unsafe_ops_per_block)]
    let ret = unsafe {
        let mut sa: libc::sigaction = core::mem::zeroed();
        sa.sa_sigaction = libc::SIG_DFL;
        sa.sa_flags = 0;
        libc::sigemptyset(&raw mut sa.sa_mask);
        libc::sigaction(libc::SIGCHLD, &sa, core::ptr::null_mut())
    };

    if ret < 0 {
        return Err(std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(libc::EINVAL));
    }
    Ok(())
}
