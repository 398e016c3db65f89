/*
 * process.rs
 *
 * Spawn the command with posix_spawnp, signal it, reap it.
 *
 * posix_spawnp searches PATH and reports exec failures (ENOENT, EACCES,
 * ENOEXEC) straight back to us as a return value, so "could not execute"
 * is visible in the parent instead of being buried in the child's exit code.
 *
 * posix_spawnattr_t is managed by the C library (opaque on macOS, a struct on
 * linux). RAII wrapper so destroy always runs.
 *
 * Two ways to wait:
 * - waitid(WNOWAIT), in the exit watcher thread and in has_exited(). Sees the
 *   child dead but leaves the zombie in place. The pid can't be recycled
 *   while we decide what happened, so a late TERM/KILL still hits our own
 *   child.
 * - wait(): waitpid(pid). The actual reap. Second call says AlreadyReaped
 *   instead of blocking or failing.
 */

use std::ffi::{CString, c_char};
use std::ptr;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use thiserror::Error;

use crate::signal::{self, Signal, SignalTarget};

unsafe extern "C" {
    /* environ is a global variable pointing to the environment */
    static environ: *const *const c_char;
}

/* spawn errno values that mean "the program itself can't be run" */
const EXEC_ERRNOS: [i32; 8] = [
    libc::ENOENT,
    libc::EACCES,
    libc::ENOEXEC,
    libc::ENOTDIR,
    libc::ELOOP,
    libc::ENAMETOOLONG,
    libc::ETXTBSY,
    libc::E2BIG,
];

/// Why the child could not be started.
#[derive(Debug, Error)]
pub enum SpawnError {
    /// Program not found, not executable, or not a valid image.
    #[error("cannot execute {command}: errno {errno}")]
    Exec { command: String, errno: i32 },
    /// Process creation itself failed (EAGAIN, ENOMEM, ...).
    #[error("cannot create child process: errno {0}")]
    Fork(i32),
    /// Interior NUL byte in the command or an argument.
    #[error("invalid argument: contains a NUL byte")]
    InvalidArg,
    /// argv buffers couldn't be allocated.
    #[error("out of memory building argument list")]
    OutOfMemory,
}

/// waitid/waitpid failed with something other than EINTR or ECHILD.
#[derive(Debug, Error)]
#[error("wait failed: errno {0}")]
pub struct WaitError(pub i32);

/// How the child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Exited(i32),
    Signaled(i32),
}

impl ChildState {
    /* decode a waitpid status word */
    #[must_use]
    pub fn from_raw(status: i32) -> Self {
        if libc::WIFSIGNALED(status) {
            Self::Signaled(libc::WTERMSIG(status))
        } else {
            Self::Exited(libc::WEXITSTATUS(status))
        }
    }
}

/// Result of a reap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    Reaped(ChildState),
    /// Someone (an earlier wait, or the kernel) already collected it.
    AlreadyReaped,
}

/// Sent by the exit watcher once the child has terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: libc::pid_t,
}

/*
 * RAII wrapper for posix_spawnattr_t.
 *
 * The init function may allocate internal storage, destroy frees it.
 * This wrapper ensures cleanup even on early return.
 */
struct SpawnAttr {
    inner: libc::posix_spawnattr_t,
}

impl SpawnAttr {
    fn new() -> Result<Self, i32> {
        // SAFETY: posix_spawnattr_t is plain data (or a pointer) that init
        // fully overwrites; zeroed is a valid placeholder before that.
        let mut attr: libc::posix_spawnattr_t = unsafe { core::mem::zeroed() };
        // SAFETY: attr is a valid pointer location for posix_spawnattr_init to populate
        let ret = unsafe { libc::posix_spawnattr_init(&mut attr) };
        if ret != 0 {
            return Err(ret);
        }
        Ok(Self { inner: attr })
    }

    fn set_flags(&mut self, flags: libc::c_short) -> Result<(), i32> {
        // SAFETY: self.inner was initialized in new()
        let ret = unsafe { libc::posix_spawnattr_setflags(&mut self.inner, flags) };
        if ret != 0 {
            return Err(ret);
        }
        Ok(())
    }

    /* set process group (0 = own group) */
    fn set_pgroup(&mut self, pgroup: libc::pid_t) -> Result<(), i32> {
        // SAFETY: self.inner was initialized in new()
        let ret = unsafe { libc::posix_spawnattr_setpgroup(&mut self.inner, pgroup) };
        if ret != 0 {
            return Err(ret);
        }
        Ok(())
    }

    /* std ignores SIGPIPE at startup; give the child the default back */
    fn set_sigdefault_pipe(&mut self) -> Result<(), i32> {
        // SAFETY: a zeroed sigset_t is valid storage; sigemptyset/sigaddset
        // initialize it and self.inner was initialized in new(). All ops share
        // the invariant of building one sigset and handing it to the attr.
        #[allow(clippy::multiple_unsafe_ops_per_block)]
        let ret = unsafe {
            let mut set: libc::sigset_t = core::mem::zeroed();
            libc::sigemptyset(&mut set);
            libc::sigaddset(&mut set, libc::SIGPIPE);
            libc::posix_spawnattr_setsigdefault(&mut self.inner, &set)
        };
        if ret != 0 {
            return Err(ret);
        }
        Ok(())
    }

    fn as_ptr(&self) -> *const libc::posix_spawnattr_t {
        &self.inner
    }
}

impl Drop for SpawnAttr {
    fn drop(&mut self) {
        // SAFETY: self.inner was initialized in new() and hasn't been destroyed yet
        unsafe {
            libc::posix_spawnattr_destroy(&mut self.inner);
        }
    }
}

/// The spawned command. Exactly one OS process, owned by the runner.
#[derive(Debug)]
pub struct ChildProcess {
    pid: libc::pid_t,
    /* Some(pid) when the child leads its own group */
    group: Option<libc::pid_t>,
    reaped: bool,
}

impl ChildProcess {
    /// Spawn `command` with `args`, searching PATH.
    ///
    /// With `make_new_group` the child becomes leader of a new process group
    /// before exec. If that can't be arranged the command is started in our
    /// group instead and [`ChildProcess::group`] returns `None`.
    ///
    /// # Errors
    ///
    /// [`SpawnError::Exec`] when the program can't be executed,
    /// [`SpawnError::Fork`] when no process could be created.
    pub fn spawn(
        command: &str,
        args: &[String],
        make_new_group: bool,
    ) -> Result<Self, SpawnError> {
        let argv = Argv::new(command, args)?;

        if make_new_group {
            match spawn_raw(&argv, true) {
                Ok(pid) => {
                    return Ok(Self {
                        pid,
                        group: Some(pid),
                        reaped: false,
                    });
                }
                /* setpgid refused in the child: nothing ran yet, go without a group */
                Err(errno) if errno == libc::EPERM || errno == libc::EINVAL => {
                    tracing::warn!(errno, "could not start new process group");
                }
                Err(errno) => return Err(classify_spawn_errno(command, errno)),
            }
        }

        let pid = spawn_raw(&argv, false).map_err(|errno| classify_spawn_errno(command, errno))?;
        Ok(Self {
            pid,
            group: None,
            reaped: false,
        })
    }

    /// Get the process ID
    #[inline]
    #[must_use]
    pub fn id(&self) -> libc::pid_t {
        self.pid
    }

    /// Process group id when the child leads its own group.
    #[inline]
    #[must_use]
    pub fn group(&self) -> Option<libc::pid_t> {
        self.group
    }

    /* group if asked for and we got one, otherwise just the child */
    #[must_use]
    pub fn target(&self, whole_group: bool) -> SignalTarget {
        match (whole_group, self.group) {
            (true, Some(pgid)) => SignalTarget::Group(pgid),
            _ => SignalTarget::Process(self.pid),
        }
    }

    /// Send a signal to the child or its whole group.
    ///
    /// Returns whether delivery succeeded. A reaped child is never signalled:
    /// its pid may already belong to someone else.
    #[must_use]
    pub fn signal(&self, sig: Signal, whole_group: bool) -> bool {
        if self.reaped {
            return false;
        }
        signal::send(self.target(whole_group), sig)
    }

    /// Whether the child has terminated, without reaping it or blocking.
    ///
    /// A reaped child counts as terminated. Wait failures read as "not yet".
    #[must_use]
    pub fn has_exited(&self) -> bool {
        if self.reaped {
            return true;
        }
        exited_pid(self.pid, false).unwrap_or(false)
    }

    /// Start a helper thread that sends one [`ChildExit`] when the child dies.
    ///
    /// If the thread's wait fails it hangs up without sending; the receiver
    /// sees a disconnect, never a made-up exit.
    ///
    /// # Errors
    ///
    /// The thread could not be created.
    pub fn watch_exit(&self) -> std::io::Result<Receiver<ChildExit>> {
        let (tx, rx) = mpsc::channel();
        let pid = self.pid;
        thread::Builder::new()
            .name("maxtime-exit-watch".to_string())
            .spawn(move || match exited_pid(pid, true) {
                /* receiver gone means the runner already decided; fine */
                Ok(_) => {
                    let _ = tx.send(ChildExit { pid });
                }
                Err(e) => tracing::warn!(pid, error = %e, "exit watcher gave up"),
            })?;
        Ok(rx)
    }

    /// Reap the child, blocking until it terminates.
    ///
    /// # Errors
    ///
    /// [`WaitError`] for anything but EINTR (retried) or ECHILD
    /// (reported as [`WaitStatus::AlreadyReaped`]).
    pub fn wait(&mut self) -> Result<WaitStatus, WaitError> {
        if self.reaped {
            return Ok(WaitStatus::AlreadyReaped);
        }

        let mut status: i32 = 0;
        loop {
            // SAFETY: pid is our child from spawn, status is a valid pointer
            let ret = unsafe { libc::waitpid(self.pid, &mut status, 0) };
            if ret == self.pid {
                break;
            }
            match errno() {
                libc::EINTR => continue,
                libc::ECHILD => {
                    self.reaped = true;
                    return Ok(WaitStatus::AlreadyReaped);
                }
                e => return Err(WaitError(e)),
            }
        }

        self.reaped = true;
        Ok(WaitStatus::Reaped(ChildState::from_raw(status)))
    }

    /* non-blocking reap. None while it still runs or if the wait fails */
    pub fn try_wait(&mut self) -> Option<ChildState> {
        if self.reaped {
            return None;
        }

        let mut status: i32 = 0;
        // SAFETY: pid is our child from spawn, status is a valid pointer
        let ret = unsafe { libc::waitpid(self.pid, &mut status, libc::WNOHANG) };
        if ret == self.pid {
            self.reaped = true;
            return Some(ChildState::from_raw(status));
        }
        if ret < 0 && errno() == libc::ECHILD {
            self.reaped = true;
        }
        None
    }

    /// Whether [`ChildProcess::wait`] already collected the child.
    #[inline]
    #[must_use]
    pub fn is_reaped(&self) -> bool {
        self.reaped
    }
}

/* argv as owned C strings plus the NULL-terminated pointer array */
struct Argv {
    strings: Vec<CString>,
    ptrs: Vec<*const c_char>,
}

impl Argv {
    fn new(command: &str, args: &[String]) -> Result<Self, SpawnError> {
        let mut strings: Vec<CString> = Vec::new();
        strings
            .try_reserve_exact(args.len() + 1)
            .map_err(|_| SpawnError::OutOfMemory)?;

        strings.push(CString::new(command).map_err(|_| SpawnError::InvalidArg)?);
        for arg in args {
            strings.push(CString::new(arg.as_str()).map_err(|_| SpawnError::InvalidArg)?);
        }

        let mut ptrs: Vec<*const c_char> = Vec::new();
        ptrs.try_reserve_exact(strings.len() + 1)
            .map_err(|_| SpawnError::OutOfMemory)?;
        ptrs.extend(strings.iter().map(|s| s.as_ptr()));
        ptrs.push(ptr::null());

        Ok(Self { strings, ptrs })
    }

    fn program(&self) -> *const c_char {
        self.strings[0].as_ptr()
    }
}

/* one posix_spawnp attempt, errno on failure */
fn spawn_raw(argv: &Argv, new_group: bool) -> Result<libc::pid_t, i32> {
    let mut attr = SpawnAttr::new()?;

    #[allow(clippy::cast_possible_truncation)]
    let mut flags = libc::POSIX_SPAWN_SETSIGDEF as libc::c_short;
    attr.set_sigdefault_pipe()?;

    if new_group {
        #[allow(clippy::cast_possible_truncation)]
        {
            flags |= libc::POSIX_SPAWN_SETPGROUP as libc::c_short;
        }
        attr.set_pgroup(0)?; /* own group */
    }
    attr.set_flags(flags)?;

    let mut pid: libc::pid_t = 0;
    // SAFETY: argv pointers are valid NUL-terminated strings kept alive by
    // `argv` for the duration of the call, the array is NULL-terminated,
    // attr is an initialized RAII wrapper, environ is the process environment.
    let ret = unsafe {
        libc::posix_spawnp(
            &mut pid,
            argv.program(),
            ptr::null(),
            attr.as_ptr(),
            argv.ptrs.as_ptr().cast::<*mut c_char>(),
            environ.cast::<*mut c_char>(),
        )
    };

    /* RAII: attr is destroyed when it goes out of scope */

    if ret != 0 {
        return Err(ret);
    }
    Ok(pid)
}

fn classify_spawn_errno(command: &str, errno: i32) -> SpawnError {
    if EXEC_ERRNOS.contains(&errno) {
        SpawnError::Exec {
            command: command.to_string(),
            errno,
        }
    } else {
        SpawnError::Fork(errno)
    }
}

/*
 * waitid(WEXITED | WNOWAIT) on one pid: the child stays a zombie.
 * blocking: returns once it has exited. non-blocking: Ok(false) while it runs.
 * ECHILD means someone already reaped it, which counts as exited.
 */
fn exited_pid(pid: libc::pid_t, block: bool) -> Result<bool, WaitError> {
    let mut flags = libc::WEXITED | libc::WNOWAIT;
    if !block {
        flags |= libc::WNOHANG;
    }
    loop {
        // SAFETY: siginfo_t is plain data; zeroed is a valid initial value
        let mut info: libc::siginfo_t = unsafe { core::mem::zeroed() };
        #[allow(clippy::cast_sign_loss)]
        // SAFETY: info is a valid siginfo_t for waitid to fill in; P_PID with
        // our own child's pid, WNOWAIT leaves the child waitable.
        let ret = unsafe { libc::waitid(libc::P_PID, pid as libc::id_t, &mut info, flags) };
        if ret == 0 {
            /* WNOHANG with nothing to report leaves si_pid at zero */
            // SAFETY: info was zeroed and then written by a successful waitid
            let reporter = unsafe { info.si_pid() };
            return Ok(block || reporter != 0);
        }
        match errno() {
            libc::EINTR => continue,
            libc::ECHILD => return Ok(true),
            e => return Err(WaitError(e)),
        }
    }
}

#[inline]
fn errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

/*
 * These are skipped under Miri because posix_spawn* and waitpid are
 * unsupported foreign functions.
 */
#[cfg(test)]
#[cfg(not(miri))]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    /* spin on has_exited; the child must be gone within a few seconds */
    fn until_exited(child: &ChildProcess) {
        let start = Instant::now();
        while !child.has_exited() {
            assert!(start.elapsed() < Duration::from_secs(5), "child never exited");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn test_spawn_true() {
        let mut child = ChildProcess::spawn("true", &[], false).unwrap();
        assert_eq!(
            child.wait().unwrap(),
            WaitStatus::Reaped(ChildState::Exited(0))
        );
    }

    #[test]
    fn test_spawn_exit_code() {
        let args = vec!["-c".to_string(), "exit 42".to_string()];
        let mut child = ChildProcess::spawn("sh", &args, false).unwrap();
        assert_eq!(
            child.wait().unwrap(),
            WaitStatus::Reaped(ChildState::Exited(42))
        );
    }

    #[test]
    fn test_spawn_not_found() {
        let result = ChildProcess::spawn("nonexistent_command_12345", &[], false);
        assert!(matches!(
            result,
            Err(SpawnError::Exec {
                errno: libc::ENOENT,
                ..
            })
        ));
    }

    #[test]
    fn test_spawn_nul_byte() {
        let args = vec!["a\0b".to_string()];
        assert!(matches!(
            ChildProcess::spawn("echo", &args, false),
            Err(SpawnError::InvalidArg)
        ));
    }

    #[test]
    fn test_spawn_new_group() {
        let args = vec!["1".to_string()];
        let mut child = ChildProcess::spawn("sleep", &args, true).unwrap();
        assert_eq!(child.group(), Some(child.id()));
        // SAFETY: getpgid is safe with any pid
        let pgid = unsafe { libc::getpgid(child.id()) };
        assert_eq!(pgid, child.id());
        assert!(child.signal(Signal::Kill, true));
        let _ = child.wait();
    }

    #[test]
    fn test_target_falls_back_without_group() {
        let mut child = ChildProcess::spawn("true", &[], false).unwrap();
        assert_eq!(child.target(true), SignalTarget::Process(child.id()));
        let _ = child.wait();
    }

    #[test]
    fn test_signaled_state() {
        let args = vec!["10".to_string()];
        let mut child = ChildProcess::spawn("sleep", &args, false).unwrap();
        assert!(child.signal(Signal::Term, false));
        assert_eq!(
            child.wait().unwrap(),
            WaitStatus::Reaped(ChildState::Signaled(libc::SIGTERM))
        );
    }

    #[test]
    fn test_double_wait_does_not_hang() {
        let mut child = ChildProcess::spawn("true", &[], false).unwrap();
        assert!(matches!(child.wait().unwrap(), WaitStatus::Reaped(_)));
        assert_eq!(child.wait().unwrap(), WaitStatus::AlreadyReaped);
        assert!(child.is_reaped());
        /* no signals to a pid we no longer own */
        assert!(!child.signal(Signal::Term, false));
    }

    #[test]
    fn test_has_exited_keeps_zombie() {
        let args = vec!["-c".to_string(), "exit 3".to_string()];
        let mut child = ChildProcess::spawn("sh", &args, false).unwrap();
        until_exited(&child);
        /* asking twice doesn't consume the exit */
        assert!(child.has_exited());
        /* still ours: a zombie accepts signal 0 */
        // SAFETY: kill with signal 0 only checks existence
        assert_eq!(unsafe { libc::kill(child.id(), 0) }, 0);
        assert_eq!(
            child.wait().unwrap(),
            WaitStatus::Reaped(ChildState::Exited(3))
        );
        assert!(child.has_exited());
    }

    #[test]
    fn test_has_exited_while_running() {
        let args = vec!["10".to_string()];
        let mut child = ChildProcess::spawn("sleep", &args, false).unwrap();
        assert!(!child.has_exited());
        assert!(child.signal(Signal::Kill, false));
        until_exited(&child);
        assert_eq!(
            child.wait().unwrap(),
            WaitStatus::Reaped(ChildState::Signaled(libc::SIGKILL))
        );
    }

    #[test]
    fn test_watch_exit_notifies() {
        let args = vec!["0.05".to_string()];
        let mut child = ChildProcess::spawn("sleep", &args, false).unwrap();
        let rx = child.watch_exit().unwrap();
        let exit = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(exit.pid, child.id());
        assert_eq!(
            child.wait().unwrap(),
            WaitStatus::Reaped(ChildState::Exited(0))
        );
    }

    #[test]
    fn test_try_wait() {
        let args = vec!["10".to_string()];
        let mut child = ChildProcess::spawn("sleep", &args, false).unwrap();
        assert_eq!(child.try_wait(), None);
        assert!(!child.is_reaped());
        assert!(child.signal(Signal::Kill, false));
        until_exited(&child);
        assert_eq!(child.try_wait(), Some(ChildState::Signaled(libc::SIGKILL)));
        assert!(child.is_reaped());
        assert_eq!(child.try_wait(), None);
    }

    #[test]
    fn test_child_state_decoding() {
        /* exit 7: status word 7 << 8 */
        assert_eq!(ChildState::from_raw(7 << 8), ChildState::Exited(7));
        /* killed by SIGKILL, no core */
        assert_eq!(ChildState::from_raw(9), ChildState::Signaled(9));
    }
}
