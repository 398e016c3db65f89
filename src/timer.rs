/*
 * timer.rs
 *
 * One-shot deadline. Fires at most once, can be disarmed before it fires,
 * and once fired it stays fired.
 *
 * There is no signal handler and no timer thread. The deadline is the
 * receive timeout on the channel the exit watcher reports on: whoever comes
 * first, the child's exit message or the deadline, wins. Right at the
 * deadline the caller gets one last look (a direct check of the child) before
 * the timer fires. "Fire" and "disarm" are a CAS on one state byte so exactly
 * one of them can happen.
 *
 *   IDLE --arm--> ARMED --deadline--> FIRED
 *                   |
 *                   +----disarm-----> DISARMED
 */

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

/* state machine, see header */
const IDLE: u8 = 0;
const ARMED: u8 = 1;
const FIRED: u8 = 2;
const DISARMED: u8 = 3;

/// How often [`DeadlineTimer::wait_for`] polls once its channel is closed.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum TimerError {
    #[error("timer period must be positive")]
    NonPositive,
    #[error("timer is already armed")]
    AlreadyArmed,
    #[error("timer was never armed")]
    NotArmed,
    #[error("event source closed before the deadline")]
    SourceClosed,
    #[error("could not install timer: {0}")]
    Install(#[source] std::io::Error),
}

/// A timer period split into whole seconds and microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSpec {
    pub secs: u64,
    pub micros: u32,
}

impl TimerSpec {
    /// Split `duration`, dropping anything below a microsecond.
    ///
    /// # Errors
    ///
    /// [`TimerError::NonPositive`] when nothing is left after the split.
    pub fn from_duration(duration: Duration) -> Result<Self, TimerError> {
        let spec = Self {
            secs: duration.as_secs(),
            micros: duration.subsec_micros(),
        };
        if spec.secs == 0 && spec.micros == 0 {
            return Err(TimerError::NonPositive);
        }
        Ok(spec)
    }

    #[must_use]
    pub fn as_duration(&self) -> Duration {
        Duration::new(self.secs, self.micros * 1000)
    }
}

impl fmt::Display for TimerSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.1}", self.as_duration().as_secs_f64())
    }
}

/// One-shot deadline timer.
pub struct DeadlineTimer {
    state: AtomicU8,
    deadline: OnceLock<Instant>,
}

impl Default for DeadlineTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeadlineTimer {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(IDLE),
            deadline: OnceLock::new(),
        }
    }

    /// Schedule the deadline `duration` from now.
    ///
    /// # Errors
    ///
    /// [`TimerError::NonPositive`] for a zero period (checked before anything
    /// is armed), [`TimerError::AlreadyArmed`] on a second call.
    pub fn arm(&self, duration: Duration) -> Result<TimerSpec, TimerError> {
        let spec = TimerSpec::from_duration(duration)?;

        if self
            .state
            .compare_exchange(IDLE, ARMED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(TimerError::AlreadyArmed);
        }

        let deadline = Instant::now()
            .checked_add(spec.as_duration())
            .unwrap_or_else(far_future);
        /* only the IDLE->ARMED winner gets here, so this set can't lose */
        let _ = self.deadline.set(deadline);
        tracing::debug!(secs = spec.secs, micros = spec.micros, "timer armed");
        Ok(spec)
    }

    /// Cancel the pending deadline.
    ///
    /// Returns `true` if this call cancelled it, `false` if it already fired
    /// (sticky), was already disarmed, or was never armed.
    pub fn disarm(&self) -> bool {
        self.state
            .compare_exchange(ARMED, DISARMED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Whether the deadline fired.
    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.state.load(Ordering::Acquire) == FIRED
    }

    /* ARMED -> FIRED, at most once */
    fn fire(&self) -> bool {
        self.state
            .compare_exchange(ARMED, FIRED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Block until an event arrives on `events` or the deadline passes.
    ///
    /// `Ok(Some(event))`: the event won, the timer is still armed and the
    /// caller decides whether to disarm. `Ok(None)`: the deadline fired.
    ///
    /// At the deadline a queued event still wins, and so does whatever
    /// `poll` returns: it should report an event that has happened but
    /// whose message may not be on the channel yet. If every sender hangs
    /// up early the deadline stays in force and `poll` is asked every
    /// [`POLL_INTERVAL`] until then.
    ///
    /// # Errors
    ///
    /// [`TimerError::NotArmed`] if [`DeadlineTimer::arm`] was never called,
    /// [`TimerError::SourceClosed`] if the timer was disarmed and every
    /// sender hung up.
    pub fn wait_for<T>(
        &self,
        events: &Receiver<T>,
        mut poll: impl FnMut() -> Option<T>,
    ) -> Result<Option<T>, TimerError> {
        match self.state.load(Ordering::Acquire) {
            FIRED => return Ok(None),
            IDLE => return Err(TimerError::NotArmed),
            /* no deadline left: just wait for the event */
            DISARMED => return events.recv().map(Some).map_err(|_| TimerError::SourceClosed),
            _ => {}
        }

        let deadline = *self.deadline.get().ok_or(TimerError::NotArmed)?;
        let mut connected = true;

        loop {
            let now = Instant::now();
            if now >= deadline {
                if connected && let Ok(event) = events.try_recv() {
                    return Ok(Some(event));
                }
                if let Some(event) = poll() {
                    return Ok(Some(event));
                }
                if self.fire() || self.has_fired() {
                    return Ok(None);
                }
                /* disarmed under us: nothing left to time */
                return events.recv().map(Some).map_err(|_| TimerError::SourceClosed);
            }

            let remaining = deadline - now;
            if !connected {
                if let Some(event) = poll() {
                    return Ok(Some(event));
                }
                thread::sleep(remaining.min(POLL_INTERVAL));
                continue;
            }

            match events.recv_timeout(remaining) {
                Ok(event) => return Ok(Some(event)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::debug!("event source closed, polling until the deadline");
                    connected = false;
                }
            }
        }
    }
}

/* ~30 years out; Instant can't represent u64::MAX seconds */
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(60 * 60 * 24 * 365 * 30)
}
