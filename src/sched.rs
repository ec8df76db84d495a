//! Per-PCB wait/wake context (§2 component 3, §5). A caller thread sleeps
//! while holding the engine's single mutex; ingress wakes it; an external
//! event interrupts it. Built on `Condvar` parameterized by the governing
//! mutex, per the design note in `SPEC_FULL.md` §5.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, MutexGuard};
use std::time::Duration;

/// Why a sleeper woke up. Wakeups are level-triggered (§5): callers must
/// recheck their condition regardless of which reason is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Woken,
    Interrupted,
    TimedOut,
}

/// The wait/wake context embedded in every non-FREE PCB.
#[derive(Debug, Default)]
pub struct SchedCtx {
    cvar: Condvar,
    interrupted: AtomicBool,
}

impl SchedCtx {
    pub fn new() -> Self {
        SchedCtx {
            cvar: Condvar::new(),
            interrupted: AtomicBool::new(false),
        }
    }

    /// Atomically releases `guard`, blocks until woken, interrupted, or
    /// `deadline` elapses, then reacquires the mutex before returning. This
    /// is the only operation that may block (§5).
    pub fn sleep<'a, T>(
        &self,
        guard: MutexGuard<'a, T>,
        deadline: Option<Duration>,
    ) -> (MutexGuard<'a, T>, WakeReason) {
        if self.interrupted.swap(false, Ordering::AcqRel) {
            return (guard, WakeReason::Interrupted);
        }

        let (guard, timeout) = match deadline {
            Some(d) => {
                let (g, r) = self.cvar.wait_timeout(guard, d).unwrap();
                (g, r.timed_out())
            }
            None => (self.cvar.wait(guard).unwrap(), false),
        };

        if self.interrupted.swap(false, Ordering::AcqRel) {
            return (guard, WakeReason::Interrupted);
        }

        if timeout {
            (guard, WakeReason::TimedOut)
        } else {
            (guard, WakeReason::Woken)
        }
    }

    /// Posted by the ingress path on a state transition, new payload, or a
    /// peer-window update that may unblock a stalled sender.
    pub fn wake(&self) {
        self.cvar.notify_all();
    }

    /// Posted by the external event handler to every non-FREE PCB.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.cvar.notify_all();
    }
}
