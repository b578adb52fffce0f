//! The sleep family and the POSIX clock calls.

use super::{ClockId, Duration, Instant, Timespec, TimerMode, NANOS_PER_SEC};
use crate::arch::Arch;
use crate::board::Board;
use crate::errors::{Errno, KResult};
use crate::kernel::Kernel;
use crate::thread::ThreadState;

impl<A: Arch, B: Board> Kernel<A, B> {
    /// Sleep for `req`.
    ///
    /// A handled signal ends the sleep early with `EINTR`; the unslept
    /// time is then written to `rem`, which is zeroed on a full sleep.
    /// The handler has already run when this returns.
    pub fn nanosleep(&self, req: &Timespec, rem: Option<&mut Timespec>) -> KResult<()> {
        let at = self.board().now().saturating_add(Duration::from_timespec(req)?);
        match self.sleep_on_timer(TimerMode::Relative, at) {
            Err(Errno::EINTR) => {
                if let Some(rem) = rem {
                    let left = at.saturating_duration_since(self.board().now());
                    *rem = Timespec::from_duration(left);
                }
                Err(Errno::EINTR)
            }
            Ok(()) => {
                if let Some(rem) = rem {
                    *rem = Timespec::default();
                }
                Ok(())
            }
            other => other,
        }
    }

    /// Sleep until `at` on the monotonic clock.
    pub fn absnanosleep(&self, at: &Timespec) -> KResult<()> {
        at.validate()?;
        let at = Instant::from_nanos(at.to_duration().as_nanos());
        self.sleep_on_timer(TimerMode::Absolute, at)
    }

    /// Sleep for `secs` seconds. Returns the seconds left, rounded up, if
    /// a signal cut the sleep short.
    pub fn sleep(&self, secs: u32) -> u32 {
        let req = Timespec::new(i64::from(secs), 0);
        let mut rem = Timespec::default();
        match self.nanosleep(&req, Some(&mut rem)) {
            Err(Errno::EINTR) => rem.to_duration().as_secs_ceil().min(u64::from(secs)) as u32,
            _ => 0,
        }
    }

    /// Sleep until `at`, resuming the sleep after any handler runs.
    #[cfg_attr(not(feature = "realtime"), allow(dead_code))]
    pub(crate) fn sleep_until(&self, at: Instant) {
        while self.board().now() < at {
            if let Err(e) = self.sleep_on_timer(TimerMode::Absolute, at) {
                if e != Errno::EINTR {
                    return;
                }
            }
        }
    }

    /// Block the caller on its synchronous timer until `at`. `Ok` once the
    /// deadline passed, `EINTR` if a handler cut in.
    fn sleep_on_timer(&self, mode: TimerMode, at: Instant) -> KResult<()> {
        let mut k = self.enter();
        let me = k.current_slot()?;
        if k.interruption_point(self.board_dyn(), me) {
            return Err(Errno::EINTR);
        }
        match k.timer_arm(self.board_dyn(), me, mode, at) {
            Ok(()) => {}
            Err(Errno::EAGAIN) => return Ok(()),
            Err(e) => return Err(e),
        }
        k.block_current(None)?;
        k.threads[me].state.insert(ThreadState::INTR_POINT);
        drop(k);

        let k = self.enter();
        match k.threads[me].wait_status {
            Err(Errno::EINTR) => Err(Errno::EINTR),
            _ => Ok(()),
        }
    }

    pub fn clock_gettime(&self, clock: ClockId) -> Timespec {
        let now = self.board().now().as_nanos();
        match clock {
            ClockId::Monotonic => timespec_from_nanos(now as i64),
            ClockId::Realtime => {
                let offset = self.enter().wall_offset;
                timespec_from_nanos((now as i64).saturating_add(offset))
            }
        }
    }

    /// Set the wall clock. The monotonic clock cannot be set.
    pub fn clock_settime(&self, clock: ClockId, to: &Timespec) -> KResult<()> {
        to.validate()?;
        if clock == ClockId::Monotonic {
            return Err(Errno::EINVAL);
        }
        let wall = to
            .sec
            .saturating_mul(NANOS_PER_SEC as i64)
            .saturating_add(to.nsec);
        let mut k = self.enter();
        k.wall_offset = wall.saturating_sub(self.board().now().as_nanos() as i64);
        log::debug!("wall clock set to {}.{:09}", to.sec, to.nsec);
        Ok(())
    }

    pub fn clock_getres(&self, _clock: ClockId) -> Timespec {
        Timespec::from_duration(self.board().resolution())
    }

    /// Convert a wall-clock time to the monotonic instant it falls on.
    pub(crate) fn wall_to_instant(&self, wall: &Timespec) -> Instant {
        let wall = wall
            .sec
            .saturating_mul(NANOS_PER_SEC as i64)
            .saturating_add(wall.nsec);
        let offset = self.enter().wall_offset;
        Instant::from_nanos(wall.saturating_sub(offset).max(0) as u64)
    }
}

fn timespec_from_nanos(ns: i64) -> Timespec {
    let per_sec = NANOS_PER_SEC as i64;
    Timespec::new(ns.div_euclid(per_sec), ns.rem_euclid(per_sec))
}

impl Duration {
    pub(crate) fn from_timespec(ts: &Timespec) -> KResult<Duration> {
        ts.validate()?;
        if ts.sec < 0 {
            return Err(Errno::EINVAL);
        }
        Ok(ts.to_duration())
    }
}
