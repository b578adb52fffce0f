//! The timeout queue and the single hardware countdown timer behind it.
//!
//! Each thread record embeds two timer entries: the synchronous one used by
//! sleeps and timed waits, and the asynchronous one used for round-robin
//! slices and periodic deadlines. Armed entries sit in one
//! deadline-ascending queue; the board timer is always programmed for the
//! head.

use crate::board::Board;
use crate::errors::{Errno, KResult};
use crate::kernel::state::KernelState;
use crate::sched::queue::Link;
use crate::thread::{ExitStatus, Slot, ThreadState};

use super::Instant;

/// Why an entry was armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Wake at an absolute time.
    Absolute,
    /// Wake after a relative delay (stored converted to absolute).
    Relative,
    /// End of a SCHED_RR time slice.
    RoundRobin,
    /// A periodic job's deadline; expiry terminates the thread.
    DeadlineExit,
}

impl TimerMode {
    pub(crate) fn slot(self) -> TimerSlot {
        match self {
            TimerMode::Absolute | TimerMode::Relative => TimerSlot::Sync,
            TimerMode::RoundRobin | TimerMode::DeadlineExit => TimerSlot::Async,
        }
    }
}

/// Which of a thread's two entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    Sync = 0,
    Async = 1,
}

/// Which entries a cancel applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerScope {
    One(TimerSlot),
    All,
}

/// A timeout-queue node: one entry of one thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerRef {
    pub(crate) slot: Slot,
    pub(crate) which: TimerSlot,
}

impl TimerRef {
    pub(crate) const fn new(slot: Slot, which: TimerSlot) -> Self {
        Self { slot, which }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TimerEntry {
    pub(crate) deadline: Instant,
    pub(crate) mode: Option<TimerMode>,
    pub(crate) link: Link<TimerRef>,
}

impl TimerEntry {
    pub(crate) const fn new() -> Self {
        Self {
            deadline: Instant::from_nanos(0),
            mode: None,
            link: Link::new(),
        }
    }

    pub(crate) fn set(&mut self, deadline: Instant, mode: TimerMode) {
        self.deadline = deadline;
        self.mode = Some(mode);
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.link.is_linked()
    }
}

impl KernelState {
    /// Arm one of `slot`'s timer entries to fire at `at`.
    ///
    /// Fails with `EAGAIN` if `at` is not in the future and with `EBUSY` if
    /// the entry is already armed.
    pub(crate) fn timer_arm(
        &mut self,
        board: &dyn Board,
        slot: Slot,
        mode: TimerMode,
        at: Instant,
    ) -> KResult<()> {
        let now = board.now();
        if at <= now {
            return Err(Errno::EAGAIN);
        }
        let which = mode.slot();
        let entry = TimerRef::new(slot, which);
        if self.threads.timer(entry).is_armed() {
            return Err(Errno::EBUSY);
        }
        self.threads.timer_mut(entry).set(at, mode);
        let head = self.timeouts.front();
        self.timeouts.insert(&mut self.threads, entry);
        self.threads[slot].state.insert(match which {
            TimerSlot::Sync => ThreadState::SYNC_TIMER,
            TimerSlot::Async => ThreadState::ASYNC_TIMER,
        });
        log::trace!("timer armed for {:?} at {:?} ({:?})", slot, at, mode);
        if self.timeouts.front() != head {
            self.timer_reprogram(board);
        }
        Ok(())
    }

    /// Disarm entries of `slot`. Returns whether anything was armed.
    pub(crate) fn timer_cancel(&mut self, board: &dyn Board, slot: Slot, scope: TimerScope) -> bool {
        let which: &[TimerSlot] = match scope {
            TimerScope::One(TimerSlot::Sync) => &[TimerSlot::Sync],
            TimerScope::One(TimerSlot::Async) => &[TimerSlot::Async],
            TimerScope::All => &[TimerSlot::Sync, TimerSlot::Async],
        };
        let head = self.timeouts.front();
        let mut removed = false;
        for &w in which {
            removed |= self.timeouts.remove(&mut self.threads, TimerRef::new(slot, w));
            self.threads[slot].state.remove(match w {
                TimerSlot::Sync => ThreadState::SYNC_TIMER | ThreadState::COND_TIMER,
                TimerSlot::Async => ThreadState::ASYNC_TIMER,
            });
        }
        if self.timeouts.front() != head {
            self.timer_reprogram(board);
        }
        removed
    }

    /// Service every entry that is due. Called on the timer-expiry signal.
    pub(crate) fn timer_expire(&mut self, board: &dyn Board) {
        let now = board.now();
        while let Some(head) = self.timeouts.front() {
            let entry = *self.threads.timer(head);
            if entry.deadline > now {
                break;
            }
            self.timeouts.remove(&mut self.threads, head);
            log::trace!("timer expired for {:?} ({:?})", head.slot, entry.mode);
            match entry.mode {
                Some(TimerMode::Absolute) | Some(TimerMode::Relative) => {
                    self.expire_wait(head.slot)
                }
                Some(TimerMode::RoundRobin) => {
                    self.threads[head.slot].state.remove(ThreadState::ASYNC_TIMER);
                    #[cfg(feature = "round-robin")]
                    {
                        self.threads[head.slot].slice_left = None;
                    }
                    self.requeue(head.slot);
                }
                Some(TimerMode::DeadlineExit) => {
                    self.threads[head.slot].state.remove(ThreadState::ASYNC_TIMER);
                    self.begin_forced_exit(board, head.slot, ExitStatus::DeadlineMissed);
                }
                None => debug_assert!(false, "armed timer entry without a mode"),
            }
        }
        self.timer_reprogram(board);
    }

    /// Genuine expiry of a sleep or timed wait: the waiter sees `EAGAIN`.
    fn expire_wait(&mut self, slot: Slot) {
        let t = &mut self.threads[slot];
        t.state.remove(ThreadState::SYNC_TIMER | ThreadState::COND_TIMER);
        t.wait_status = Err(Errno::EAGAIN);
        // Waking also takes a condvar waiter off the condvar queue.
        self.wake(slot);
    }

    /// Forced wake of a blocked thread: cancels its timed wait, pulls it
    /// out of any wait queue and reports `EINTR`.
    pub(crate) fn interrupt_wait(&mut self, board: &dyn Board, slot: Slot) {
        if self.threads[slot].state.contains(ThreadState::SYNC_TIMER) {
            self.timer_cancel(board, slot, TimerScope::One(TimerSlot::Sync));
        }
        self.threads[slot].wait_status = Err(Errno::EINTR);
        self.wake(slot);
    }

    fn timer_reprogram(&mut self, board: &dyn Board) {
        match self.timeouts.front() {
            Some(head) => {
                let at = self.threads.timer(head).deadline;
                board.program_timer(Some(at.saturating_duration_since(board.now())));
            }
            None => board.program_timer(None),
        }
    }

    /// Deadline of the soonest armed entry.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.timeouts.front().map(|head| self.threads.timer(head).deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::ManualBoard;
    use crate::sched::QueueId;
    use crate::tests::helpers::Fixture;
    use crate::time::Duration;

    fn at(ns: u64) -> Instant {
        Instant::from_nanos(ns)
    }

    #[test]
    fn arm_rejects_past_deadlines() {
        let board = ManualBoard::new();
        board.set_now(at(100));
        let mut fx = Fixture::new(&[1]);
        let s = fx.slots[0];
        assert_eq!(
            fx.state.timer_arm(&board, s, TimerMode::Absolute, at(100)),
            Err(Errno::EAGAIN)
        );
        assert_eq!(fx.state.timer_arm(&board, s, TimerMode::Relative, at(150)), Ok(()));
        assert_eq!(
            fx.state.timer_arm(&board, s, TimerMode::Absolute, at(200)),
            Err(Errno::EBUSY)
        );
        assert_eq!(board.programmed(), Some(at(150)));
    }

    #[test]
    fn cancelling_the_head_reprograms_to_the_next_minimum() {
        let board = ManualBoard::new();
        let mut fx = Fixture::new(&[1, 1, 1]);
        let (a, b, c) = (fx.slots[0], fx.slots[1], fx.slots[2]);
        fx.state.timer_arm(&board, a, TimerMode::Absolute, at(300)).unwrap();
        fx.state.timer_arm(&board, b, TimerMode::Absolute, at(100)).unwrap();
        fx.state.timer_arm(&board, c, TimerMode::Absolute, at(200)).unwrap();
        assert_eq!(board.programmed(), Some(at(100)));

        assert!(fx.state.timer_cancel(&board, b, TimerScope::All));
        assert_eq!(board.programmed(), Some(at(200)));
        assert!(!fx.state.threads[b].state.contains(ThreadState::SYNC_TIMER));

        fx.state.timer_cancel(&board, c, TimerScope::One(TimerSlot::Sync));
        fx.state.timer_cancel(&board, a, TimerScope::One(TimerSlot::Sync));
        assert_eq!(board.programmed(), None);
        assert!(!fx.state.timer_cancel(&board, a, TimerScope::All));
    }

    #[test]
    fn expiry_wakes_every_due_waiter_with_eagain() {
        let board = ManualBoard::new();
        let mut fx = Fixture::new(&[1, 2, 3]);
        for (&s, ns) in fx.slots.iter().zip([10u64, 20, 90]) {
            fx.state.threads[s].state = ThreadState::BLOCKED;
            fx.state.timer_arm(&board, s, TimerMode::Relative, at(ns)).unwrap();
        }
        board.advance(Duration::from_nanos(25));
        fx.state.timer_expire(&board);

        let (a, b, c) = (fx.slots[0], fx.slots[1], fx.slots[2]);
        assert_eq!(fx.state.threads[a].wait_status, Err(Errno::EAGAIN));
        assert_eq!(fx.state.threads[b].queue, Some(QueueId::Ready));
        assert_eq!(fx.state.ready.front(), Some(b));
        assert!(fx.state.threads[c].state.contains(ThreadState::BLOCKED));
        assert_eq!(fx.state.next_deadline(), Some(at(90)));
        assert_eq!(board.programmed(), Some(at(90)));
    }

    #[test]
    fn forced_wake_reports_eintr() {
        let board = ManualBoard::new();
        let mut fx = Fixture::new(&[1]);
        let s = fx.slots[0];
        fx.state.threads[s].state = ThreadState::BLOCKED;
        fx.state.timer_arm(&board, s, TimerMode::Relative, at(500)).unwrap();
        fx.state.interrupt_wait(&board, s);
        assert_eq!(fx.state.threads[s].wait_status, Err(Errno::EINTR));
        assert!(fx.state.timeouts.is_empty());
        assert!(fx.state.threads[s].state.contains(ThreadState::RUNNING));
        assert_eq!(board.programmed(), None);
    }
}
