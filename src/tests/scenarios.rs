//! Threaded scenarios on the host architecture.
//!
//! The test thread is the kernel's main thread. Kernel threads must never
//! panic: a failed assertion there would take the whole process down, so
//! they record what they saw and the main thread checks it.

use alloc::sync::Arc;
use alloc::vec::Vec;
use std::panic::{self, AssertUnwindSafe};

use portable_atomic::{AtomicBool, AtomicUsize, Ordering};
use spin::Mutex;

use super::helpers::{host_kernel, HostKernel};
use crate::board::{Board, Shutdown};
use crate::errors::Errno;
use crate::signal::{CancelType, Disposition, MaskHow, SigAction, SigSet, Signal};
use crate::sync::{CondAttr, MutexAttr, MutexKind, MutexProtocol};
use crate::thread::{ExitStatus, InheritSched, SchedPolicy, ThreadAttr, ThreadState};
use crate::time::{ClockId, Duration, Instant, Timespec};

fn raise_main(k: &HostKernel, priority: u8) {
    let me = k.self_id().unwrap();
    k.setschedparam(me, SchedPolicy::Fifo, priority).unwrap();
}

fn at_priority(priority: u8) -> ThreadAttr {
    ThreadAttr::new().priority(priority)
}

/// Let every other runnable thread run until it blocks.
fn settle(k: &HostKernel) {
    k.nanosleep(&Timespec::new(0, 1_000_000), None).unwrap();
}

fn flag_handler(k: &HostKernel, sig: Signal) -> Arc<AtomicBool> {
    let hit = Arc::new(AtomicBool::new(false));
    let seen = hit.clone();
    let action = SigAction::new(Disposition::handler(move |_| seen.store(true, Ordering::SeqCst)));
    k.sigaction(sig, Some(action)).unwrap();
    hit
}

#[test]
fn mutex_unlock_wakes_the_higher_priority_waiter_first() {
    let k = host_kernel();
    let m = k.mutex_init(&MutexAttr::new()).unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    k.mutex_lock(m).unwrap();

    let spawn = |name: &'static str, priority: u8| {
        let order = order.clone();
        k.create(&at_priority(priority), move || {
            k.mutex_lock(m).unwrap_or(());
            order.lock().push(name);
            k.mutex_unlock(m).unwrap_or(());
            0
        })
        .unwrap()
    };
    let a = spawn("A", 5);
    let b = spawn("B", 10);

    let queued = k.with_state(|st| {
        let rec = st.mutexes.get(m.0).unwrap();
        rec.queue
            .iter(&st.threads)
            .map(|s| st.threads[s].id)
            .collect::<Vec<_>>()
    });
    assert_eq!(queued, [b, a]);

    k.mutex_unlock(m).unwrap();
    assert_eq!(*order.lock(), ["B", "A"]);
    assert_eq!(k.join(b), Ok(ExitStatus::Value(0)));
    assert_eq!(k.join(a), Ok(ExitStatus::Value(0)));
}

#[test]
fn nanosleep_interrupted_by_a_handler_reports_the_time_left() {
    let k = host_kernel();
    let handled = flag_handler(k, Signal::SIGUSR1);
    let outcome = Arc::new(Mutex::new(None));

    let seen = outcome.clone();
    let sleeper = k
        .create(&at_priority(5), move || {
            let mut rem = Timespec::default();
            let r = k.nanosleep(&Timespec::new(1, 0), Some(&mut rem));
            *seen.lock() = Some((r, rem));
            0
        })
        .unwrap();

    assert_eq!(k.board().programmed(), Some(Instant::from_nanos(1_000_000_000)));
    assert!(!k.board().advance(Duration::from_millis(300)));
    k.pthread_kill(sleeper, Signal::SIGUSR1).unwrap();

    assert!(handled.load(Ordering::SeqCst));
    assert_eq!(
        *outcome.lock(),
        Some((Err(Errno::EINTR), Timespec::new(0, 700_000_000)))
    );
    assert_eq!(k.board().programmed(), None);
    assert_eq!(k.join(sleeper), Ok(ExitStatus::Value(0)));
}

#[test]
fn cancel_of_a_thread_in_sigwait() {
    let k = host_kernel();
    raise_main(k, 20);
    let waiter = k
        .create(&at_priority(5), move || {
            let usr1 = SigSet::of(&[Signal::SIGUSR1]);
            let _ = k.sigprocmask(MaskHow::Block, Some(usr1));
            let _ = k.sigwait(usr1);
            1
        })
        .unwrap();
    settle(k);
    assert!(k.thread_info(waiter).unwrap().state.contains(ThreadState::SIGWAIT));

    k.cancel(waiter).unwrap();
    let info = k.thread_info(waiter).unwrap();
    assert_eq!(info.mask, SigSet::all_signals().without(Signal::SIGCANCEL));
    assert!(!info.state.contains(ThreadState::SIGWAIT));
    let listed = k.with_state(|st| {
        let slot = st.threads.resolve(waiter).unwrap();
        st.all.contains(&st.threads, slot)
    });
    assert!(!listed, "cancelled thread left on All-Threads");

    assert_eq!(k.join(waiter), Ok(ExitStatus::Canceled));
}

#[test]
fn racing_joiners_get_one_result_and_one_esrch() {
    let k = host_kernel();
    raise_main(k, 20);
    let target = k.create(&at_priority(3), || 77).unwrap();
    let results = Arc::new(Mutex::new(Vec::new()));
    let joiners: Vec<_> = [10u8, 9]
        .into_iter()
        .map(|priority| {
            let results = results.clone();
            k.create(&at_priority(priority), move || {
                let r = k.join(target);
                results.lock().push((priority, r));
                0
            })
            .unwrap()
        })
        .collect();

    settle(k);
    assert_eq!(
        *results.lock(),
        [(10, Ok(ExitStatus::Value(77))), (9, Err(Errno::ESRCH))]
    );
    assert_eq!(k.join(target), Err(Errno::ESRCH));
    for j in joiners {
        assert_eq!(k.join(j), Ok(ExitStatus::Value(0)));
    }
    assert_eq!(k.thread_count(), 1);
}

#[test]
fn recursive_mutex_count_is_restored() {
    let k = host_kernel();
    let m = k
        .mutex_init(&MutexAttr::new().kind(MutexKind::Recursive))
        .unwrap();
    let depth = || k.with_state(|st| st.mutexes.get(m.0).map(|r| (r.owner.is_some(), r.count)));

    for _ in 0..3 {
        k.mutex_lock(m).unwrap();
    }
    assert_eq!(k.mutex_trylock(m), Ok(()));
    assert_eq!(depth(), Some((true, 3)));
    for _ in 0..4 {
        k.mutex_unlock(m).unwrap();
    }
    assert_eq!(depth(), Some((false, 0)));
    assert_eq!(k.mutex_unlock(m), Err(Errno::EPERM));

    assert_eq!(k.mutex_destroy(m), Ok(()));
    assert_eq!(k.mutex_lock(m), Err(Errno::EINVAL));
}

#[test]
fn normal_mutex_relock_and_foreign_trylock() {
    let k = host_kernel();
    let m = k.mutex_init(&MutexAttr::new()).unwrap();
    k.mutex_lock(m).unwrap();
    assert_eq!(k.mutex_lock(m), Err(Errno::EDEADLK));
    assert_eq!(k.mutex_destroy(m), Err(Errno::EBUSY));

    let seen = Arc::new(Mutex::new(None));
    let s = seen.clone();
    let other = k
        .create(&at_priority(5), move || {
            *s.lock() = Some((k.mutex_trylock(m), k.mutex_unlock(m)));
            0
        })
        .unwrap();
    assert_eq!(*seen.lock(), Some((Err(Errno::EBUSY), Err(Errno::EPERM))));
    k.join(other).unwrap();
    k.mutex_unlock(m).unwrap();
}

#[test]
fn last_thread_exit_shuts_down() {
    let k = host_kernel();
    let payload = panic::catch_unwind(AssertUnwindSafe(|| k.exit(3))).unwrap_err();
    assert_eq!(payload.downcast_ref::<Shutdown>(), Some(&Shutdown(0)));
}

#[test]
fn cond_timed_wait_times_out_with_eagain_and_relocks() {
    let k = host_kernel();
    let m = k.mutex_init(&MutexAttr::new()).unwrap();
    let c = k.cond_init(&CondAttr::new()).unwrap();
    k.mutex_lock(m).unwrap();

    let now = k.clock_gettime(ClockId::Realtime);
    let deadline = Timespec::new(now.sec, now.nsec + 5_000_000);
    assert_eq!(k.cond_timed_wait(c, m, &deadline), Err(Errno::EAGAIN));
    assert_eq!(k.board().now(), Instant::from_nanos(5_000_000));

    assert_eq!(k.mutex_unlock(m), Ok(()));
    assert_eq!(k.cond_destroy(c), Ok(()));
}

#[test]
fn cond_signal_wakes_a_waiter_that_relocks() {
    let k = host_kernel();
    let m = k.mutex_init(&MutexAttr::new()).unwrap();
    let c = k.cond_init(&CondAttr::new()).unwrap();
    let ready = Arc::new(AtomicBool::new(false));

    let flag = ready.clone();
    let waiter = k
        .create(&at_priority(5), move || {
            let _ = k.mutex_lock(m);
            while !flag.load(Ordering::SeqCst) {
                if k.cond_wait(c, m).is_err() {
                    return 1;
                }
            }
            let _ = k.mutex_unlock(m);
            9
        })
        .unwrap();

    assert_eq!(k.cond_destroy(c), Err(Errno::EBUSY));
    k.mutex_lock(m).unwrap();
    ready.store(true, Ordering::SeqCst);
    k.cond_signal(c).unwrap();
    k.mutex_unlock(m).unwrap();
    assert_eq!(k.join(waiter), Ok(ExitStatus::Value(9)));
    assert_eq!(k.cond_destroy(c), Ok(()));
}

#[test]
fn created_threads_inherit_mask_and_optionally_scheduling() {
    let k = host_kernel();
    let usr2 = SigSet::of(&[Signal::SIGUSR2]);
    k.sigprocmask(MaskHow::Block, Some(usr2)).unwrap();

    let inherited = k
        .create(&ThreadAttr::new().priority(9).inherit_sched(InheritSched::Inherit), || 0)
        .unwrap();
    let info = k.thread_info(inherited).unwrap();
    assert_eq!(info.priority, k.config().main_priority);
    assert!(info.mask.contains(Signal::SIGUSR2));
    assert_eq!(k.join(inherited), Ok(ExitStatus::Value(0)));

    assert_eq!(
        k.create(&ThreadAttr::new().stack_size(16), || 0),
        Err(Errno::EINVAL)
    );
}

static DESTROYED: AtomicUsize = AtomicUsize::new(0);

fn record_destroyed(value: usize) {
    DESTROYED.fetch_add(value, Ordering::SeqCst);
}

#[test]
fn exit_runs_cleanup_lifo_then_key_destructors() {
    let k = host_kernel();
    let key = k.key_create(Some(record_destroyed)).unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));

    let l = log.clone();
    let id = k
        .create(&at_priority(5), move || {
            let _ = k.setspecific(key, 40);
            l.lock().push(k.getspecific(key));
            for n in [1, 2, 3] {
                let l = l.clone();
                let _ = k.cleanup_push(move || l.lock().push(n));
            }
            let _ = k.cleanup_pop(false);
            k.exit(5)
        })
        .unwrap();

    assert_eq!(k.join(id), Ok(ExitStatus::Value(5)));
    assert_eq!(*log.lock(), [40, 2, 1]);
    assert_eq!(DESTROYED.load(Ordering::SeqCst), 40);
    assert_eq!(k.getspecific(key), 0);
    assert_eq!(k.key_delete(key), Ok(()));
    assert_eq!(k.setspecific(key, 1), Err(Errno::EINVAL));
}

#[test]
fn suspended_thread_does_not_run_until_resumed() {
    let k = host_kernel();
    raise_main(k, 20);
    let runs = Arc::new(AtomicUsize::new(0));
    let r = runs.clone();
    let id = k
        .create(&at_priority(5), move || {
            r.fetch_add(1, Ordering::SeqCst);
            0
        })
        .unwrap();

    k.suspend(id).unwrap();
    settle(k);
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert!(k.thread_info(id).unwrap().state.contains(ThreadState::SUSPENDED));

    k.resume(id).unwrap();
    settle(k);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(k.join(id), Ok(ExitStatus::Value(0)));
}

#[test]
fn sigsuspend_returns_after_a_process_signal_is_handled() {
    let k = host_kernel();
    raise_main(k, 20);
    let handled = flag_handler(k, Signal::SIGUSR1);
    let usr1 = SigSet::of(&[Signal::SIGUSR1]);
    k.sigprocmask(MaskHow::Block, Some(usr1)).unwrap();

    // Inherits the blocked mask, so the process signal can only go to main.
    let sender = k
        .create(&at_priority(5), move || {
            let _ = k.kill(Signal::SIGUSR1);
            0
        })
        .unwrap();

    assert_eq!(k.sigsuspend(SigSet::empty()), Err(Errno::EINTR));
    assert!(handled.load(Ordering::SeqCst));
    assert_eq!(k.sigprocmask(MaskHow::Block, None), Ok(usr1));
    assert_eq!(k.join(sender), Ok(ExitStatus::Value(0)));
}

#[test]
fn blocked_process_signal_waits_for_sigwait() {
    let k = host_kernel();
    let usr2 = SigSet::of(&[Signal::SIGUSR2]);
    k.sigprocmask(MaskHow::Block, Some(usr2)).unwrap();
    k.kill(Signal::SIGUSR2).unwrap();
    assert_eq!(k.sigpending(), Ok(usr2));

    assert_eq!(k.sigwait(usr2), Ok(Signal::SIGUSR2));
    assert_eq!(k.sigpending(), Ok(SigSet::empty()));
    assert_eq!(
        k.sigtimedwait(usr2, &Timespec::new(0, 2_000_000)),
        Err(Errno::EAGAIN)
    );
    assert_eq!(k.board().now(), Instant::from_nanos(2_000_000));
}

#[test]
fn interrupt_entry_runs_the_handler_on_leaving() {
    let k = host_kernel();
    let handled = flag_handler(k, Signal::SIGUSR1);
    k.interrupt(Signal::SIGUSR1);
    assert!(handled.load(Ordering::SeqCst));
}

#[test]
fn reserved_signals_cannot_be_caught() {
    let k = host_kernel();
    let catch = || Some(SigAction::new(Disposition::handler(|_| {})));
    for sig in [Signal::SIGKILL, Signal::SIGSTOP, Signal::SIGCANCEL, Signal::SIGALRM] {
        assert_eq!(k.sigaction(sig, catch()).err(), Some(Errno::EINVAL));
    }
    let masked = SigAction::new(Disposition::Ignore).with_mask(SigSet::of(&[Signal::SIGKILL]));
    assert_eq!(k.sigaction(Signal::SIGUSR1, Some(masked)).err(), Some(Errno::EINVAL));
}

#[test]
fn completed_nanosleep_clears_the_remainder() {
    let k = host_kernel();
    let mut rem = Timespec::new(9, 9);
    assert_eq!(k.nanosleep(&Timespec::new(0, 3_000_000), Some(&mut rem)), Ok(()));
    assert_eq!(rem, Timespec::default());
    assert_eq!(k.board().now(), Instant::from_nanos(3_000_000));
}

#[test]
fn reserved_signals_cannot_be_sent() {
    let k = host_kernel();
    raise_main(k, 20);
    let usr2 = SigSet::of(&[Signal::SIGUSR2]);
    let target = k
        .create(&at_priority(5), move || {
            let _ = k.sigprocmask(MaskHow::Block, Some(usr2));
            match k.sigwait(usr2) {
                Ok(_) => 3,
                Err(_) => 4,
            }
        })
        .unwrap();
    settle(k);

    for sig in [Signal::SIGKILL, Signal::SIGSTOP, Signal::SIGCANCEL] {
        assert_eq!(k.kill(sig), Err(Errno::EINVAL));
        assert_eq!(k.pthread_kill(target, sig), Err(Errno::EINVAL));
        assert_eq!(k.raise(sig), Err(Errno::EINVAL));
    }
    let info = k.thread_info(target).unwrap();
    assert!(info.state.contains(ThreadState::SIGWAIT));
    assert!(info.pending.is_empty());
    assert_eq!(k.sigpending(), Ok(SigSet::empty()));

    k.pthread_kill(target, Signal::SIGUSR2).unwrap();
    assert_eq!(k.join(target), Ok(ExitStatus::Value(3)));
}

#[test]
fn async_cancel_tears_a_thread_out_of_a_mutex_wait() {
    let k = host_kernel();
    raise_main(k, 20);
    let m = k.mutex_init(&MutexAttr::new()).unwrap();
    k.mutex_lock(m).unwrap();

    let previous = Arc::new(Mutex::new(None));
    let seen = previous.clone();
    let worker = k
        .create(&at_priority(5), move || {
            *seen.lock() = k.setcanceltype(CancelType::Async).ok();
            // Not an interruption point.
            let _ = k.mutex_lock(m);
            1
        })
        .unwrap();
    settle(k);
    assert_eq!(*previous.lock(), Some(CancelType::Deferred));
    assert!(k.thread_info(worker).unwrap().state.contains(ThreadState::BLOCKED));

    k.cancel(worker).unwrap();
    let waiting = k.with_state(|st| !st.mutexes.get(m.0).unwrap().queue.is_empty());
    assert!(!waiting, "cancelled thread still queued on the mutex");
    assert_eq!(k.join(worker), Ok(ExitStatus::Canceled));
    k.mutex_unlock(m).unwrap();
}

#[test]
fn unblocking_a_pending_signal_runs_the_handler_before_returning() {
    let k = host_kernel();
    let handled = flag_handler(k, Signal::SIGUSR1);
    let usr1 = SigSet::of(&[Signal::SIGUSR1]);
    k.sigprocmask(MaskHow::Block, Some(usr1)).unwrap();
    k.kill(Signal::SIGUSR1).unwrap();
    assert!(!handled.load(Ordering::SeqCst));
    assert_eq!(k.sigpending(), Ok(usr1));

    assert_eq!(k.sigprocmask(MaskHow::Unblock, Some(usr1)), Ok(usr1));
    assert!(handled.load(Ordering::SeqCst));
    assert_eq!(k.sigpending(), Ok(SigSet::empty()));
}

#[cfg(feature = "prio-ceiling")]
#[test]
fn prio_ceiling_can_be_changed_and_bounds_who_may_lock() {
    let k = host_kernel();
    raise_main(k, 20);
    let me = k.self_id().unwrap();
    let attr = MutexAttr::new().protocol(MutexProtocol::Protect).ceiling(10);
    let m = k.mutex_init(&attr).unwrap();
    assert_eq!(k.mutex_getprioceiling(m), Ok(10));
    assert_eq!(k.mutex_lock(m), Err(Errno::EINVAL));
    assert_eq!(k.mutex_trylock(m), Err(Errno::EINVAL));

    assert_eq!(k.mutex_setprioceiling(m, 30), Ok(10));
    assert_eq!(k.mutex_getprioceiling(m), Ok(30));
    k.mutex_lock(m).unwrap();
    assert_eq!(k.thread_info(me).unwrap().priority, 30);

    // Lowering the ceiling of a held mutex lowers the owner with it.
    assert_eq!(k.mutex_setprioceiling(m, 25), Ok(30));
    assert_eq!(k.thread_info(me).unwrap().priority, 25);
    k.mutex_unlock(m).unwrap();
    assert_eq!(k.thread_info(me).unwrap().priority, 20);

    let plain = k.mutex_init(&MutexAttr::new()).unwrap();
    assert_eq!(k.mutex_getprioceiling(plain), Err(Errno::EINVAL));
    assert_eq!(k.mutex_setprioceiling(plain, 5), Err(Errno::EINVAL));
}

#[cfg(feature = "realtime")]
mod realtime {
    use core::ops::ControlFlow;

    use super::*;

    fn periodic_attr() -> ThreadAttr {
        at_priority(5)
            .start_time(Timespec::new(0, 1_000_000))
            .period(Duration::from_millis(10))
    }

    #[test]
    fn periodic_job_runs_once_per_period() {
        let k = host_kernel();
        let runs = Arc::new(AtomicUsize::new(0));
        let r = runs.clone();
        let id = k
            .create_periodic(&periodic_attr(), move || {
                let n = r.fetch_add(1, Ordering::SeqCst) + 1;
                if n == 3 {
                    ControlFlow::Break(n)
                } else {
                    ControlFlow::Continue(())
                }
            })
            .unwrap();

        assert_eq!(k.join(id), Ok(ExitStatus::Value(3)));
        assert_eq!(k.board().now(), Instant::from_nanos(21_000_000));
    }

    #[test]
    fn overrunning_job_misses_its_deadline() {
        let k = host_kernel();
        let id = k
            .create_periodic(&periodic_attr(), move || {
                let _ = k.nanosleep(&Timespec::new(0, 20_000_000), None);
                ControlFlow::Continue(())
            })
            .unwrap();
        assert_eq!(k.join(id), Ok(ExitStatus::DeadlineMissed));
    }

    #[test]
    fn period_attributes_pick_the_entry_kind() {
        let k = host_kernel();
        assert_eq!(k.create(&periodic_attr(), || 0), Err(Errno::EINVAL));
        assert_eq!(
            k.create_periodic(&at_priority(5), || ControlFlow::Break(0)),
            Err(Errno::EINVAL)
        );
    }
}
