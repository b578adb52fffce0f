//! LEON board on the BCC support package.
//!
//! Time comes from the BSP's `do_gettimeofday`, which the periodic tick
//! keeps current. The countdown timer is emulated on top of that tick: the
//! application's tick handler calls [`LeonBoard::tick`] and raises
//! `SIGALRM` through [`crate::Kernel::interrupt`] when it reports expiry.

use core::ffi::{c_long, c_void};

use spin::Mutex;

use super::Board;
use crate::signal::Signal;
use crate::time::{Duration, Instant};

/// PSR trap-enable bit.
const PSR_ET: u32 = 0x20;

#[repr(C)]
struct Timeval {
    tv_sec: c_long,
    tv_usec: c_long,
}

type TickHandler = extern "C" fn(regs: *mut c_void) -> i32;

extern "C" {
    fn do_gettimeofday(tv: *mut Timeval);
    fn leonbare_init_ticks();
    fn leonbare_disable_traps() -> u32;
    fn leonbare_enable_traps(psr: u32);
    fn _exit(status: i32) -> !;
    static tick_nsec: u32;
    static mut ticker_callback: Option<TickHandler>;
}

/// Run `f` with traps off so the tick handler cannot interleave.
fn without_traps<R>(f: impl FnOnce() -> R) -> R {
    // SAFETY: saves and restores PSR around `f`.
    let psr = unsafe { leonbare_disable_traps() };
    let r = f();
    unsafe { leonbare_enable_traps(psr) };
    r
}

#[derive(Debug, Default)]
pub struct LeonBoard {
    /// Absolute expiry of the emulated countdown timer.
    deadline: Mutex<Option<Instant>>,
}

impl LeonBoard {
    pub const fn new() -> Self {
        Self {
            deadline: Mutex::new(None),
        }
    }

    /// Start the BSP tick and route it to `handler`.
    ///
    /// # Safety
    ///
    /// Call once, before the kernel is initialised, with traps disabled.
    pub unsafe fn install_tick_handler(handler: TickHandler) {
        unsafe {
            leonbare_init_ticks();
            ticker_callback = Some(handler);
        }
    }

    /// Called from the tick handler. Returns `true` once the programmed
    /// expiry has passed; the caller then raises `SIGALRM`.
    pub fn tick(&self) -> bool {
        let now = self.now();
        let mut deadline = self.deadline.lock();
        match *deadline {
            Some(at) if at <= now => {
                *deadline = None;
                true
            }
            _ => false,
        }
    }
}

impl Board for LeonBoard {
    fn now(&self) -> Instant {
        let mut tv = Timeval { tv_sec: 0, tv_usec: 0 };
        // SAFETY: writes the two fields of `tv`.
        unsafe { do_gettimeofday(&mut tv) };
        let micros = tv.tv_sec.max(0) as u64 * 1_000_000 + tv.tv_usec.max(0) as u64;
        Instant::from_nanos(micros * 1_000)
    }

    fn resolution(&self) -> Duration {
        // SAFETY: set once by the BSP's tick setup.
        Duration::from_nanos(u64::from(unsafe { tick_nsec }))
    }

    fn program_timer(&self, after: Option<Duration>) {
        let at = after.map(|d| self.now().saturating_add(d));
        without_traps(|| *self.deadline.lock() = at);
    }

    /// Open a trap window so a pending tick can be taken. The tick handler
    /// reports through [`crate::Kernel::interrupt`], so nothing is returned
    /// here.
    fn wait_for_interrupt(&self) -> Option<Signal> {
        // SAFETY: the PSR is written back unchanged apart from ET.
        unsafe {
            let psr = leonbare_disable_traps();
            leonbare_enable_traps(psr | PSR_ET);
            core::hint::spin_loop();
            leonbare_enable_traps(psr);
        }
        None
    }

    fn shutdown(&self, status: i32) -> ! {
        unsafe { _exit(status) }
    }
}
