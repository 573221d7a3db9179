use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use crate::Result;

/// Wake-up counter a `WaitSet` parks on.
///
/// Every state change that can flip a condition bumps the sequence and wakes
/// parked waiters. A waiter snapshots the sequence before evaluating its
/// predicates and parks only while the sequence still matches, so a change
/// that lands between the check and the park is never missed.
#[derive(Debug, Default)]
pub struct WaitSignal {
    seq: AtomicU32,
}

impl WaitSignal {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn sequence(&self) -> u32 {
        self.seq.load(Ordering::Acquire)
    }

    pub(crate) fn notify(&self) {
        self.seq.fetch_add(1, Ordering::Release);
        if let Err(err) = futex_wake(&self.seq) {
            log::warn!("waitset wake failed: {err}");
        }
    }

    /// Parks until the sequence moves past `observed` or `timeout` elapses.
    /// May return early; callers re-check their predicates.
    pub(crate) fn park(&self, observed: u32, timeout: Duration) -> Result<()> {
        futex_wait(&self.seq, observed, timeout)
    }
}

/// The waitsets an entity must wake when its observable state changes.
#[derive(Debug, Default)]
pub struct SignalSet {
    signals: Mutex<Vec<Weak<WaitSignal>>>,
}

impl SignalSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn attach(&self, signal: &Arc<WaitSignal>) {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        signals.retain(|s| s.strong_count() > 0);
        signals.push(Arc::downgrade(signal));
    }

    pub(crate) fn detach(&self, signal: &Arc<WaitSignal>) {
        let mut signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
        let target = Arc::downgrade(signal);
        if let Some(pos) = signals.iter().position(|s| s.ptr_eq(&target)) {
            signals.swap_remove(pos);
        }
    }

    pub(crate) fn notify_all(&self) {
        let live = {
            let signals = self.signals.lock().unwrap_or_else(PoisonError::into_inner);
            signals.iter().filter_map(Weak::upgrade).collect::<Vec<_>>()
        };
        for signal in live {
            signal.notify();
        }
    }
}

#[cfg(target_os = "linux")]
fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Duration) -> Result<()> {
    use libc::{syscall, timespec, SYS_futex, EAGAIN, EINTR, ETIMEDOUT, FUTEX_WAIT, FUTEX_PRIVATE_FLAG};

    let ts = timespec {
        tv_sec: timeout.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };
    let res = unsafe {
        syscall(
            SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAIT | FUTEX_PRIVATE_FLAG,
            expected,
            &ts as *const timespec,
            std::ptr::null::<u32>(),
            0,
        )
    };
    if res == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == EAGAIN || code == EINTR || code == ETIMEDOUT => Ok(()),
        _ => Err(crate::Error::Io(err)),
    }
}

#[cfg(target_os = "linux")]
fn futex_wake(addr: &AtomicU32) -> Result<()> {
    use libc::{syscall, SYS_futex, FUTEX_PRIVATE_FLAG, FUTEX_WAKE};

    let res = unsafe {
        syscall(
            SYS_futex,
            addr as *const AtomicU32 as *const u32,
            FUTEX_WAKE | FUTEX_PRIVATE_FLAG,
            i32::MAX,
            std::ptr::null::<u32>(),
            std::ptr::null::<u32>(),
            0,
        )
    };
    if res < 0 {
        return Err(crate::Error::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn futex_wait(addr: &AtomicU32, expected: u32, timeout: Duration) -> Result<()> {
    const POLL_SLICE: Duration = Duration::from_millis(1);
    if addr.load(Ordering::Acquire) == expected {
        std::thread::sleep(timeout.min(POLL_SLICE));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn futex_wake(_addr: &AtomicU32) -> Result<()> {
    Ok(())
}
