use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use crate::{Error, Result};

/// Cooperative cancellation shared by a loop and whoever stops it.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
}

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }
}

static SIGNAL_FLAG: OnceLock<Arc<AtomicBool>> = OnceLock::new();

/// Binds SIGINT and SIGTERM to `flag`. Only one flag per process.
pub fn install_signal_handlers(flag: &ShutdownFlag) -> Result<()> {
    if SIGNAL_FLAG.set(Arc::clone(&flag.requested)).is_err() {
        return Err(Error::PreconditionNotMet("signal handlers already installed"));
    }
    platform::install()
}

#[cfg(unix)]
mod platform {
    use std::sync::atomic::Ordering;

    use super::SIGNAL_FLAG;
    use crate::Result;

    extern "C" fn on_signal(_signum: libc::c_int) {
        if let Some(flag) = SIGNAL_FLAG.get() {
            flag.store(true, Ordering::Release);
        }
    }

    pub(super) fn install() -> Result<()> {
        let handler = on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t;
        for signum in [libc::SIGINT, libc::SIGTERM] {
            let previous = unsafe { libc::signal(signum, handler) };
            if previous == libc::SIG_ERR {
                return Err(std::io::Error::last_os_error().into());
            }
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod platform {
    use crate::Result;

    pub(super) fn install() -> Result<()> {
        log::warn!("signal handlers not supported on this platform");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_observe_request() {
        let flag = ShutdownFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_requested());
        flag.request();
        assert!(observer.is_requested());
    }
}
