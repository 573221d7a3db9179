//! The participant's notification thread.
//!
//! Listener callbacks are queued here and run one at a time on a dedicated
//! worker, so callbacks for one endpoint never overlap and never run on the
//! thread that raised the event.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Sender};
use log::{debug, error, warn};

use crate::{Error, Result};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

pub(crate) struct Notifier {
    tx: Option<Sender<Job>>,
    failed: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Notifier {
    pub(crate) fn spawn(name: String) -> Result<Self> {
        let (tx, rx) = unbounded::<Job>();
        let failed = Arc::new(AtomicBool::new(false));
        let worker_failed = Arc::clone(&failed);
        let handle = thread::Builder::new().name(name).spawn(move || {
            for job in rx.iter() {
                if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(job)) {
                    error!("listener callback panicked: {}", panic_message(panic.as_ref()));
                    worker_failed.store(true, Ordering::Release);
                }
            }
            debug!("notification worker exiting");
        })?;
        Ok(Self {
            tx: Some(tx),
            failed,
            handle: Some(handle),
        })
    }

    pub(crate) fn post(&self, job: Job) {
        let Some(tx) = self.tx.as_ref() else {
            return;
        };
        if tx.send(job).is_err() {
            warn!("notification worker gone, dropping listener callback");
        }
    }

    /// Fails once any callback has panicked.
    pub(crate) fn check(&self) -> Result<()> {
        if self.failed.load(Ordering::Acquire) {
            return Err(Error::ListenerFailed);
        }
        Ok(())
    }

    /// Blocks until every callback queued before this call has run.
    pub(crate) fn flush(&self, timeout: Duration) -> bool {
        let (done_tx, done_rx) = bounded::<()>(1);
        self.post(Box::new(move || {
            let _ = done_tx.send(());
        }));
        done_rx.recv_timeout(timeout).is_ok()
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_jobs_run_in_order_off_thread() {
        let notifier = Notifier::spawn("test-notify".to_string()).unwrap();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let caller = thread::current().id();
        for i in 0..5 {
            let seen = Arc::clone(&seen);
            notifier.post(Box::new(move || {
                assert_ne!(thread::current().id(), caller);
                seen.lock().unwrap().push(i);
            }));
        }
        assert!(notifier.flush(Duration::from_secs(1)));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        notifier.check().unwrap();
    }

    #[test]
    fn test_panicking_callback_latches_failure() {
        let notifier = Notifier::spawn("test-notify".to_string()).unwrap();
        let after = Arc::new(AtomicUsize::new(0));
        notifier.post(Box::new(|| panic!("listener bug")));
        let counter = Arc::clone(&after);
        notifier.post(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(notifier.flush(Duration::from_secs(1)));
        assert!(matches!(notifier.check(), Err(Error::ListenerFailed)));
        assert_eq!(after.load(Ordering::SeqCst), 1);
    }
}
