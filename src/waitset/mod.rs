//! Condition/wait dispatcher.
//!
//! A `WaitSet` blocks the calling thread until at least one registered
//! condition holds or a timeout elapses, then runs the action attached to each
//! triggered condition on the calling thread.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use chronicle_pubsub::waitset::{GuardCondition, WaitSet};
//!
//! let guard = Arc::new(GuardCondition::with_handler(|| {
//!     println!("woken");
//!     Ok(())
//! }));
//! let mut waitset = WaitSet::new();
//! waitset.register(guard.clone())?;
//! guard.set_trigger_value(true);
//! waitset.dispatch(Duration::from_secs(1))?;
//! # Ok::<(), chronicle_pubsub::Error>(())
//! ```

mod condition;
mod signal;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub use condition::{
    Condition, ConditionCore, ConditionHandler, ConditionId, GuardCondition, ReadCondition,
    StatusCondition,
};
pub use signal::{SignalSet, WaitSignal};

use crate::{Error, Result};

static NEXT_WAITSET_ID: AtomicU64 = AtomicU64::new(1);

/// Longest single park when the caller asked for an effectively infinite wait.
const MAX_PARK: Duration = Duration::from_secs(1);

pub struct WaitSet {
    id: u64,
    signal: Arc<WaitSignal>,
    conditions: Vec<Arc<dyn Condition>>,
}

impl WaitSet {
    pub fn new() -> Self {
        Self {
            id: NEXT_WAITSET_ID.fetch_add(1, Ordering::Relaxed),
            signal: Arc::new(WaitSignal::new()),
            conditions: Vec::new(),
        }
    }

    /// Adds a condition. Actions later run in registration order.
    ///
    /// # Errors
    ///
    /// - `Error::AlreadyRegistered` if this condition is already registered here.
    /// - `Error::ConditionInUse` if it is registered with another waitset.
    pub fn register(&mut self, condition: Arc<dyn Condition>) -> Result<()> {
        let id = condition.id();
        if self.conditions.iter().any(|c| c.id() == id) {
            return Err(Error::AlreadyRegistered(id));
        }
        condition.core().claim(self.id)?;
        condition.signals().attach(&self.signal);
        self.conditions.push(condition);
        Ok(())
    }

    /// Removes a condition. Removing an absent condition does nothing.
    pub fn deregister(&mut self, condition: &dyn Condition) {
        let id = condition.id();
        if let Some(pos) = self.conditions.iter().position(|c| c.id() == id) {
            let removed = self.conditions.remove(pos);
            self.detach(removed.as_ref());
        }
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn conditions(&self) -> impl Iterator<Item = &Arc<dyn Condition>> {
        self.conditions.iter()
    }

    /// Blocks until a registered condition holds or `timeout` elapses.
    ///
    /// Returns the triggered conditions in registration order; an empty list
    /// means the timeout elapsed.
    pub fn wait(&self, timeout: Duration) -> Result<Vec<Arc<dyn Condition>>> {
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let observed = self.signal.sequence();
            let active = self
                .conditions
                .iter()
                .filter(|c| c.trigger_value())
                .cloned()
                .collect::<Vec<_>>();
            if !active.is_empty() {
                return Ok(active);
            }

            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(Vec::new());
                    }
                    deadline - now
                }
                None => MAX_PARK,
            };
            self.signal.park(observed, remaining)?;
        }
    }

    /// Waits like `wait`, then runs the action of every triggered condition
    /// once, in registration order, on the calling thread.
    ///
    /// A timeout with nothing triggered is not an error. The first failing
    /// action aborts the dispatch and its error is returned.
    pub fn dispatch(&self, timeout: Duration) -> Result<()> {
        let active = self.wait(timeout)?;
        for condition in active {
            condition.dispatch()?;
        }
        Ok(())
    }

    fn detach(&self, condition: &dyn Condition) {
        condition.signals().detach(&self.signal);
        condition.core().release(self.id);
    }
}

impl Default for WaitSet {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WaitSet {
    fn drop(&mut self) {
        for condition in std::mem::take(&mut self.conditions) {
            self.detach(condition.as_ref());
        }
    }
}
