use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::{DataReader, DataWriter, ReaderShared};
use crate::listener::StatusRouter;
use crate::status::StatusMask;
use crate::waitset::signal::SignalSet;
use crate::{Error, Result};

static NEXT_CONDITION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a condition. Two handles to the same condition share it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConditionId(u64);

impl ConditionId {
    fn next() -> Self {
        Self(NEXT_CONDITION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConditionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Action run by `WaitSet::dispatch` when its condition is triggered.
pub type ConditionHandler = Box<dyn FnMut() -> Result<()> + Send + 'static>;

const UNCLAIMED: u64 = 0;

/// State common to every condition: identity, owning waitset, handler.
pub struct ConditionCore {
    id: ConditionId,
    owner: AtomicU64,
    handler: Mutex<Option<ConditionHandler>>,
}

impl ConditionCore {
    fn new(handler: Option<ConditionHandler>) -> Self {
        Self {
            id: ConditionId::next(),
            owner: AtomicU64::new(UNCLAIMED),
            handler: Mutex::new(handler),
        }
    }

    pub fn id(&self) -> ConditionId {
        self.id
    }

    pub(crate) fn claim(&self, waitset: u64) -> Result<()> {
        self.owner
            .compare_exchange(UNCLAIMED, waitset, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| Error::ConditionInUse(self.id))
    }

    pub(crate) fn release(&self, waitset: u64) {
        let _ = self
            .owner
            .compare_exchange(waitset, UNCLAIMED, Ordering::AcqRel, Ordering::Acquire);
    }

    fn set_handler(&self, handler: Option<ConditionHandler>) {
        *self.handler.lock().unwrap_or_else(PoisonError::into_inner) = handler;
    }

    fn run(&self) -> Result<()> {
        let mut handler = self
            .handler
            .lock()
            .map_err(|_| Error::Corrupt("condition handler lock poisoned"))?;
        match handler.as_mut() {
            Some(action) => action(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ConditionCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConditionCore")
            .field("id", &self.id)
            .field("owner", &self.owner.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A predicate a `WaitSet` can wait on, plus the action to run when it holds.
pub trait Condition: Send + Sync {
    fn core(&self) -> &ConditionCore;

    /// Current value of the predicate. Must not block.
    fn trigger_value(&self) -> bool;

    /// Where a waitset registers to be woken when the predicate may change.
    fn signals(&self) -> &SignalSet;

    fn id(&self) -> ConditionId {
        self.core().id()
    }

    /// Runs the attached action, if any.
    fn dispatch(&self) -> Result<()> {
        self.core().run()
    }

    fn set_handler(&self, handler: ConditionHandler) {
        self.core().set_handler(Some(handler));
    }

    fn clear_handler(&self) {
        self.core().set_handler(None);
    }
}

/// Condition whose trigger value is set by the application.
pub struct GuardCondition {
    core: ConditionCore,
    triggered: AtomicBool,
    signals: SignalSet,
}

impl GuardCondition {
    pub fn new() -> Self {
        Self {
            core: ConditionCore::new(None),
            triggered: AtomicBool::new(false),
            signals: SignalSet::new(),
        }
    }

    pub fn with_handler<F>(handler: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        let guard = Self::new();
        guard.core.set_handler(Some(Box::new(handler)));
        guard
    }

    pub fn set_trigger_value(&self, value: bool) {
        self.triggered.store(value, Ordering::Release);
        if value {
            self.signals.notify_all();
        }
    }
}

impl Default for GuardCondition {
    fn default() -> Self {
        Self::new()
    }
}

impl Condition for GuardCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    fn trigger_value(&self) -> bool {
        self.triggered.load(Ordering::Acquire)
    }

    fn signals(&self) -> &SignalSet {
        &self.signals
    }
}

/// Triggered while the reader holds samples that have not been taken.
///
/// The reader's listener must not also receive `DataAvailable`, otherwise
/// one arrival would be reported twice.
pub struct ReadCondition {
    core: ConditionCore,
    reader: Arc<ReaderShared>,
}

impl ReadCondition {
    pub fn new(reader: &DataReader) -> Result<Self> {
        Self::build(reader, None)
    }

    pub fn with_handler<F>(reader: &DataReader, handler: F) -> Result<Self>
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        Self::build(reader, Some(Box::new(handler)))
    }

    fn build(reader: &DataReader, handler: Option<ConditionHandler>) -> Result<Self> {
        let shared = reader.shared();
        let overlap = shared.router().listener_kinds() & StatusMask::DATA_AVAILABLE;
        if !overlap.is_empty() {
            return Err(Error::DoubleDelivery(overlap));
        }
        Ok(Self {
            core: ConditionCore::new(handler),
            reader: Arc::clone(shared),
        })
    }
}

impl Condition for ReadCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    fn trigger_value(&self) -> bool {
        self.reader.available() > 0
    }

    fn signals(&self) -> &SignalSet {
        self.reader.router().signals()
    }
}

/// Triggered while any of the enabled status kinds has changed on an endpoint
/// and not yet been consumed with `take_status`.
pub struct StatusCondition {
    core: ConditionCore,
    router: Arc<StatusRouter>,
    enabled: StatusMask,
}

impl StatusCondition {
    pub fn for_writer(writer: &DataWriter, enabled: StatusMask) -> Result<Self> {
        Self::build(writer.router(), enabled)
    }

    pub fn for_reader(reader: &DataReader, enabled: StatusMask) -> Result<Self> {
        Self::build(reader.shared().router(), enabled)
    }

    fn build(router: &Arc<StatusRouter>, enabled: StatusMask) -> Result<Self> {
        let overlap = router.listener_kinds() & enabled;
        if !overlap.is_empty() {
            return Err(Error::DoubleDelivery(overlap));
        }
        Ok(Self {
            core: ConditionCore::new(None),
            router: Arc::clone(router),
            enabled,
        })
    }

    pub fn enabled_statuses(&self) -> StatusMask {
        self.enabled
    }

    pub fn with_handler<F>(self, handler: F) -> Self
    where
        F: FnMut() -> Result<()> + Send + 'static,
    {
        self.core.set_handler(Some(Box::new(handler)));
        self
    }
}

impl Condition for StatusCondition {
    fn core(&self) -> &ConditionCore {
        &self.core
    }

    fn trigger_value(&self) -> bool {
        self.router.changes().intersects(self.enabled)
    }

    fn signals(&self) -> &SignalSet {
        self.router.signals()
    }
}
