//! Endpoint listeners and the routing of status events to them.
//!
//! Every listener method has a do-nothing default, so an implementation only
//! overrides the kinds it cares about. Callbacks run on the participant's
//! notification thread, never on the thread that caused the event; state a
//! listener shares with the main loop must be synchronised.

use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::EndpointId;
use crate::notifier::Notifier;
use crate::status::{
    DeadlineMissedStatus, IncompatibleQosStatus, LivelinessChangedStatus, LivelinessLostStatus,
    MatchedStatus, SampleLostStatus, SampleRejectedStatus, StatusEvent, StatusKind, StatusMask,
    StatusTable,
};
use crate::waitset::SignalSet;

pub trait DataWriterListener: Send + Sync {
    fn on_offered_deadline_missed(&self, _writer: EndpointId, _status: &DeadlineMissedStatus) {}

    fn on_offered_incompatible_qos(&self, _writer: EndpointId, _status: &IncompatibleQosStatus) {}

    fn on_publication_matched(&self, _writer: EndpointId, _status: &MatchedStatus) {}

    fn on_liveliness_lost(&self, _writer: EndpointId, _status: &LivelinessLostStatus) {}
}

pub trait DataReaderListener: Send + Sync {
    fn on_requested_deadline_missed(&self, _reader: EndpointId, _status: &DeadlineMissedStatus) {}

    fn on_sample_rejected(&self, _reader: EndpointId, _status: &SampleRejectedStatus) {}

    fn on_sample_lost(&self, _reader: EndpointId, _status: &SampleLostStatus) {}

    fn on_requested_incompatible_qos(
        &self,
        _reader: EndpointId,
        _status: &IncompatibleQosStatus,
    ) {
    }

    fn on_subscription_matched(&self, _reader: EndpointId, _status: &MatchedStatus) {}

    fn on_liveliness_changed(&self, _reader: EndpointId, _status: &LivelinessChangedStatus) {}

    fn on_data_available(&self, _reader: EndpointId) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpWriterListener;

impl DataWriterListener for NoOpWriterListener {}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpReaderListener;

impl DataReaderListener for NoOpReaderListener {}

#[derive(Clone)]
pub(crate) enum ListenerHandle {
    Writer(Arc<dyn DataWriterListener>),
    Reader(Arc<dyn DataReaderListener>),
}

impl ListenerHandle {
    fn deliver(&self, endpoint: EndpointId, event: &StatusEvent) {
        match (self, event) {
            (ListenerHandle::Writer(l), StatusEvent::OfferedDeadlineMissed(s)) => {
                l.on_offered_deadline_missed(endpoint, s)
            }
            (ListenerHandle::Writer(l), StatusEvent::OfferedIncompatibleQos(s)) => {
                l.on_offered_incompatible_qos(endpoint, s)
            }
            (ListenerHandle::Writer(l), StatusEvent::PublicationMatched(s)) => {
                l.on_publication_matched(endpoint, s)
            }
            (ListenerHandle::Writer(l), StatusEvent::LivelinessLost(s)) => {
                l.on_liveliness_lost(endpoint, s)
            }
            (ListenerHandle::Reader(l), StatusEvent::RequestedDeadlineMissed(s)) => {
                l.on_requested_deadline_missed(endpoint, s)
            }
            (ListenerHandle::Reader(l), StatusEvent::SampleRejected(s)) => {
                l.on_sample_rejected(endpoint, s)
            }
            (ListenerHandle::Reader(l), StatusEvent::SampleLost(s)) => l.on_sample_lost(endpoint, s),
            (ListenerHandle::Reader(l), StatusEvent::RequestedIncompatibleQos(s)) => {
                l.on_requested_incompatible_qos(endpoint, s)
            }
            (ListenerHandle::Reader(l), StatusEvent::SubscriptionMatched(s)) => {
                l.on_subscription_matched(endpoint, s)
            }
            (ListenerHandle::Reader(l), StatusEvent::LivelinessChanged(s)) => {
                l.on_liveliness_changed(endpoint, s)
            }
            (ListenerHandle::Reader(l), StatusEvent::DataAvailable) => l.on_data_available(endpoint),
            (_, other) => {
                log::debug!("{endpoint}: no listener method for {:?}", other.kind());
            }
        }
    }

    fn role_kinds(&self) -> StatusMask {
        match self {
            ListenerHandle::Writer(_) => StatusMask::writer(),
            ListenerHandle::Reader(_) => StatusMask::reader(),
        }
    }
}

/// Per-endpoint status bookkeeping and listener routing.
///
/// Every raised event is recorded in the status table and wakes attached
/// waitsets. It is additionally handed to the listener, exactly once, when a
/// listener is installed and its kind is not in the endpoint mask; a kind
/// delivered that way is consumed immediately.
pub(crate) struct StatusRouter {
    endpoint: EndpointId,
    mask: StatusMask,
    listener: Option<ListenerHandle>,
    table: Mutex<StatusTable>,
    signals: SignalSet,
    notifier: Arc<Notifier>,
}

impl StatusRouter {
    pub(crate) fn new(
        endpoint: EndpointId,
        listener: Option<ListenerHandle>,
        mask: StatusMask,
        notifier: Arc<Notifier>,
    ) -> Self {
        Self {
            endpoint,
            mask,
            listener,
            table: Mutex::new(StatusTable::default()),
            signals: SignalSet::new(),
            notifier,
        }
    }

    /// Kinds this endpoint hands to its listener.
    pub(crate) fn listener_kinds(&self) -> StatusMask {
        match &self.listener {
            Some(listener) => listener.role_kinds().difference(self.mask),
            None => StatusMask::empty(),
        }
    }

    pub(crate) fn signals(&self) -> &SignalSet {
        &self.signals
    }

    pub(crate) fn changes(&self) -> StatusMask {
        self.table().changes()
    }

    pub(crate) fn take(&self, kind: StatusKind) -> Option<StatusEvent> {
        self.table().take(kind)
    }

    pub(crate) fn consume(&self, kind: StatusKind) {
        self.table().consume(kind);
    }

    pub(crate) fn raise(&self, event: StatusEvent) {
        self.raise_with(|_| event);
    }

    /// Builds the event from the current table, records it and publishes it.
    pub(crate) fn raise_with<F>(&self, build: F)
    where
        F: FnOnce(&StatusTable) -> StatusEvent,
    {
        let event = self.record_with(build);
        self.publish(event);
    }

    /// Records the event without waking anyone. The caller must hand the
    /// returned event to `publish` once it has released its own locks.
    pub(crate) fn record_with<F>(&self, build: F) -> StatusEvent
    where
        F: FnOnce(&StatusTable) -> StatusEvent,
    {
        let listener_kinds = self.listener_kinds();
        let mut table = self.table();
        let event = build(&*table);
        table.record(event);
        if listener_kinds.contains_kind(event.kind()) {
            table.consume(event.kind());
        }
        event
    }

    /// Posts a recorded event to the listener and wakes attached waitsets.
    pub(crate) fn publish(&self, event: StatusEvent) {
        if self.listener_kinds().contains_kind(event.kind()) {
            if let Some(listener) = self.listener.clone() {
                let endpoint = self.endpoint;
                self.notifier
                    .post(Box::new(move || listener.deliver(endpoint, &event)));
            }
        }
        self.signals.notify_all();
    }

    fn table(&self) -> std::sync::MutexGuard<'_, StatusTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
