use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, warn};

use crate::domain::participant::ParticipantInner;
use crate::domain::{Delivery, EndpointId, Publisher, QosProfile, Topic};
use crate::listener::{DataWriterListener, ListenerHandle, StatusRouter};
use crate::sample::Sample;
use crate::status::{StatusEvent, StatusKind, StatusMask};
use crate::{Error, Result};

/// Typed writer for `Sample`. Clones share one endpoint; the endpoint is
/// removed, and its live instances unregistered, when the last clone drops.
#[derive(Clone)]
pub struct DataWriter {
    shared: Arc<WriterShared>,
}

pub(crate) struct WriterShared {
    id: EndpointId,
    topic: Topic,
    qos: QosProfile,
    router: Arc<StatusRouter>,
    state: Mutex<WriterState>,
}

#[derive(Default)]
struct WriterState {
    registered: BTreeSet<i32>,
    matched: BTreeSet<EndpointId>,
    open_set: Option<OpenSet>,
    last_set: u64,
}

struct OpenSet {
    sequence_number: u64,
    pending: Vec<Delivery>,
}

impl DataWriter {
    pub fn create(
        publisher: &Publisher,
        topic: &Topic,
        qos: &QosProfile,
        listener: Option<Arc<dyn DataWriterListener>>,
        mask: StatusMask,
    ) -> Result<Self> {
        let participant = publisher.participant();
        participant.inner().check()?;
        if topic.participant().domain_id() != participant.domain_id() {
            return Err(Error::Config(format!(
                "topic `{}` belongs to domain {}, publisher to domain {}",
                topic.name(),
                topic.participant().domain_id(),
                participant.domain_id()
            )));
        }

        let id = EndpointId::next();
        let router = Arc::new(StatusRouter::new(
            id,
            listener.map(ListenerHandle::Writer),
            mask,
            Arc::clone(participant.inner().notifier()),
        ));
        let shared = Arc::new(WriterShared {
            id,
            topic: topic.clone(),
            qos: qos.clone(),
            router,
            state: Mutex::new(WriterState::default()),
        });
        debug!(
            "writer {id} created on `{}` ({}) mask {mask:?}",
            topic.name(),
            shared.qos
        );
        for reader in topic.bus().attach_writer(&shared) {
            shared.on_reader_matched(reader.id());
            reader.on_writer_matched(id);
        }
        Ok(Self { shared })
    }

    pub fn id(&self) -> EndpointId {
        self.shared.id
    }

    pub fn topic(&self) -> &Topic {
        &self.shared.topic
    }

    pub fn qos(&self) -> &QosProfile {
        &self.shared.qos
    }

    /// Publishes one sample and registers its instance with this writer.
    pub fn write(&self, sample: &Sample) -> Result<()> {
        let delivery = Delivery::Data {
            writer: self.shared.id,
            sample: *sample,
            coherent_set: None,
            timestamp_ns: self.shared.participant().now_ns(),
        };
        self.shared.submit(delivery, |state| {
            state.registered.insert(sample.id);
            Ok(())
        })
    }

    /// Marks the instance disposed for every reader.
    pub fn dispose(&self, id: i32) -> Result<()> {
        let delivery = Delivery::Dispose {
            writer: self.shared.id,
            id,
            coherent_set: None,
            timestamp_ns: self.shared.participant().now_ns(),
        };
        self.shared.submit(delivery, |state| {
            state.registered.insert(id);
            Ok(())
        })
    }

    /// Withdraws this writer from the instance.
    ///
    /// # Errors
    ///
    /// `Error::PreconditionNotMet` if this writer never wrote the instance.
    pub fn unregister_instance(&self, id: i32) -> Result<()> {
        let delivery = Delivery::Unregister {
            writer: self.shared.id,
            id,
            timestamp_ns: self.shared.participant().now_ns(),
        };
        self.shared.submit(delivery, |state| {
            if state.registered.remove(&id) {
                Ok(())
            } else {
                Err(Error::PreconditionNotMet("instance not registered by this writer"))
            }
        })
    }

    /// Opens a coherent set. Writes made until the guard ends reach readers
    /// together, tagged with the set's sequence number.
    pub fn begin_coherent_set(&self) -> Result<CoherentSet<'_>> {
        self.shared.participant().check()?;
        let mut state = self.shared.state();
        if state.open_set.is_some() {
            return Err(Error::PreconditionNotMet("coherent set already open"));
        }
        state.last_set += 1;
        let sequence_number = state.last_set;
        state.open_set = Some(OpenSet {
            sequence_number,
            pending: Vec::new(),
        });
        debug!("writer {}: coherent set {sequence_number} opened", self.shared.id);
        Ok(CoherentSet {
            writer: self,
            sequence_number,
            ended: false,
        })
    }

    pub fn matched_subscriptions(&self) -> Vec<EndpointId> {
        self.shared.state().matched.iter().copied().collect()
    }

    pub fn status_changes(&self) -> StatusMask {
        self.shared.router.changes()
    }

    /// Latest value of `kind` and clears its changed bit.
    pub fn take_status(&self, kind: StatusKind) -> Option<StatusEvent> {
        self.shared.router.take(kind)
    }

    pub(crate) fn router(&self) -> &Arc<StatusRouter> {
        &self.shared.router
    }
}

impl WriterShared {
    pub(crate) fn id(&self) -> EndpointId {
        self.id
    }

    fn participant(&self) -> &Arc<ParticipantInner> {
        self.topic.participant().inner()
    }

    fn state(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `update` and either buffers the delivery in the open coherent
    /// set or hands it to the topic.
    fn submit<F>(&self, delivery: Delivery, update: F) -> Result<()>
    where
        F: FnOnce(&mut WriterState) -> Result<()>,
    {
        self.participant().check()?;
        let mut state = self.state();
        update(&mut *state)?;
        if let Some(set) = state.open_set.as_mut() {
            set.pending
                .push(delivery.with_coherent_set(set.sequence_number));
            return Ok(());
        }
        drop(state);
        self.topic.bus().publish(&[delivery])
    }

    fn end_coherent_set(&self) -> Result<()> {
        let Some(set) = self.state().open_set.take() else {
            return Ok(());
        };
        debug!(
            "writer {}: coherent set {} closed with {} change(s)",
            self.id,
            set.sequence_number,
            set.pending.len()
        );
        self.topic.bus().publish(&set.pending)
    }

    pub(crate) fn on_reader_matched(&self, reader: EndpointId) {
        self.state().matched.insert(reader);
        self.router.raise_with(|table| {
            StatusEvent::PublicationMatched(table.next_matched(
                StatusKind::PublicationMatched,
                reader,
                true,
            ))
        });
    }

    pub(crate) fn on_reader_unmatched(&self, reader: EndpointId) {
        if !self.state().matched.remove(&reader) {
            return;
        }
        self.router.raise_with(|table| {
            StatusEvent::PublicationMatched(table.next_matched(
                StatusKind::PublicationMatched,
                reader,
                false,
            ))
        });
    }
}

impl Drop for WriterShared {
    fn drop(&mut self) {
        let (registered, pending) = {
            let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
            (
                std::mem::take(&mut state.registered),
                state.open_set.take().map(|set| set.pending),
            )
        };
        let timestamp_ns = self.participant().now_ns();
        let mut batch = pending.unwrap_or_default();
        batch.extend(registered.into_iter().map(|id| Delivery::Unregister {
            writer: self.id,
            id,
            timestamp_ns,
        }));
        if let Err(err) = self.topic.bus().publish(&batch) {
            warn!("writer {}: failed to unregister instances: {err}", self.id);
        }

        let bus = Arc::clone(self.topic.bus());
        for reader in bus.detach_writer() {
            reader.on_writer_unmatched(self.id);
        }
        debug!("writer {} closed", self.id);
    }
}

/// An open coherent set. Ends on `end()` or when dropped.
pub struct CoherentSet<'w> {
    writer: &'w DataWriter,
    sequence_number: u64,
    ended: bool,
}

impl CoherentSet<'_> {
    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    /// Publishes every change made in the set as one batch.
    pub fn end(mut self) -> Result<()> {
        self.ended = true;
        self.writer.shared.end_coherent_set()
    }
}

impl Drop for CoherentSet<'_> {
    fn drop(&mut self) {
        if self.ended {
            return;
        }
        if let Err(err) = self.writer.shared.end_coherent_set() {
            warn!(
                "writer {}: coherent set {} not published: {err}",
                self.writer.shared.id, self.sequence_number
            );
        }
    }
}
