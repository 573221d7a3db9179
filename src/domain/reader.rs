use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, trace};

use crate::domain::{Delivery, EndpointId, QosProfile, Subscriber, Topic};
use crate::listener::{DataReaderListener, ListenerHandle, StatusRouter};
use crate::sample::{InstanceState, LoanedSample, Sample, SampleInfo};
use crate::status::{StatusEvent, StatusKind, StatusMask};
use crate::{Error, Result};

/// Spare loan buffers kept per reader.
const SPARE_BUFFERS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderConfig {
    /// Queue depth; data beyond it is rejected with `SampleRejected`.
    /// `None` keeps every sample until taken.
    pub max_samples: Option<usize>,
}

impl ReaderConfig {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Typed reader for `Sample`. Clones share one endpoint and one queue.
#[derive(Clone)]
pub struct DataReader {
    shared: Arc<ReaderShared>,
}

pub(crate) struct ReaderShared {
    id: EndpointId,
    topic: Topic,
    qos: QosProfile,
    config: ReaderConfig,
    router: Arc<StatusRouter>,
    state: Mutex<ReaderState>,
    loans: AtomicUsize,
}

#[derive(Default)]
struct ReaderState {
    queue: Vec<LoanedSample>,
    spare: Vec<Vec<LoanedSample>>,
    instances: HashMap<i32, Instance>,
    matched: BTreeSet<EndpointId>,
}

struct Instance {
    state: InstanceState,
    writers: BTreeSet<EndpointId>,
}

impl DataReader {
    pub fn create(
        subscriber: &Subscriber,
        topic: &Topic,
        qos: &QosProfile,
        listener: Option<Arc<dyn DataReaderListener>>,
        mask: StatusMask,
    ) -> Result<Self> {
        Self::create_with_config(subscriber, topic, qos, listener, mask, ReaderConfig::default())
    }

    pub fn create_with_config(
        subscriber: &Subscriber,
        topic: &Topic,
        qos: &QosProfile,
        listener: Option<Arc<dyn DataReaderListener>>,
        mask: StatusMask,
        config: ReaderConfig,
    ) -> Result<Self> {
        let participant = subscriber.participant();
        participant.inner().check()?;
        if config.max_samples == Some(0) {
            return Err(Error::Config("max_samples must be at least 1".to_string()));
        }
        if topic.participant().domain_id() != participant.domain_id() {
            return Err(Error::Config(format!(
                "topic `{}` belongs to domain {}, subscriber to domain {}",
                topic.name(),
                topic.participant().domain_id(),
                participant.domain_id()
            )));
        }

        let id = EndpointId::next();
        let router = Arc::new(StatusRouter::new(
            id,
            listener.map(ListenerHandle::Reader),
            mask,
            Arc::clone(participant.inner().notifier()),
        ));
        let shared = Arc::new(ReaderShared {
            id,
            topic: topic.clone(),
            qos: qos.clone(),
            config,
            router,
            state: Mutex::new(ReaderState::default()),
            loans: AtomicUsize::new(0),
        });
        debug!(
            "reader {id} created on `{}` ({}) mask {mask:?}",
            topic.name(),
            shared.qos
        );
        for writer in topic.bus().attach_reader(&shared) {
            writer.on_reader_matched(id);
            shared.on_writer_matched(writer.id());
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

    /// Removes every queued unit and lends it to the caller. The loan ends
    /// when the returned guard drops.
    pub fn take(&self) -> Result<LoanedSamples<'_>> {
        self.shared.topic.participant().inner().check()?;
        let samples = {
            let mut state = self.shared.state();
            let mut buf = state.spare.pop().unwrap_or_default();
            buf.append(&mut state.queue);
            self.shared.router.consume(StatusKind::DataAvailable);
            buf
        };
        self.shared.loans.fetch_add(1, Ordering::AcqRel);
        trace!("reader {}: loaned {} unit(s)", self.shared.id, samples.len());
        Ok(LoanedSamples {
            reader: &self.shared,
            samples,
        })
    }

    /// Units waiting to be taken.
    pub fn available(&self) -> usize {
        self.shared.available()
    }

    pub fn outstanding_loans(&self) -> usize {
        self.shared.loans.load(Ordering::Acquire)
    }

    /// `None` until the reader has seen data for the instance.
    pub fn instance_state(&self, id: i32) -> Option<InstanceState> {
        self.shared.state().instances.get(&id).map(|i| i.state)
    }

    pub fn matched_publications(&self) -> Vec<EndpointId> {
        self.shared.state().matched.iter().copied().collect()
    }

    pub fn status_changes(&self) -> StatusMask {
        self.shared.router.changes()
    }

    /// Latest value of `kind` and clears its changed bit.
    pub fn take_status(&self, kind: StatusKind) -> Option<StatusEvent> {
        self.shared.router.take(kind)
    }

    pub(crate) fn shared(&self) -> &Arc<ReaderShared> {
        &self.shared
    }
}

impl ReaderShared {
    pub(crate) fn id(&self) -> EndpointId {
        self.id
    }

    pub(crate) fn available(&self) -> usize {
        self.state().queue.len()
    }

    pub(crate) fn router(&self) -> &Arc<StatusRouter> {
        &self.router
    }

    fn state(&self) -> MutexGuard<'_, ReaderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies one batch from the topic. The whole batch becomes visible to
    /// `take` at once. A coherent set whose data does not fit under
    /// `max_samples` is rejected as a whole.
    pub(crate) fn receive(&self, batch: &[Delivery]) {
        let mut events = Vec::new();
        {
            let mut guard = self.state();
            let state = &mut *guard;
            let mut pushed = 0usize;

            let reject_set = match (self.config.max_samples, coherent_set_of(batch)) {
                (Some(max), Some(seq)) => {
                    let data = batch
                        .iter()
                        .filter(|d| matches!(d, Delivery::Data { .. }))
                        .count();
                    let reject = state.queue.len() + data > max;
                    if reject {
                        debug!(
                            "reader {}: coherent set {seq} with {data} sample(s) does not fit",
                            self.id
                        );
                    }
                    reject
                }
                _ => false,
            };

            for delivery in batch {
                match *delivery {
                    Delivery::Data {
                        writer,
                        sample,
                        coherent_set,
                        timestamp_ns,
                    } => {
                        let full = self
                            .config
                            .max_samples
                            .is_some_and(|max| state.queue.len() >= max);
                        if reject_set || (full && coherent_set.is_none()) {
                            debug!("reader {}: rejected sample for instance {}", self.id, sample.id);
                            events.push(self.router.record_with(|table| {
                                StatusEvent::SampleRejected(table.next_rejected(sample.id))
                            }));
                            continue;
                        }
                        let instance = state.instances.entry(sample.id).or_insert_with(|| Instance {
                            state: InstanceState::Alive,
                            writers: BTreeSet::new(),
                        });
                        instance.state = InstanceState::Alive;
                        instance.writers.insert(writer);
                        state.queue.push(LoanedSample::new(
                            sample,
                            SampleInfo {
                                valid: true,
                                instance_state: InstanceState::Alive,
                                coherent_set_sequence_number: coherent_set,
                                source_timestamp_ns: timestamp_ns,
                                publication: writer,
                            },
                        ));
                        pushed += 1;
                    }
                    Delivery::Dispose {
                        writer,
                        id,
                        coherent_set,
                        timestamp_ns,
                    } => {
                        if reject_set && coherent_set.is_some() {
                            continue;
                        }
                        let Some(instance) = state.instances.get_mut(&id) else {
                            trace!("reader {}: dispose of unseen instance {id}", self.id);
                            continue;
                        };
                        if instance.state == InstanceState::NotAliveDisposed {
                            continue;
                        }
                        instance.state = InstanceState::NotAliveDisposed;
                        state.queue.push(LoanedSample::new(
                            Sample::key_only(id),
                            SampleInfo {
                                valid: false,
                                instance_state: InstanceState::NotAliveDisposed,
                                coherent_set_sequence_number: coherent_set,
                                source_timestamp_ns: timestamp_ns,
                                publication: writer,
                            },
                        ));
                        pushed += 1;
                    }
                    Delivery::Unregister {
                        writer,
                        id,
                        timestamp_ns,
                    } => {
                        let Some(instance) = state.instances.get_mut(&id) else {
                            continue;
                        };
                        instance.writers.remove(&writer);
                        if !instance.writers.is_empty() || !instance.state.is_alive() {
                            continue;
                        }
                        instance.state = InstanceState::NotAliveNoWriters;
                        state.queue.push(LoanedSample::new(
                            Sample::key_only(id),
                            SampleInfo {
                                valid: false,
                                instance_state: InstanceState::NotAliveNoWriters,
                                coherent_set_sequence_number: None,
                                source_timestamp_ns: timestamp_ns,
                                publication: writer,
                            },
                        ));
                        pushed += 1;
                    }
                }
            }

            if pushed > 0 {
                events.push(self.router.record_with(|_| StatusEvent::DataAvailable));
            }
        }

        for event in events {
            self.router.publish(event);
        }
    }

    pub(crate) fn report_lost(&self, lost: u64) {
        self.router
            .raise_with(|table| StatusEvent::SampleLost(table.next_lost(lost)));
    }

    pub(crate) fn on_writer_matched(&self, writer: EndpointId) {
        self.state().matched.insert(writer);
        self.router.raise_with(|table| {
            StatusEvent::SubscriptionMatched(table.next_matched(
                StatusKind::SubscriptionMatched,
                writer,
                true,
            ))
        });
        self.router.raise_with(|table| {
            StatusEvent::LivelinessChanged(table.next_liveliness(writer, true))
        });
    }

    pub(crate) fn on_writer_unmatched(&self, writer: EndpointId) {
        if !self.state().matched.remove(&writer) {
            return;
        }
        self.router.raise_with(|table| {
            StatusEvent::SubscriptionMatched(table.next_matched(
                StatusKind::SubscriptionMatched,
                writer,
                false,
            ))
        });
        self.router.raise_with(|table| {
            StatusEvent::LivelinessChanged(table.next_liveliness(writer, false))
        });
    }

    fn recycle(&self, mut buf: Vec<LoanedSample>) {
        buf.clear();
        let mut state = self.state();
        if state.spare.len() < SPARE_BUFFERS {
            state.spare.push(buf);
        }
    }
}

impl Drop for ReaderShared {
    fn drop(&mut self) {
        let bus = Arc::clone(self.topic.bus());
        for writer in bus.detach_reader() {
            writer.on_reader_unmatched(self.id);
        }
        debug!("reader {} closed", self.id);
    }
}

/// Units lent out by `DataReader::take`. Dropping the guard returns the
/// storage to the reader.
pub struct LoanedSamples<'r> {
    reader: &'r ReaderShared,
    samples: Vec<LoanedSample>,
}

impl LoanedSamples<'_> {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&LoanedSample> {
        self.samples.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, LoanedSample> {
        self.samples.iter()
    }

    pub fn as_slice(&self) -> &[LoanedSample] {
        &self.samples
    }

    /// Ends the loan early. Equivalent to dropping the guard.
    pub fn return_loan(self) {}
}

impl<'a> IntoIterator for &'a LoanedSamples<'_> {
    type Item = &'a LoanedSample;
    type IntoIter = std::slice::Iter<'a, LoanedSample>;

    fn into_iter(self) -> Self::IntoIter {
        self.samples.iter()
    }
}

impl Drop for LoanedSamples<'_> {
    fn drop(&mut self) {
        self.reader.recycle(std::mem::take(&mut self.samples));
        self.reader.loans.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Sequence number of the coherent set a batch carries, if any.
fn coherent_set_of(batch: &[Delivery]) -> Option<u64> {
    batch.iter().find_map(Delivery::coherent_set)
}
