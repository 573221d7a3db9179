use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use log::debug;

use crate::domain::journal::{JournalTail, TopicJournal};
use crate::domain::reader::ReaderShared;
use crate::domain::writer::WriterShared;
use crate::domain::{Delivery, Domain, DomainParticipant};
use crate::sample::Sample;
use crate::{Error, Result};

/// A named channel carrying `Sample`s within one domain.
#[derive(Clone)]
pub struct Topic {
    name: String,
    participant: DomainParticipant,
    bus: Arc<TopicBus>,
}

impl Topic {
    pub fn bind(participant: &DomainParticipant, name: &str) -> Result<Self> {
        if name.trim().is_empty() {
            return Err(Error::Config("topic name must not be empty".to_string()));
        }
        let bus = participant.inner().domain().topic_bus(name)?;
        Ok(Self {
            name: name.to_string(),
            participant: participant.clone(),
            bus,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn type_name(&self) -> &'static str {
        Sample::TYPE_NAME
    }

    pub fn participant(&self) -> &DomainParticipant {
        &self.participant
    }

    pub(crate) fn bus(&self) -> &Arc<TopicBus> {
        &self.bus
    }
}

#[derive(Default)]
struct Endpoints {
    writers: Vec<Weak<WriterShared>>,
    readers: Vec<Weak<ReaderShared>>,
}

/// Domain-wide state of one topic: the live endpoints and, in journal mode,
/// the journal file and its tail.
pub(crate) struct TopicBus {
    name: String,
    endpoints: Mutex<Endpoints>,
    journal: Option<TopicJournal>,
    tail: Mutex<Option<JournalTail>>,
}

impl TopicBus {
    pub(crate) fn open(domain: &Domain, name: &str, poll_interval: Duration) -> Result<Arc<Self>> {
        let journal = match domain.journal_root() {
            Some(root) => Some(TopicJournal::open(root, domain.id(), name)?),
            None => None,
        };
        let journal_path = journal.as_ref().map(|j| j.path().to_path_buf());
        let bus = Arc::new(Self {
            name: name.to_string(),
            endpoints: Mutex::new(Endpoints::default()),
            journal,
            tail: Mutex::new(None),
        });
        if let Some(path) = journal_path {
            let tail = JournalTail::spawn(path, poll_interval, Arc::downgrade(&bus))?;
            *bus.tail.lock().unwrap_or_else(PoisonError::into_inner) = Some(tail);
        }
        debug!("topic `{}` opened in domain {}", bus.name, domain.id());
        Ok(bus)
    }

    /// Registers a writer; returns the readers it now matches.
    pub(crate) fn attach_writer(&self, writer: &Arc<WriterShared>) -> Vec<Arc<ReaderShared>> {
        let mut endpoints = self.endpoints();
        endpoints.writers.push(Arc::downgrade(writer));
        live(&mut endpoints.readers)
    }

    /// Registers a reader; returns the writers it now matches.
    pub(crate) fn attach_reader(&self, reader: &Arc<ReaderShared>) -> Vec<Arc<WriterShared>> {
        let mut endpoints = self.endpoints();
        endpoints.readers.push(Arc::downgrade(reader));
        live(&mut endpoints.writers)
    }

    /// Prunes dropped writers; returns the remaining readers.
    pub(crate) fn detach_writer(&self) -> Vec<Arc<ReaderShared>> {
        let mut endpoints = self.endpoints();
        endpoints.writers.retain(|w| w.strong_count() > 0);
        live(&mut endpoints.readers)
    }

    /// Prunes dropped readers; returns the remaining writers.
    pub(crate) fn detach_reader(&self) -> Vec<Arc<WriterShared>> {
        let mut endpoints = self.endpoints();
        endpoints.readers.retain(|r| r.strong_count() > 0);
        live(&mut endpoints.writers)
    }

    /// Hands a batch to the transport. The batch reaches each reader as a
    /// unit.
    pub(crate) fn publish(&self, batch: &[Delivery]) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        match &self.journal {
            Some(journal) => journal.append(batch),
            None => {
                self.deliver_local(batch);
                Ok(())
            }
        }
    }

    pub(crate) fn deliver_local(&self, batch: &[Delivery]) {
        for reader in self.readers() {
            reader.receive(batch);
        }
    }

    pub(crate) fn report_lost(&self, lost: u64) {
        for reader in self.readers() {
            reader.report_lost(lost);
        }
    }

    fn readers(&self) -> Vec<Arc<ReaderShared>> {
        live(&mut self.endpoints().readers)
    }

    fn endpoints(&self) -> std::sync::MutexGuard<'_, Endpoints> {
        self.endpoints.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn live<T>(entries: &mut Vec<Weak<T>>) -> Vec<Arc<T>> {
    entries.retain(|e| e.strong_count() > 0);
    entries.iter().filter_map(Weak::upgrade).collect()
}
