//! In-process delivery engine: participants, topics and endpoints.
//!
//! Participants that join the same domain id inside one process share a
//! `Domain`. Samples written on a topic reach every reader bound to the same
//! topic name in that domain. With a journal root configured, writers append
//! to a per-topic journal file instead and a tail thread feeds local readers,
//! which lets two processes exchange samples.

mod journal;
mod participant;
mod qos;
mod reader;
mod topic;
mod writer;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use log::debug;

pub use participant::{DomainParticipant, ParticipantConfig, Publisher, Subscriber};
pub use qos::{QosProfile, DEFAULT_QOS_PROFILE};
pub use reader::{DataReader, LoanedSamples, ReaderConfig};
pub use topic::Topic;
pub use writer::{CoherentSet, DataWriter};

pub(crate) use reader::ReaderShared;
pub(crate) use topic::TopicBus;

use crate::sample::Sample;
use crate::{Error, Result};

static NEXT_ENDPOINT: AtomicU64 = AtomicU64::new(1);

/// Process-unique endpoint identity; the high half carries the process id so
/// identities stay distinct across processes sharing a journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId(u64);

impl EndpointId {
    pub(crate) fn next() -> Self {
        let local = NEXT_ENDPOINT.fetch_add(1, Ordering::Relaxed) & 0xFFFF_FFFF;
        Self((u64::from(std::process::id()) << 32) | local)
    }

    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ep-{:016x}", self.0)
    }
}

/// One change travelling from a writer to the readers of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Delivery {
    Data {
        writer: EndpointId,
        sample: Sample,
        coherent_set: Option<u64>,
        timestamp_ns: u64,
    },
    Dispose {
        writer: EndpointId,
        id: i32,
        coherent_set: Option<u64>,
        timestamp_ns: u64,
    },
    Unregister {
        writer: EndpointId,
        id: i32,
        timestamp_ns: u64,
    },
}

impl Delivery {
    pub(crate) fn writer(&self) -> EndpointId {
        match self {
            Delivery::Data { writer, .. }
            | Delivery::Dispose { writer, .. }
            | Delivery::Unregister { writer, .. } => *writer,
        }
    }

    pub(crate) fn coherent_set(&self) -> Option<u64> {
        match self {
            Delivery::Data { coherent_set, .. } | Delivery::Dispose { coherent_set, .. } => {
                *coherent_set
            }
            Delivery::Unregister { .. } => None,
        }
    }

    fn with_coherent_set(self, seq: u64) -> Self {
        match self {
            Delivery::Data {
                writer,
                sample,
                timestamp_ns,
                ..
            } => Delivery::Data {
                writer,
                sample,
                coherent_set: Some(seq),
                timestamp_ns,
            },
            Delivery::Dispose {
                writer,
                id,
                timestamp_ns,
                ..
            } => Delivery::Dispose {
                writer,
                id,
                coherent_set: Some(seq),
                timestamp_ns,
            },
            other => other,
        }
    }
}

pub(crate) struct Domain {
    id: u32,
    journal_root: Option<PathBuf>,
    poll_interval: Duration,
    topics: Mutex<HashMap<String, Arc<TopicBus>>>,
    participants: AtomicUsize,
}

impl Domain {
    pub(crate) fn id(&self) -> u32 {
        self.id
    }

    pub(crate) fn journal_root(&self) -> Option<&Path> {
        self.journal_root.as_deref()
    }

    pub(crate) fn topic_bus(&self, name: &str) -> Result<Arc<TopicBus>> {
        let mut topics = self
            .topics
            .lock()
            .map_err(|_| Error::Corrupt("domain topic table lock poisoned"))?;
        if let Some(bus) = topics.get(name) {
            return Ok(Arc::clone(bus));
        }
        let bus = TopicBus::open(self, name, self.poll_interval)?;
        topics.insert(name.to_string(), Arc::clone(&bus));
        Ok(bus)
    }

    pub(crate) fn leave(&self) {
        self.participants.fetch_sub(1, Ordering::AcqRel);
    }
}

fn registry() -> &'static Mutex<HashMap<u32, Arc<Domain>>> {
    static DOMAINS: OnceLock<Mutex<HashMap<u32, Arc<Domain>>>> = OnceLock::new();
    DOMAINS.get_or_init(|| Mutex::new(HashMap::new()))
}

pub(crate) fn join_domain(domain_id: u32, config: &ParticipantConfig) -> Result<Arc<Domain>> {
    let mut domains = registry()
        .lock()
        .map_err(|_| Error::Corrupt("domain registry lock poisoned"))?;
    if let Some(domain) = domains.get(&domain_id) {
        if domain.journal_root == config.journal_root {
            domain.participants.fetch_add(1, Ordering::AcqRel);
            return Ok(Arc::clone(domain));
        }
        if domain.participants.load(Ordering::Acquire) > 0 {
            return Err(Error::Config(format!(
                "domain {domain_id} already joined with a different journal root"
            )));
        }
        debug!("replacing idle domain {domain_id}");
    }

    let domain = Arc::new(Domain {
        id: domain_id,
        journal_root: config.journal_root.clone(),
        poll_interval: config.poll_interval,
        topics: Mutex::new(HashMap::new()),
        participants: AtomicUsize::new(1),
    });
    domains.insert(domain_id, Arc::clone(&domain));
    debug!("domain {domain_id} created");
    Ok(domain)
}

/// Process-wide teardown of the engine's shared state.
///
/// # Errors
///
/// `Error::PreconditionNotMet` while any participant is still alive.
pub fn finalize_all() -> Result<()> {
    let mut domains = registry()
        .lock()
        .map_err(|_| Error::Corrupt("domain registry lock poisoned"))?;
    if domains
        .values()
        .any(|d| d.participants.load(Ordering::Acquire) > 0)
    {
        return Err(Error::PreconditionNotMet(
            "participants still alive at finalize",
        ));
    }
    let released = domains.len();
    domains.clear();
    debug!("finalized {released} domain(s)");
    Ok(())
}
