use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::clock::{Clock, SystemClock};
use crate::domain::{join_domain, Domain, QosProfile};
use crate::notifier::Notifier;
use crate::Result;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
pub struct ParticipantConfig {
    /// Directory holding per-topic journals. `None` keeps delivery in-process.
    pub journal_root: Option<PathBuf>,
    /// How often the journal tail looks for new records.
    pub poll_interval: Duration,
    /// Stamps `source_timestamp_ns` on written samples.
    pub clock: Arc<dyn Clock>,
}

impl ParticipantConfig {
    pub fn with_journal(root: impl Into<PathBuf>) -> Self {
        Self {
            journal_root: Some(root.into()),
            ..Self::default()
        }
    }
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            journal_root: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            clock: Arc::new(SystemClock),
        }
    }
}

/// Membership of one domain. Cheap to clone; the membership ends when the
/// last clone and every entity created from it are dropped.
#[derive(Clone)]
pub struct DomainParticipant {
    inner: Arc<ParticipantInner>,
}

pub(crate) struct ParticipantInner {
    domain: Arc<Domain>,
    qos: QosProfile,
    notifier: Arc<Notifier>,
    clock: Arc<dyn Clock>,
}

impl DomainParticipant {
    pub fn join(domain_id: u32, qos: &QosProfile) -> Result<Self> {
        Self::join_with_config(domain_id, qos, ParticipantConfig::default())
    }

    pub fn join_with_config(
        domain_id: u32,
        qos: &QosProfile,
        config: ParticipantConfig,
    ) -> Result<Self> {
        let domain = join_domain(domain_id, &config)?;
        let notifier = match Notifier::spawn(format!("pubsub-notify-{domain_id}")) {
            Ok(notifier) => notifier,
            Err(err) => {
                domain.leave();
                return Err(err);
            }
        };
        info!(
            "joined domain {domain_id} with profile {qos}{}",
            match domain.journal_root() {
                Some(root) => format!(" (journal {})", root.display()),
                None => String::new(),
            }
        );
        Ok(Self {
            inner: Arc::new(ParticipantInner {
                domain,
                qos: qos.clone(),
                notifier: Arc::new(notifier),
                clock: config.clock,
            }),
        })
    }

    pub fn domain_id(&self) -> u32 {
        self.inner.domain.id()
    }

    pub fn qos(&self) -> &QosProfile {
        &self.inner.qos
    }

    /// Blocks until every listener callback queued so far has run.
    pub fn wait_for_listeners(&self, timeout: Duration) -> bool {
        self.inner.notifier.flush(timeout)
    }

    pub(crate) fn inner(&self) -> &Arc<ParticipantInner> {
        &self.inner
    }
}

impl ParticipantInner {
    pub(crate) fn domain(&self) -> &Arc<Domain> {
        &self.domain
    }

    pub(crate) fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    pub(crate) fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    /// Surfaces a listener failure on the main path.
    pub(crate) fn check(&self) -> Result<()> {
        self.notifier.check()
    }
}

impl Drop for ParticipantInner {
    fn drop(&mut self) {
        self.domain.leave();
    }
}

/// Groups writers created by one participant.
#[derive(Clone)]
pub struct Publisher {
    participant: DomainParticipant,
    qos: QosProfile,
}

impl Publisher {
    pub fn new(participant: &DomainParticipant) -> Self {
        Self::with_qos(participant, participant.qos())
    }

    pub fn with_qos(participant: &DomainParticipant, qos: &QosProfile) -> Self {
        Self {
            participant: participant.clone(),
            qos: qos.clone(),
        }
    }

    pub fn participant(&self) -> &DomainParticipant {
        &self.participant
    }

    pub fn qos(&self) -> &QosProfile {
        &self.qos
    }
}

/// Groups readers created by one participant.
#[derive(Clone)]
pub struct Subscriber {
    participant: DomainParticipant,
    qos: QosProfile,
}

impl Subscriber {
    pub fn new(participant: &DomainParticipant) -> Self {
        Self::with_qos(participant, participant.qos())
    }

    pub fn with_qos(participant: &DomainParticipant, qos: &QosProfile) -> Self {
        Self {
            participant: participant.clone(),
            qos: qos.clone(),
        }
    }

    pub fn participant(&self) -> &DomainParticipant {
        &self.participant
    }

    pub fn qos(&self) -> &QosProfile {
        &self.qos
    }
}
