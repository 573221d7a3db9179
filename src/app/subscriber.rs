use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::app::{ShutdownFlag, DEFAULT_TOPIC_NAME};
use crate::domain::{
    DataReader, DomainParticipant, EndpointId, ParticipantConfig, QosProfile, ReaderConfig,
    Subscriber, Topic,
};
use crate::listener::DataReaderListener;
use crate::sample::{classify, SampleReport};
use crate::status::{
    DeadlineMissedStatus, IncompatibleQosStatus, LivelinessChangedStatus, MatchedStatus,
    SampleLostStatus, SampleRejectedStatus, StatusMask,
};
use crate::waitset::{ReadCondition, WaitSet};

#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    pub domain_id: u32,
    /// Valid samples to read before returning. `None` reads until shutdown.
    pub sample_count: Option<u64>,
    pub qos_profile: QosProfile,
    pub topic_name: String,
    /// Longest single `dispatch`; bounds how late a shutdown request is seen.
    pub wait_timeout: Duration,
    pub reader: ReaderConfig,
    pub participant: ParticipantConfig,
}

impl SubscriberConfig {
    pub fn new(domain_id: u32) -> Self {
        Self {
            domain_id,
            ..Self::default()
        }
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            domain_id: 0,
            sample_count: None,
            qos_profile: QosProfile::default(),
            topic_name: DEFAULT_TOPIC_NAME.to_string(),
            wait_timeout: Duration::from_secs(1),
            reader: ReaderConfig::default(),
            participant: ParticipantConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberSummary {
    pub samples_read: u64,
    pub state_changes: u64,
    /// `dispatch` calls made by the loop.
    pub wakeups: u64,
}

/// Result of draining a reader once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainOutcome {
    pub valid: u64,
    pub state_changes: u64,
}

/// Logs reader status events. `DataAvailable` is left to the waitset.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingReaderListener;

impl DataReaderListener for LoggingReaderListener {
    fn on_requested_deadline_missed(&self, reader: EndpointId, status: &DeadlineMissedStatus) {
        warn!("{reader}: requested deadline missed (total {})", status.total_count);
    }

    fn on_sample_rejected(&self, reader: EndpointId, status: &SampleRejectedStatus) {
        warn!(
            "{reader}: sample rejected ({:?}, total {})",
            status.last_reason, status.total_count
        );
    }

    fn on_sample_lost(&self, reader: EndpointId, status: &SampleLostStatus) {
        warn!("{reader}: sample lost (total {})", status.total_count);
    }

    fn on_requested_incompatible_qos(&self, reader: EndpointId, status: &IncompatibleQosStatus) {
        warn!(
            "{reader}: requested incompatible qos {:?} (total {})",
            status.last_policy, status.total_count
        );
    }

    fn on_subscription_matched(&self, reader: EndpointId, status: &MatchedStatus) {
        info!(
            "{reader}: subscription matched, current {} ({:+})",
            status.current_count, status.current_count_change
        );
    }

    fn on_liveliness_changed(&self, reader: EndpointId, status: &LivelinessChangedStatus) {
        info!(
            "{reader}: liveliness changed, alive {} ({:+})",
            status.alive_count, status.alive_count_change
        );
    }
}

/// Takes everything the reader holds and reports it. Only valid units count
/// as data; the loan is returned before anything is logged.
pub fn process_data(reader: &DataReader) -> crate::Result<DrainOutcome> {
    let reports = {
        let loan = reader.take()?;
        classify(&loan)
    };

    let mut outcome = DrainOutcome::default();
    for report in &reports {
        match report {
            SampleReport::Data {
                sample,
                coherent_set,
            } => {
                if let Some(seq) = coherent_set {
                    info!("Coherent set sequence number: {seq}");
                }
                info!("{sample}");
                outcome.valid += 1;
            }
            SampleReport::InstanceStateChanged { .. } => {
                info!("{report}");
                outcome.state_changes += 1;
            }
        }
    }
    Ok(outcome)
}

pub fn run_subscriber(
    config: &SubscriberConfig,
    shutdown: &ShutdownFlag,
) -> Result<SubscriberSummary> {
    let participant = DomainParticipant::join_with_config(
        config.domain_id,
        &config.qos_profile,
        config.participant.clone(),
    )
    .with_context(|| format!("failed to join domain {}", config.domain_id))?;
    run_subscriber_with(&participant, config, shutdown)
}

/// Runs the subscriber on an existing participant.
pub fn run_subscriber_with(
    participant: &DomainParticipant,
    config: &SubscriberConfig,
    shutdown: &ShutdownFlag,
) -> Result<SubscriberSummary> {
    let topic = Topic::bind(participant, &config.topic_name)
        .with_context(|| format!("failed to bind topic `{}`", config.topic_name))?;
    let subscriber = Subscriber::new(participant);
    let reader = DataReader::create_with_config(
        &subscriber,
        &topic,
        &config.qos_profile,
        Some(Arc::new(LoggingReaderListener)),
        StatusMask::DATA_AVAILABLE,
        config.reader,
    )
    .context("failed to create data reader")?;

    let samples_read = Arc::new(AtomicU64::new(0));
    let state_changes = Arc::new(AtomicU64::new(0));
    let condition = {
        let drained = reader.clone();
        let samples_read = Arc::clone(&samples_read);
        let state_changes = Arc::clone(&state_changes);
        ReadCondition::with_handler(&reader, move || {
            let outcome = process_data(&drained)?;
            samples_read.fetch_add(outcome.valid, Ordering::AcqRel);
            state_changes.fetch_add(outcome.state_changes, Ordering::AcqRel);
            Ok(())
        })
        .context("failed to create read condition")?
    };
    let mut waitset = WaitSet::new();
    waitset
        .register(Arc::new(condition))
        .context("failed to register read condition")?;
    info!(
        "subscribed to `{}` ({}) on domain {}",
        topic.name(),
        topic.type_name(),
        participant.domain_id()
    );

    let limit = config.sample_count.unwrap_or(u64::MAX);
    let mut wakeups = 0u64;
    while !shutdown.is_requested() && samples_read.load(Ordering::Acquire) < limit {
        waitset
            .dispatch(config.wait_timeout)
            .context("dispatch failed")?;
        wakeups += 1;
        debug!(
            "wakeup {wakeups}: {} sample(s) so far",
            samples_read.load(Ordering::Acquire)
        );
    }

    let summary = SubscriberSummary {
        samples_read: samples_read.load(Ordering::Acquire),
        state_changes: state_changes.load(Ordering::Acquire),
        wakeups,
    };
    info!(
        "subscriber done: {} sample(s), {} state change(s)",
        summary.samples_read, summary.state_changes
    );
    Ok(summary)
}
