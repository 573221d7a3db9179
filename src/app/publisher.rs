use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{info, warn};

use crate::app::{ShutdownFlag, DEFAULT_TOPIC_NAME};
use crate::domain::{
    DataWriter, DomainParticipant, EndpointId, ParticipantConfig, Publisher, QosProfile, Topic,
};
use crate::listener::DataWriterListener;
use crate::sample::Sample;
use crate::status::{
    DeadlineMissedStatus, IncompatibleQosStatus, LivelinessLostStatus, MatchedStatus, StatusMask,
};

#[derive(Debug, Clone)]
pub struct PublisherConfig {
    pub domain_id: u32,
    /// `None` writes until shutdown.
    pub sample_count: Option<u64>,
    pub qos_profile: QosProfile,
    pub topic_name: String,
    /// Pause after each write.
    pub send_period: Duration,
    /// Instance key of every written sample.
    pub instance_id: i32,
    pub participant: ParticipantConfig,
}

impl PublisherConfig {
    pub fn new(domain_id: u32) -> Self {
        Self {
            domain_id,
            ..Self::default()
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            domain_id: 0,
            sample_count: None,
            qos_profile: QosProfile::default(),
            topic_name: DEFAULT_TOPIC_NAME.to_string(),
            send_period: Duration::from_secs(1),
            instance_id: 1,
            participant: ParticipantConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherSummary {
    pub samples_written: u64,
}

/// Destination of the publisher loop.
pub trait SampleWriter {
    fn write_sample(&self, sample: &Sample) -> crate::Result<()>;
}

impl SampleWriter for DataWriter {
    fn write_sample(&self, sample: &Sample) -> crate::Result<()> {
        self.write(sample)
    }
}

/// Logs writer status events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingWriterListener;

impl DataWriterListener for LoggingWriterListener {
    fn on_offered_deadline_missed(&self, writer: EndpointId, status: &DeadlineMissedStatus) {
        warn!("{writer}: offered deadline missed (total {})", status.total_count);
    }

    fn on_offered_incompatible_qos(&self, writer: EndpointId, status: &IncompatibleQosStatus) {
        warn!(
            "{writer}: offered incompatible qos {:?} (total {})",
            status.last_policy, status.total_count
        );
    }

    fn on_publication_matched(&self, writer: EndpointId, status: &MatchedStatus) {
        info!(
            "{writer}: publication matched, current {} ({:+})",
            status.current_count, status.current_count_change
        );
    }

    fn on_liveliness_lost(&self, writer: EndpointId, status: &LivelinessLostStatus) {
        warn!("{writer}: liveliness lost (total {})", status.total_count);
    }
}

/// Writes `Sample { id: instance_id, value: n }` for n = 0, 1, 2, ... until
/// `sample_count` is reached or shutdown is requested. A write failure ends
/// the loop with an error.
pub fn publish_loop<W>(
    writer: &W,
    config: &PublisherConfig,
    shutdown: &ShutdownFlag,
) -> Result<PublisherSummary>
where
    W: SampleWriter + ?Sized,
{
    let mut count: u64 = 0;
    loop {
        if shutdown.is_requested() {
            info!("shutdown requested after {count} sample(s)");
            break;
        }
        if config.sample_count.is_some_and(|limit| count >= limit) {
            break;
        }
        let value = i32::try_from(count).context("sample counter exceeds i32 range")?;
        info!("Writing {}, count {count}", Sample::TYPE_NAME);
        writer
            .write_sample(&Sample::new(config.instance_id, value))
            .with_context(|| format!("failed to write sample {count}"))?;
        count += 1;
        thread::sleep(config.send_period);
    }
    Ok(PublisherSummary {
        samples_written: count,
    })
}

pub fn run_publisher(config: &PublisherConfig, shutdown: &ShutdownFlag) -> Result<PublisherSummary> {
    let participant = DomainParticipant::join_with_config(
        config.domain_id,
        &config.qos_profile,
        config.participant.clone(),
    )
    .with_context(|| format!("failed to join domain {}", config.domain_id))?;
    run_publisher_with(&participant, config, shutdown)
}

/// Runs the publisher on an existing participant.
pub fn run_publisher_with(
    participant: &DomainParticipant,
    config: &PublisherConfig,
    shutdown: &ShutdownFlag,
) -> Result<PublisherSummary> {
    let topic = Topic::bind(participant, &config.topic_name)
        .with_context(|| format!("failed to bind topic `{}`", config.topic_name))?;
    let publisher = Publisher::new(participant);
    let writer = DataWriter::create(
        &publisher,
        &topic,
        &config.qos_profile,
        Some(Arc::new(LoggingWriterListener)),
        StatusMask::empty(),
    )
    .context("failed to create data writer")?;
    info!(
        "publishing `{}` ({}) on domain {}",
        topic.name(),
        topic.type_name(),
        participant.domain_id()
    );

    let summary = publish_loop(&writer, config, shutdown)?;
    info!("publisher done after {} sample(s)", summary.samples_written);
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct Recording {
        values: RefCell<Vec<i32>>,
    }

    impl SampleWriter for Recording {
        fn write_sample(&self, sample: &Sample) -> crate::Result<()> {
            self.values.borrow_mut().push(sample.value);
            Ok(())
        }
    }

    fn quick(sample_count: Option<u64>) -> PublisherConfig {
        PublisherConfig {
            sample_count,
            send_period: Duration::ZERO,
            ..PublisherConfig::default()
        }
    }

    #[test]
    fn test_counter_starts_at_zero_and_stops_at_limit() {
        let writer = Recording::default();
        let summary = publish_loop(&writer, &quick(Some(3)), &ShutdownFlag::new()).unwrap();
        assert_eq!(summary.samples_written, 3);
        assert_eq!(*writer.values.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_count_writes_nothing() {
        let writer = Recording::default();
        let summary = publish_loop(&writer, &quick(Some(0)), &ShutdownFlag::new()).unwrap();
        assert_eq!(summary.samples_written, 0);
        assert!(writer.values.borrow().is_empty());
    }

    #[test]
    fn test_requested_shutdown_stops_unbounded_loop() {
        let shutdown = ShutdownFlag::new();
        shutdown.request();
        let writer = Recording::default();
        let summary = publish_loop(&writer, &quick(None), &shutdown).unwrap();
        assert_eq!(summary.samples_written, 0);
    }
}
