use chronicle_pubsub::status::RejectedReason;
use chronicle_pubsub::{
    DataReader, DataWriter, DomainParticipant, Error, InstanceState, Publisher, QosProfile,
    ReaderConfig, Sample, StatusEvent, StatusKind, StatusMask, Subscriber, Topic,
};

struct Fixture {
    participant: DomainParticipant,
    topic: Topic,
    qos: QosProfile,
}

impl Fixture {
    fn new(domain_id: u32) -> Self {
        let qos = QosProfile::default();
        let participant = DomainParticipant::join(domain_id, &qos).unwrap();
        let topic = Topic::bind(&participant, "Lifecycle").unwrap();
        Self {
            participant,
            topic,
            qos,
        }
    }

    fn reader_with(&self, config: ReaderConfig) -> chronicle_pubsub::Result<DataReader> {
        DataReader::create_with_config(
            &Subscriber::new(&self.participant),
            &self.topic,
            &self.qos,
            None,
            StatusMask::empty(),
            config,
        )
    }

    fn reader(&self) -> DataReader {
        self.reader_with(ReaderConfig::default()).unwrap()
    }

    fn writer(&self) -> DataWriter {
        DataWriter::create(&Publisher::new(&self.participant), &self.topic, &self.qos, None, StatusMask::empty())
            .unwrap()
    }
}

#[test]
fn coherent_set_is_delivered_as_a_unit() {
    let fixture = Fixture::new(501);
    let reader = fixture.reader();
    let writer = fixture.writer();

    let set = writer.begin_coherent_set().unwrap();
    assert_eq!(set.sequence_number(), 1);
    writer.write(&Sample::new(1, 10)).unwrap();
    writer.write(&Sample::new(2, 20)).unwrap();
    assert!(matches!(writer.begin_coherent_set(), Err(Error::PreconditionNotMet(_))));
    assert_eq!(reader.available(), 0);
    set.end().unwrap();

    let loan = reader.take().unwrap();
    assert_eq!(loan.len(), 2);
    assert!(loan
        .iter()
        .all(|unit| unit.info().coherent_set_sequence_number == Some(1)));
    drop(loan);

    {
        let set = writer.begin_coherent_set().unwrap();
        assert_eq!(set.sequence_number(), 2);
        writer.write(&Sample::new(1, 11)).unwrap();
    }
    let loan = reader.take().unwrap();
    assert_eq!(loan.len(), 1);
    assert_eq!(loan.as_slice()[0].info().coherent_set_sequence_number, Some(2));

    writer.write(&Sample::new(1, 12)).unwrap();
    drop(loan);
    let loan = reader.take().unwrap();
    assert_eq!(loan.as_slice()[0].info().coherent_set_sequence_number, None);
}

#[test]
fn dispose_produces_invalid_sample() {
    let fixture = Fixture::new(502);
    let reader = fixture.reader();
    let writer = fixture.writer();

    writer.dispose(9).unwrap();
    assert_eq!(reader.available(), 0, "dispose of an unseen instance is not delivered");

    writer.write(&Sample::new(9, 1)).unwrap();
    writer.dispose(9).unwrap();
    assert_eq!(reader.instance_state(9), Some(InstanceState::NotAliveDisposed));

    let loan = reader.take().unwrap();
    assert_eq!(loan.len(), 2);
    let unit = loan.get(1).unwrap();
    assert!(!unit.info().valid);
    assert_eq!(unit.info().instance_state, InstanceState::NotAliveDisposed);
    assert_eq!(unit.data().id, 9);
    assert_eq!(unit.info().publication, writer.id());
}

#[test]
fn instance_loses_writers_when_last_writer_drops() {
    let fixture = Fixture::new(503);
    let reader = fixture.reader();
    let first = fixture.writer();
    let second = fixture.writer();

    first.write(&Sample::new(3, 1)).unwrap();
    second.write(&Sample::new(3, 2)).unwrap();
    drop(reader.take().unwrap());

    drop(first);
    assert_eq!(reader.available(), 0);
    assert_eq!(reader.instance_state(3), Some(InstanceState::Alive));

    drop(second);
    let loan = reader.take().unwrap();
    assert_eq!(loan.len(), 1);
    assert_eq!(loan.get(0).unwrap().info().instance_state, InstanceState::NotAliveNoWriters);
    assert!(reader.matched_publications().is_empty());
}

#[test]
fn unregister_requires_registered_instance() {
    let fixture = Fixture::new(504);
    let reader = fixture.reader();
    let writer = fixture.writer();

    assert!(matches!(writer.unregister_instance(6), Err(Error::PreconditionNotMet(_))));
    writer.write(&Sample::new(6, 1)).unwrap();
    writer.unregister_instance(6).unwrap();
    assert_eq!(reader.instance_state(6), Some(InstanceState::NotAliveNoWriters));
}

#[test]
fn full_reader_rejects_samples() {
    let fixture = Fixture::new(505);
    assert!(matches!(
        fixture.reader_with(ReaderConfig { max_samples: Some(0) }),
        Err(Error::Config(_))
    ));
    let reader = fixture
        .reader_with(ReaderConfig {
            max_samples: Some(2),
        })
        .unwrap();
    let writer = fixture.writer();

    for value in 0..3 {
        writer.write(&Sample::new(1, value)).unwrap();
    }
    assert_eq!(reader.available(), 2);
    assert!(reader.status_changes().contains(StatusMask::SAMPLE_REJECTED));
    match reader.take_status(StatusKind::SampleRejected) {
        Some(StatusEvent::SampleRejected(status)) => {
            assert_eq!(status.total_count, 1);
            assert_eq!(status.last_reason, RejectedReason::SamplesLimit);
            assert_eq!(status.last_instance, Some(1));
        }
        other => panic!("unexpected status {other:?}"),
    }
}

#[test]
fn coherent_set_that_does_not_fit_is_rejected_whole() {
    let fixture = Fixture::new(507);
    let reader = fixture
        .reader_with(ReaderConfig {
            max_samples: Some(2),
        })
        .unwrap();
    let writer = fixture.writer();

    let set = writer.begin_coherent_set().unwrap();
    for id in 1..=3 {
        writer.write(&Sample::new(id, 1)).unwrap();
    }
    set.end().unwrap();

    assert_eq!(reader.available(), 0);
    assert_eq!(reader.instance_state(1), None);
    assert!(!reader.status_changes().contains(StatusMask::DATA_AVAILABLE));
    match reader.take_status(StatusKind::SampleRejected) {
        Some(StatusEvent::SampleRejected(status)) => {
            assert_eq!(status.total_count, 3);
            assert_eq!(status.last_instance, Some(3));
        }
        other => panic!("unexpected status {other:?}"),
    }

    let set = writer.begin_coherent_set().unwrap();
    writer.write(&Sample::new(4, 2)).unwrap();
    writer.write(&Sample::new(5, 2)).unwrap();
    set.end().unwrap();

    let loan = reader.take().unwrap();
    let delivered: Vec<_> = loan
        .iter()
        .map(|unit| (unit.data().id, unit.info().coherent_set_sequence_number))
        .collect();
    assert_eq!(delivered, vec![(4, Some(2)), (5, Some(2))]);
}

#[test]
fn writer_sees_matched_subscriptions() {
    let fixture = Fixture::new(506);
    let writer = fixture.writer();
    assert!(writer.matched_subscriptions().is_empty());
    let reader = fixture.reader();
    assert_eq!(writer.matched_subscriptions(), vec![reader.id()]);
    drop(reader);
    assert!(writer.matched_subscriptions().is_empty());
    match writer.take_status(StatusKind::PublicationMatched) {
        Some(StatusEvent::PublicationMatched(status)) => {
            assert_eq!(status.total_count, 1);
            assert_eq!(status.current_count, 0);
            assert_eq!(status.current_count_change, -1);
        }
        other => panic!("unexpected status {other:?}"),
    }
}
