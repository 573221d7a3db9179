use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chronicle_pubsub::status::{LivelinessChangedStatus, MatchedStatus};
use chronicle_pubsub::{
    DataReader, DataReaderListener, DataWriter, DataWriterListener, DomainParticipant,
    EndpointId, Error, Publisher, QosProfile, Sample, StatusCondition, StatusEvent, StatusKind,
    StatusMask, Subscriber, Topic, WaitSet,
};

const FLUSH: Duration = Duration::from_secs(2);

#[derive(Default)]
struct ReaderCounts {
    data: AtomicUsize,
    matched: AtomicUsize,
    current: AtomicI64,
    liveliness: AtomicUsize,
}

impl DataReaderListener for ReaderCounts {
    fn on_data_available(&self, _reader: EndpointId) {
        self.data.fetch_add(1, Ordering::SeqCst);
    }

    fn on_subscription_matched(&self, _reader: EndpointId, status: &MatchedStatus) {
        self.matched.fetch_add(1, Ordering::SeqCst);
        self.current.store(status.current_count as i64, Ordering::SeqCst);
    }

    fn on_liveliness_changed(&self, _reader: EndpointId, _status: &LivelinessChangedStatus) {
        self.liveliness.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct WriterCounts {
    matched: AtomicUsize,
}

impl DataWriterListener for WriterCounts {
    fn on_publication_matched(&self, _writer: EndpointId, _status: &MatchedStatus) {
        self.matched.fetch_add(1, Ordering::SeqCst);
    }
}

struct Fixture {
    participant: DomainParticipant,
    topic: Topic,
    qos: QosProfile,
}

impl Fixture {
    fn new(domain_id: u32) -> Self {
        let qos = QosProfile::default();
        let participant = DomainParticipant::join(domain_id, &qos).unwrap();
        let topic = Topic::bind(&participant, "Example Sample").unwrap();
        Self {
            participant,
            topic,
            qos,
        }
    }

    fn reader(&self, listener: Option<Arc<dyn DataReaderListener>>, mask: StatusMask) -> DataReader {
        DataReader::create(&Subscriber::new(&self.participant), &self.topic, &self.qos, listener, mask)
            .unwrap()
    }

    fn writer(&self, listener: Option<Arc<dyn DataWriterListener>>) -> DataWriter {
        DataWriter::create(
            &Publisher::new(&self.participant),
            &self.topic,
            &self.qos,
            listener,
            StatusMask::empty(),
        )
        .unwrap()
    }
}

#[test]
fn masked_data_available_only_visible_to_polling() {
    let fixture = Fixture::new(301);
    let counts = Arc::new(ReaderCounts::default());
    let reader = fixture.reader(Some(counts.clone()), StatusMask::DATA_AVAILABLE);
    let writer = fixture.writer(None);

    for value in 0..3 {
        writer.write(&Sample::new(1, value)).unwrap();
    }
    assert!(fixture.participant.wait_for_listeners(FLUSH));

    assert_eq!(counts.data.load(Ordering::SeqCst), 0);
    assert!(reader.status_changes().contains(StatusMask::DATA_AVAILABLE));

    let condition = StatusCondition::for_reader(&reader, StatusMask::DATA_AVAILABLE).unwrap();
    let mut waitset = WaitSet::new();
    waitset.register(Arc::new(condition)).unwrap();
    assert_eq!(waitset.wait(Duration::ZERO).unwrap().len(), 1);

    assert_eq!(reader.take_status(StatusKind::DataAvailable), Some(StatusEvent::DataAvailable));
    assert!(waitset.wait(Duration::ZERO).unwrap().is_empty());
}

#[test]
fn unmasked_events_reach_listener_once_each() {
    let fixture = Fixture::new(302);
    let reader_counts = Arc::new(ReaderCounts::default());
    let writer_counts = Arc::new(WriterCounts::default());
    let reader = fixture.reader(Some(reader_counts.clone()), StatusMask::empty());

    let writer = fixture.writer(Some(writer_counts.clone()));
    writer.write(&Sample::new(1, 0)).unwrap();
    writer.write(&Sample::new(1, 1)).unwrap();
    assert!(fixture.participant.wait_for_listeners(FLUSH));

    assert_eq!(reader_counts.matched.load(Ordering::SeqCst), 1);
    assert_eq!(reader_counts.liveliness.load(Ordering::SeqCst), 1);
    assert_eq!(reader_counts.data.load(Ordering::SeqCst), 2);
    assert_eq!(writer_counts.matched.load(Ordering::SeqCst), 1);
    assert_eq!(reader.matched_publications(), vec![writer.id()]);

    drop(writer);
    assert!(fixture.participant.wait_for_listeners(FLUSH));
    assert_eq!(reader_counts.matched.load(Ordering::SeqCst), 2);
    assert_eq!(reader_counts.current.load(Ordering::SeqCst), 0);
    assert_eq!(reader_counts.liveliness.load(Ordering::SeqCst), 2);
    // Listener-delivered kinds are consumed on delivery.
    assert!(!reader.status_changes().contains(StatusMask::SUBSCRIPTION_MATCHED));
}

#[test]
fn status_condition_refused_for_listener_kinds() {
    let fixture = Fixture::new(303);
    let reader = fixture.reader(Some(Arc::new(ReaderCounts::default())), StatusMask::DATA_AVAILABLE);
    assert!(matches!(
        StatusCondition::for_reader(&reader, StatusMask::SUBSCRIPTION_MATCHED | StatusMask::DATA_AVAILABLE),
        Err(Error::DoubleDelivery(kinds)) if kinds == StatusMask::SUBSCRIPTION_MATCHED
    ));

    let writer = fixture.writer(Some(Arc::new(WriterCounts::default())));
    assert!(matches!(
        StatusCondition::for_writer(&writer, StatusMask::PUBLICATION_MATCHED),
        Err(Error::DoubleDelivery(_))
    ));
}

#[test]
fn matched_status_polled_without_listener() {
    let fixture = Fixture::new(304);
    let reader = fixture.reader(None, StatusMask::empty());
    let _writer = fixture.writer(None);

    match reader.take_status(StatusKind::SubscriptionMatched) {
        Some(StatusEvent::SubscriptionMatched(status)) => {
            assert_eq!(status.current_count, 1);
            assert_eq!(status.total_count, 1);
        }
        other => panic!("unexpected status {other:?}"),
    }
    assert!(!reader.status_changes().contains(StatusMask::SUBSCRIPTION_MATCHED));
}

struct Panicking;

impl DataReaderListener for Panicking {
    fn on_subscription_matched(&self, _reader: EndpointId, _status: &MatchedStatus) {
        panic!("listener bug");
    }
}

#[test]
fn panicking_listener_fails_next_take() {
    let fixture = Fixture::new(305);
    let reader = fixture.reader(Some(Arc::new(Panicking)), StatusMask::DATA_AVAILABLE);
    let _writer = fixture.writer(None);
    assert!(fixture.participant.wait_for_listeners(FLUSH));

    assert!(matches!(reader.take(), Err(Error::ListenerFailed)));
}
