use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chronicle_pubsub::app::{process_data, run_subscriber_with, ShutdownFlag, SubscriberConfig};
use chronicle_pubsub::listener::NoOpReaderListener;
use chronicle_pubsub::{
    DataReader, DataWriter, DomainParticipant, Error, Publisher, QosProfile, ReadCondition,
    Sample, StatusMask, Subscriber, Topic, WaitSet,
};

const TOPIC: &str = "Example Sample";

fn wait_until(timeout: Duration, mut ready: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if ready() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    ready()
}

fn endpoints(domain_id: u32) -> (DomainParticipant, DataWriter, DataReader) {
    let qos = QosProfile::default();
    let participant = DomainParticipant::join(domain_id, &qos).expect("join");
    let topic = Topic::bind(&participant, TOPIC).expect("topic");
    let writer = DataWriter::create(&Publisher::new(&participant), &topic, &qos, None, StatusMask::empty())
        .expect("writer");
    let reader = DataReader::create(&Subscriber::new(&participant), &topic, &qos, None, StatusMask::empty())
        .expect("reader");
    (participant, writer, reader)
}

fn spawn_subscriber(
    participant: &DomainParticipant,
    config: SubscriberConfig,
    shutdown: &ShutdownFlag,
) -> thread::JoinHandle<anyhow::Result<chronicle_pubsub::app::SubscriberSummary>> {
    let participant = participant.clone();
    let shutdown = shutdown.clone();
    thread::spawn(move || run_subscriber_with(&participant, &config, &shutdown))
}

fn writer_for(participant: &DomainParticipant) -> DataWriter {
    let qos = QosProfile::default();
    let topic = Topic::bind(participant, TOPIC).expect("topic");
    DataWriter::create(&Publisher::new(participant), &topic, &qos, None, StatusMask::empty())
        .expect("writer")
}

#[test]
fn subscriber_stops_after_requested_count() {
    let participant = DomainParticipant::join(201, &QosProfile::default()).unwrap();
    let writer = writer_for(&participant);
    let config = SubscriberConfig {
        sample_count: Some(2),
        wait_timeout: Duration::from_millis(50),
        ..SubscriberConfig::new(201)
    };
    let handle = spawn_subscriber(&participant, config, &ShutdownFlag::new());

    assert!(wait_until(Duration::from_secs(5), || writer.matched_subscriptions().len() == 1));
    writer.write(&Sample::new(1, 0)).unwrap();
    thread::sleep(Duration::from_millis(100));
    writer.write(&Sample::new(1, 1)).unwrap();

    let summary = handle.join().unwrap().expect("subscriber run");
    assert_eq!(summary.samples_read, 2);
    assert_eq!(summary.state_changes, 0);
    assert!(summary.wakeups >= 2);
}

#[test]
fn disposed_instance_is_reported_not_counted() {
    let (_participant, writer, reader) = endpoints(202);
    writer.write(&Sample::new(5, 10)).unwrap();
    writer.dispose(5).unwrap();

    let outcome = process_data(&reader).unwrap();
    assert_eq!(outcome.valid, 1);
    assert_eq!(outcome.state_changes, 1);
    assert_eq!(reader.outstanding_loans(), 0);
    assert_eq!(reader.available(), 0);
}

#[test]
fn coherent_batch_with_dispose_reaches_loop_in_one_drain() {
    let participant = DomainParticipant::join(203, &QosProfile::default()).unwrap();
    let writer = writer_for(&participant);
    let config = SubscriberConfig {
        sample_count: Some(1),
        wait_timeout: Duration::from_millis(50),
        ..SubscriberConfig::new(203)
    };
    let handle = spawn_subscriber(&participant, config, &ShutdownFlag::new());

    assert!(wait_until(Duration::from_secs(5), || writer.matched_subscriptions().len() == 1));
    let set = writer.begin_coherent_set().unwrap();
    writer.write(&Sample::new(4, 1)).unwrap();
    writer.dispose(4).unwrap();
    set.end().unwrap();

    let summary = handle.join().unwrap().expect("subscriber run");
    assert_eq!(summary.samples_read, 1);
    assert_eq!(summary.state_changes, 1);
}

#[test]
fn shutdown_ends_idle_subscriber() {
    let participant = DomainParticipant::join(204, &QosProfile::default()).unwrap();
    let shutdown = ShutdownFlag::new();
    let config = SubscriberConfig {
        sample_count: Some(100),
        wait_timeout: Duration::from_millis(20),
        ..SubscriberConfig::new(204)
    };
    let handle = spawn_subscriber(&participant, config, &shutdown);

    thread::sleep(Duration::from_millis(100));
    shutdown.request();
    let summary = handle.join().unwrap().expect("clean exit");
    assert_eq!(summary.samples_read, 0);
    assert!(summary.wakeups >= 1);
}

#[test]
fn zero_timeout_dispatch_runs_nothing() {
    let (_participant, _writer, reader) = endpoints(205);
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let condition = ReadCondition::with_handler(&reader, move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    })
    .unwrap();
    let mut waitset = WaitSet::new();
    waitset.register(Arc::new(condition)).unwrap();

    for _ in 0..3 {
        waitset.dispatch(Duration::ZERO).unwrap();
    }
    assert_eq!(runs.load(Ordering::SeqCst), 0);
}

#[test]
fn second_drain_sees_only_new_data() {
    let (_participant, writer, reader) = endpoints(206);
    writer.write(&Sample::new(1, 1)).unwrap();
    writer.write(&Sample::new(1, 2)).unwrap();

    {
        let loan = reader.take().unwrap();
        assert_eq!(loan.len(), 2);
        assert_eq!(reader.outstanding_loans(), 1);
    }
    assert_eq!(reader.outstanding_loans(), 0);

    writer.write(&Sample::new(1, 3)).unwrap();
    let loan = reader.take().unwrap();
    let values: Vec<i32> = loan.iter().map(|unit| unit.data().value).collect();
    assert_eq!(values, vec![3]);
    loan.return_loan();
    assert!(reader.take().unwrap().is_empty());
}

#[test]
fn read_condition_refused_when_listener_takes_data_available() {
    let qos = QosProfile::default();
    let participant = DomainParticipant::join(207, &qos).unwrap();
    let topic = Topic::bind(&participant, TOPIC).unwrap();
    let subscriber = Subscriber::new(&participant);

    let unmasked = DataReader::create(
        &subscriber,
        &topic,
        &qos,
        Some(Arc::new(NoOpReaderListener)),
        StatusMask::empty(),
    )
    .unwrap();
    assert!(matches!(
        ReadCondition::new(&unmasked),
        Err(Error::DoubleDelivery(kinds)) if kinds == StatusMask::DATA_AVAILABLE
    ));

    let masked = DataReader::create(
        &subscriber,
        &topic,
        &qos,
        Some(Arc::new(NoOpReaderListener)),
        StatusMask::DATA_AVAILABLE,
    )
    .unwrap();
    assert!(ReadCondition::new(&masked).is_ok());
}
