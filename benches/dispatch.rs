use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, BenchmarkId, Criterion};
use criterion::{criterion_group, criterion_main};

use chronicle_pubsub::{
    DataReader, DataWriter, DomainParticipant, GuardCondition, Publisher, QosProfile,
    ReadCondition, Sample, StatusMask, Subscriber, Topic, WaitSet,
};

fn bench_guard_dispatch(c: &mut Criterion) {
    let guard = Arc::new(GuardCondition::new());
    let mut waitset = WaitSet::new();
    waitset.register(guard.clone()).expect("register");

    c.bench_function("guard_trigger_dispatch", |b| {
        b.iter(|| {
            guard.set_trigger_value(true);
            waitset.dispatch(Duration::ZERO).expect("dispatch");
            guard.set_trigger_value(false);
        });
    });
}

fn bench_write_take(c: &mut Criterion) {
    let qos = QosProfile::default();
    let participant = DomainParticipant::join(0, &qos).expect("join");
    let topic = Topic::bind(&participant, "bench").expect("topic");
    let writer = DataWriter::create(&Publisher::new(&participant), &topic, &qos, None, StatusMask::empty())
        .expect("writer");
    let reader = DataReader::create(&Subscriber::new(&participant), &topic, &qos, None, StatusMask::empty())
        .expect("reader");
    let mut waitset = WaitSet::new();
    waitset
        .register(Arc::new(ReadCondition::new(&reader).expect("condition")))
        .expect("register");

    let mut group = c.benchmark_group("write_dispatch_take");
    for &batch in &[1_usize, 16, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                for value in 0..batch {
                    writer
                        .write(&Sample::new(1, black_box(value as i32)))
                        .expect("write");
                }
                waitset.wait(Duration::ZERO).expect("wait");
                let loan = reader.take().expect("take");
                black_box(loan.len());
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_guard_dispatch, bench_write_take);
criterion_main!(benches);
