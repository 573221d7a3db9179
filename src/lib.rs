//! Minimal publish/subscribe client for a keyed `Sample` topic.
//!
//! Writers and readers exchange samples through a domain engine that runs in
//! process, or across processes through a per-topic journal file. Endpoint
//! status events reach listeners on a notification thread; data arrival is
//! observed through a `WaitSet` and a `ReadCondition`.

pub mod app;
pub mod clock;
pub mod domain;
pub mod error;
pub mod listener;
mod notifier;
pub mod sample;
pub mod status;
pub mod waitset;

pub use domain::{
    finalize_all, CoherentSet, DataReader, DataWriter, DomainParticipant, EndpointId,
    LoanedSamples, ParticipantConfig, Publisher, QosProfile, ReaderConfig, Subscriber, Topic,
};
pub use error::{Error, Result};
pub use listener::{DataReaderListener, DataWriterListener};
pub use sample::{InstanceState, LoanedSample, Sample, SampleInfo, SampleReport};
pub use status::{StatusEvent, StatusKind, StatusMask};
pub use waitset::{Condition, GuardCondition, ReadCondition, StatusCondition, WaitSet};
