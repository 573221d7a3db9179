//! Publisher and subscriber loops driving the engine, plus the pieces the
//! binaries share.

#[cfg(feature = "cli")]
pub mod cli;
pub mod publisher;
pub mod shutdown;
pub mod subscriber;

/// Topic both example programs use unless told otherwise.
pub const DEFAULT_TOPIC_NAME: &str = "Example Sample";

pub use publisher::{
    publish_loop, run_publisher, run_publisher_with, LoggingWriterListener, PublisherConfig,
    PublisherSummary, SampleWriter,
};
pub use shutdown::{install_signal_handlers, ShutdownFlag};
pub use subscriber::{
    process_data, run_subscriber, run_subscriber_with, DrainOutcome, LoggingReaderListener,
    SubscriberConfig, SubscriberSummary,
};
