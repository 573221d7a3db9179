//! Arguments and logging setup shared by the two binaries.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, ValueEnum};
use log::LevelFilter;

use crate::app::DEFAULT_TOPIC_NAME;
use crate::clock::{Clock, QuantaClock, SystemClock};
use crate::domain::{ParticipantConfig, QosProfile};

#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Domain to join
    #[arg(short, long, default_value_t = 0)]
    pub domain_id: u32,

    /// Number of samples to send or receive before exiting (default: unbounded)
    #[arg(short, long)]
    pub sample_count: Option<u64>,

    /// Log verbosity: 0 warn, 1 info, 2 debug, 3 trace
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=3))]
    pub verbosity: u8,

    /// QoS profile as <library>::<profile>
    #[arg(long, default_value = crate::domain::DEFAULT_QOS_PROFILE, value_parser = parse_profile)]
    pub qos_profile: QosProfile,

    /// Topic name
    #[arg(long, default_value = DEFAULT_TOPIC_NAME)]
    pub topic: String,

    /// Journal directory shared with other processes (default: in-process only)
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// Source of sample timestamps
    #[arg(long, value_enum, default_value_t = ClockSource::System)]
    pub clock: ClockSource,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ClockSource {
    /// Wall clock, read on every write
    System,
    /// TSC counter anchored to the wall clock at startup
    Quanta,
}

impl ClockSource {
    pub fn build(self) -> Arc<dyn Clock> {
        match self {
            ClockSource::System => Arc::new(SystemClock),
            ClockSource::Quanta => Arc::new(QuantaClock::new()),
        }
    }
}

impl CommonArgs {
    pub fn participant_config(&self) -> ParticipantConfig {
        let config = match &self.journal {
            Some(root) => ParticipantConfig::with_journal(root),
            None => ParticipantConfig::default(),
        };
        ParticipantConfig {
            clock: self.clock.build(),
            ..config
        }
    }
}

fn parse_profile(value: &str) -> Result<QosProfile, String> {
    QosProfile::parse(value).map_err(|err| err.to_string())
}

/// Initialises `env_logger` at the level chosen by `--verbosity`;
/// `RUST_LOG` still overrides it.
pub fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}
