use std::process::ExitCode;
use std::time::Duration;

use chronicle_pubsub::app::cli::{init_logging, CommonArgs};
use chronicle_pubsub::app::{install_signal_handlers, run_subscriber, ShutdownFlag, SubscriberConfig};
use chronicle_pubsub::domain::finalize_all;
use clap::Parser;
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "pubsub-subscriber")]
#[command(about = "Read Sample values from a topic through a waitset")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Longest single wait in milliseconds; bounds shutdown latency
    #[arg(long, default_value_t = 1000)]
    wait_ms: u64,

    /// Reader queue depth; further samples are rejected until taken
    #[arg(long)]
    max_samples: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.common.verbosity);

    let shutdown = ShutdownFlag::new();
    if let Err(err) = install_signal_handlers(&shutdown) {
        error!("failed to install signal handlers: {err}");
        return ExitCode::FAILURE;
    }

    let mut config = SubscriberConfig::new(cli.common.domain_id);
    config.sample_count = cli.common.sample_count;
    config.qos_profile = cli.common.qos_profile.clone();
    config.topic_name = cli.common.topic.clone();
    config.wait_timeout = Duration::from_millis(cli.wait_ms);
    config.reader.max_samples = cli.max_samples;
    config.participant = cli.common.participant_config();

    let code = match run_subscriber(&config, &shutdown) {
        Ok(summary) => {
            info!(
                "read {} sample(s), {} state change(s) over {} wakeup(s)",
                summary.samples_read, summary.state_changes, summary.wakeups
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("subscriber failed: {err:#}");
            ExitCode::FAILURE
        }
    };
    if let Err(err) = finalize_all() {
        error!("finalize failed: {err}");
        return ExitCode::FAILURE;
    }
    code
}
