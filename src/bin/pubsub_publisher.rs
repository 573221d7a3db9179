use std::process::ExitCode;
use std::time::Duration;

use chronicle_pubsub::app::cli::{init_logging, CommonArgs};
use chronicle_pubsub::app::{install_signal_handlers, run_publisher, PublisherConfig, ShutdownFlag};
use chronicle_pubsub::domain::finalize_all;
use clap::Parser;
use log::{error, info};

#[derive(Parser, Debug)]
#[command(name = "pubsub-publisher")]
#[command(about = "Write Sample values to a topic at a fixed period")]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    /// Pause between writes in milliseconds
    #[arg(long, default_value_t = 1000)]
    period_ms: u64,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.common.verbosity);

    let shutdown = ShutdownFlag::new();
    if let Err(err) = install_signal_handlers(&shutdown) {
        error!("failed to install signal handlers: {err}");
        return ExitCode::FAILURE;
    }

    let mut config = PublisherConfig::new(cli.common.domain_id);
    config.sample_count = cli.common.sample_count;
    config.qos_profile = cli.common.qos_profile.clone();
    config.topic_name = cli.common.topic.clone();
    config.send_period = Duration::from_millis(cli.period_ms);
    config.participant = cli.common.participant_config();

    let code = match run_publisher(&config, &shutdown) {
        Ok(summary) => {
            info!("wrote {} sample(s)", summary.samples_written);
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("publisher failed: {err:#}");
            ExitCode::FAILURE
        }
    };
    if let Err(err) = finalize_all() {
        error!("finalize failed: {err}");
        return ExitCode::FAILURE;
    }
    code
}
