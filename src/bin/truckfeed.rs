//! truckfeed: replay a GeoJSON route as a vehicle location feed on Kafka.
//!
//! ## Configuration
//! - `truckfeed.yaml`, `--config FILE` or TRUCKFEED_CONFIG: YAML settings
//! - TRUCKFEED__<SECTION>__<KEY>: per-key environment overrides
//! - TRUCKFEED_LOG: log filter (default: info)
//!
//! Command-line flags override all of the above.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use truckfeed::bus::KafkaBroker;
use truckfeed::config::{Config, ConfigOverrides};
use truckfeed::coordinates::CoordinateSource;
use truckfeed::publisher::{LocationPublisher, PublishError};
use truckfeed::utils::bootstrap::{init_tracing, shutdown_signal};

/// CLI options
#[derive(Debug, Parser)]
#[command(name = "truckfeed", version, about)]
struct Opts {
    /// Configuration file (YAML).
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,
    /// GeoJSON route to replay.
    #[arg(short = 'i', long)]
    input: Option<PathBuf>,
    /// Destination topic.
    #[arg(short = 't', long)]
    topic: Option<String>,
    /// Pause between two location events, in milliseconds.
    #[arg(long)]
    interval_ms: Option<u64>,
    /// Kafka bootstrap servers (comma-separated).
    #[arg(short = 'b', long)]
    bootstrap_servers: Option<String>,
}

impl Opts {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            input: self.input.clone(),
            topic: self.topic.clone(),
            interval_ms: self.interval_ms,
            bootstrap_servers: self.bootstrap_servers.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let opts = Opts::parse();
    init_tracing();

    let config = Config::load_path(opts.config.as_deref())?.with_overrides(opts.overrides());
    config.validate()?;

    let source = CoordinateSource::from_path(&config.source.path)?;
    info!(
        path = %config.source.path.display(),
        points = source.len(),
        topic = %config.publish.topic,
        interval_ms = config.publish.interval_ms,
        "Route loaded"
    );

    let broker = KafkaBroker::new(config.kafka.clone())?;
    let mut publisher =
        LocationPublisher::new(broker).with_flush_timeout(config.publish.flush_timeout());

    let result = publisher
        .publish_until(
            &source,
            &config.publish.topic,
            config.publish.interval(),
            shutdown_signal(),
        )
        .await;

    match result {
        Ok(summary) if summary.failed == 0 => {
            info!(
                acknowledged = summary.acknowledged,
                cancelled = summary.cancelled,
                "All location events delivered"
            );
            Ok(ExitCode::SUCCESS)
        }
        Ok(summary) => {
            for failure in &summary.failures {
                warn!(index = failure.index, reason = %failure.reason, "Undelivered location");
            }
            error!(
                acknowledged = summary.acknowledged,
                failed = summary.failed,
                "Some location events were not delivered"
            );
            Ok(ExitCode::FAILURE)
        }
        Err(PublishError::FlushTimeout { pending, summary }) => {
            error!(
                pending,
                acknowledged = summary.acknowledged,
                failed = summary.failed,
                "Timed out waiting for deliveries"
            );
            Ok(ExitCode::FAILURE)
        }
        Err(e) => {
            if let Some(summary) = e.summary() {
                error!(
                    submitted = summary.submitted,
                    acknowledged = summary.acknowledged,
                    failed = summary.failed,
                    undrained = ?summary.undrained,
                    "Publishing aborted"
                );
            }
            Err(e.into())
        }
    }
}
