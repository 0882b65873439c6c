//! Main entry point for a Ripple node.
//!
//! Loads configuration, installs logging and the optional metrics exporter,
//! starts an embedded replicated map cluster, and runs until Ctrl+C or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ripple_common::Configuration;
use ripple_common::config::{LOG_LEVEL, METRICS_PROMETHEUS_PORT};
use ripple_server::cluster::{ClusterOptions, EmbeddedCluster};
use ripple_server::startup::{self, LoggingConfig};
use ripple_server::workload::{self, WorkloadOptions};
use tracing::info;

/// Command line arguments for the node
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: conf/ripple.*, if present)
    #[arg(short = 'c', long = "config", env = "RIPPLE_CONFIG")]
    config: Option<PathBuf>,
    /// Data members in the embedded cluster
    #[arg(short = 'm', long = "members", default_value_t = 3)]
    members: usize,
    /// Lite members in the embedded cluster
    #[arg(long = "lite-members")]
    lite_members: Option<usize>,
    /// Log level, overrides logging.level
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,
    /// Prometheus exporter port, overrides metrics.prometheus.port
    #[arg(long = "metrics-port")]
    metrics_port: Option<u16>,
    /// Milliseconds between demo writes per member, 0 disables the workload
    #[arg(long = "write-interval", default_value_t = 250)]
    write_interval_millis: u64,
    /// Seconds between convergence reports
    #[arg(long = "report-interval", default_value_t = 10)]
    report_interval_secs: u64,
    /// Entry event type codes to log at debug level (1 added, 2 removed,
    /// 4 updated, 8 evicted); all when omitted
    #[arg(long = "log-events", value_delimiter = ',')]
    log_events: Vec<i32>,
}

impl Cli {
    fn configuration(&self) -> anyhow::Result<Configuration> {
        let mut configuration = Configuration::load(self.config.as_deref())
            .context("Failed to load configuration")?;
        if let Some(level) = &self.log_level {
            configuration = configuration.with_override(LOG_LEVEL, level.as_str())?;
        }
        if let Some(port) = self.metrics_port {
            configuration = configuration.with_override(METRICS_PROMETHEUS_PORT, i64::from(port))?;
        }
        Ok(configuration)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let configuration = cli.configuration()?;

    let logging_config =
        LoggingConfig::from_config(configuration.log_dir(), &configuration.log_level());
    let _logging_guard = startup::init_logging(&logging_config)?;

    match configuration.metrics_prometheus_port() {
        Some(port) => startup::install_prometheus_exporter(port)?,
        None => ripple_replicatedmap::metrics::init_metrics(),
    }

    let options = ClusterOptions::resolve(&configuration, cli.members, cli.lite_members);
    let cluster = Arc::new(EmbeddedCluster::start(&configuration, options)?);
    let shutdown = startup::wait_for_shutdown_signal();

    let workload_options = WorkloadOptions {
        write_interval: Duration::from_millis(cli.write_interval_millis.max(1)),
        logged_events: workload::parse_event_codes(&cli.log_events)
            .context("Invalid --log-events")?,
        ..Default::default()
    };
    let mut tasks = Vec::new();
    if cli.write_interval_millis > 0 {
        tasks.extend(workload::spawn(&cluster, &workload_options, &shutdown)?);
    }
    tasks.push(workload::spawn_reporter(
        cluster.clone(),
        workload_options.map_name.clone(),
        Duration::from_secs(cli.report_interval_secs.max(1)),
        shutdown.clone(),
    ));

    info!("Ripple node running, press Ctrl+C to stop");
    shutdown.wait().await;

    for task in tasks {
        let _ = task.await;
    }
    cluster.settle().await;
    info!(
        "Final convergence of map {}: {}",
        workload_options.map_name,
        cluster.converged(&workload_options.map_name)?
    );
    cluster.shutdown();

    Ok(())
}
