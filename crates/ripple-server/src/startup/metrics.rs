//! Prometheus exporter for the node's metrics

use std::net::{Ipv4Addr, SocketAddr};

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Install the global recorder and serve `/metrics` on the given port.
/// Must be called from within a Tokio runtime.
pub fn install_prometheus_exporter(port: u16) -> anyhow::Result<()> {
    let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()?;
    ripple_replicatedmap::metrics::init_metrics();
    info!("Prometheus exporter listening on {}", address);
    Ok(())
}
