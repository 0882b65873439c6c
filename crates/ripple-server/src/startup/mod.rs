//! Node startup utilities: logging, metrics exporter, and shutdown handling.

mod logging;
mod metrics;
mod shutdown;

pub use logging::{LogRotation, LoggingConfig, LoggingGuard, init_logging};
pub use metrics::install_prometheus_exporter;
pub use shutdown::{ShutdownSignal, wait_for_shutdown_signal};
