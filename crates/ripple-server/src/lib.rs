//! Ripple node
//!
//! Hosts an embedded cluster of replicated map members together with the
//! node's logging, metrics exporter, and demo workload.

pub mod cluster;
pub mod startup;
pub mod workload;
