//! Ripple Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all Ripple components:
//! - Error type and result alias
//! - Member identity
//! - Configuration access with replicated map settings
//! - Utility functions

pub mod config;
pub mod error;
pub mod model;
pub mod utils;

// Re-exports for convenience
pub use config::{Configuration, InMemoryFormat, ReplicatedMapConfig};
pub use error::{Result, RippleError};
pub use model::{Member, MemberId};
pub use utils::{current_millis, is_valid_name, local_ip};

/// Name of the configuration section used when a map has no dedicated section
pub const DEFAULT_MAP_CONFIG_NAME: &str = "default";
