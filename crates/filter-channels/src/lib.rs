//! filter-channels: derived channels synthesized from existing channels
//!
//! A [`FilterFactory`] watches a channel registry for channels matching a
//! `device_glob.property_glob` filter, including channels registered after it
//! started. For every match it creates a `_`-prefixed channel on the source's
//! own device and binds a policy that republishes transformed samples on it:
//! - threshold gate
//! - debounced boolean alarm
//! - debounced threshold alarm with hysteresis
//! - periodic re-assertion of a trigger state
//! - batch sample average

use channel_registry::{ChannelRegistry, InstanceRegistry, Scheduler};
use std::sync::Arc;

mod error;
pub use error::{FilterError, Result};

mod pattern;
pub use pattern::{filter_matches, ChannelFilter};

pub mod config;
pub use config::{
    load_config_file, EngineConfig, FactoryConfig, PolicyConfig, RetryConfig,
};

mod binding;
pub use binding::{Binding, FilterChannel, Policy};

mod factory;
pub use factory::{AddOutcome, DerivedShape, FilterFactory, FilterKind};

pub mod average;
pub mod bool_alarm;
pub mod hysteresis;
pub mod periodic;
pub mod threshold;

mod metrics;
pub use metrics::{FilterMetrics, MetricsHub};

mod engine;
pub use engine::FilterEngine;

#[cfg(test)]
mod test_support;

/// External services a factory needs.
#[derive(Clone)]
pub struct Services {
    pub channels: Arc<dyn ChannelRegistry>,
    pub instances: Arc<dyn InstanceRegistry>,
    pub scheduler: Arc<dyn Scheduler>,
}
