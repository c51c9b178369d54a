use crate::binding::{FilterChannel, Policy};
use crate::factory::FilterKind;
use crate::{FilterError, Result};
use channel_registry::Sample;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pass-through gate: forwards source samples at or beyond either threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdSettings {
    pub upper_threshold: f64,
    pub lower_threshold: f64,
    #[serde(default)]
    pub disable_upper: bool,
    #[serde(default)]
    pub disable_lower: bool,
}

impl ThresholdSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.upper_threshold.is_finite() {
            return Err(FilterError::setting("upper_threshold", "must be finite"));
        }
        if !self.lower_threshold.is_finite() {
            return Err(FilterError::setting("lower_threshold", "must be finite"));
        }
        Ok(())
    }
}

pub struct ThresholdKind {
    settings: ThresholdSettings,
}

impl ThresholdKind {
    pub fn new(settings: ThresholdSettings) -> Self {
        Self { settings }
    }
}

impl FilterKind for ThresholdKind {
    fn kind_name(&self) -> &'static str {
        "threshold"
    }

    fn create_policy(&self, _channel: &Arc<FilterChannel>) -> Box<dyn Policy> {
        Box::new(Threshold {
            settings: self.settings.clone(),
        })
    }
}

pub struct Threshold {
    settings: ThresholdSettings,
}

impl Policy for Threshold {
    fn receive(&mut self, channel: &FilterChannel, sample: &Sample) -> Result<()> {
        let value = channel.numeric(sample)?;
        let s = &self.settings;
        if !s.disable_lower && value <= s.lower_threshold {
            return channel.property_set(sample.clone());
        }
        if !s.disable_upper && value >= s.upper_threshold {
            return channel.property_set(sample.clone());
        }
        Ok(())
    }
}
