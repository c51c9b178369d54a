//! Debounced threshold alarm with a hysteresis dead zone.
//!
//! For a `high` alarm the value axis splits into three regions:
//!
//! ```text
//!   normal              dead zone              alarm
//! ---------------|------------------------|-------------------> value
//!        threshold - hysteresis       threshold
//! ```
//!
//! `readings` consecutive samples in the alarm region raise the alarm and
//! `readings` consecutive samples in the normal region clear it. Samples in
//! the dead zone hold the current state and restart the clearing count. A
//! `low` alarm mirrors the axis around `threshold`.

use crate::binding::{FilterChannel, Policy};
use crate::bool_alarm::{alarm_sample, default_readings};
use crate::factory::{DerivedShape, FilterKind};
use crate::{FilterError, Result};
use channel_registry::{Channel, Sample, ValueKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmType {
    #[serde(alias = "High")]
    High,
    #[serde(alias = "Low")]
    Low,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HysteresisSettings {
    pub alarm_type: AlarmType,
    pub threshold: f64,
    pub hysteresis: f64,
    #[serde(default = "default_readings")]
    pub readings: u32,
    #[serde(default)]
    pub continuous: bool,
}

impl HysteresisSettings {
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() {
            return Err(FilterError::setting("threshold", "must be finite"));
        }
        if !self.hysteresis.is_finite() || self.hysteresis < 0.0 {
            return Err(FilterError::setting(
                "hysteresis",
                format!("must be a non-negative number, got {}", self.hysteresis),
            ));
        }
        if self.readings < 1 {
            return Err(FilterError::setting("readings", "must be at least 1"));
        }
        Ok(())
    }

    fn region(&self, value: f64) -> Region {
        match self.alarm_type {
            AlarmType::High if value >= self.threshold => Region::Alarm,
            AlarmType::High if value <= self.threshold - self.hysteresis => Region::Normal,
            AlarmType::Low if value <= self.threshold => Region::Alarm,
            AlarmType::Low if value >= self.threshold + self.hysteresis => Region::Normal,
            _ => Region::DeadZone,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region {
    Alarm,
    DeadZone,
    Normal,
}

pub struct HysteresisKind {
    settings: HysteresisSettings,
}

impl HysteresisKind {
    pub fn new(settings: HysteresisSettings) -> Self {
        Self { settings }
    }
}

impl FilterKind for HysteresisKind {
    fn kind_name(&self) -> &'static str {
        "threshold_alarm_with_hysteresis"
    }

    fn derived_shape(&self, source: &Channel) -> DerivedShape {
        DerivedShape::fixed(ValueKind::Bool, source)
    }

    fn create_policy(&self, _channel: &Arc<FilterChannel>) -> Box<dyn Policy> {
        Box::new(HysteresisAlarm {
            settings: self.settings.clone(),
            above_count: 0,
            below_count: 0,
        })
    }
}

pub struct HysteresisAlarm {
    settings: HysteresisSettings,
    /// Consecutive samples in the alarm region.
    above_count: u32,
    /// Consecutive samples in the normal region while the alarm is raised.
    below_count: u32,
}

impl Policy for HysteresisAlarm {
    fn receive(&mut self, channel: &FilterChannel, sample: &Sample) -> Result<()> {
        let value = channel.numeric(sample)?;
        let readings = self.settings.readings;
        let continuous = self.settings.continuous;

        let region = self.settings.region(value);
        if region == Region::Alarm {
            self.above_count = self.above_count.saturating_add(1);
            self.below_count = 0;
            if self.above_count >= readings && (continuous || !channel.derived_is(true)) {
                return channel.property_set(alarm_sample(sample, true));
            }
            return Ok(());
        }

        self.above_count = 0;
        if !channel.derived_is(true) {
            return Ok(());
        }
        match region {
            Region::Normal => {
                self.below_count = self.below_count.saturating_add(1);
                if self.below_count >= readings {
                    return channel.property_set(alarm_sample(sample, false));
                }
            }
            _ => {
                self.below_count = 0;
                if continuous {
                    return channel.property_set(alarm_sample(sample, true));
                }
            }
        }
        Ok(())
    }
}
