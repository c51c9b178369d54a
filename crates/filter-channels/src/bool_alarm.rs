use crate::binding::{FilterChannel, Policy};
use crate::factory::{DerivedShape, FilterKind};
use crate::{FilterError, Result};
use channel_registry::{Channel, Sample, SampleValue, ValueKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoolAlarmSettings {
    /// Source value that counts towards raising the alarm.
    pub threshold: bool,
    #[serde(default = "default_readings")]
    pub readings: u32,
    /// Republish `true` on every qualifying sample instead of only on change.
    #[serde(default)]
    pub continuous: bool,
}

pub(crate) fn default_readings() -> u32 {
    1
}

impl BoolAlarmSettings {
    pub fn validate(&self) -> Result<()> {
        if self.readings < 1 {
            return Err(FilterError::setting("readings", "must be at least 1"));
        }
        Ok(())
    }
}

pub struct BoolAlarmKind {
    settings: BoolAlarmSettings,
}

impl BoolAlarmKind {
    pub fn new(settings: BoolAlarmSettings) -> Self {
        Self { settings }
    }
}

impl FilterKind for BoolAlarmKind {
    fn kind_name(&self) -> &'static str {
        "threshold_bool_alarm"
    }

    fn derived_shape(&self, source: &Channel) -> DerivedShape {
        DerivedShape::fixed(ValueKind::Bool, source)
    }

    fn create_policy(&self, _channel: &Arc<FilterChannel>) -> Box<dyn Policy> {
        Box::new(BoolAlarm {
            settings: self.settings.clone(),
            above_count: 0,
            below_count: 0,
        })
    }
}

/// Debounced match of a boolean source against a fixed value.
pub struct BoolAlarm {
    settings: BoolAlarmSettings,
    above_count: u32,
    below_count: u32,
}

impl Policy for BoolAlarm {
    fn receive(&mut self, channel: &FilterChannel, sample: &Sample) -> Result<()> {
        let value = channel.boolean(sample)?;
        let readings = self.settings.readings;

        if value == self.settings.threshold {
            self.above_count = self.above_count.saturating_add(1);
            self.below_count = 0;
            if self.above_count >= readings && (self.settings.continuous || !channel.derived_is(true)) {
                return channel.property_set(alarm_sample(sample, true));
            }
            return Ok(());
        }

        self.above_count = 0;
        if channel.derived_is(true) {
            self.below_count = self.below_count.saturating_add(1);
            if self.below_count >= readings {
                return channel.property_set(alarm_sample(sample, false));
            }
        }
        Ok(())
    }
}

/// Alarm state stamped with the triggering sample's time.
pub(crate) fn alarm_sample(trigger: &Sample, state: bool) -> Sample {
    Sample::new(trigger.timestamp, SampleValue::Bool(state), "")
}
