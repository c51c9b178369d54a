use crate::binding::{FilterChannel, Policy};
use crate::factory::{DerivedShape, FilterKind};
use crate::{FilterError, Result};
use channel_registry::{Channel, Sample, SampleValue, ValueKind};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AverageSettings {
    pub number_of_samples: usize,
}

impl AverageSettings {
    pub fn validate(&self) -> Result<()> {
        if self.number_of_samples == 0 {
            return Err(FilterError::setting("number_of_samples", "must be greater than 0"));
        }
        Ok(())
    }
}

pub struct AverageKind {
    settings: AverageSettings,
}

impl AverageKind {
    pub fn new(settings: AverageSettings) -> Self {
        Self { settings }
    }
}

impl FilterKind for AverageKind {
    fn kind_name(&self) -> &'static str {
        "sample_average"
    }

    fn derived_shape(&self, source: &Channel) -> DerivedShape {
        DerivedShape::fixed(ValueKind::F64, source)
    }

    fn create_policy(&self, _channel: &Arc<FilterChannel>) -> Box<dyn Policy> {
        Box::new(SampleAverage {
            size: self.settings.number_of_samples,
            batch: Vec::with_capacity(self.settings.number_of_samples),
        })
    }
}

/// Mean over non-overlapping batches of `number_of_samples` source samples.
pub struct SampleAverage {
    size: usize,
    batch: Vec<Sample>,
}

impl Policy for SampleAverage {
    fn receive(&mut self, channel: &FilterChannel, sample: &Sample) -> Result<()> {
        channel.numeric(sample)?;
        self.batch.push(sample.clone());
        if self.batch.len() < self.size {
            return Ok(());
        }

        let batch = std::mem::take(&mut self.batch);
        let sum: f64 = batch.iter().filter_map(|s| s.value.as_f64()).sum();
        let mean = sum / batch.len() as f64;
        let unit = batch.first().map(|s| s.unit.clone()).unwrap_or_default();
        channel.property_set(Sample::new(sample.timestamp, SampleValue::F64(mean), unit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FactoryConfig, PolicyConfig};
    use crate::test_support::Harness;

    #[test]
    fn test_batch_mean_with_first_unit() {
        let h = Harness::new();
        let dev = h.device("dev");
        dev.f64_property("temp");
        h.factory(FactoryConfig::new(
            "avg",
            PolicyConfig::SampleAverage(AverageSettings {
                number_of_samples: 3,
            }),
        ))
        .start();
        let rec = h.record("dev._temp_avg");

        dev.publish_with_unit("temp", 2.0, "C");
        dev.publish_with_unit("temp", 4.0, "F");
        assert!(rec.samples().is_empty());
        dev.publish_with_unit("temp", 6.0, "K");

        let samples = rec.samples();
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, SampleValue::F64(4.0));
        assert_eq!(samples[0].unit, "C");

        // Batches do not overlap: two more samples are not enough.
        dev.publish("temp", 100.0);
        dev.publish("temp", 100.0);
        assert_eq!(rec.samples().len(), 1);
        dev.publish("temp", 100.0);
        assert_eq!(rec.values(), vec![SampleValue::F64(4.0), SampleValue::F64(100.0)]);
    }

    #[test]
    fn test_integer_source_averages_to_float() {
        let h = Harness::new();
        let dev = h.device("dev");
        dev.i64_property("count");
        h.factory(FactoryConfig::new(
            "avg",
            PolicyConfig::SampleAverage(AverageSettings {
                number_of_samples: 2,
            }),
        ))
        .start();
        assert_eq!(
            h.channels.channel_get("dev._count_avg").unwrap().kind(),
            ValueKind::F64
        );
        dev.publish_value("count", SampleValue::I64(1));
        dev.publish_value("count", SampleValue::I64(2));
        assert_eq!(
            h.channels.sample_get("dev._count_avg").unwrap().value,
            SampleValue::F64(1.5)
        );
    }

    #[test]
    fn test_text_samples_are_not_queued() {
        let h = Harness::new();
        let dev = h.device("dev");
        dev.text_property("label");
        h.factory(FactoryConfig::new(
            "avg",
            PolicyConfig::SampleAverage(AverageSettings {
                number_of_samples: 1,
            }),
        ))
        .start();
        dev.publish_value("label", SampleValue::Text("x".into()));
        assert!(h.channels.sample_get("dev._label_avg").is_err());
    }
}
