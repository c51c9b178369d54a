use crate::{FilterError, Result};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

#[derive(Clone)]
pub struct FilterMetrics {
    pub channels_created: IntCounter,
    pub retries_scheduled: IntCounter,
    pub channels_abandoned: IntCounter,
    pub name_conflicts: IntCounter,
    pub bindings_active: IntGauge,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub filters: FilterMetrics,
}

fn init_err(e: prometheus::Error) -> FilterError {
    FilterError::Metrics(format!("metrics init error: {e}"))
}

impl MetricsHub {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let filters = FilterMetrics {
            channels_created: IntCounter::new(
                "filter_channels_created",
                "Derived filter channels created",
            )
            .map_err(init_err)?,
            retries_scheduled: IntCounter::new(
                "filter_retries_scheduled",
                "Binding retries scheduled while waiting for a device instance",
            )
            .map_err(init_err)?,
            channels_abandoned: IntCounter::new(
                "filter_channels_abandoned",
                "Derived channels abandoned after exhausting retries",
            )
            .map_err(init_err)?,
            name_conflicts: IntCounter::new(
                "filter_name_conflicts",
                "Derived channel creations skipped because the name was taken",
            )
            .map_err(init_err)?,
            bindings_active: IntGauge::new(
                "filter_bindings_active",
                "Policies currently bound to a source channel",
            )
            .map_err(init_err)?,
        };
        registry
            .register(Box::new(filters.channels_created.clone()))
            .map_err(init_err)?;
        registry
            .register(Box::new(filters.retries_scheduled.clone()))
            .map_err(init_err)?;
        registry
            .register(Box::new(filters.channels_abandoned.clone()))
            .map_err(init_err)?;
        registry
            .register(Box::new(filters.name_conflicts.clone()))
            .map_err(init_err)?;
        registry
            .register(Box::new(filters.bindings_active.clone()))
            .map_err(init_err)?;
        Ok(Self { registry, filters })
    }

    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_text_lists_counters() {
        let hub = MetricsHub::new().unwrap();
        hub.filters.channels_created.inc();
        hub.filters.bindings_active.set(2);
        let text = hub.encode_text();
        assert!(text.contains("filter_channels_created 1"));
        assert!(text.contains("filter_bindings_active 2"));
        assert!(text.contains("filter_name_conflicts 0"));
    }
}
