use crate::config::EngineConfig;
use crate::{FilterFactory, MetricsHub, Result, Services};
use std::collections::HashSet;
use tracing::{error, info};

/// The set of filter factories described by one [`EngineConfig`].
pub struct FilterEngine {
    factories: Vec<FilterFactory>,
    metrics: MetricsHub,
}

impl FilterEngine {
    /// Build every factory in `config`. Factories that fail validation are
    /// logged and left out; the rest are still built. An unusable retry
    /// setting applies to every factory and fails the whole build.
    pub fn from_config(config: &EngineConfig, services: Services) -> Result<Self> {
        config.retry.validate()?;
        let metrics = MetricsHub::new()?;
        let mut names = HashSet::new();
        let mut factories = Vec::with_capacity(config.factories.len());
        for cfg in &config.factories {
            if !names.insert(cfg.name.as_str()) {
                error!(factory = %cfg.name, "duplicate filter factory name, skipped");
                continue;
            }
            match FilterFactory::new(
                cfg,
                config.retry.clone(),
                services.clone(),
                metrics.filters.clone(),
            ) {
                Ok(factory) => factories.push(factory),
                Err(e) => error!(factory = %cfg.name, error = %e, "invalid filter factory, skipped"),
            }
        }
        Ok(Self { factories, metrics })
    }

    /// Start every factory. Returns the number of sources bound by the initial scans.
    pub fn start(&self) -> usize {
        let bound = self.factories.iter().map(|f| f.start()).sum();
        info!(factories = self.factories.len(), bound, "filter engine started");
        bound
    }

    pub fn stop(&self) {
        for factory in &self.factories {
            factory.stop();
        }
        info!("filter engine stopped");
    }

    pub fn factories(&self) -> &[FilterFactory] {
        &self.factories
    }

    pub fn factory(&self, name: &str) -> Option<&FilterFactory> {
        self.factories.iter().find(|f| f.name() == name)
    }

    pub fn metrics(&self) -> &MetricsHub {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::average::AverageSettings;
    use crate::config::{FactoryConfig, PolicyConfig, RetryConfig};
    use crate::test_support::Harness;

    fn avg(name: &str, n: usize) -> FactoryConfig {
        FactoryConfig::new(
            name,
            PolicyConfig::SampleAverage(AverageSettings {
                number_of_samples: n,
            }),
        )
    }

    #[test]
    fn test_invalid_and_duplicate_factories_are_skipped() {
        let h = Harness::new();
        let config = EngineConfig {
            factories: vec![
                avg("good", 2),
                avg("bad", 0),
                avg("pattern", 2).with_filter("*.a*b*"),
                avg("good", 3),
            ],
            ..Default::default()
        };
        let engine = FilterEngine::from_config(&config, h.services()).unwrap();
        assert_eq!(engine.factories().len(), 1);
        assert!(engine.factory("good").is_some());
        assert!(engine.factory("bad").is_none());
    }

    #[test]
    fn test_unusable_retry_delay_fails_the_build() {
        let h = Harness::new();
        let config = EngineConfig {
            retry: RetryConfig {
                attempts: 3,
                delay_secs: 1e20,
            },
            factories: vec![avg("good", 2)],
        };
        assert!(FilterEngine::from_config(&config, h.services()).is_err());
    }

    #[test]
    fn test_start_binds_across_factories() {
        let h = Harness::new();
        let dev = h.device("dev");
        dev.f64_property("temp");
        let config = EngineConfig {
            factories: vec![avg("avg2", 2), avg("avg5", 5)],
            ..Default::default()
        };
        let engine = FilterEngine::from_config(&config, h.services()).unwrap();
        assert_eq!(engine.start(), 2);
        assert!(h.channels.channel_exists("dev._temp_avg2"));
        assert!(h.channels.channel_exists("dev._temp_avg5"));
        assert_eq!(engine.metrics().filters.bindings_active.get(), 2);

        engine.stop();
        assert!(engine.factories().iter().all(|f| !f.is_running()));
        // Derived channels are left in place.
        assert!(h.channels.channel_exists("dev._temp_avg2"));
    }
}
