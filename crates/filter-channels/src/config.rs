use crate::average::AverageSettings;
use crate::bool_alarm::BoolAlarmSettings;
use crate::hysteresis::HysteresisSettings;
use crate::periodic::PeriodicSettings;
use crate::threshold::ThresholdSettings;
use crate::{ChannelFilter, FilterError, Result};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Policy attached to every channel a factory matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    Threshold(ThresholdSettings),
    ThresholdBoolAlarm(BoolAlarmSettings),
    ThresholdAlarmWithHysteresis(HysteresisSettings),
    PeriodicAlarmSampler(PeriodicSettings),
    SampleAverage(AverageSettings),
}

impl PolicyConfig {
    pub fn kind_name(&self) -> &'static str {
        match self {
            PolicyConfig::Threshold(_) => "threshold",
            PolicyConfig::ThresholdBoolAlarm(_) => "threshold_bool_alarm",
            PolicyConfig::ThresholdAlarmWithHysteresis(_) => "threshold_alarm_with_hysteresis",
            PolicyConfig::PeriodicAlarmSampler(_) => "periodic_alarm_sampler",
            PolicyConfig::SampleAverage(_) => "sample_average",
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            PolicyConfig::Threshold(s) => s.validate(),
            PolicyConfig::ThresholdBoolAlarm(s) => s.validate(),
            PolicyConfig::ThresholdAlarmWithHysteresis(s) => s.validate(),
            PolicyConfig::PeriodicAlarmSampler(s) => s.validate(),
            PolicyConfig::SampleAverage(s) => s.validate(),
        }
    }
}

/// Retry schedule used while a target device instance has not started yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_attempts")]
    pub attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: f64,
}

fn default_attempts() -> u32 {
    3
}

fn default_delay_secs() -> f64 {
    30.0
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            attempts: default_attempts(),
            delay_secs: default_delay_secs(),
        }
    }
}

impl RetryConfig {
    /// The retry delay, or an error when `delay_secs` is negative, NaN or too
    /// large to represent.
    pub fn delay(&self) -> Result<Duration> {
        Duration::try_from_secs_f64(self.delay_secs).map_err(|e| {
            FilterError::setting(
                "retry.delay_secs",
                format!("{} is not a usable number of seconds: {e}", self.delay_secs),
            )
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.delay().map(|_| ())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactoryConfig {
    pub name: String,
    #[serde(default = "default_filter")]
    pub target_channel_filter: String,
    #[serde(default)]
    pub channel_name_override: Option<String>,
    pub policy: PolicyConfig,
}

fn default_filter() -> String {
    "*.*".to_string()
}

impl FactoryConfig {
    pub fn new(name: impl Into<String>, policy: PolicyConfig) -> Self {
        Self {
            name: name.into(),
            target_channel_filter: default_filter(),
            channel_name_override: None,
            policy,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.target_channel_filter = filter.into();
        self
    }

    pub fn with_override(mut self, name: impl Into<String>) -> Self {
        self.channel_name_override = Some(name.into());
        self
    }

    /// Check every setting once and return the parsed channel filter.
    pub fn validate(&self) -> Result<ChannelFilter> {
        if self.name.is_empty() {
            return Err(FilterError::setting("name", "must not be empty"));
        }
        if self.name.contains('.') {
            return Err(FilterError::setting("name", "must not contain '.'"));
        }
        if let Some(name) = &self.channel_name_override {
            if name.contains('.') {
                return Err(FilterError::setting(
                    "channel_name_override",
                    "must not contain '.'",
                ));
            }
        }
        self.policy.validate()?;
        ChannelFilter::parse(&self.target_channel_filter)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub factories: Vec<FactoryConfig>,
}

/// Load an engine config from YAML (`.yml`/`.yaml`) or JSON (`.json`).
pub fn load_config_file(path: impl AsRef<Path>) -> anyhow::Result<EngineConfig> {
    let path = path.as_ref();
    let raw =
        fs::read_to_string(path).with_context(|| format!("reading config: {}", path.display()))?;
    let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
    let config: EngineConfig = if is_json {
        serde_json::from_str(&raw).with_context(|| format!("parsing json: {}", path.display()))?
    } else {
        serde_yaml::from_str(&raw).with_context(|| format!("parsing yaml: {}", path.display()))?
    };
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hysteresis::AlarmType;
    use std::io::Write;

    const YAML: &str = r#"
retry:
  attempts: 5
factories:
  - name: hot
    target_channel_filter: "sensor*.temperature"
    policy:
      kind: threshold_alarm_with_hysteresis
      alarm_type: high
      threshold: 50
      hysteresis: 5.0
      readings: 3
  - name: avg
    channel_name_override: temp_avg
    policy:
      kind: sample_average
      number_of_samples: 10
"#;

    #[test]
    fn test_parse_yaml_with_defaults() {
        let cfg: EngineConfig = serde_yaml::from_str(YAML).unwrap();
        assert_eq!(cfg.retry.attempts, 5);
        assert_eq!(cfg.retry.delay_secs, 30.0);
        assert_eq!(cfg.factories.len(), 2);

        let hot = &cfg.factories[0];
        match &hot.policy {
            PolicyConfig::ThresholdAlarmWithHysteresis(s) => {
                assert_eq!(s.alarm_type, AlarmType::High);
                assert_eq!(s.threshold, 50.0);
                assert_eq!(s.readings, 3);
                assert!(!s.continuous);
            }
            other => panic!("unexpected policy {other:?}"),
        }

        let avg = &cfg.factories[1];
        assert_eq!(avg.target_channel_filter, "*.*");
        assert_eq!(avg.channel_name_override.as_deref(), Some("temp_avg"));
        assert!(avg.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_factories() {
        let policy = PolicyConfig::SampleAverage(AverageSettings {
            number_of_samples: 3,
        });
        assert!(FactoryConfig::new("", policy.clone()).validate().is_err());
        assert!(FactoryConfig::new("a.b", policy.clone()).validate().is_err());
        assert!(FactoryConfig::new("avg", policy.clone())
            .with_filter("*.*_*")
            .validate()
            .is_err());
        assert!(FactoryConfig::new("avg", policy.clone())
            .with_override("x.y")
            .validate()
            .is_err());

        let bad = PolicyConfig::SampleAverage(AverageSettings {
            number_of_samples: 0,
        });
        assert!(FactoryConfig::new("avg", bad).validate().is_err());
    }

    #[test]
    fn test_retry_delay_must_fit_a_duration() {
        let ok = RetryConfig::default();
        assert_eq!(ok.delay().unwrap(), Duration::from_secs(30));
        for delay_secs in [-1.0, f64::NAN, f64::INFINITY, 1e20] {
            let cfg = RetryConfig {
                attempts: 3,
                delay_secs,
            };
            assert!(
                matches!(cfg.validate(), Err(FilterError::InvalidSetting { .. })),
                "{delay_secs} accepted"
            );
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let yaml = "name: x\npolicy:\n  kind: median\n";
        assert!(serde_yaml::from_str::<FactoryConfig>(yaml).is_err());
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"factories":[{{"name":"door","policy":{{"kind":"threshold_bool_alarm","threshold":true}}}}]}}"#
        )
        .unwrap();
        let cfg = load_config_file(file.path()).unwrap();
        assert_eq!(cfg.retry, RetryConfig::default());
        assert_eq!(cfg.factories[0].policy.kind_name(), "threshold_bool_alarm");
    }
}
