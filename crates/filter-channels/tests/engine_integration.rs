use channel_registry::{
    ChannelRegistry, ChannelSpec, DeviceManager, ManualScheduler, MemoryRegistry, Permissions,
    Sample, SampleValue, ValueKind,
};
use filter_channels::{load_config_file, EngineConfig, FilterEngine, Services};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

const CONFIG: &str = r#"
retry:
  attempts: 2
  delay_secs: 10
factories:
  - name: hot
    target_channel_filter: "boiler*.temp"
    policy:
      kind: threshold_alarm_with_hysteresis
      alarm_type: high
      threshold: 80
      hysteresis: 5
      readings: 2
  - name: avg
    target_channel_filter: "*.temp"
    policy:
      kind: sample_average
      number_of_samples: 2
  - name: door
    target_channel_filter: "*.open"
    channel_name_override: open_alarm
    policy:
      kind: threshold_bool_alarm
      threshold: true
  - name: beat
    target_channel_filter: "door*._open_alarm"
    policy:
      kind: periodic_alarm_sampler
      interval: 5
"#;

struct Plant {
    channels: Arc<dyn ChannelRegistry>,
    devices: Arc<DeviceManager>,
    scheduler: Arc<ManualScheduler>,
}

impl Plant {
    fn new() -> Self {
        let channels: Arc<dyn ChannelRegistry> = Arc::new(MemoryRegistry::new());
        Self {
            devices: Arc::new(DeviceManager::new(channels.clone())),
            channels,
            scheduler: Arc::new(ManualScheduler::new()),
        }
    }

    fn services(&self) -> Services {
        Services {
            channels: self.channels.clone(),
            instances: self.devices.clone(),
            scheduler: self.scheduler.clone(),
        }
    }

    fn publish(&self, channel: &str, value: SampleValue) {
        self.channels
            .sample_set(channel, Sample::now(value, ""))
            .unwrap();
    }

    fn value(&self, channel: &str) -> Option<SampleValue> {
        self.channels.sample_get(channel).ok().map(|s| s.value)
    }
}

fn engine_from_file(plant: &Plant) -> FilterEngine {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(CONFIG.as_bytes()).unwrap();
    let config: EngineConfig = load_config_file(file.path()).unwrap();
    FilterEngine::from_config(&config, plant.services()).unwrap()
}

#[test]
fn boiler_and_door_pipeline() {
    let plant = Plant::new();
    let boiler = plant.devices.instance_add("boiler1").unwrap();
    boiler
        .add_property("temp", ChannelSpec::new(ValueKind::F64, Permissions::GET))
        .unwrap();

    let engine = engine_from_file(&plant);
    assert_eq!(engine.factories().len(), 4);
    assert_eq!(engine.start(), 2);
    assert!(plant.channels.channel_exists("boiler1._temp_hot"));
    assert!(plant.channels.channel_exists("boiler1._temp_avg"));

    for v in [70.0, 85.0, 90.0] {
        plant.publish("boiler1.temp", SampleValue::F64(v));
    }
    assert_eq!(plant.value("boiler1._temp_hot"), Some(SampleValue::Bool(true)));
    assert_eq!(plant.value("boiler1._temp_avg"), Some(SampleValue::F64(77.5)));

    // Dead zone holds the alarm; two normal readings clear it.
    plant.publish("boiler1.temp", SampleValue::F64(77.0));
    assert_eq!(plant.value("boiler1._temp_hot"), Some(SampleValue::Bool(true)));
    plant.publish("boiler1.temp", SampleValue::F64(60.0));
    plant.publish("boiler1.temp", SampleValue::F64(60.0));
    assert_eq!(plant.value("boiler1._temp_hot"), Some(SampleValue::Bool(false)));

    // A door registered after start chains into the heartbeat factory.
    let door = plant.devices.instance_add("door").unwrap();
    door.add_property("open", ChannelSpec::new(ValueKind::Bool, Permissions::GET))
        .unwrap();
    assert!(plant.channels.channel_exists("door._open_alarm"));
    assert!(plant.channels.channel_exists("door.__open_alarm_beat"));

    plant.publish("door.open", SampleValue::Bool(true));
    assert_eq!(plant.value("door._open_alarm"), Some(SampleValue::Bool(true)));
    assert_eq!(plant.scheduler.pending(), 1);
    plant.scheduler.advance(Duration::from_secs(5));
    assert_eq!(
        plant.value("door.__open_alarm_beat"),
        Some(SampleValue::Bool(true))
    );

    plant.publish("door.open", SampleValue::Bool(false));
    assert_eq!(plant.value("door._open_alarm"), Some(SampleValue::Bool(false)));
    assert_eq!(plant.scheduler.pending(), 0);

    let text = engine.metrics().encode_text();
    assert!(text.contains("filter_channels_created 4"));
    assert!(text.contains("filter_bindings_active 4"));
    engine.stop();
}

#[test]
fn late_device_instance_is_picked_up_by_retry() {
    let plant = Plant::new();
    let engine = engine_from_file(&plant);
    engine.start();

    // Channel published before its driver instance is registered.
    plant
        .channels
        .channel_add(
            "boiler2.temp",
            ChannelSpec::new(ValueKind::F64, Permissions::GET),
        )
        .unwrap();
    assert!(!plant.channels.channel_exists("boiler2._temp_hot"));
    assert_eq!(plant.scheduler.pending(), 2);

    plant.scheduler.advance(Duration::from_secs(10));
    assert_eq!(plant.scheduler.pending(), 2);

    plant.devices.instance_add("boiler2").unwrap();
    plant.scheduler.advance(Duration::from_secs(10));
    assert!(plant.channels.channel_exists("boiler2._temp_hot"));
    assert!(plant.channels.channel_exists("boiler2._temp_avg"));
    assert_eq!(plant.scheduler.pending(), 0);
    assert_eq!(engine.metrics().filters.retries_scheduled.get(), 4);
}
