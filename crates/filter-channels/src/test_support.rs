use crate::{FactoryConfig, FilterFactory, MetricsHub, RetryConfig, Services};
use channel_registry::{
    ChannelRegistry, ChannelSpec, ChannelUpdate, DeviceInstance, DeviceManager, InstanceRegistry,
    ManualScheduler, MemoryRegistry, Permissions, Sample, SampleValue, ValueKind,
};
use std::sync::{Arc, Mutex};

pub(crate) struct Harness {
    pub channels: Arc<dyn ChannelRegistry>,
    pub devices: Arc<DeviceManager>,
    pub scheduler: Arc<ManualScheduler>,
    pub metrics: MetricsHub,
    factories: Mutex<Vec<FilterFactory>>,
}

impl Harness {
    pub fn new() -> Self {
        let channels: Arc<dyn ChannelRegistry> = Arc::new(MemoryRegistry::new());
        Self {
            devices: Arc::new(DeviceManager::new(channels.clone())),
            channels,
            scheduler: Arc::new(ManualScheduler::new()),
            metrics: MetricsHub::new().unwrap(),
            factories: Mutex::new(Vec::new()),
        }
    }

    pub fn services(&self) -> Services {
        Services {
            channels: self.channels.clone(),
            instances: self.devices.clone(),
            scheduler: self.scheduler.clone(),
        }
    }

    pub fn factory(&self, config: FactoryConfig) -> FilterFactory {
        let factory = FilterFactory::new(
            &config,
            RetryConfig::default(),
            self.services(),
            self.metrics.filters.clone(),
        )
        .unwrap();
        self.factories.lock().unwrap().push(factory.clone());
        factory
    }

    pub fn device(&self, name: &str) -> TestDevice {
        let instance = match self.devices.instance_get(name) {
            Ok(instance) => instance,
            Err(_) => self.devices.instance_add(name).unwrap(),
        };
        TestDevice { instance }
    }

    /// A channel whose device instance is never registered.
    pub fn orphan_f64_channel(&self, name: &str) {
        self.channels
            .channel_add(name, ChannelSpec::new(ValueKind::F64, Permissions::GET))
            .unwrap();
    }

    pub fn record(&self, channel: &str) -> Recorder {
        let recorder = Recorder::default();
        let samples = recorder.samples.clone();
        self.channels.subscribe(
            channel,
            Arc::new(move |u: &ChannelUpdate| samples.lock().unwrap().push(u.sample.clone())),
        );
        recorder
    }
}

pub(crate) struct TestDevice {
    pub instance: Arc<DeviceInstance>,
}

impl TestDevice {
    fn property(&self, name: &str, kind: ValueKind) {
        self.instance
            .add_property(name, ChannelSpec::new(kind, Permissions::GET))
            .unwrap();
    }

    pub fn f64_property(&self, name: &str) {
        self.property(name, ValueKind::F64)
    }

    pub fn i64_property(&self, name: &str) {
        self.property(name, ValueKind::I64)
    }

    pub fn bool_property(&self, name: &str) {
        self.property(name, ValueKind::Bool)
    }

    pub fn text_property(&self, name: &str) {
        self.property(name, ValueKind::Text)
    }

    pub fn publish_value(&self, property: &str, value: SampleValue) {
        self.instance
            .property_set(property, Sample::now(value, ""))
            .unwrap();
    }

    pub fn publish_with_unit(&self, property: &str, value: f64, unit: &str) {
        self.instance
            .property_set(property, Sample::now(SampleValue::F64(value), unit))
            .unwrap();
    }

    pub fn publish(&self, property: &str, value: f64) {
        self.publish_value(property, SampleValue::F64(value))
    }

    pub fn publish_bool(&self, property: &str, value: bool) {
        self.publish_value(property, SampleValue::Bool(value))
    }
}

#[derive(Clone, Default)]
pub(crate) struct Recorder {
    samples: Arc<Mutex<Vec<Sample>>>,
}

impl Recorder {
    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().unwrap().clone()
    }

    pub fn values(&self) -> Vec<SampleValue> {
        self.samples().into_iter().map(|s| s.value).collect()
    }
}
