use crate::{Channel, ChannelRegistry, ChannelSpec, RegistryError, Result, Sample};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Lookup of running device-driver instances by name.
pub trait InstanceRegistry: Send + Sync {
    /// Fails with [`RegistryError::DeviceNotFound`] until the driver has been started.
    fn instance_get(&self, name: &str) -> Result<Arc<DeviceInstance>>;
}

/// A running device driver and the property table it publishes through.
pub struct DeviceInstance {
    name: String,
    channels: Arc<dyn ChannelRegistry>,
    properties: RwLock<HashMap<String, Arc<Channel>>>,
}

impl DeviceInstance {
    pub fn new(name: impl Into<String>, channels: Arc<dyn ChannelRegistry>) -> Self {
        Self {
            name: name.into(),
            channels,
            properties: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn channel_name(&self, property: &str) -> String {
        format!("{}.{}", self.name, property)
    }

    /// Register `<device>.<property>` in the channel registry and in this
    /// instance's property table.
    pub fn add_property(&self, property: &str, spec: ChannelSpec) -> Result<Arc<Channel>> {
        if property.is_empty() {
            return Err(RegistryError::InvalidName(self.channel_name(property)));
        }
        let channel = self.channels.channel_add(&self.channel_name(property), spec)?;
        self.properties
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(property.to_string(), channel.clone());
        Ok(channel)
    }

    pub fn property(&self, property: &str) -> Result<Arc<Channel>> {
        self.properties
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(property)
            .cloned()
            .ok_or_else(|| RegistryError::ChannelNotFound(self.channel_name(property)))
    }

    pub fn property_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .properties
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn property_get(&self, property: &str) -> Result<Sample> {
        let channel = self.property(property)?;
        channel
            .current()
            .ok_or_else(|| RegistryError::NoValue(channel.name().to_string()))
    }

    /// Publish a sample on one of this device's properties.
    pub fn property_set(&self, property: &str, sample: Sample) -> Result<()> {
        let channel = self.property(property)?;
        self.channels.sample_set(channel.name(), sample)
    }
}

/// Registry of device instances, keyed by name.
pub struct DeviceManager {
    channels: Arc<dyn ChannelRegistry>,
    instances: RwLock<HashMap<String, Arc<DeviceInstance>>>,
}

impl DeviceManager {
    pub fn new(channels: Arc<dyn ChannelRegistry>) -> Self {
        Self {
            channels,
            instances: RwLock::new(HashMap::new()),
        }
    }

    /// Create and register a new instance sharing this manager's channel registry.
    pub fn instance_add(&self, name: &str) -> Result<Arc<DeviceInstance>> {
        let mut instances = self.instances.write().unwrap_or_else(|p| p.into_inner());
        if instances.contains_key(name) {
            return Err(RegistryError::DeviceExists(name.to_string()));
        }
        let instance = Arc::new(DeviceInstance::new(name, self.channels.clone()));
        instances.insert(name.to_string(), instance.clone());
        tracing::info!(device = name, "device instance registered");
        Ok(instance)
    }

    pub fn instance_remove(&self, name: &str) -> Result<Arc<DeviceInstance>> {
        self.instances
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(name)
            .ok_or_else(|| RegistryError::DeviceNotFound(name.to_string()))
    }

    pub fn instance_list(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .instances
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}

impl InstanceRegistry for DeviceManager {
    fn instance_get(&self, name: &str) -> Result<Arc<DeviceInstance>> {
        self.instances
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::DeviceNotFound(name.to_string()))
    }
}
