use crate::{Channel, ChannelSpec, RegistryError, Result, Sample};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use uuid::Uuid;

/// One update delivered to channel subscribers.
#[derive(Debug, Clone)]
pub struct ChannelUpdate {
    pub channel: String,
    pub sample: Sample,
}

pub type UpdateHandler = Arc<dyn Fn(&ChannelUpdate) + Send + Sync>;
pub type NewChannelHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Handle returned by the subscribe calls, needed to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of `"device.property"` channels.
///
/// Handlers are invoked synchronously on the thread that publishes the sample
/// or adds the channel, and never while the registry holds an internal lock,
/// so a handler may freely call back into the registry.
pub trait ChannelRegistry: Send + Sync {
    fn channel_list(&self) -> Vec<String>;
    fn channel_get(&self, name: &str) -> Result<Arc<Channel>>;
    fn channel_add(&self, name: &str, spec: ChannelSpec) -> Result<Arc<Channel>>;
    fn channel_exists(&self, name: &str) -> bool;
    fn channel_remove(&self, name: &str) -> Result<()>;

    fn sample_get(&self, name: &str) -> Result<Sample> {
        self.channel_get(name)?
            .current()
            .ok_or_else(|| RegistryError::NoValue(name.to_string()))
    }

    /// Store a new sample and notify the channel's subscribers.
    fn sample_set(&self, name: &str, sample: Sample) -> Result<()>;

    fn subscribe(&self, name: &str, handler: UpdateHandler) -> SubscriptionId;
    fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool;
    fn subscribe_new_channels(&self, handler: NewChannelHandler) -> SubscriptionId;
    fn unsubscribe_new_channels(&self, id: SubscriptionId) -> bool;
}

/// In-process [`ChannelRegistry`].
#[derive(Default)]
pub struct MemoryRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, UpdateHandler)>>>,
    new_channel_subscribers: Mutex<Vec<(SubscriptionId, NewChannelHandler)>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        read(&self.channels).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn update_handlers(&self, name: &str) -> Vec<UpdateHandler> {
        lock(&self.subscribers)
            .get(name)
            .map(|subs| subs.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default()
    }
}

impl ChannelRegistry for MemoryRegistry {
    fn channel_list(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.channels).keys().cloned().collect();
        names.sort();
        names
    }

    fn channel_get(&self, name: &str) -> Result<Arc<Channel>> {
        read(&self.channels)
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::ChannelNotFound(name.to_string()))
    }

    fn channel_add(&self, name: &str, spec: ChannelSpec) -> Result<Arc<Channel>> {
        if crate::split_channel_name(name).is_none() {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if let Some(initial) = &spec.initial {
            if initial.value.kind() != spec.kind {
                return Err(RegistryError::TypeMismatch {
                    channel: name.to_string(),
                    expected: spec.kind,
                    actual: initial.value.kind(),
                });
            }
        }
        let channel = {
            let mut channels = write(&self.channels);
            if channels.contains_key(name) {
                return Err(RegistryError::ChannelExists(name.to_string()));
            }
            let channel = Arc::new(Channel::new(name, spec));
            channels.insert(name.to_string(), channel.clone());
            channel
        };
        tracing::debug!(channel = name, kind = %channel.kind(), "channel added");

        let handlers: Vec<NewChannelHandler> = lock(&self.new_channel_subscribers)
            .iter()
            .map(|(_, h)| h.clone())
            .collect();
        for handler in handlers {
            handler(name);
        }
        Ok(channel)
    }

    fn channel_exists(&self, name: &str) -> bool {
        read(&self.channels).contains_key(name)
    }

    fn channel_remove(&self, name: &str) -> Result<()> {
        write(&self.channels)
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| RegistryError::ChannelNotFound(name.to_string()))?;
        lock(&self.subscribers).remove(name);
        tracing::debug!(channel = name, "channel removed");
        Ok(())
    }

    fn sample_set(&self, name: &str, sample: Sample) -> Result<()> {
        let channel = self.channel_get(name)?;
        channel.store(sample.clone())?;
        let update = ChannelUpdate {
            channel: name.to_string(),
            sample,
        };
        for handler in self.update_handlers(name) {
            handler(&update);
        }
        Ok(())
    }

    fn subscribe(&self, name: &str, handler: UpdateHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        lock(&self.subscribers)
            .entry(name.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    fn unsubscribe(&self, name: &str, id: SubscriptionId) -> bool {
        let mut subscribers = lock(&self.subscribers);
        let Some(subs) = subscribers.get_mut(name) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        let removed = subs.len() != before;
        if subs.is_empty() {
            subscribers.remove(name);
        }
        removed
    }

    fn subscribe_new_channels(&self, handler: NewChannelHandler) -> SubscriptionId {
        let id = SubscriptionId::new();
        lock(&self.new_channel_subscribers).push((id, handler));
        id
    }

    fn unsubscribe_new_channels(&self, id: SubscriptionId) -> bool {
        let mut subs = lock(&self.new_channel_subscribers);
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        subs.len() != before
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn read<T>(m: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    m.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(m: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    m.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
