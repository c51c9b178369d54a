use crate::factory::FilterKind;
use crate::{FilterError, Result};
use channel_registry::{
    Channel, ChannelRegistry, ChannelUpdate, DeviceInstance, Sample, SampleValue,
};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Per-binding state machine turning source samples into derived samples.
pub trait Policy: Send {
    fn receive(&mut self, channel: &FilterChannel, sample: &Sample) -> Result<()>;
}

/// The fixed (source, derived) pairing a policy writes through.
pub struct FilterChannel {
    source: Arc<Channel>,
    derived: Arc<Channel>,
    device: Arc<DeviceInstance>,
}

impl FilterChannel {
    pub fn new(source: Arc<Channel>, derived: Arc<Channel>, device: Arc<DeviceInstance>) -> Self {
        Self {
            source,
            derived,
            device,
        }
    }

    pub fn source(&self) -> &Arc<Channel> {
        &self.source
    }

    pub fn derived(&self) -> &Arc<Channel> {
        &self.derived
    }

    /// Publish on the derived channel through the owning device's property table.
    pub fn property_set(&self, sample: Sample) -> Result<()> {
        self.device.property_set(self.derived.property(), sample)?;
        Ok(())
    }

    pub fn property_get(&self) -> Option<Sample> {
        self.derived.current()
    }

    /// Ask the source to refresh. A no-op for sources that cannot.
    pub fn property_refresh(&self) -> Result<()> {
        if self.source.perms().refresh {
            self.source.refresh()?;
        }
        Ok(())
    }

    /// Whether the derived channel currently holds `Bool(value)`.
    pub(crate) fn derived_is(&self, value: bool) -> bool {
        matches!(
            self.property_get().map(|s| s.value),
            Some(SampleValue::Bool(v)) if v == value
        )
    }

    pub(crate) fn numeric(&self, sample: &Sample) -> Result<f64> {
        sample.value.as_f64().ok_or_else(|| FilterError::NotNumeric {
            channel: self.source.name().to_string(),
            kind: sample.value.kind(),
        })
    }

    pub(crate) fn boolean(&self, sample: &Sample) -> Result<bool> {
        sample.value.as_bool().ok_or_else(|| FilterError::NotBoolean {
            channel: self.source.name().to_string(),
            kind: sample.value.kind(),
        })
    }
}

/// A live policy subscribed to its source channel.
pub struct Binding {
    channel: Arc<FilterChannel>,
}

impl Binding {
    /// Build the kind's policy, subscribe it to the source and run one
    /// catch-up pass on the source's current value. Catch-up failures are
    /// not reported.
    pub fn attach(
        channels: &Arc<dyn ChannelRegistry>,
        channel: Arc<FilterChannel>,
        kind: &dyn FilterKind,
    ) -> Self {
        let policy = Arc::new(Mutex::new(kind.create_policy(&channel)));

        let handler = {
            let channel = channel.clone();
            let policy = policy.clone();
            Arc::new(move |update: &ChannelUpdate| {
                if let Err(e) = dispatch(&channel, &policy, &update.sample) {
                    warn!(
                        source = channel.source().name(),
                        derived = channel.derived().name(),
                        error = %e,
                        "filter dropped sample"
                    );
                }
            })
        };
        channels.subscribe(channel.source().name(), handler);

        if let Some(sample) = channel.source().current() {
            if let Err(e) = dispatch(&channel, &policy, &sample) {
                debug!(source = channel.source().name(), error = %e, "catch-up skipped");
            }
        }

        Self { channel }
    }

    pub fn channel(&self) -> &Arc<FilterChannel> {
        &self.channel
    }
}

fn dispatch(
    channel: &FilterChannel,
    policy: &Mutex<Box<dyn Policy>>,
    sample: &Sample,
) -> Result<()> {
    let mut policy = policy.lock().unwrap_or_else(|p| p.into_inner());
    policy.receive(channel, sample)
}
