//! Simulated device drivers.
//!
//! Each simulated boiler publishes a `temperature` waveform and a `door_open`
//! flag. Channels are registered immediately, the device instance only after
//! a start-up delay, the way slow drivers come up.

use anyhow::Result;
use channel_registry::{
    ChannelRegistry, ChannelSpec, DeviceManager, Permissions, Sample, SampleValue, ValueKind,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SimConfig {
    pub devices: usize,
    pub tick: Duration,
    pub instance_delay: Duration,
}

struct SimBoiler {
    name: String,
    phase: f64,
    ticks: Arc<AtomicU64>,
}

impl SimBoiler {
    fn temperature_channel(&self) -> String {
        format!("{}.temperature", self.name)
    }

    fn door_channel(&self) -> String {
        format!("{}.door_open", self.name)
    }

    fn register(&self, channels: &Arc<dyn ChannelRegistry>) -> Result<()> {
        let weak: Weak<dyn ChannelRegistry> = Arc::downgrade(channels);
        let channel = self.temperature_channel();
        let ticks = self.ticks.clone();
        let phase = self.phase;
        let refresh = Arc::new(move || {
            let Some(channels) = weak.upgrade() else {
                return;
            };
            let t = ticks.load(Ordering::Relaxed);
            if let Err(e) = channels.sample_set(&channel, temperature_sample(t, phase)) {
                debug!(channel = %channel, error = %e, "refresh publish failed");
            }
        });
        channels.channel_add(
            &self.temperature_channel(),
            ChannelSpec::new(ValueKind::F64, Permissions::GET).with_refresh(refresh),
        )?;
        // Doors start closed.
        channels.channel_add(
            &self.door_channel(),
            ChannelSpec::new(ValueKind::Bool, Permissions::GET)
                .with_initial(Sample::now(SampleValue::Bool(false), "")),
        )?;
        Ok(())
    }

    fn tick(&self, channels: &dyn ChannelRegistry) -> Result<()> {
        let t = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        channels.sample_set(&self.temperature_channel(), temperature_sample(t, self.phase))?;
        // Door stays open for 8 ticks out of every 20.
        let open = (t + self.phase as u64) % 20 < 8;
        channels.sample_set(
            &self.door_channel(),
            Sample::now(SampleValue::Bool(open), ""),
        )?;
        Ok(())
    }
}

fn temperature_sample(t: u64, phase: f64) -> Sample {
    let value = 65.0 + 30.0 * ((t as f64) / 12.0 + phase).sin();
    Sample::now(SampleValue::F64((value * 10.0).round() / 10.0), "C")
}

/// Register every simulated channel, then spawn the instance registration
/// and publishing tasks.
pub fn spawn(
    config: SimConfig,
    channels: Arc<dyn ChannelRegistry>,
    devices: Arc<DeviceManager>,
) -> Result<JoinHandle<()>> {
    let boilers: Vec<SimBoiler> = (0..config.devices)
        .map(|i| SimBoiler {
            name: format!("boiler{}", i + 1),
            phase: i as f64 * 1.3,
            ticks: Arc::new(AtomicU64::new(0)),
        })
        .collect();
    for boiler in &boilers {
        boiler.register(&channels)?;
    }
    info!(devices = boilers.len(), "simulated channels registered");

    let names: Vec<String> = boilers.iter().map(|b| b.name.clone()).collect();
    let delay = config.instance_delay;
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        for name in names {
            if let Err(e) = devices.instance_add(&name) {
                warn!(device = %name, error = %e, "simulated instance not registered");
            }
        }
    });

    let tick = config.tick;
    Ok(tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        loop {
            interval.tick().await;
            for boiler in &boilers {
                if let Err(e) = boiler.tick(channels.as_ref()) {
                    warn!(device = %boiler.name, error = %e, "simulated publish failed");
                }
            }
        }
    }))
}
