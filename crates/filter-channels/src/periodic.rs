use crate::binding::{FilterChannel, Policy};
use crate::factory::{DerivedShape, FilterKind};
use crate::{FilterError, Result};
use channel_registry::{CancelToken, Channel, Sample, SampleValue, Scheduler, ValueKind};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodicSettings {
    /// Seconds between re-assertions while the source stays triggered.
    pub interval: f64,
    #[serde(default = "default_trigger_value")]
    pub trigger_value: bool,
}

fn default_trigger_value() -> bool {
    true
}

impl PeriodicSettings {
    /// The heartbeat interval, or an error unless it is more than one second
    /// and representable as a [`Duration`].
    pub fn interval(&self) -> Result<Duration> {
        if self.interval.is_nan() || self.interval <= 1.0 {
            return Err(FilterError::setting(
                "interval",
                format!("must be greater than 1.0 seconds, got {}", self.interval),
            ));
        }
        Duration::try_from_secs_f64(self.interval).map_err(|e| {
            FilterError::setting("interval", format!("{} seconds: {e}", self.interval))
        })
    }

    pub fn validate(&self) -> Result<()> {
        self.interval().map(|_| ())
    }
}

pub struct PeriodicKind {
    trigger: bool,
    interval: Duration,
    scheduler: Arc<dyn Scheduler>,
}

impl PeriodicKind {
    pub fn new(settings: PeriodicSettings, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        Ok(Self {
            trigger: settings.trigger_value,
            interval: settings.interval()?,
            scheduler,
        })
    }
}

impl FilterKind for PeriodicKind {
    fn kind_name(&self) -> &'static str {
        "periodic_alarm_sampler"
    }

    fn derived_shape(&self, source: &Channel) -> DerivedShape {
        DerivedShape::fixed(ValueKind::Bool, source)
    }

    fn create_policy(&self, channel: &Arc<FilterChannel>) -> Box<dyn Policy> {
        Box::new(PeriodicSampler {
            heartbeat: Arc::new(Heartbeat {
                trigger: self.trigger,
                interval: self.interval,
                scheduler: self.scheduler.clone(),
                channel: channel.clone(),
                timer: Mutex::new(Timer::default()),
            }),
        })
    }
}

/// `generation` advances on every cancel and reschedule, so a callback can
/// tell whether it is still the current timer.
#[derive(Default)]
struct Timer {
    pending: Option<(CancelToken, u64)>,
    generation: u64,
}

/// Timer state shared between the sample path and scheduler callbacks.
/// At most one heartbeat is outstanding per binding.
struct Heartbeat {
    trigger: bool,
    interval: Duration,
    scheduler: Arc<dyn Scheduler>,
    channel: Arc<FilterChannel>,
    timer: Mutex<Timer>,
}

impl Heartbeat {
    fn lock(&self) -> MutexGuard<'_, Timer> {
        self.timer.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn cancel_pending(&self, timer: &mut Timer) {
        timer.generation += 1;
        if let Some((token, _)) = timer.pending.take() {
            if let Err(e) = self.scheduler.cancel(token) {
                debug!(derived = self.channel.derived().name(), error = %e, "heartbeat already fired");
            }
        }
    }

    fn reschedule(self: &Arc<Self>, timer: &mut Timer) {
        self.cancel_pending(timer);
        let generation = timer.generation;
        let weak: Weak<Self> = Arc::downgrade(self);
        let token = self.scheduler.after(
            self.interval,
            Box::new(move || {
                if let Some(heartbeat) = weak.upgrade() {
                    heartbeat.fire(generation);
                }
            }),
        );
        timer.pending = Some((token, generation));
    }

    fn fire(self: &Arc<Self>, generation: u64) {
        {
            let mut timer = self.lock();
            if !matches!(timer.pending, Some((_, g)) if g == generation) {
                debug!(derived = self.channel.derived().name(), "superseded heartbeat ignored");
                return;
            }
            timer.pending = None;
        }

        // Subscribers of the derived channel run here, outside the timer lock.
        let sample = Sample::now(SampleValue::Bool(self.trigger), "");
        if let Err(e) = self.channel.property_set(sample) {
            warn!(derived = self.channel.derived().name(), error = %e, "heartbeat not published");
        }

        let mut timer = self.lock();
        if timer.generation != generation {
            debug!(derived = self.channel.derived().name(), "heartbeat cancelled while publishing");
            return;
        }
        self.reschedule(&mut timer);
    }
}

/// Re-publishes the trigger value every `interval` while the source stays
/// at it, for sources that only publish on change.
pub struct PeriodicSampler {
    heartbeat: Arc<Heartbeat>,
}

impl Policy for PeriodicSampler {
    fn receive(&mut self, channel: &FilterChannel, sample: &Sample) -> Result<()> {
        let value = channel.boolean(sample)?;
        let heartbeat = &self.heartbeat;
        if value == heartbeat.trigger {
            channel.property_set(Sample::new(
                sample.timestamp,
                SampleValue::Bool(heartbeat.trigger),
                "",
            ))?;
            let mut timer = heartbeat.lock();
            heartbeat.reschedule(&mut timer);
        } else {
            let mut timer = heartbeat.lock();
            heartbeat.cancel_pending(&mut timer);
        }
        Ok(())
    }
}
