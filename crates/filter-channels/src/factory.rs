//! Filter channel factories.
//!
//! A factory watches the channel registry for channels matching its filter,
//! creates one derived channel per match on the source's own device and binds
//! a policy to the pair. Matches are picked up from an initial scan on
//! [`FilterFactory::start`] and from new-channel notifications afterwards.
//!
//! Creating a derived channel needs the source's device instance. Drivers can
//! publish channels before their instance is registered, so a missing instance
//! is retried on the scheduler a bounded number of times before the source is
//! given up on.

use crate::binding::{Binding, FilterChannel, Policy};
use crate::config::{FactoryConfig, PolicyConfig, RetryConfig};
use crate::metrics::FilterMetrics;
use crate::{average, bool_alarm, hysteresis, periodic, threshold};
use crate::{ChannelFilter, FilterError, Result, Services};
use channel_registry::{
    split_channel_name, CancelToken, Channel, ChannelSpec, DeviceInstance, Permissions,
    RegistryError, SubscriptionId, ValueKind,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Type and permissions of a derived channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DerivedShape {
    pub kind: ValueKind,
    pub perms: Permissions,
}

impl DerivedShape {
    /// Same type as the source, gettable and settable, refreshable iff the source is.
    pub fn mirror(source: &Channel) -> Self {
        Self {
            kind: source.kind(),
            perms: Permissions::GET_SET.with_refresh(source.perms().refresh),
        }
    }

    pub fn fixed(kind: ValueKind, source: &Channel) -> Self {
        Self {
            kind,
            ..Self::mirror(source)
        }
    }
}

/// The policy-specific half of a factory.
pub trait FilterKind: Send + Sync {
    fn kind_name(&self) -> &'static str;

    fn derived_shape(&self, source: &Channel) -> DerivedShape {
        DerivedShape::mirror(source)
    }

    fn create_policy(&self, channel: &Arc<FilterChannel>) -> Box<dyn Policy>;
}

pub(crate) fn build_kind(
    policy: &PolicyConfig,
    services: &Services,
) -> Result<Box<dyn FilterKind>> {
    let kind: Box<dyn FilterKind> = match policy {
        PolicyConfig::Threshold(s) => Box::new(threshold::ThresholdKind::new(s.clone())),
        PolicyConfig::ThresholdBoolAlarm(s) => Box::new(bool_alarm::BoolAlarmKind::new(s.clone())),
        PolicyConfig::ThresholdAlarmWithHysteresis(s) => {
            Box::new(hysteresis::HysteresisKind::new(s.clone()))
        }
        PolicyConfig::PeriodicAlarmSampler(s) => Box::new(periodic::PeriodicKind::new(
            s.clone(),
            services.scheduler.clone(),
        )?),
        PolicyConfig::SampleAverage(s) => Box::new(average::AverageKind::new(s.clone())),
    };
    Ok(kind)
}

/// What one run of the create routine did for a source channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// A derived channel was created and a policy bound to it.
    Bound { derived: String },
    /// This factory already filters the source.
    AlreadyBound,
    /// A retry for the source is already scheduled.
    Pending,
    /// The candidate is one of this factory's own derived channels, or was
    /// derived through this factory further up its lineage.
    Skipped,
    /// The derived name is already taken by another channel.
    Conflict { derived: String },
    /// The device instance is not registered yet; a retry was scheduled.
    Deferred { attempts_left: u32 },
    /// Retries are exhausted; the source will not be filtered.
    Abandoned,
}

enum BindingState {
    Creating,
    Pending { attempt: u64, token: CancelToken },
    Bound(Binding),
    Abandoned,
}

enum Step {
    Bound(Binding),
    Conflict,
    MissingInstance,
}

#[derive(Default)]
struct FactoryState {
    new_channels: Option<SubscriptionId>,
    bindings: HashMap<String, BindingState>,
    owned: HashSet<String>,
}

struct FactoryInner {
    name: String,
    filter: ChannelFilter,
    name_override: Option<String>,
    kind: Box<dyn FilterKind>,
    retry: RetryConfig,
    retry_delay: Duration,
    services: Services,
    metrics: FilterMetrics,
    next_attempt: AtomicU64,
    state: Mutex<FactoryState>,
}

/// Lifecycle manager for one filter rule.
#[derive(Clone)]
pub struct FilterFactory {
    inner: Arc<FactoryInner>,
}

impl FilterFactory {
    pub fn new(
        config: &FactoryConfig,
        retry: RetryConfig,
        services: Services,
        metrics: FilterMetrics,
    ) -> Result<Self> {
        let filter = config.validate()?;
        let retry_delay = retry.delay()?;
        let kind = build_kind(&config.policy, &services)?;
        Ok(Self {
            inner: Arc::new(FactoryInner {
                name: config.name.clone(),
                filter,
                name_override: config
                    .channel_name_override
                    .clone()
                    .filter(|s| !s.is_empty()),
                kind,
                retry,
                retry_delay,
                services,
                metrics,
                next_attempt: AtomicU64::new(1),
                state: Mutex::new(FactoryState::default()),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn filter(&self) -> &ChannelFilter {
        &self.inner.filter
    }

    pub fn kind_name(&self) -> &'static str {
        self.inner.kind.kind_name()
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().new_channels.is_some()
    }

    /// Subscribe to new channels and bind every channel already registered
    /// that matches. Returns the number of sources bound by the scan.
    pub fn start(&self) -> usize {
        self.inner.start()
    }

    /// Stop watching for new channels and cancel pending retries. Bound
    /// policies and their derived channels stay in place.
    pub fn stop(&self) {
        self.inner.stop()
    }

    /// Run the create routine for one source channel.
    pub fn add_filter_channel(&self, name: &str) -> Result<AddOutcome> {
        self.inner.add_filter_channel(name, self.inner.retry.attempts)
    }

    /// Entry point for new-channel notifications.
    pub fn new_channel_added(&self, name: &str) {
        self.inner.new_channel_added(name)
    }

    /// Forward a refresh request to every bound source.
    pub fn refresh_all(&self) {
        self.inner.refresh_all()
    }

    pub fn derived_property_name(&self, source_property: &str) -> String {
        self.inner.derived_property_name(source_property)
    }

    /// `(source, derived)` channel names of every bound policy, sorted by source.
    pub fn bindings(&self) -> Vec<(String, String)> {
        let state = self.inner.lock();
        let mut out: Vec<(String, String)> = state
            .bindings
            .iter()
            .filter_map(|(source, b)| match b {
                BindingState::Bound(binding) => Some((
                    source.clone(),
                    binding.channel().derived().name().to_string(),
                )),
                _ => None,
            })
            .collect();
        out.sort();
        out
    }
}

impl FactoryInner {
    fn lock(&self) -> MutexGuard<'_, FactoryState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn derived_property_name(&self, source_property: &str) -> String {
        match &self.name_override {
            Some(name) => format!("_{name}"),
            None => format!("_{source_property}_{}", self.name),
        }
    }

    fn start(self: &Arc<Self>) -> usize {
        {
            let mut state = self.lock();
            if state.new_channels.is_some() {
                debug!(factory = %self.name, "factory already running");
                return 0;
            }
            let weak: Weak<Self> = Arc::downgrade(self);
            let id = self
                .services
                .channels
                .subscribe_new_channels(Arc::new(move |name: &str| {
                    if let Some(inner) = weak.upgrade() {
                        inner.new_channel_added(name);
                    }
                }));
            state.new_channels = Some(id);
        }

        let mut bound = 0;
        for name in self.services.channels.channel_list() {
            if !self.filter.matches(&name) {
                continue;
            }
            match self.add_filter_channel(&name, self.retry.attempts) {
                Ok(AddOutcome::Bound { .. }) => bound += 1,
                Ok(_) => {}
                Err(e) => warn!(factory = %self.name, channel = %name, error = %e, "filter channel not created"),
            }
        }
        info!(
            factory = %self.name,
            filter = %self.filter,
            kind = self.kind.kind_name(),
            bound,
            "filter factory started"
        );
        bound
    }

    fn stop(&self) {
        let (subscription, pending) = {
            let mut state = self.lock();
            let pending: Vec<CancelToken> = state
                .bindings
                .values()
                .filter_map(|b| match b {
                    BindingState::Pending { token, .. } => Some(*token),
                    _ => None,
                })
                .collect();
            state.bindings.retain(|_, b| {
                matches!(b, BindingState::Bound(_) | BindingState::Creating)
            });
            (state.new_channels.take(), pending)
        };
        if let Some(id) = subscription {
            self.services.channels.unsubscribe_new_channels(id);
        }
        for token in pending {
            if let Err(e) = self.services.scheduler.cancel(token) {
                debug!(factory = %self.name, error = %e, "retry already fired");
            }
        }
        info!(factory = %self.name, "filter factory stopped");
    }

    fn new_channel_added(self: &Arc<Self>, name: &str) {
        if !self.filter.matches(name) {
            return;
        }
        if let Err(e) = self.add_filter_channel(name, self.retry.attempts) {
            warn!(factory = %self.name, channel = %name, error = %e, "filter channel not created");
        }
    }

    fn add_filter_channel(self: &Arc<Self>, name: &str, retries: u32) -> Result<AddOutcome> {
        let (device_name, property) = split_channel_name(name)
            .ok_or_else(|| FilterError::InvalidChannelName(name.to_string()))?;
        let derived_property = self.derived_property_name(property);
        let derived_name = format!("{device_name}.{derived_property}");

        let lineage = self.lineage_of(name);
        if lineage.contains(&self.name) {
            if lineage.last() == Some(&self.name) {
                debug!(factory = %self.name, channel = %name, "own derived channel skipped");
            } else {
                warn!(
                    factory = %self.name,
                    channel = %name,
                    lineage = ?lineage,
                    "source was derived through this factory, skipped"
                );
            }
            return Ok(AddOutcome::Skipped);
        }

        let newly_owned = {
            let mut state = self.lock();
            if state.owned.contains(name) {
                return Ok(AddOutcome::Skipped);
            }
            match state.bindings.get(name) {
                Some(BindingState::Bound(_)) | Some(BindingState::Creating) => {
                    debug!(factory = %self.name, channel = %name, "source already filtered");
                    return Ok(AddOutcome::AlreadyBound);
                }
                Some(BindingState::Pending { .. }) => return Ok(AddOutcome::Pending),
                Some(BindingState::Abandoned) => return Ok(AddOutcome::Abandoned),
                None => {}
            }
            state
                .bindings
                .insert(name.to_string(), BindingState::Creating);
            // Claimed before the channel exists so its own creation notice is skipped.
            state.owned.insert(derived_name.clone())
        };

        let step = self.bind(name, device_name, &derived_property, &derived_name);

        let mut state = self.lock();
        if newly_owned && !matches!(step, Ok(Step::Bound(_))) {
            state.owned.remove(&derived_name);
        }
        match step {
            Err(e) => {
                state.bindings.remove(name);
                Err(e)
            }
            Ok(Step::Bound(binding)) => {
                state
                    .bindings
                    .insert(name.to_string(), BindingState::Bound(binding));
                self.metrics.channels_created.inc();
                self.metrics.bindings_active.inc();
                info!(factory = %self.name, source = %name, derived = %derived_name, "filter channel bound");
                Ok(AddOutcome::Bound {
                    derived: derived_name,
                })
            }
            Ok(Step::Conflict) => {
                state.bindings.remove(name);
                self.metrics.name_conflicts.inc();
                warn!(factory = %self.name, source = %name, derived = %derived_name, "derived channel already exists");
                Ok(AddOutcome::Conflict {
                    derived: derived_name,
                })
            }
            Ok(Step::MissingInstance) if retries > 0 => {
                let attempts_left = retries - 1;
                let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                let weak = Arc::downgrade(self);
                let source = name.to_string();
                let token = self.services.scheduler.after(
                    self.retry_delay,
                    Box::new(move || {
                        if let Some(inner) = weak.upgrade() {
                            inner.retry(&source, attempt, attempts_left);
                        }
                    }),
                );
                state
                    .bindings
                    .insert(name.to_string(), BindingState::Pending { attempt, token });
                self.metrics.retries_scheduled.inc();
                warn!(
                    factory = %self.name,
                    device = %device_name,
                    source = %name,
                    attempts_left,
                    "device instance not registered, retry scheduled"
                );
                Ok(AddOutcome::Deferred { attempts_left })
            }
            Ok(Step::MissingInstance) => {
                state
                    .bindings
                    .insert(name.to_string(), BindingState::Abandoned);
                self.metrics.channels_abandoned.inc();
                error!(
                    factory = %self.name,
                    device = %device_name,
                    source = %name,
                    "device instance never registered, filter channel abandoned"
                );
                Ok(AddOutcome::Abandoned)
            }
        }
    }

    /// Producers `name` was derived through. Unknown channels have none and
    /// are left for the create routine to report.
    fn lineage_of(&self, name: &str) -> Vec<String> {
        self.services
            .channels
            .channel_get(name)
            .map(|source| source.lineage().to_vec())
            .unwrap_or_default()
    }

    fn bind(
        self: &Arc<Self>,
        name: &str,
        device_name: &str,
        derived_property: &str,
        derived_name: &str,
    ) -> Result<Step> {
        let channels = &self.services.channels;
        if channels.channel_exists(derived_name) {
            return Ok(Step::Conflict);
        }
        let device = match self.services.instances.instance_get(device_name) {
            Ok(device) => device,
            Err(RegistryError::DeviceNotFound(_)) => return Ok(Step::MissingInstance),
            Err(e) => return Err(e.into()),
        };
        let source = channels.channel_get(name)?;
        let derived = match self.physically_create(&device, &source, derived_property) {
            Ok(derived) => derived,
            Err(RegistryError::ChannelExists(_)) => return Ok(Step::Conflict),
            Err(e) => return Err(e.into()),
        };
        let channel = Arc::new(FilterChannel::new(source, derived, device));
        Ok(Step::Bound(Binding::attach(
            channels,
            channel,
            self.kind.as_ref(),
        )))
    }

    fn physically_create(
        self: &Arc<Self>,
        device: &DeviceInstance,
        source: &Channel,
        derived_property: &str,
    ) -> channel_registry::Result<Arc<Channel>> {
        let shape = self.kind.derived_shape(source);
        let mut lineage = source.lineage().to_vec();
        lineage.push(self.name.clone());
        let mut spec = ChannelSpec::new(shape.kind, shape.perms).with_lineage(lineage);
        if shape.perms.refresh {
            let weak = Arc::downgrade(self);
            spec = spec.with_refresh(Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.refresh_all();
                }
            }));
        }
        device.add_property(derived_property, spec)
    }

    fn retry(self: &Arc<Self>, name: &str, attempt: u64, attempts_left: u32) {
        let due = {
            let mut state = self.lock();
            match state.bindings.get(name) {
                Some(BindingState::Pending { attempt: a, .. }) if *a == attempt => {
                    state.bindings.remove(name);
                    true
                }
                _ => false,
            }
        };
        if !due {
            debug!(factory = %self.name, source = %name, "stale retry ignored");
            return;
        }
        if let Err(e) = self.add_filter_channel(name, attempts_left) {
            warn!(factory = %self.name, source = %name, error = %e, "retry failed");
        }
    }

    fn refresh_all(&self) {
        let channels: Vec<Arc<FilterChannel>> = self
            .lock()
            .bindings
            .values()
            .filter_map(|b| match b {
                BindingState::Bound(binding) => Some(binding.channel().clone()),
                _ => None,
            })
            .collect();
        for channel in channels {
            if let Err(e) = channel.property_refresh() {
                debug!(factory = %self.name, source = channel.source().name(), error = %e, "refresh failed");
            }
        }
    }
}
