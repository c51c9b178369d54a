use crate::{Permissions, RegistryError, Result, Sample, ValueKind};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Callback run when a refresh is requested on a channel.
pub type RefreshFn = Arc<dyn Fn() + Send + Sync>;

/// Shape of a channel to be added to a registry.
#[derive(Clone)]
pub struct ChannelSpec {
    pub kind: ValueKind,
    pub perms: Permissions,
    pub initial: Option<Sample>,
    pub refresh: Option<RefreshFn>,
    /// Names of the producers this channel was derived through, oldest first.
    pub lineage: Vec<String>,
}

impl ChannelSpec {
    pub fn new(kind: ValueKind, perms: Permissions) -> Self {
        Self {
            kind,
            perms,
            initial: None,
            refresh: None,
            lineage: Vec::new(),
        }
    }

    pub fn with_initial(mut self, sample: Sample) -> Self {
        self.initial = Some(sample);
        self
    }

    pub fn with_lineage(mut self, lineage: Vec<String>) -> Self {
        self.lineage = lineage;
        self
    }

    /// Install a refresh callback; also sets the refresh permission bit.
    pub fn with_refresh(mut self, refresh: RefreshFn) -> Self {
        self.perms.refresh = true;
        self.refresh = Some(refresh);
        self
    }
}

impl fmt::Debug for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSpec")
            .field("kind", &self.kind)
            .field("perms", &self.perms)
            .field("initial", &self.initial)
            .field("refresh", &self.refresh.is_some())
            .field("lineage", &self.lineage)
            .finish()
    }
}

/// A named, typed data cell owned by one device instance.
pub struct Channel {
    name: String,
    kind: ValueKind,
    perms: Permissions,
    current: RwLock<Option<Sample>>,
    refresh: Option<RefreshFn>,
    lineage: Vec<String>,
}

impl Channel {
    pub(crate) fn new(name: &str, spec: ChannelSpec) -> Self {
        Self {
            name: name.to_string(),
            kind: spec.kind,
            perms: spec.perms,
            current: RwLock::new(spec.initial),
            refresh: spec.refresh,
            lineage: spec.lineage,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn device(&self) -> &str {
        self.name.split_once('.').map(|(d, _)| d).unwrap_or(&self.name)
    }

    pub fn property(&self) -> &str {
        self.name.split_once('.').map(|(_, p)| p).unwrap_or("")
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn perms(&self) -> Permissions {
        self.perms
    }

    /// Empty for channels published by a driver.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }

    pub fn current(&self) -> Option<Sample> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Ask the owner to produce a fresh sample.
    pub fn refresh(&self) -> Result<()> {
        match (&self.refresh, self.perms.refresh) {
            (Some(refresh), true) => {
                refresh();
                Ok(())
            }
            _ => Err(RegistryError::NotRefreshable(self.name.clone())),
        }
    }

    pub(crate) fn store(&self, sample: Sample) -> Result<()> {
        let actual = sample.value.kind();
        if actual != self.kind {
            return Err(RegistryError::TypeMismatch {
                channel: self.name.clone(),
                expected: self.kind,
                actual,
            });
        }
        match self.current.write() {
            Ok(mut guard) => *guard = Some(sample),
            Err(poisoned) => *poisoned.into_inner() = Some(sample),
        }
        Ok(())
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("perms", &self.perms)
            .finish()
    }
}
