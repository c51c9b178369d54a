//! channel-registry: named, typed, timestamped `device.property` channels
//!
//! Device drivers publish [`Sample`]s into a [`ChannelRegistry`]; subscribers
//! are notified synchronously on the publishing thread. The crate also carries
//! the device-instance registry and the cancellable [`Scheduler`] used by
//! services layered on top of the channels.

mod types;
pub use types::{
    split_channel_name, Permissions, Sample, SampleStatus, SampleValue, ValueKind,
};

mod error;
pub use error::{RegistryError, Result};

mod channel;
pub use channel::{Channel, ChannelSpec, RefreshFn};

mod registry;
pub use registry::{
    ChannelRegistry, ChannelUpdate, MemoryRegistry, NewChannelHandler, SubscriptionId,
    UpdateHandler,
};

mod devices;
pub use devices::{DeviceInstance, DeviceManager, InstanceRegistry};

pub mod scheduler;
pub use scheduler::{
    CancelToken, ManualScheduler, Scheduler, SchedulerError, Task, TokioScheduler,
};
