use channel_registry::{RegistryError, ValueKind};
use thiserror::Error;

pub type Result<T, E = FilterError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid channel filter '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: &'static str },
    #[error("invalid setting '{field}': {reason}")]
    InvalidSetting { field: &'static str, reason: String },
    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),
    #[error("sample on {channel} is not numeric ({kind})")]
    NotNumeric { channel: String, kind: ValueKind },
    #[error("sample on {channel} is not boolean ({kind})")]
    NotBoolean { channel: String, kind: ValueKind },
    #[error("metrics error: {0}")]
    Metrics(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl FilterError {
    pub(crate) fn setting(field: &'static str, reason: impl Into<String>) -> Self {
        FilterError::InvalidSetting {
            field,
            reason: reason.into(),
        }
    }
}
