use crate::ValueKind;
use thiserror::Error;

pub type Result<T, E = RegistryError> = core::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("channel already exists: {0}")]
    ChannelExists(String),
    #[error("invalid channel name: {0}")]
    InvalidName(String),
    #[error("device instance not found: {0}")]
    DeviceNotFound(String),
    #[error("device instance already exists: {0}")]
    DeviceExists(String),
    #[error("channel has no value yet: {0}")]
    NoValue(String),
    #[error("type mismatch on {channel}: expected {expected}, got {actual}")]
    TypeMismatch {
        channel: String,
        expected: ValueKind,
        actual: ValueKind,
    },
    #[error("channel is not refreshable: {0}")]
    NotRefreshable(String),
}
