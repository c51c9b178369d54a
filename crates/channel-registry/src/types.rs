use serde::{Deserialize, Serialize};
use std::fmt;
use time::OffsetDateTime;

/// Value carried by a [`Sample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValue {
    Bool(bool),
    I64(i64),
    F64(f64),
    Text(String),
}

impl SampleValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            SampleValue::Bool(_) => ValueKind::Bool,
            SampleValue::I64(_) => ValueKind::I64,
            SampleValue::F64(_) => ValueKind::F64,
            SampleValue::Text(_) => ValueKind::Text,
        }
    }

    /// Numeric view of the value. Booleans count as 0/1, text never converts.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SampleValue::F64(v) => Some(*v),
            SampleValue::I64(v) => Some(*v as f64),
            SampleValue::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            SampleValue::Text(_) => None,
        }
    }

    /// Boolean view of the value. Numbers only convert when they are exactly 0 or 1.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SampleValue::Bool(b) => Some(*b),
            SampleValue::I64(0) => Some(false),
            SampleValue::I64(1) => Some(true),
            SampleValue::F64(v) if *v == 0.0 => Some(false),
            SampleValue::F64(v) if *v == 1.0 => Some(true),
            _ => None,
        }
    }
}

impl fmt::Display for SampleValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SampleValue::Bool(b) => write!(f, "{b}"),
            SampleValue::I64(v) => write!(f, "{v}"),
            SampleValue::F64(v) => write!(f, "{v}"),
            SampleValue::Text(s) => f.write_str(s),
        }
    }
}

/// Type tag of a channel; every sample stored in a channel must carry this kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Bool,
    I64,
    F64,
    Text,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ValueKind::Bool => "bool",
            ValueKind::I64 => "i64",
            ValueKind::F64 => "f64",
            ValueKind::Text => "text",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleStatus {
    #[default]
    Ok,
    Stale,
    Error,
}

/// One timestamped snapshot of a channel. Updates always produce a fresh sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub value: SampleValue,
    pub unit: String,
    #[serde(default)]
    pub status: SampleStatus,
}

impl Sample {
    pub fn new(timestamp: OffsetDateTime, value: SampleValue, unit: impl Into<String>) -> Self {
        Self {
            timestamp,
            value,
            unit: unit.into(),
            status: SampleStatus::Ok,
        }
    }

    /// Sample stamped with the current wall-clock time.
    pub fn now(value: SampleValue, unit: impl Into<String>) -> Self {
        Self::new(OffsetDateTime::now_utc(), value, unit)
    }
}

/// Permission mask of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub get: bool,
    pub set: bool,
    pub refresh: bool,
}

impl Permissions {
    pub const GET: Permissions = Permissions {
        get: true,
        set: false,
        refresh: false,
    };
    pub const GET_SET: Permissions = Permissions {
        get: true,
        set: true,
        refresh: false,
    };

    pub fn with_refresh(mut self, refresh: bool) -> Self {
        self.refresh = refresh;
        self
    }
}

/// Split `"device.property"` on its first `.`.
pub fn split_channel_name(name: &str) -> Option<(&str, &str)> {
    let (device, property) = name.split_once('.')?;
    if device.is_empty() || property.is_empty() {
        return None;
    }
    Some((device, property))
}
