//! Two-part glob filters of the form `device_glob.property_glob`.
//!
//! Each half holds at most one `*`. A half with no wildcard must equal the
//! candidate exactly; a half with one wildcard matches when the candidate
//! starts with the text before the `*` and ends with the text after it.
//!
//! Derived channels are named with a leading `_`. A filter that starts with
//! `*` on either side never matches a property beginning with `_`, so broad
//! filters such as `*.*` or `*._alarm` do not feed on derived output. Name the
//! device explicitly (`dev._*`, `boiler*._alarm`) to filter derived channels.

use crate::{FilterError, Result};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Glob {
    Exact(String),
    Wildcard { prefix: String, suffix: String },
}

impl Glob {
    fn parse(part: &str) -> Option<Self> {
        let part = if part.is_empty() { "*" } else { part };
        let mut pieces = part.split('*');
        let prefix = pieces.next().unwrap_or_default();
        match (pieces.next(), pieces.next()) {
            (None, _) => Some(Glob::Exact(prefix.to_string())),
            (Some(suffix), None) => Some(Glob::Wildcard {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }),
            (Some(_), Some(_)) => None,
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            Glob::Exact(s) => s == candidate,
            Glob::Wildcard { prefix, suffix } => {
                candidate.starts_with(prefix.as_str()) && candidate.ends_with(suffix.as_str())
            }
        }
    }

    fn leading_wildcard(&self) -> bool {
        matches!(self, Glob::Wildcard { prefix, .. } if prefix.is_empty())
    }
}

/// A parsed `device_glob.property_glob` filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    pattern: String,
    device: Glob,
    property: Glob,
}

impl ChannelFilter {
    /// Parse a filter. Missing halves default to `*`; a half with two or more
    /// wildcards is rejected.
    pub fn parse(pattern: &str) -> Result<Self> {
        let (device, property) = pattern.split_once('.').unwrap_or((pattern, "*"));
        let invalid = || FilterError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: "at most one '*' is allowed on each side of the '.'",
        };
        Ok(Self {
            pattern: pattern.to_string(),
            device: Glob::parse(device).ok_or_else(invalid)?,
            property: Glob::parse(property).ok_or_else(invalid)?,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.pattern
    }

    /// Test a `device.property` channel name against this filter.
    pub fn matches(&self, channel: &str) -> bool {
        let Some((device, property)) = channel.split_once('.') else {
            return false;
        };
        let broad = self.device.leading_wildcard() || self.property.leading_wildcard();
        if broad && property.starts_with('_') {
            return false;
        }
        self.device.matches(device) && self.property.matches(property)
    }
}

impl Default for ChannelFilter {
    fn default() -> Self {
        Self {
            pattern: "*.*".to_string(),
            device: Glob::Wildcard {
                prefix: String::new(),
                suffix: String::new(),
            },
            property: Glob::Wildcard {
                prefix: String::new(),
                suffix: String::new(),
            },
        }
    }
}

impl FromStr for ChannelFilter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for ChannelFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

/// One-shot match of a raw pattern. Invalid patterns are logged and never match.
pub fn filter_matches(pattern: &str, channel: &str) -> bool {
    match ChannelFilter::parse(pattern) {
        Ok(filter) => filter.matches(channel),
        Err(e) => {
            tracing::error!(error = %e, "ignoring invalid channel filter");
            false
        }
    }
}
