//! Operating and recording modes

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{ProxyError, Result};

/// Whether traffic reaches the network and whether stored data is used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Forward unconditionally, no matching, no recording
    Disabled,
    /// Forward without recording
    #[default]
    Forward,
    /// Forward and record into the active pact
    Record,
    /// Serve stored responses, never touch the network
    Mock,
    /// Serve stored responses and check live requests against them
    Apply,
}

impl OperatingMode {
    /// Check if requests go upstream
    #[must_use]
    pub fn is_forwarding(self) -> bool {
        matches!(self, Self::Disabled | Self::Forward | Self::Record)
    }

    /// Check if responses come from the active pact
    #[must_use]
    pub fn is_replaying(self) -> bool {
        matches!(self, Self::Mock | Self::Apply)
    }

    /// Check if mode is Record
    #[must_use]
    pub fn is_record(self) -> bool {
        matches!(self, Self::Record)
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Forward => "forward",
            Self::Record => "record",
            Self::Mock => "mock",
            Self::Apply => "apply",
        }
    }
}

impl FromStr for OperatingMode {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disabled" => Ok(Self::Disabled),
            "forward" => Ok(Self::Forward),
            "record" | "recording" => Ok(Self::Record),
            "mock" => Ok(Self::Mock),
            "apply" => Ok(Self::Apply),
            other => Err(ProxyError::Config(format!("Unknown operating mode: {other}"))),
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a newly recorded exchange is merged into an existing pact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingMode {
    /// Append to the existing records
    #[default]
    Append,
    /// Drop existing records on the first write of a session
    Replace,
    /// Overwrite matching records in place, append the rest
    Refresh,
    /// Only record pacts that did not exist when the session started
    New,
}

impl RecordingMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Replace => "replace",
            Self::Refresh => "refresh",
            Self::New => "new",
        }
    }
}

impl FromStr for RecordingMode {
    type Err = ProxyError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            "refresh" => Ok(Self::Refresh),
            "new" => Ok(Self::New),
            other => Err(ProxyError::Config(format!("Unknown recording mode: {other}"))),
        }
    }
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The pair of modes governing a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modes {
    /// Operating mode
    pub mode: OperatingMode,
    /// Recording mode
    pub recording_mode: RecordingMode,
}

impl Modes {
    /// Create a mode pair
    #[must_use]
    pub fn new(mode: OperatingMode, recording_mode: RecordingMode) -> Self {
        Self {
            mode,
            recording_mode,
        }
    }

    /// Reject combinations that cannot serve requests
    ///
    /// # Errors
    ///
    /// Returns `Config` error for `apply` without a loaded pact
    pub fn validate(&self, has_pact: bool) -> Result<()> {
        if self.mode == OperatingMode::Apply && !has_pact {
            return Err(ProxyError::Config(
                "Mode 'apply' requires a loaded pact".to_string(),
            ));
        }
        Ok(())
    }
}
