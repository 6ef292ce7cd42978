use std::fmt;
use std::path::{MAIN_SEPARATOR, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::event::StartMode;

/// Default `NetworkControl`: the server owns keyboard, joystick 2, devices
/// and resources; the client owns keyboard and joystick 1.
pub const DEFAULT_NETWORK_CONTROL: u32 = 0x1D | (0x03 << 8);

pub const DEFAULT_NETWORK_PORT: u16 = 6502;
pub const DEFAULT_FRAME_DELTA: u32 = 5;

/// Every resource name this store answers to.
pub const RESOURCE_NAMES: [&str; 9] = [
    "EventSnapshotDir",
    "EventStartSnapshot",
    "EventEndSnapshot",
    "EventStartMode",
    "NetworkServerName",
    "NetworkServerBindAddress",
    "NetworkServerPort",
    "NetworkFrameDelta",
    "NetworkControl",
];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("unknown resource '{0}'")]
    Unknown(String),
    #[error("resource '{name}' expects {expected}")]
    WrongType { name: String, expected: &'static str },
    #[error("value {value} is out of range for resource '{name}'")]
    OutOfRange { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResourceValue {
    Int(i32),
    Str(String),
}

impl fmt::Display for ResourceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

impl From<i32> for ResourceValue {
    fn from(value: i32) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for ResourceValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

/// Resource values the event and network subsystems read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    #[serde(rename = "EventSnapshotDir")]
    pub event_snapshot_dir: String,
    #[serde(rename = "EventStartSnapshot")]
    pub event_start_snapshot: String,
    #[serde(rename = "EventEndSnapshot")]
    pub event_end_snapshot: String,
    #[serde(rename = "EventStartMode")]
    pub event_start_mode: StartMode,
    #[serde(rename = "NetworkServerName")]
    pub network_server_name: String,
    #[serde(rename = "NetworkServerBindAddress")]
    pub network_server_bind_address: String,
    #[serde(rename = "NetworkServerPort")]
    pub network_server_port: u16,
    #[serde(rename = "NetworkFrameDelta")]
    pub network_frame_delta: u32,
    #[serde(rename = "NetworkControl")]
    pub network_control: u32,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            event_snapshot_dir: format!(".{MAIN_SEPARATOR}"),
            event_start_snapshot: "start.vsf".to_string(),
            event_end_snapshot: "end.vsf".to_string(),
            event_start_mode: StartMode::SaveSnapshot,
            network_server_name: "127.0.0.1".to_string(),
            network_server_bind_address: String::new(),
            network_server_port: DEFAULT_NETWORK_PORT,
            network_frame_delta: DEFAULT_FRAME_DELTA,
            network_control: DEFAULT_NETWORK_CONTROL,
        }
    }
}

fn ensure_trailing_separator(dir: &mut String) {
    if !dir.ends_with('/') && !dir.ends_with(MAIN_SEPARATOR) {
        dir.push(MAIN_SEPARATOR);
    }
}

fn expect_int(name: &str, value: &ResourceValue) -> Result<i32, ResourceError> {
    match value {
        ResourceValue::Int(v) => Ok(*v),
        ResourceValue::Str(_) => Err(ResourceError::WrongType {
            name: name.to_string(),
            expected: "an integer",
        }),
    }
}

fn expect_str(name: &str, value: ResourceValue) -> Result<String, ResourceError> {
    match value {
        ResourceValue::Str(s) => Ok(s),
        ResourceValue::Int(_) => Err(ResourceError::WrongType {
            name: name.to_string(),
            expected: "a string",
        }),
    }
}

fn out_of_range(name: &str, value: impl fmt::Display) -> ResourceError {
    ResourceError::OutOfRange {
        name: name.to_string(),
        value: value.to_string(),
    }
}

impl Resources {
    pub fn get(&self, name: &str) -> Result<ResourceValue, ResourceError> {
        Ok(match name {
            "EventSnapshotDir" => self.event_snapshot_dir.as_str().into(),
            "EventStartSnapshot" => self.event_start_snapshot.as_str().into(),
            "EventEndSnapshot" => self.event_end_snapshot.as_str().into(),
            "EventStartMode" => ResourceValue::Int(self.event_start_mode.into()),
            "NetworkServerName" => self.network_server_name.as_str().into(),
            "NetworkServerBindAddress" => self.network_server_bind_address.as_str().into(),
            "NetworkServerPort" => ResourceValue::Int(i32::from(self.network_server_port)),
            "NetworkFrameDelta" => ResourceValue::Int(self.network_frame_delta as i32),
            "NetworkControl" => ResourceValue::Int(self.network_control as i32),
            _ => return Err(ResourceError::Unknown(name.to_string())),
        })
    }

    /// Set a resource by name. Invalid values are rejected and leave the
    /// store unchanged.
    pub fn set(&mut self, name: &str, value: ResourceValue) -> Result<(), ResourceError> {
        match name {
            "EventSnapshotDir" => {
                let mut dir = expect_str(name, value)?;
                ensure_trailing_separator(&mut dir);
                self.event_snapshot_dir = dir;
            }
            "EventStartSnapshot" => self.event_start_snapshot = expect_str(name, value)?,
            "EventEndSnapshot" => self.event_end_snapshot = expect_str(name, value)?,
            "EventStartMode" => {
                let v = expect_int(name, &value)?;
                self.event_start_mode =
                    StartMode::try_from(v).map_err(|_| out_of_range(name, v))?;
            }
            "NetworkServerName" => self.network_server_name = expect_str(name, value)?,
            "NetworkServerBindAddress" => {
                self.network_server_bind_address = expect_str(name, value)?;
            }
            "NetworkServerPort" => {
                let v = expect_int(name, &value)?;
                self.network_server_port = u16::try_from(v)
                    .ok()
                    .filter(|port| *port >= 1024)
                    .ok_or_else(|| out_of_range(name, v))?;
            }
            "NetworkFrameDelta" => {
                let v = expect_int(name, &value)?;
                if v < 1 {
                    return Err(out_of_range(name, v));
                }
                self.network_frame_delta = v as u32;
            }
            "NetworkControl" => {
                let v = expect_int(name, &value)?;
                self.network_control = v as u32;
            }
            _ => return Err(ResourceError::Unknown(name.to_string())),
        }
        Ok(())
    }

    /// Check values that bypassed [`Resources::set`] (a deserialized file)
    /// and normalize the snapshot directory.
    pub fn sanitize(&mut self) -> Result<(), ResourceError> {
        ensure_trailing_separator(&mut self.event_snapshot_dir);
        if self.network_server_port < 1024 {
            return Err(out_of_range("NetworkServerPort", self.network_server_port));
        }
        if self.network_frame_delta < 1 {
            return Err(out_of_range("NetworkFrameDelta", self.network_frame_delta));
        }
        Ok(())
    }

    pub fn event_snapshot_dir(&self) -> PathBuf {
        PathBuf::from(&self.event_snapshot_dir)
    }

    pub fn event_start_snapshot_path(&self) -> PathBuf {
        self.event_snapshot_dir().join(&self.event_start_snapshot)
    }

    pub fn event_end_snapshot_path(&self) -> PathBuf {
        self.event_snapshot_dir().join(&self.event_end_snapshot)
    }
}
