//! Request and response bodies of the HTTP interface

use serde::{Deserialize, Serialize};
use swarm_shared::{codec, Command, DeviceAddress, DispatchError};

/// A command given either by name (`"flip"`) or as a structured object
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    Name(String),
    Structured(Command),
}

impl CommandSpec {
    pub fn resolve(self) -> Result<Command, DispatchError> {
        match self {
            CommandSpec::Name(name) => Ok(codec::parse_command_name(&name)?),
            CommandSpec::Structured(command) => Ok(command),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    pub ips: Vec<DeviceAddress>,
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: CommandSpec,
    #[serde(default)]
    pub targets: Option<Vec<DeviceAddress>>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TargetsRequest {
    #[serde(default)]
    pub targets: Option<Vec<DeviceAddress>>,
}

/// Query string form: `?targets=a,b`
#[derive(Debug, Default, Deserialize)]
pub struct TargetsQuery {
    pub targets: Option<String>,
}

impl TargetsQuery {
    pub fn into_targets(self) -> Option<Vec<DeviceAddress>> {
        self.targets.map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(DeviceAddress::from)
                .collect()
        })
    }
}

#[derive(Debug, Serialize)]
pub struct ScanResponse {
    pub devices: Vec<DeviceAddress>,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub detail: String,
}
