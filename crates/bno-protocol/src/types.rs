//! Raw on-disk schema. Everything byte-valued is still a hex string here; the loader
//! turns this into a validated [`crate::ConfigRegistry`].

use serde::{Deserialize, Serialize};
use serial_transport::SerialSettings;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct StickConfigFile {
    #[serde(default)]
    #[cfg_attr(feature = "schema", schemars(with = "serde_json::Value"))]
    pub serial: SerialSettings,
    /// udev property keys identifying the stick, e.g. `ID_VENDOR_ID`.
    #[serde(default)]
    pub udev: BTreeMap<String, String>,
    pub bno055_page_0: BTreeMap<String, String>,
    #[serde(default)]
    pub bno055_page_1: BTreeMap<String, String>,
    pub board_information: CommandSpec,
    pub read_register: CommandSpec,
    pub write_register: CommandSpec,
    pub burst_read: CommandSpec,
    #[serde(default)]
    pub start_streaming: Vec<Vec<String>>,
    #[serde(default)]
    pub stop_streaming: Vec<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct CommandSpec {
    pub command: Vec<String>,
    #[serde(default)]
    pub params: Vec<ParamSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "schema", derive(schemars::JsonSchema))]
pub struct ParamSpec {
    pub description: String,
    #[serde(alias = "byte_offset")]
    pub idx: usize,
}

/// JSON schema of the config file.
#[cfg(feature = "schema")]
pub fn config_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(StickConfigFile)
}
