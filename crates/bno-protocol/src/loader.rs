use crate::types::{CommandSpec, StickConfigFile};
use crate::{CommandTemplate, ConfigError, ParamSlot};
use serial_transport::{SerialSettings, UsbMatch};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, info};

const BUILTIN_CONFIG: &str = include_str!("../config/bno055.json");

/// Name <-> address table for one register page.
///
/// Names are unique by construction and addresses are checked for uniqueness at load, so
/// the two lookups are inverses of each other.
#[derive(Debug, Default, Clone)]
pub struct RegisterMap {
    by_name: BTreeMap<String, u8>,
    by_address: BTreeMap<u8, String>,
}

impl RegisterMap {
    pub fn from_pairs(
        section: &'static str,
        pairs: impl IntoIterator<Item = (String, u8)>,
    ) -> Result<Self, ConfigError> {
        let mut map = RegisterMap::default();
        for (name, address) in pairs {
            if let Some(first) = map.by_address.get(&address) {
                return Err(ConfigError::DuplicateAddress {
                    section,
                    address,
                    first: first.clone(),
                    second: name,
                });
            }
            map.by_address.insert(address, name.clone());
            map.by_name.insert(name, address);
        }
        Ok(map)
    }

    pub fn address(&self, name: &str) -> Option<u8> {
        self.by_name.get(name).copied()
    }

    /// Reverse lookup; `None` when no register lives at `address`.
    pub fn name(&self, address: u8) -> Option<&str> {
        self.by_address.get(&address).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.by_name.iter().map(|(n, a)| (n.as_str(), *a))
    }
}

/// Immutable protocol description for one stick, validated once at load.
#[derive(Debug, Clone)]
pub struct ConfigRegistry {
    serial: SerialSettings,
    udev: BTreeMap<String, String>,
    page0: RegisterMap,
    page1: RegisterMap,
    board_information: CommandTemplate,
    read_register: CommandTemplate,
    write_register: CommandTemplate,
    burst_read: CommandTemplate,
    start_streaming: Vec<Vec<u8>>,
    stop_streaming: Vec<Vec<u8>>,
}

impl ConfigRegistry {
    /// The config shipped with this crate.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json_str(BUILTIN_CONFIG)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let file: StickConfigFile = serde_json::from_str(raw)?;
        Self::from_raw(file)
    }

    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: StickConfigFile = serde_yaml::from_str(raw)?;
        Self::from_raw(file)
    }

    pub fn from_raw(file: StickConfigFile) -> Result<Self, ConfigError> {
        file.serial
            .read_timeout()
            .map_err(|e| ConfigError::InvalidSetting {
                key: "serial.timeout",
                reason: e.to_string(),
            })?;
        let page0 = register_page("bno055_page_0", &file.bno055_page_0)?;
        let page1 = register_page("bno055_page_1", &file.bno055_page_1)?;
        let reg = ConfigRegistry {
            serial: file.serial,
            udev: file.udev,
            page0,
            page1,
            board_information: command_template("board_information", &file.board_information)?,
            read_register: command_template("read_register", &file.read_register)?,
            write_register: command_template("write_register", &file.write_register)?,
            burst_read: command_template("burst_read", &file.burst_read)?,
            start_streaming: frame_sequence("start_streaming", &file.start_streaming)?,
            stop_streaming: frame_sequence("stop_streaming", &file.stop_streaming)?,
        };
        info!(
            page0 = reg.page0.len(),
            page1 = reg.page1.len(),
            start_frames = reg.start_streaming.len(),
            stop_frames = reg.stop_streaming.len(),
            "stick config loaded"
        );
        Ok(reg)
    }

    pub fn template(&self, name: &str) -> Result<&CommandTemplate, ConfigError> {
        match name {
            "board_information" => Ok(&self.board_information),
            "read_register" => Ok(&self.read_register),
            "write_register" => Ok(&self.write_register),
            "burst_read" => Ok(&self.burst_read),
            other => Err(ConfigError::UnknownTemplate(other.to_string())),
        }
    }

    /// Page-0 address of `name`.
    pub fn register_address(&self, name: &str) -> Option<u8> {
        self.page0.address(name)
    }

    /// Page-0 register living at `address`.
    pub fn register_name(&self, address: u8) -> Option<&str> {
        self.page0.name(address)
    }

    pub fn page0(&self) -> &RegisterMap {
        &self.page0
    }

    pub fn page1(&self) -> &RegisterMap {
        &self.page1
    }

    pub fn board_information(&self) -> &CommandTemplate {
        &self.board_information
    }

    pub fn read_register(&self) -> &CommandTemplate {
        &self.read_register
    }

    pub fn write_register(&self) -> &CommandTemplate {
        &self.write_register
    }

    pub fn burst_read(&self) -> &CommandTemplate {
        &self.burst_read
    }

    pub fn start_streaming(&self) -> &[Vec<u8>] {
        &self.start_streaming
    }

    pub fn stop_streaming(&self) -> &[Vec<u8>] {
        &self.stop_streaming
    }

    pub fn serial(&self) -> &SerialSettings {
        &self.serial
    }

    pub fn udev(&self) -> &BTreeMap<String, String> {
        &self.udev
    }

    /// Autodetect rule derived from the `udev` section.
    pub fn usb_match(&self) -> UsbMatch {
        UsbMatch::from_udev(&self.udev)
    }
}

/// Load a config file; `.yaml`/`.yml` are parsed as YAML, anything else as JSON.
pub fn load_config_file(path: impl AsRef<Path>) -> Result<ConfigRegistry, ConfigError> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), bytes = raw.len(), "read stick config");
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => ConfigRegistry::from_yaml_str(&raw),
        Some("json") | None => ConfigRegistry::from_json_str(&raw),
        Some(other) => Err(ConfigError::Format(other.to_string())),
    }
}

/// Parse `"0x2A"`, `"0X2a"` or `"2A"` into a byte.
pub fn parse_hex_u8(s: &str) -> Option<u8> {
    let t = s.trim();
    let hex = t
        .strip_prefix("0x")
        .or_else(|| t.strip_prefix("0X"))
        .unwrap_or(t);
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

fn register_page(
    section: &'static str,
    raw: &BTreeMap<String, String>,
) -> Result<RegisterMap, ConfigError> {
    let mut pairs = Vec::with_capacity(raw.len());
    for (name, value) in raw {
        let address = parse_hex_u8(value).ok_or_else(|| ConfigError::InvalidHex {
            section,
            key: name.clone(),
            value: value.clone(),
        })?;
        pairs.push((name.clone(), address));
    }
    RegisterMap::from_pairs(section, pairs)
}

fn hex_bytes(section: &'static str, key: &str, raw: &[String]) -> Result<Vec<u8>, ConfigError> {
    raw.iter()
        .enumerate()
        .map(|(i, v)| {
            parse_hex_u8(v).ok_or_else(|| ConfigError::InvalidHex {
                section,
                key: format!("{key}[{i}]"),
                value: v.clone(),
            })
        })
        .collect()
}

fn command_template(
    section: &'static str,
    spec: &CommandSpec,
) -> Result<CommandTemplate, ConfigError> {
    let bytes = hex_bytes(section, "command", &spec.command)?;
    let slots = spec
        .params
        .iter()
        .map(|p| ParamSlot {
            description: p.description.clone(),
            offset: p.idx,
        })
        .collect();
    CommandTemplate::new(section, bytes, slots)
}

fn frame_sequence(section: &'static str, raw: &[Vec<String>]) -> Result<Vec<Vec<u8>>, ConfigError> {
    raw.iter()
        .enumerate()
        .map(|(i, frame)| hex_bytes(section, &format!("[{i}]"), frame))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"{
        "bno055_page_0": {"CHIP_ID_ADDR": "0x00", "ACC_DATA_X_LSB_ADDR": "0x08"},
        "board_information": {"command": ["0xAA", "0x0D", "0x0A"]},
        "read_register": {"command": ["0xAA", "0x00", "0x0D", "0x0A"],
                          "params": [{"description": "reg_addr", "idx": 1}]},
        "write_register": {"command": ["0xAA", "0x00", "0x00", "0x0D", "0x0A"],
                           "params": [{"description": "reg_addr", "idx": 1},
                                      {"description": "reg_val", "idx": 2}]},
        "burst_read": {"command": ["0xAA", "0x00", "0x00", "0x00", "0x0D", "0x0A"]},
        "start_streaming": [["0xAA", "0x01", "0x0D", "0x0A"]]
    }"#;

    #[test]
    fn test_builtin_config_loads() {
        let reg = ConfigRegistry::builtin().unwrap();
        assert_eq!(reg.register_address("CHIP_ID_ADDR"), Some(0x00));
        assert_eq!(reg.register_name(0x3D), Some("OPR_MODE_ADDR"));
        assert_eq!(reg.page1().address("PAGE_ID_ADDR"), Some(0x07));
        assert!(!reg.start_streaming().is_empty());
        assert!(!reg.stop_streaming().is_empty());
        assert_eq!(reg.serial().baudrate, 115_200);
        assert!(!reg.usb_match().is_empty());
    }

    #[test]
    fn test_lookups_are_inverse() {
        let reg = ConfigRegistry::builtin().unwrap();
        for (name, address) in reg.page0().iter() {
            assert_eq!(reg.register_name(address), Some(name));
            assert_eq!(reg.register_address(name), Some(address));
        }
        assert_eq!(reg.register_name(0xFF), None);
    }

    #[test]
    fn test_minimal_json() {
        let reg = ConfigRegistry::from_json_str(MINIMAL).unwrap();
        assert_eq!(reg.page0().len(), 2);
        assert!(reg.page1().is_empty());
        assert_eq!(reg.start_streaming(), &[vec![0xAA, 0x01, 0x0D, 0x0A]]);
        assert_eq!(reg.template("read_register").unwrap().slots().len(), 1);
        assert!(matches!(
            reg.template("reset"),
            Err(ConfigError::UnknownTemplate(_))
        ));
    }

    #[test]
    fn test_yaml_matches_json() {
        let value: serde_json::Value = serde_json::from_str(MINIMAL).unwrap();
        let yaml = serde_yaml::to_string(&value).unwrap();
        let reg = ConfigRegistry::from_yaml_str(&yaml).unwrap();
        assert_eq!(reg.register_address("ACC_DATA_X_LSB_ADDR"), Some(0x08));
    }

    #[test]
    fn test_bad_hex_is_config_error() {
        let raw = MINIMAL.replace("\"0x08\"", "\"0xZZ\"");
        match ConfigRegistry::from_json_str(&raw) {
            Err(ConfigError::InvalidHex {
                section,
                key,
                value,
            }) => {
                assert_eq!(section, "bno055_page_0");
                assert_eq!(key, "ACC_DATA_X_LSB_ADDR");
                assert_eq!(value, "0xZZ");
            }
            other => panic!("expected InvalidHex, got {other:?}"),
        }

        let raw = MINIMAL.replace("[\"0xAA\", \"0x01\"", "[\"0xAA\", \"0x100\"");
        assert!(matches!(
            ConfigRegistry::from_json_str(&raw),
            Err(ConfigError::InvalidHex {
                section: "start_streaming",
                ..
            })
        ));
    }

    #[test]
    fn test_duplicate_address_rejected() {
        let raw = MINIMAL.replace("\"0x08\"", "\"0x00\"");
        assert!(matches!(
            ConfigRegistry::from_json_str(&raw),
            Err(ConfigError::DuplicateAddress { address: 0, .. })
        ));
    }

    #[test]
    fn test_missing_section_is_malformed() {
        let raw = r#"{"bno055_page_0": {}}"#;
        assert!(matches!(
            ConfigRegistry::from_json_str(raw),
            Err(ConfigError::Json(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config_file("/nonexistent/bno055.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_parse_hex_u8() {
        assert_eq!(parse_hex_u8("0xAA"), Some(0xAA));
        assert_eq!(parse_hex_u8("0X0d"), Some(0x0D));
        assert_eq!(parse_hex_u8(" 3d "), Some(0x3D));
        assert_eq!(parse_hex_u8("0x"), None);
        assert_eq!(parse_hex_u8("0x1FF"), None);
        assert_eq!(parse_hex_u8("+A"), None);
        assert_eq!(parse_hex_u8("0x+A"), None);
        assert_eq!(parse_hex_u8("0x-1"), None);
    }

    #[test]
    fn test_signed_hex_is_config_error() {
        let raw = BUILTIN_CONFIG.replacen("\"0x3D\"", "\"0x+3D\"", 1);
        assert!(matches!(
            ConfigRegistry::from_json_str(&raw),
            Err(ConfigError::InvalidHex { .. })
        ));
    }

    #[test]
    fn test_unrepresentable_serial_timeout_rejected() {
        for bad in ["1e300", "-1.0"] {
            let raw = BUILTIN_CONFIG.replace("\"timeout\": 0.01", &format!("\"timeout\": {bad}"));
            assert_ne!(raw, BUILTIN_CONFIG);
            assert!(matches!(
                ConfigRegistry::from_json_str(&raw),
                Err(ConfigError::InvalidSetting {
                    key: "serial.timeout",
                    ..
                })
            ));
        }
        let mut file: StickConfigFile = serde_json::from_str(BUILTIN_CONFIG).unwrap();
        file.serial = serde_yaml::from_str("{timeout: .inf}").unwrap();
        assert!(matches!(
            ConfigRegistry::from_raw(file),
            Err(ConfigError::InvalidSetting { .. })
        ));
    }
}
