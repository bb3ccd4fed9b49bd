use crate::TransportError;
use core::fmt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

/// Port settings, keyed the way the stick's JSON config spells them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerialSettings {
    #[serde(default = "default_baudrate")]
    pub baudrate: u32,
    #[serde(default = "default_bytesize")]
    pub bytesize: u8,
    #[serde(default)]
    pub parity: Parity,
    #[serde(default)]
    pub stopbits: StopBits,
    /// Per-read timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: f64,
    #[serde(default)]
    pub xonxoff: bool,
    #[serde(default)]
    pub rtscts: bool,
}

fn default_baudrate() -> u32 {
    115_200
}

fn default_bytesize() -> u8 {
    8
}

fn default_timeout() -> f64 {
    0.01
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baudrate: default_baudrate(),
            bytesize: default_bytesize(),
            parity: Parity::default(),
            stopbits: StopBits::default(),
            timeout: default_timeout(),
            xonxoff: false,
            rtscts: false,
        }
    }
}

impl SerialSettings {
    /// `timeout` as a [`Duration`]; negative, non-finite or oversized values are rejected.
    pub fn read_timeout(&self) -> Result<Duration, TransportError> {
        Duration::try_from_secs_f64(self.timeout)
            .map_err(|_| TransportError::Unsupported("serial timeout out of range"))
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum Parity {
    #[default]
    #[serde(rename = "N")]
    None,
    #[serde(rename = "E")]
    Even,
    #[serde(rename = "O")]
    Odd,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(format!("unsupported stop bits: {other}")),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(s: StopBits) -> u8 {
        match s {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// USB identity reported for an enumerated port.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UsbIdentity {
    pub vid: u16,
    pub pid: u16,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

#[derive(Clone, Debug)]
pub struct PortInfo {
    pub name: String,
    pub driver: String,
    pub usb: Option<UsbIdentity>,
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.usb {
            Some(usb) => write!(
                f,
                "{}\t{}\t{:04x}:{:04x}",
                self.name, self.driver, usb.vid, usb.pid
            ),
            None => write!(f, "{}\t{}", self.name, self.driver),
        }
    }
}

/// Match rule built from udev property keys.
///
/// Every key present in the rule must match; absent keys match anything.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct UsbMatch {
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
}

impl UsbMatch {
    /// Build a rule from `ID_VENDOR_ID`, `ID_MODEL_ID`, `ID_SERIAL_SHORT`, `ID_VENDOR`
    /// and `ID_MODEL`. Keys without a USB counterpart are skipped.
    pub fn from_udev(keys: &BTreeMap<String, String>) -> Self {
        let mut out = UsbMatch::default();
        for (key, val) in keys {
            match key.as_str() {
                "ID_VENDOR_ID" => out.vid = parse_usb_id(key, val),
                "ID_MODEL_ID" => out.pid = parse_usb_id(key, val),
                "ID_SERIAL_SHORT" => out.serial_number = Some(val.clone()),
                "ID_VENDOR" => out.manufacturer = Some(val.clone()),
                "ID_MODEL" => out.product = Some(val.clone()),
                other => warn!(key = other, "udev key has no USB counterpart; ignored"),
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        *self == UsbMatch::default()
    }

    pub fn matches(&self, port: &PortInfo) -> bool {
        let usb = match &port.usb {
            Some(u) => u,
            None => return false,
        };
        if self.vid.is_some_and(|v| v != usb.vid) {
            return false;
        }
        if self.pid.is_some_and(|p| p != usb.pid) {
            return false;
        }
        text_matches(self.serial_number.as_deref(), usb.serial_number.as_deref())
            && text_matches(self.manufacturer.as_deref(), usb.manufacturer.as_deref())
            && text_matches(self.product.as_deref(), usb.product.as_deref())
    }
}

fn parse_usb_id(key: &str, val: &str) -> Option<u16> {
    let hex = val.trim().trim_start_matches("0x");
    match u16::from_str_radix(hex, 16) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(key, val, "unparseable USB id in udev keys; ignored");
            None
        }
    }
}

// udev replaces spaces with underscores in ID_VENDOR / ID_MODEL.
fn text_matches(want: Option<&str>, have: Option<&str>) -> bool {
    match (want, have) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(w), Some(h)) => w.replace(' ', "_") == h.replace(' ', "_"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb_port(vid: u16, pid: u16, product: Option<&str>) -> PortInfo {
        PortInfo {
            name: "/dev/ttyACM0".to_string(),
            driver: "usb-serial".to_string(),
            usb: Some(UsbIdentity {
                vid,
                pid,
                serial_number: None,
                manufacturer: Some("Bosch Sensortec".to_string()),
                product: product.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_usb_match_from_udev_keys() {
        let mut keys = BTreeMap::new();
        keys.insert("ID_VENDOR_ID".to_string(), "108c".to_string());
        keys.insert("ID_MODEL_ID".to_string(), "AB5D".to_string());
        keys.insert("ID_VENDOR".to_string(), "Bosch_Sensortec".to_string());
        keys.insert("SUBSYSTEM".to_string(), "tty".to_string());

        let rule = UsbMatch::from_udev(&keys);
        assert_eq!(rule.vid, Some(0x108c));
        assert_eq!(rule.pid, Some(0xab5d));
        assert!(rule.matches(&usb_port(0x108c, 0xab5d, None)));
        assert!(!rule.matches(&usb_port(0x108c, 0x0001, None)));
    }

    #[test]
    fn test_usb_match_requires_usb_identity() {
        let rule = UsbMatch {
            vid: Some(0x108c),
            ..Default::default()
        };
        let port = PortInfo {
            name: "/dev/ttyS0".to_string(),
            driver: "serial".to_string(),
            usb: None,
        };
        assert!(!rule.matches(&port));
    }

    #[test]
    fn test_usb_match_text_fields() {
        let rule = UsbMatch {
            product: Some("BNO055 USB Stick".to_string()),
            ..Default::default()
        };
        assert!(rule.matches(&usb_port(1, 2, Some("BNO055_USB_Stick"))));
        assert!(!rule.matches(&usb_port(1, 2, None)));
    }

    #[test]
    fn test_serial_settings_from_json() {
        let s: SerialSettings =
            serde_json::from_str(r#"{"baudrate": 9600, "parity": "E", "stopbits": 2}"#).unwrap();
        assert_eq!(s.baudrate, 9600);
        assert_eq!(s.parity, Parity::Even);
        assert_eq!(s.stopbits, StopBits::Two);
        assert_eq!(s.bytesize, 8);
        assert!(serde_json::from_str::<SerialSettings>(r#"{"stopbits": 3}"#).is_err());
    }

    #[test]
    fn test_read_timeout_rejects_unrepresentable_values() {
        let mut s = SerialSettings {
            timeout: 0.25,
            ..Default::default()
        };
        assert_eq!(s.read_timeout().unwrap(), Duration::from_millis(250));
        for bad in [1e300, f64::INFINITY, f64::NAN, -0.5] {
            s.timeout = bad;
            assert!(matches!(
                s.read_timeout(),
                Err(TransportError::Unsupported(_))
            ));
        }
    }
}
