use crate::{
    Parity, PortInfo, Result, SerialSettings, StopBits, Transport, TransportError, UsbIdentity,
    UsbMatch,
};
use serialport::{DataBits, FlowControl, SerialPort, SerialPortType};
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;
use tracing::{debug, info};

/// Raw bytes over a USB-serial port (CDC-ACM sticks show up as /dev/ttyACM*).
pub struct SerialTransport {
    path: String,
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    /// Create a closed transport for `path`; call [`Transport::open`] before use.
    pub fn new(path: &str, settings: SerialSettings) -> Self {
        SerialTransport {
            path: path.to_string(),
            settings,
            port: None,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// List serial ports, with USB identity where the OS reports one.
    pub fn list() -> Result<Vec<PortInfo>> {
        let mut out = Vec::new();
        for p in serialport::available_ports().map_err(|e| TransportError::Io(e.to_string()))? {
            match p.port_type {
                SerialPortType::UsbPort(u) => {
                    out.push(PortInfo {
                        name: p.port_name,
                        driver: "usb-serial".to_string(),
                        usb: Some(UsbIdentity {
                            vid: u.vid,
                            pid: u.pid,
                            serial_number: u.serial_number,
                            manufacturer: u.manufacturer,
                            product: u.product,
                        }),
                    });
                }
                _ => {
                    out.push(PortInfo {
                        name: p.port_name,
                        driver: "serial".to_string(),
                        usb: None,
                    });
                }
            }
        }
        Ok(out)
    }

    /// Find the first port whose USB identity satisfies `rule`.
    pub fn autodetect(rule: &UsbMatch) -> Result<String> {
        if rule.is_empty() {
            return Err(TransportError::Unsupported("empty autodetect rule"));
        }
        let port = Self::list()?
            .into_iter()
            .find(|p| rule.matches(p))
            .ok_or_else(|| TransportError::NotFound(format!("no port matches {rule:?}")))?;
        info!(port = %port.name, "autodetected device");
        Ok(port.name)
    }

    fn port_mut(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(TransportError::NotOpen)
    }
}

impl Transport for SerialTransport {
    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let s = &self.settings;
        let timeout = s.read_timeout()?;
        let data_bits = match s.bytesize {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            8 => DataBits::Eight,
            _ => return Err(TransportError::Unsupported("bytesize must be 5..=8")),
        };
        let parity = match s.parity {
            Parity::None => serialport::Parity::None,
            Parity::Even => serialport::Parity::Even,
            Parity::Odd => serialport::Parity::Odd,
        };
        let stop_bits = match s.stopbits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        };
        let flow = if s.rtscts {
            FlowControl::Hardware
        } else if s.xonxoff {
            FlowControl::Software
        } else {
            FlowControl::None
        };
        let port = serialport::new(&self.path, s.baudrate)
            .data_bits(data_bits)
            .parity(parity)
            .stop_bits(stop_bits)
            .flow_control(flow)
            .timeout(timeout)
            .open()
            .map_err(|e| match e.kind {
                serialport::ErrorKind::NoDevice => TransportError::NotFound(self.path.clone()),
                _ => TransportError::Io(e.to_string()),
            })?;
        debug!(path = %self.path, baudrate = s.baudrate, "serial port opened");
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            debug!(path = %self.path, "serial port closed");
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, bytes: &[u8]) -> Result<usize> {
        let port = self.port_mut()?;
        let n = port
            .write(bytes)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        port.flush().map_err(|e| TransportError::Io(e.to_string()))?;
        Ok(n)
    }

    fn read(&mut self, max_bytes: usize, timeout: Duration) -> Result<Vec<u8>> {
        let port = self.port_mut()?;
        port.set_timeout(timeout)
            .map_err(|e| TransportError::Io(e.to_string()))?;
        let mut buf = vec![0u8; max_bytes];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(Vec::new())
            }
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }
}
