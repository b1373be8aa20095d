//! Host serial port
//!
//! GSIOC framing is fixed (19200 baud, 8E1); only the read window can be
//! chosen. A port is named explicitly or found by the USB descriptor of the
//! RS-232 adapter.

use std::fmt;
use std::io::{self, Read, Write};
use std::time::Duration;

use ampoule_hal::uart::{DataBits, Parity, StopBits, UartConfig, UartError, UartErrorKind};
use ampoule_hal::{UartRx, UartTx};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use serialport::{ClearBuffer, FlowControl, SerialPort as _, SerialPortType};

use crate::error::TransportError;

/// Port setting that asks for auto-detection
pub const AUTODETECT: &str = "AUTO";

/// Descriptor of the adapter shipped with the handler
pub const DEFAULT_DEVICE_NAME: &str = "Prolific PL2303GS USB Serial COM Port";

/// Read window for a single byte (ms)
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// How the port is chosen
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortSelector {
    /// A port name such as `/dev/ttyUSB0` or `COM3`
    Explicit(String),
    /// The single port whose USB descriptor matches
    Auto { device_name: String },
}

/// `[serial]` section of the configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name, or `AUTO`
    pub port: String,
    /// USB descriptor matched when `port` is `AUTO`
    pub device_name: String,
    pub timeout_ms: u64,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: AUTODETECT.to_owned(),
            device_name: DEFAULT_DEVICE_NAME.to_owned(),
            timeout_ms: DEFAULT_TIMEOUT_MS,
        }
    }
}

impl SerialSettings {
    pub fn selector(&self) -> PortSelector {
        if self.port.trim().eq_ignore_ascii_case(AUTODETECT) {
            PortSelector::Auto {
                device_name: self.device_name.clone(),
            }
        } else {
            PortSelector::Explicit(self.port.trim().to_owned())
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A port as seen by the OS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    /// USB vendor and product id
    pub usb_id: Option<(u16, u16)>,
}

impl PortInfo {
    /// Whether this port carries the USB descriptor `device_name`
    ///
    /// Case-insensitive, in either direction: the configured name may be a
    /// full OS friendly name that contains the product string, or a
    /// fragment of it.
    pub fn matches(&self, device_name: &str) -> bool {
        let wanted = device_name.trim().to_lowercase();
        if wanted.is_empty() {
            return false;
        }
        let product = self.product.as_deref().unwrap_or("").to_lowercase();
        let description = self.description().unwrap_or_default().to_lowercase();
        description.contains(&wanted) || (!product.is_empty() && wanted.contains(&product))
    }

    /// Manufacturer and product joined, if the OS reported either
    pub fn description(&self) -> Option<String> {
        let parts: Vec<&str> = [self.manufacturer.as_deref(), self.product.as_deref()]
            .into_iter()
            .flatten()
            .collect();
        (!parts.is_empty()).then(|| parts.join(" "))
    }
}

impl From<&serialport::SerialPortInfo> for PortInfo {
    fn from(info: &serialport::SerialPortInfo) -> Self {
        let (manufacturer, product, usb_id) = match &info.port_type {
            SerialPortType::UsbPort(usb) => (
                usb.manufacturer.clone(),
                usb.product.clone(),
                Some((usb.vid, usb.pid)),
            ),
            _ => (None, None, None),
        };
        Self {
            name: info.port_name.clone(),
            manufacturer,
            product,
            usb_id,
        }
    }
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(description) = self.description() {
            write!(f, "  {description}")?;
        }
        if let Some((vid, pid)) = self.usb_id {
            write!(f, "  [{vid:04x}:{pid:04x}]")?;
        }
        Ok(())
    }
}

/// Ports currently known to the OS
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let ports = serialport::available_ports().map_err(io::Error::from)?;
    Ok(ports.iter().map(PortInfo::from).collect())
}

/// Port name for a selector, scanning the OS ports if needed
pub fn resolve_port(selector: &PortSelector) -> Result<String, TransportError> {
    match selector {
        PortSelector::Explicit(name) => Ok(name.clone()),
        PortSelector::Auto { device_name } => {
            let port = select_port(&list_ports()?, device_name)?;
            debug!("Detected {port} for {device_name:?}");
            Ok(port)
        }
    }
}

/// The single port in `ports` matching `device_name`
pub fn select_port(ports: &[PortInfo], device_name: &str) -> Result<String, TransportError> {
    let matching: Vec<&PortInfo> = ports.iter().filter(|p| p.matches(device_name)).collect();
    match matching.as_slice() {
        [] => Err(TransportError::PortNotFound(device_name.to_owned())),
        [port] => Ok(port.name.clone()),
        many => Err(TransportError::AmbiguousPort {
            device_name: device_name.to_owned(),
            ports: many.iter().map(|p| p.name.clone()).collect(),
        }),
    }
}

/// I/O error from the host port
#[derive(Debug)]
pub struct SerialError(pub io::Error);

impl UartError for SerialError {
    fn kind(&self) -> UartErrorKind {
        match self.0.kind() {
            io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => UartErrorKind::Timeout,
            _ => UartErrorKind::Other,
        }
    }
}

impl fmt::Display for SerialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An open host serial port with GSIOC framing
pub struct SerialPort {
    port: Box<dyn serialport::SerialPort>,
    name: String,
}

impl SerialPort {
    /// Open `name` at the GSIOC framing with a per-read window of `timeout`
    pub fn open(name: &str, timeout: Duration) -> Result<Self, TransportError> {
        let framing = UartConfig::gsioc();
        let port = serialport::new(name, framing.baudrate)
            .data_bits(data_bits(framing.data_bits))
            .parity(parity(framing.parity))
            .stop_bits(stop_bits(framing.stop_bits))
            .flow_control(FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|source| TransportError::Open {
                port: name.to_owned(),
                source,
            })?;
        info!("Opened {name} at {} baud 8E1", framing.baudrate);
        Ok(Self {
            port,
            name: name.to_owned(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for SerialPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialPort").field("name", &self.name).finish()
    }
}

impl UartTx for SerialPort {
    type Error = SerialError;

    fn write_blocking(&mut self, data: &[u8]) -> Result<(), SerialError> {
        self.port.write_all(data).map_err(SerialError)
    }

    fn flush(&mut self) -> Result<(), SerialError> {
        self.port.flush().map_err(SerialError)
    }
}

impl UartRx for SerialPort {
    type Error = SerialError;

    fn read_blocking(&mut self, buf: &mut [u8]) -> Result<usize, SerialError> {
        self.port.read(buf).map_err(SerialError)
    }

    fn discard_pending(&mut self) -> Result<(), SerialError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| SerialError(e.into()))
    }
}

fn data_bits(bits: DataBits) -> serialport::DataBits {
    match bits {
        DataBits::Seven => serialport::DataBits::Seven,
        DataBits::Eight => serialport::DataBits::Eight,
    }
}

fn parity(parity: Parity) -> serialport::Parity {
    match parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    }
}

fn stop_bits(bits: StopBits) -> serialport::StopBits {
    match bits {
        StopBits::One => serialport::StopBits::One,
        StopBits::Two => serialport::StopBits::Two,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usb(name: &str, manufacturer: &str, product: &str) -> PortInfo {
        PortInfo {
            name: name.to_owned(),
            manufacturer: Some(manufacturer.to_owned()),
            product: Some(product.to_owned()),
            usb_id: Some((0x067b, 0x23a3)),
        }
    }

    fn bare(name: &str) -> PortInfo {
        PortInfo {
            name: name.to_owned(),
            manufacturer: None,
            product: None,
            usb_id: None,
        }
    }

    #[test]
    fn test_selector_from_settings() {
        let settings = SerialSettings::default();
        assert_eq!(
            settings.selector(),
            PortSelector::Auto {
                device_name: DEFAULT_DEVICE_NAME.to_owned()
            }
        );
        let settings = SerialSettings {
            port: "auto".into(),
            ..SerialSettings::default()
        };
        assert!(matches!(settings.selector(), PortSelector::Auto { .. }));
        let settings = SerialSettings {
            port: " /dev/ttyUSB0 ".into(),
            ..SerialSettings::default()
        };
        assert_eq!(
            settings.selector(),
            PortSelector::Explicit("/dev/ttyUSB0".into())
        );
        assert_eq!(settings.timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_descriptor_matching() {
        let port = usb("/dev/ttyUSB0", "Prolific", "PL2303GS USB Serial COM Port");
        assert!(port.matches("pl2303gs"));
        assert!(port.matches(DEFAULT_DEVICE_NAME));
        assert!(!port.matches("FT232R"));
        assert!(!port.matches(""));
        assert!(!bare("/dev/ttyS0").matches(DEFAULT_DEVICE_NAME));
    }

    #[test]
    fn test_select_single_port() {
        let ports = [
            bare("/dev/ttyS0"),
            usb("/dev/ttyUSB0", "Prolific", "PL2303GS USB Serial COM Port"),
            usb("/dev/ttyUSB1", "FTDI", "FT232R USB UART"),
        ];
        assert_eq!(
            select_port(&ports, DEFAULT_DEVICE_NAME).unwrap(),
            "/dev/ttyUSB0"
        );
    }

    #[test]
    fn test_select_missing_and_ambiguous() {
        let ports = [
            usb("/dev/ttyUSB0", "Prolific", "PL2303GS USB Serial COM Port"),
            usb("/dev/ttyUSB1", "Prolific", "PL2303GS USB Serial COM Port"),
        ];
        assert!(matches!(
            select_port(&ports, "FT232R"),
            Err(TransportError::PortNotFound(name)) if name == "FT232R"
        ));
        match select_port(&ports, "PL2303") {
            Err(TransportError::AmbiguousPort { ports, .. }) => {
                assert_eq!(ports, ["/dev/ttyUSB0", "/dev/ttyUSB1"]);
            }
            other => panic!("expected AmbiguousPort, got {other:?}"),
        }
    }

    #[test]
    fn test_explicit_port_skips_scan() {
        let selector = PortSelector::Explicit("COM3".into());
        assert_eq!(resolve_port(&selector).unwrap(), "COM3");
    }

    #[test]
    fn test_port_display() {
        let port = usb("/dev/ttyUSB0", "Prolific", "PL2303GS");
        assert_eq!(port.to_string(), "/dev/ttyUSB0  Prolific PL2303GS  [067b:23a3]");
        assert_eq!(bare("/dev/ttyS0").to_string(), "/dev/ttyS0");
    }

    #[test]
    fn test_framing_maps_to_host() {
        let framing = UartConfig::gsioc();
        assert_eq!(data_bits(framing.data_bits), serialport::DataBits::Eight);
        assert_eq!(parity(framing.parity), serialport::Parity::Even);
        assert_eq!(stop_bits(framing.stop_bits), serialport::StopBits::One);
    }

    #[test]
    fn test_timeout_classification() {
        let timeout = SerialError(io::Error::from(io::ErrorKind::TimedOut));
        assert_eq!(timeout.kind(), UartErrorKind::Timeout);
        let gone = SerialError(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(gone.kind(), UartErrorKind::Other);
    }
}
