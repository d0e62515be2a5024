//! Serial port handling
//!
//! Port enumeration and the [`SerialTransport`] that backs a real session.

use serde::{Deserialize, Serialize};
use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::{Link, ProtocolError, Transport, DEFAULT_BAUD_RATE, MAX_READ_SIZE};

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/ttyACM0" or "COM3")
    pub name: String,

    /// Port kind: "USB", "Bluetooth", "PCI" or "Unknown"
    pub port_type: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Serial number (if available)
    pub serial_number: Option<String>,
}

impl PortInfo {
    fn bare(name: String, port_type: &str) -> Self {
        Self {
            name,
            port_type: port_type.to_string(),
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial_number: None,
        }
    }

    /// Whether the port looks like a USB serial adapter
    pub fn is_usb(&self) -> bool {
        self.port_type.to_ascii_lowercase().contains("usb")
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => Self {
                name: info.port_name,
                port_type: "USB".to_string(),
                vid: Some(usb_info.vid),
                pid: Some(usb_info.pid),
                manufacturer: usb_info.manufacturer,
                product: usb_info.product,
                serial_number: usb_info.serial_number,
            },
            SerialPortType::BluetoothPort => Self::bare(info.port_name, "Bluetooth"),
            SerialPortType::PciPort => Self::bare(info.port_name, "PCI"),
            _ => Self::bare(info.port_name, "Unknown"),
        }
    }
}

/// Helper used to sort port names so that:
///  - ttyACM* ports come first (sorted numerically by suffix)
///  - then ttyUSB* ports (sorted numerically)
///  - then other ports (sorted by name)
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    if let Some(rest) = basename.strip_prefix("ttyACM") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (0, num, basename.to_string());
    }
    if let Some(rest) = basename.strip_prefix("ttyUSB") {
        let num = rest.parse::<usize>().unwrap_or(usize::MAX);
        return (1, num, basename.to_string());
    }
    (2, 0, basename.to_string())
}

/// List all available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    match serialport::available_ports() {
        Ok(ports) => {
            for info in ports {
                let p = PortInfo::from(info);
                map.entry(p.name.clone()).or_insert(p);
            }
        }
        Err(e) => warn!(error = %e, "serial port enumeration failed"),
    }

    // The Pico CDC port sometimes shows up in /dev before udev has tagged it
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("ttyACM") || fname.starts_with("ttyUSB") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full, "USB"));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Keep only USB-type ports (case-insensitive match on `port_type`)
pub fn filter_usb(ports: impl IntoIterator<Item = PortInfo>) -> Vec<PortInfo> {
    ports.into_iter().filter(PortInfo::is_usb).collect()
}

/// Opens FaultyCat ports through the `serialport` crate
#[derive(Debug, Clone)]
pub struct SerialTransport {
    baud_rate: u32,
    /// Upper bound on a single blocking read inside a window
    poll_interval: Duration,
}

impl SerialTransport {
    /// `poll_interval` bounds each blocking read; at least 1 ms
    pub fn new(baud_rate: u32, poll_interval: Duration) -> Self {
        Self {
            baud_rate,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE, Duration::from_millis(100))
    }
}

impl Transport for SerialTransport {
    fn open(&self, port_name: &str) -> Result<Box<dyn Link>, ProtocolError> {
        let mut port = serialport::new(port_name, self.baud_rate)
            .timeout(self.poll_interval)
            .open()?;
        configure_port(port.as_mut())?;
        port.clear(serialport::ClearBuffer::All)?;
        debug!(port = port_name, baud = self.baud_rate, "serial port opened");
        Ok(Box::new(SerialLink {
            port,
            poll_interval: self.poll_interval,
        }))
    }
}

/// Configure a serial port for the board
fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    // Standard 8N1 configuration
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;

    // The RP2040 USB stdio only transmits once the host asserts DTR
    if let Err(e) = port.write_data_terminal_ready(true) {
        warn!(error = %e, "failed to set DTR high (continuing)");
    }
    if let Err(e) = port.write_request_to_send(true) {
        warn!(error = %e, "failed to set RTS high (continuing)");
    }

    Ok(())
}

struct SerialLink {
    port: Box<dyn SerialPort>,
    poll_interval: Duration,
}

impl Link for SerialLink {
    fn write_all(&mut self, data: &[u8]) -> Result<(), ProtocolError> {
        self.port
            .write_all(data)
            .map_err(|e| ProtocolError::ConnectionLost(e.to_string()))?;
        // tcdrain can hang on some CDC drivers, so only flush off unix
        #[cfg(not(target_family = "unix"))]
        self.port
            .flush()
            .map_err(|e| ProtocolError::ConnectionLost(e.to_string()))?;
        Ok(())
    }

    fn read(&mut self, window: Duration) -> Result<Vec<u8>, ProtocolError> {
        let deadline = Instant::now() + window;
        let mut response = Vec::new();
        let mut buffer = [0u8; 1024];

        loop {
            let now = Instant::now();
            if now >= deadline || response.len() >= MAX_READ_SIZE {
                break;
            }
            self.port.set_timeout((deadline - now).min(self.poll_interval))?;
            match self.port.read(&mut buffer) {
                Ok(n) => response.extend_from_slice(&buffer[..n]),
                Err(ref e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {}
                Err(e) => return Err(ProtocolError::ConnectionLost(e.to_string())),
            }
        }

        Ok(response)
    }

    fn close(&mut self) -> Result<(), ProtocolError> {
        self.port.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}
