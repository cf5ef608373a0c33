//! Serial port handling
//!
//! Adapters show up either as RFCOMM devices bound to the Bluetooth Serial
//! Port Profile (`/dev/rfcomm0`, `COM5`) or as USB serial converters.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::time::Duration;
use tracing::debug;

use super::{ProtocolError, DEFAULT_BAUD_RATE};

/// Read timeout of opened ports. Reads only happen after `bytes_to_read`
/// reported data, so this just bounds a misbehaving driver.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/rfcomm0" or "COM3")
    pub name: String,

    /// Bus the port sits on ("bluetooth", "usb", "pci", "unknown")
    pub kind: &'static str,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Product name (if available)
    pub product: Option<String>,
}

impl PortInfo {
    fn bare(name: String, kind: &'static str) -> Self {
        Self {
            name,
            kind,
            vid: None,
            pid: None,
            product: None,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        match info.port_type {
            SerialPortType::UsbPort(usb) => Self {
                name: info.port_name,
                kind: "usb",
                vid: Some(usb.vid),
                pid: Some(usb.pid),
                product: usb.product,
            },
            SerialPortType::BluetoothPort => Self::bare(info.port_name, "bluetooth"),
            SerialPortType::PciPort => Self::bare(info.port_name, "pci"),
            _ => {
                let kind = if info.port_name.contains("rfcomm") {
                    "bluetooth"
                } else {
                    "unknown"
                };
                Self::bare(info.port_name, kind)
            }
        }
    }
}

/// Sort key putting likely adapters first:
///  - rfcomm* (Bluetooth SPP) ports, numerically
///  - then ttyUSB* ports, numerically
///  - then ttyACM* ports, numerically
///  - then everything else by name
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "rfcomm"), (1, "ttyUSB"), (2, "ttyACM")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List available serial ports, with /dev fallbacks and deterministic ordering
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Bound RFCOMM devices are often missing from the enumeration API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                let kind = if fname.starts_with("rfcomm") {
                    "bluetooth"
                } else if fname.starts_with("ttyUSB") || fname.starts_with("ttyACM") {
                    "usb"
                } else {
                    continue;
                };
                let full = format!("/dev/{}", fname);
                map.entry(full.clone())
                    .or_insert_with(|| PortInfo::bare(full, kind));
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port
pub fn open_port(name: &str, baud_rate: Option<u32>) -> Result<Box<dyn SerialPort>, ProtocolError> {
    let baud = baud_rate.unwrap_or(DEFAULT_BAUD_RATE);

    serialport::new(name, baud)
        .timeout(READ_TIMEOUT)
        .open()
        .map_err(ProtocolError::from)
}

/// Configure a serial port for adapter communication (8N1, no flow control)
pub fn configure_port(port: &mut dyn SerialPort) -> Result<(), ProtocolError> {
    port.set_data_bits(serialport::DataBits::Eight)?;
    port.set_parity(serialport::Parity::None)?;
    port.set_stop_bits(serialport::StopBits::One)?;
    port.set_flow_control(serialport::FlowControl::None)?;

    // Some USB adapters stay silent until DTR is asserted
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!("configure_port: failed to set DTR high: {} (continuing)", e);
    }
    if let Err(e) = port.write_request_to_send(true) {
        debug!("configure_port: failed to set RTS high: {} (continuing)", e);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only checks enumeration does not panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} ({})", port.name, port.kind);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM1",
            "/dev/rfcomm1",
            "/dev/ttyUSB0",
            "/dev/someport",
            "/dev/rfcomm0",
            "/dev/ttyUSB10",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string(), "unknown"))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.into_iter().map(|p| p.name).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/rfcomm0",
                "/dev/rfcomm1",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/ttyUSB10",
                "/dev/ttyACM1",
                "/dev/someport",
            ]
        );
    }
}
