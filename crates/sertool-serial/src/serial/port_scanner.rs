//! Serial port listing.
//!
//! Reports exactly what the OS enumerates through `serialport`; no
//! probing and no guessing about adapters behind a port.

use super::error::SerialResult;
use super::types::{PortType, SerialPortInfo};

/// Names of every port the OS reports, sorted.
pub fn list_available_ports() -> SerialResult<Vec<String>> {
    let mut names: Vec<String> = list_port_details()?
        .into_iter()
        .map(|p| p.port_name)
        .collect();
    names.sort();
    names.dedup();
    Ok(names)
}

/// Port names plus whatever metadata the OS attaches to them.
pub fn list_port_details() -> SerialResult<Vec<SerialPortInfo>> {
    let ports = serialport::available_ports()?;
    log::debug!("OS reports {} serial port(s)", ports.len());
    Ok(ports.into_iter().map(port_info_from_os).collect())
}

fn port_info_from_os(port: serialport::SerialPortInfo) -> SerialPortInfo {
    match port.port_type {
        serialport::SerialPortType::UsbPort(usb) => SerialPortInfo {
            port_name: port.port_name,
            port_type: PortType::UsbSerial,
            description: usb.product,
            manufacturer: usb.manufacturer,
            vid: Some(usb.vid),
            pid: Some(usb.pid),
            serial_number: usb.serial_number,
        },
        serialport::SerialPortType::PciPort => basic_info(port.port_name, PortType::Pci),
        serialport::SerialPortType::BluetoothPort => {
            basic_info(port.port_name, PortType::Bluetooth)
        }
        serialport::SerialPortType::Unknown => basic_info(port.port_name, PortType::Unknown),
    }
}

fn basic_info(port_name: String, port_type: PortType) -> SerialPortInfo {
    SerialPortInfo {
        port_name,
        port_type,
        description: None,
        manufacturer: None,
        vid: None,
        pid: None,
        serial_number: None,
    }
}

/// One-line human-readable summary, e.g. `COM3 (USB-Serial, FTDI FT232R)`.
pub fn describe_port(info: &SerialPortInfo) -> String {
    let detail = match (&info.manufacturer, &info.description) {
        (Some(m), Some(d)) => format!(", {} {}", m, d),
        (Some(m), None) => format!(", {}", m),
        (None, Some(d)) => format!(", {}", d),
        (None, None) => String::new(),
    };
    format!("{} ({}{})", info.port_name, info.port_type.label(), detail)
}
