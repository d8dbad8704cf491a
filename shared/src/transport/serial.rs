//! `serialport` backed transport

use super::{PortInfo, PortOpener, SerialLink};
use crate::error::{Result, SharedError};
use serialport::{DataBits, FlowControl, Parity, SerialPort, SerialPortType, StopBits};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::{debug, info};

/// Opens 8N1 serial ports with a fixed baud rate and read timeout
#[derive(Debug, Clone)]
pub struct SerialPortOpener {
    baud_rate: u32,
    timeout: Duration,
}

impl SerialPortOpener {
    pub fn new(baud_rate: u32, timeout: Duration) -> Self {
        Self { baud_rate, timeout }
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl PortOpener for SerialPortOpener {
    fn open_port(&self, name: &str) -> Result<Box<dyn SerialLink>> {
        let port = serialport::new(name, self.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(self.timeout)
            .open()
            .map_err(|e| SharedError::transport(name, e.to_string()))?;

        info!("Opened serial port: {} at {} baud", name, self.baud_rate);

        Ok(Box::new(SerialPortLink {
            port,
            name: name.to_string(),
        }))
    }
}

/// Serial link over a `serialport` handle
pub struct SerialPortLink {
    port: Box<dyn SerialPort>,
    name: String,
}

impl SerialLink for SerialPortLink {
    fn port_name(&self) -> &str {
        &self.name
    }

    fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
        match self.port.read(buffer) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(SharedError::transport(&self.name, e.to_string())),
        }
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.port
            .write_all(data)
            .and_then(|_| self.port.flush())
            .map_err(|e| SharedError::transport(&self.name, e.to_string()))
    }

    fn try_clone(&self) -> Result<Box<dyn SerialLink>> {
        let port = self
            .port
            .try_clone()
            .map_err(|e| SharedError::transport(&self.name, e.to_string()))?;
        debug!("Cloned serial handle for {}", self.name);
        Ok(Box::new(SerialPortLink {
            port,
            name: self.name.clone(),
        }))
    }
}

/// List the serial ports present on this machine
pub fn available_ports() -> Result<Vec<PortInfo>> {
    let ports = serialport::available_ports()
        .map_err(|e| SharedError::transport("<enumeration>", e.to_string()))?;

    Ok(ports
        .into_iter()
        .map(|port| {
            let description = match port.port_type {
                SerialPortType::UsbPort(usb) => usb
                    .product
                    .unwrap_or_else(|| format!("USB {:04x}:{:04x}", usb.vid, usb.pid)),
                SerialPortType::PciPort => "PCI".to_string(),
                SerialPortType::BluetoothPort => "Bluetooth".to_string(),
                SerialPortType::Unknown => "Unknown".to_string(),
            };
            PortInfo {
                name: port.port_name,
                description,
            }
        })
        .collect())
}
