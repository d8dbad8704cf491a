/*!
Serial transport boundary.

The controller never talks to a device directly. It asks a [`PortOpener`] for
a [`SerialLink`] by port name, reads with the link's configured timeout and
closes the link by dropping it.
*/

use crate::error::Result;

mod serial;
pub mod mock;

pub use serial::{SerialPortLink, SerialPortOpener, available_ports};

/// Description of a serial port found on the system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub name: String,
    pub description: String,
}

/// An open, byte oriented serial connection
pub trait SerialLink: Send {
    /// Name of the port this link was opened on
    fn port_name(&self) -> &str;

    /// Read available bytes, blocking up to the link timeout.
    /// Returns `Ok(0)` when the timeout elapsed without data.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize>;

    /// Write all bytes and flush them to the device
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Independent handle to the same port, e.g. to split reading and writing
    fn try_clone(&self) -> Result<Box<dyn SerialLink>>;
}

/// Opens serial links by port name
pub trait PortOpener: Send + Sync {
    fn open_port(&self, name: &str) -> Result<Box<dyn SerialLink>>;
}
