/*!
# Shared Types and Utilities

This crate contains the protocol-level building blocks of the laser pointing
controller: everything that is pure data or pure parsing and owns no threads.

## Core Types

- [`Location`] - A GPS fix (time, latitude, longitude, altitude)
- [`Command`] - A telecommand for the pointing system
- [`NmeaStreamParser`] - Incremental GGA extraction from a chunked byte stream
- [`SerialLink`] / [`PortOpener`] - The serial transport boundary

## Modules

- [`location`] - GPS fixes and calibration
- [`command`] - Telecommand encoding into the binary wire frame
- [`nmea`] - NMEA sentence reassembly and GGA parsing
- [`transport`] - SerialLink abstraction, `serialport` backend and mock
- [`error`] - Common error types
*/

pub mod location;
pub mod command;
pub mod nmea;
pub mod transport;
pub mod error;

// Re-export commonly used types
pub use location::Location;
pub use command::{Command, CommandKind, CommandError, ParamType};
pub use nmea::{NmeaStreamParser, NmeaError};
pub use transport::{PortOpener, SerialLink, SerialPortOpener};
pub use error::{SharedError, Result};

/// Version information for the shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Protocol constants
pub mod protocol {
    /// First sync byte of every telecommand frame
    pub const SYNC_BYTE_1: u8 = 0xAA;

    /// Second sync byte of every telecommand frame
    pub const SYNC_BYTE_2: u8 = 0x55;

    /// Size of the fixed frame header (two sync bytes + command id)
    pub const FRAME_HEADER_SIZE: usize = 3;

    /// Baud rate of the link to the pointing system
    pub const LASER_BAUD_RATE: u32 = 9600;

    /// Baud rate of the RTK GPS receivers
    pub const GPS_BAUD_RATE: u32 = 115_200;

    /// Read timeout of every link in milliseconds
    pub const READ_TIMEOUT_MS: u64 = 1000;

    /// Antenna mounting height subtracted from the GPS altitude (meters)
    pub const DEFAULT_HEIGHT_OFFSET: f64 = 0.26;

    /// Only sentences with this prefix carry fixes we consume
    pub const GGA_PREFIX: &[u8] = b"$GNGGA,";

    /// Minimum number of comma separated fields in a GGA sentence
    pub const GGA_MIN_FIELDS: usize = 15;
}
