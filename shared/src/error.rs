/*!
Common error types for the laser pointing controller components.
*/

use thiserror::Error;

/// Common result type used throughout the shared library
pub type Result<T> = std::result::Result<T, SharedError>;

/// Umbrella error type for all shared operations
#[derive(Error, Debug)]
pub enum SharedError {
    /// Malformed NMEA sentence
    #[error("NMEA error: {0}")]
    Nmea(#[from] crate::nmea::NmeaError),

    /// Unknown telecommand or bad telecommand arguments
    #[error("Command error: {0}")]
    Command(#[from] crate::command::CommandError),

    /// Port missing, device disconnected or write failure
    #[error("Transport error on {port}: {message}")]
    Transport { port: String, message: String },

    /// A send was attempted while the link has no open port
    #[error("Link {0} is not connected")]
    NotConnected(String),

    /// I/O errors (log files, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SharedError {
    /// Create a new transport error for a port
    pub fn transport(port: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transport {
            port: port.into(),
            message: message.into(),
        }
    }

    /// Create a new not-connected error for a link
    pub fn not_connected(link: impl Into<String>) -> Self {
        Self::NotConnected(link.into())
    }

    /// Whether this error came from the serial transport
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::NotConnected(_))
    }
}
