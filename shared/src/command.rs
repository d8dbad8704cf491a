/*!
Telecommand encoding for the pointing system.

Every frame is `[0xAA, 0x55, command_id]` followed by the little-endian packed
parameters of the command. There is no length prefix and no checksum; the
receiver knows each payload size from the command id.
*/

use crate::location::Location;
use crate::protocol::{FRAME_HEADER_SIZE, SYNC_BYTE_1, SYNC_BYTE_2};
use thiserror::Error;

/// Errors that can occur while building a telecommand from operator input
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Invalid command: \"{0}\"")]
    UnknownCommand(String),

    #[error("Invalid argument(s) for {command}: \"{text}\" ({reason})")]
    InvalidArgument {
        command: &'static str,
        text: String,
        reason: String,
    },
}

/// Wire type of a single telecommand parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    U8,
    F64,
}

impl ParamType {
    /// Packed size in bytes
    pub fn size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::F64 => 8,
        }
    }
}

/// The closed set of telecommands, discriminant = wire id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CommandKind {
    /// Send a PING, the pointing system answers PONG on its feedback stream
    Ping = 0,
    /// Set the GPS position of the pointing target
    Gps = 1,
    /// Trigger the automatic calibration of the motors
    CalibrateMotors = 2,
    /// Set the position and zero pointing orientation of the structure
    SetLocation = 3,
    /// Manually move a motor to a specific angle
    SetMotorPosition = 4,
    /// Use the current angle of a motor as its calibration point
    SetCalibrationPoint = 5,
}

impl CommandKind {
    /// All commands in wire id order
    pub const ALL: [CommandKind; 6] = [
        Self::Ping,
        Self::Gps,
        Self::CalibrateMotors,
        Self::SetLocation,
        Self::SetMotorPosition,
        Self::SetCalibrationPoint,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    /// Name used by operators to refer to this command
    pub fn name(self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::Gps => "GPS",
            Self::CalibrateMotors => "CALIBRATE_MOTORS",
            Self::SetLocation => "SET_LOCATION",
            Self::SetMotorPosition => "SET_MOTOR_POSITION",
            Self::SetCalibrationPoint => "SET_CALIBRATION_POINT",
        }
    }

    /// Look a command up by name (case-insensitive)
    pub fn from_name(name: &str) -> Result<Self, CommandError> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| CommandError::UnknownCommand(name.to_string()))
    }

    /// Declared parameters, in wire order
    pub fn params(self) -> &'static [(&'static str, ParamType)] {
        match self {
            Self::Ping | Self::CalibrateMotors => &[],
            Self::Gps => &[
                ("latitude", ParamType::F64),
                ("longitude", ParamType::F64),
                ("altitude", ParamType::F64),
            ],
            Self::SetLocation => &[
                ("latitude", ParamType::F64),
                ("longitude", ParamType::F64),
                ("altitude", ParamType::F64),
                ("orientation", ParamType::F64),
            ],
            Self::SetMotorPosition => &[("motor", ParamType::U8), ("angle", ParamType::F64)],
            Self::SetCalibrationPoint => &[("motor", ParamType::U8)],
        }
    }

    /// Payload size in bytes (excluding the frame header)
    pub fn payload_size(self) -> usize {
        self.params().iter().map(|(_, ty)| ty.size()).sum()
    }

    /// Usage string such as `SET_MOTOR_POSITION <motor> <angle>`
    pub fn usage(self) -> String {
        let mut usage = self.name().to_string();
        for (name, _) in self.params() {
            usage.push_str(&format!(" <{}>", name));
        }
        usage
    }
}

/// A fully validated telecommand
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Ping,
    Gps {
        latitude: f64,
        longitude: f64,
        altitude: f64,
    },
    CalibrateMotors,
    SetLocation {
        latitude: f64,
        longitude: f64,
        altitude: f64,
        orientation: f64,
    },
    SetMotorPosition {
        motor: u8,
        angle: f64,
    },
    SetCalibrationPoint {
        motor: u8,
    },
}

impl Command {
    /// GPS command pointing at a location
    pub fn gps(location: &Location) -> Self {
        Self::Gps {
            latitude: location.latitude,
            longitude: location.longitude,
            altitude: location.altitude,
        }
    }

    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Ping => CommandKind::Ping,
            Self::Gps { .. } => CommandKind::Gps,
            Self::CalibrateMotors => CommandKind::CalibrateMotors,
            Self::SetLocation { .. } => CommandKind::SetLocation,
            Self::SetMotorPosition { .. } => CommandKind::SetMotorPosition,
            Self::SetCalibrationPoint { .. } => CommandKind::SetCalibrationPoint,
        }
    }

    /// Encode into the complete wire frame
    pub fn encode(&self) -> Vec<u8> {
        let kind = self.kind();
        let mut frame = Vec::with_capacity(FRAME_HEADER_SIZE + kind.payload_size());
        frame.push(SYNC_BYTE_1);
        frame.push(SYNC_BYTE_2);
        frame.push(kind.id());

        match *self {
            Self::Ping | Self::CalibrateMotors => {}
            Self::Gps {
                latitude,
                longitude,
                altitude,
            } => {
                frame.extend_from_slice(&latitude.to_le_bytes());
                frame.extend_from_slice(&longitude.to_le_bytes());
                frame.extend_from_slice(&altitude.to_le_bytes());
            }
            Self::SetLocation {
                latitude,
                longitude,
                altitude,
                orientation,
            } => {
                frame.extend_from_slice(&latitude.to_le_bytes());
                frame.extend_from_slice(&longitude.to_le_bytes());
                frame.extend_from_slice(&altitude.to_le_bytes());
                frame.extend_from_slice(&orientation.to_le_bytes());
            }
            Self::SetMotorPosition { motor, angle } => {
                frame.push(motor);
                frame.extend_from_slice(&angle.to_le_bytes());
            }
            Self::SetCalibrationPoint { motor } => {
                frame.push(motor);
            }
        }

        frame
    }

    /// Build a command from positional text arguments
    pub fn from_args<S: AsRef<str>>(kind: CommandKind, args: &[S]) -> Result<Self, CommandError> {
        let params = kind.params();
        if args.len() != params.len() {
            let text = args.iter().map(|a| a.as_ref()).collect::<Vec<_>>().join(" ");
            return Err(CommandError::InvalidArgument {
                command: kind.name(),
                text,
                reason: format!(
                    "expected {} argument(s), got {}; usage: {}",
                    params.len(),
                    args.len(),
                    kind.usage()
                ),
            });
        }

        let f = |i: usize| parse_f64(kind, params[i].0, args[i].as_ref());
        let u = |i: usize| parse_u8(kind, params[i].0, args[i].as_ref());

        Ok(match kind {
            CommandKind::Ping => Self::Ping,
            CommandKind::CalibrateMotors => Self::CalibrateMotors,
            CommandKind::Gps => Self::Gps {
                latitude: f(0)?,
                longitude: f(1)?,
                altitude: f(2)?,
            },
            CommandKind::SetLocation => Self::SetLocation {
                latitude: f(0)?,
                longitude: f(1)?,
                altitude: f(2)?,
                orientation: f(3)?,
            },
            CommandKind::SetMotorPosition => Self::SetMotorPosition {
                motor: u(0)?,
                angle: f(1)?,
            },
            CommandKind::SetCalibrationPoint => Self::SetCalibrationPoint { motor: u(0)? },
        })
    }

    /// Look up a command by name and build it from text arguments
    pub fn parse<S: AsRef<str>>(name: &str, args: &[S]) -> Result<Self, CommandError> {
        Self::from_args(CommandKind::from_name(name)?, args)
    }

    /// Parse a whitespace separated operator line: `NAME arg1 arg2 ...`
    pub fn parse_line(line: &str) -> Result<Self, CommandError> {
        let mut tokens = line.split_whitespace();
        let name = tokens.next().unwrap_or_default();
        let args: Vec<&str> = tokens.collect();
        Self::parse(name, &args)
    }
}

fn parse_f64(kind: CommandKind, param: &str, raw: &str) -> Result<f64, CommandError> {
    raw.trim().parse::<f64>().map_err(|e| CommandError::InvalidArgument {
        command: kind.name(),
        text: raw.to_string(),
        reason: format!("{} must be a number: {}", param, e),
    })
}

fn parse_u8(kind: CommandKind, param: &str, raw: &str) -> Result<u8, CommandError> {
    raw.trim().parse::<u8>().map_err(|e| CommandError::InvalidArgument {
        command: kind.name(),
        text: raw.to_string(),
        reason: format!("{} must be an integer in 0..=255: {}", param, e),
    })
}
