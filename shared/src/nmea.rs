/*!
NMEA stream reassembly and GGA parsing.

The serial transport hands out bytes in whatever slices it happens to read.
[`NmeaStreamParser`] carries the unterminated tail of each chunk over to the
next one, so the sequence of parsed fixes does not depend on how the stream
was sliced.
*/

use crate::location::Location;
use crate::protocol::{GGA_MIN_FIELDS, GGA_PREFIX};
use bytes::BytesMut;
use thiserror::Error;
use tracing::warn;

/// Longest line accepted, terminator excluded
pub const MAX_PENDING_BYTES: usize = 64 * 1024;

/// Errors that can occur while parsing a GGA sentence
#[derive(Error, Debug, Clone, PartialEq)]
pub enum NmeaError {
    #[error("GGA sentence has {found} fields, expected at least {expected}")]
    TooFewFields { expected: usize, found: usize },

    #[error("Invalid {field} value: \"{value}\"")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Sentence is not valid UTF-8")]
    InvalidEncoding,
}

/// Incremental parser turning raw read chunks into GPS fixes
#[derive(Debug)]
pub struct NmeaStreamParser {
    pending: BytesMut,
    max_pending: usize,
    // current line went over `max_pending`, skip to the next newline
    discarding: bool,
    lines_seen: u64,
    fixes_parsed: u64,
    parse_errors: u64,
    overflows: u64,
}

impl NmeaStreamParser {
    /// Create a new parser with an empty residual buffer
    pub fn new() -> Self {
        Self::with_max_pending(MAX_PENDING_BYTES)
    }

    /// Create a parser with a custom bound on unterminated data
    pub fn with_max_pending(max_pending: usize) -> Self {
        Self {
            pending: BytesMut::with_capacity(512),
            max_pending,
            discarding: false,
            lines_seen: 0,
            fixes_parsed: 0,
            parse_errors: 0,
            overflows: 0,
        }
    }

    /// Feed one chunk of raw bytes.
    ///
    /// Returns one entry per complete `$GNGGA,` line found, in stream order.
    /// Other sentence types are skipped silently. Lines longer than the
    /// configured bound are dropped whole, however the stream is sliced.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<Location, NmeaError>> {
        let mut results = Vec::new();
        let mut rest = chunk;

        while let Some(newline) = rest.iter().position(|&b| b == b'\n') {
            let (part, tail) = (&rest[..newline], &rest[newline + 1..]);
            rest = tail;
            self.lines_seen += 1;

            if self.discarding {
                self.discarding = false;
                continue;
            }
            if self.pending.len() + part.len() > self.max_pending {
                self.overflow(self.pending.len() + part.len());
                continue;
            }

            self.pending.extend_from_slice(part);
            let line = self.pending.split();
            if let Some(result) = parse_line(&line) {
                match &result {
                    Ok(_) => self.fixes_parsed += 1,
                    Err(_) => self.parse_errors += 1,
                }
                results.push(result);
            }
        }

        if !self.discarding {
            if self.pending.len() + rest.len() > self.max_pending {
                self.overflow(self.pending.len() + rest.len());
                self.discarding = true;
            } else {
                self.pending.extend_from_slice(rest);
            }
        }

        results
    }

    fn overflow(&mut self, length: usize) {
        warn!(
            "Discarding line of at least {} bytes, longer than {}",
            length, self.max_pending
        );
        self.pending.clear();
        self.overflows += 1;
    }

    /// Drop any partial sentence, e.g. when the underlying link is reopened
    pub fn reset(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }

    /// Number of bytes waiting for a line terminator
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Get statistics: (lines seen, fixes parsed, parse errors, overflows)
    pub fn stats(&self) -> (u64, u64, u64, u64) {
        (self.lines_seen, self.fixes_parsed, self.parse_errors, self.overflows)
    }
}

impl Default for NmeaStreamParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one line (without `\n`). `None` if it is not a GGA sentence.
pub fn parse_line(line: &[u8]) -> Option<Result<Location, NmeaError>> {
    if !line.starts_with(GGA_PREFIX) {
        return None;
    }
    Some(parse_gga(line))
}

/// Parse a `$GNGGA,` sentence into a location
pub fn parse_gga(line: &[u8]) -> Result<Location, NmeaError> {
    let text = std::str::from_utf8(line).map_err(|_| NmeaError::InvalidEncoding)?;
    let fields: Vec<&str> = text.split(',').collect();
    if fields.len() < GGA_MIN_FIELDS {
        return Err(NmeaError::TooFewFields {
            expected: GGA_MIN_FIELDS,
            found: fields.len(),
        });
    }

    let time = parse_number("time", fields[1])?;
    let latitude = parse_angle("latitude", fields[2], 2)? * hemisphere_sign(fields[3], "S");
    let longitude = parse_angle("longitude", fields[4], 3)? * hemisphere_sign(fields[5], "W");
    let altitude = parse_number("altitude", fields[9])?;

    Ok(Location::new(time, latitude, longitude, altitude))
}

/// Decode a `D..DMM.mmmm` angle whose first `degree_digits` digits are degrees
pub fn parse_angle(field: &'static str, value: &str, degree_digits: usize) -> Result<f64, NmeaError> {
    let invalid = || NmeaError::InvalidNumber {
        field,
        value: value.to_string(),
    };

    let degrees = value.get(..degree_digits).ok_or_else(invalid)?;
    let minutes = value.get(degree_digits..).ok_or_else(invalid)?;

    let degrees: u32 = degrees.trim().parse().map_err(|_| invalid())?;
    let minutes: f64 = minutes.trim().parse().map_err(|_| invalid())?;

    Ok(degrees as f64 + minutes / 60.0)
}

fn parse_number(field: &'static str, value: &str) -> Result<f64, NmeaError> {
    value.trim().parse().map_err(|_| NmeaError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn hemisphere_sign(value: &str, negative: &str) -> f64 {
    if value == negative {
        -1.0
    } else {
        1.0
    }
}
