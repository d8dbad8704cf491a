/*!
GPS fixes as delivered by the RTK receivers.
*/

use std::fmt;

/// A GPS location parsed from a GGA sentence
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    /// GPS time of day (hhmmss.ss as a decimal number)
    pub time: f64,
    /// Latitude in degrees, negative in the southern hemisphere
    pub latitude: f64,
    /// Longitude in degrees, negative west of Greenwich
    pub longitude: f64,
    /// Altitude in meters
    pub altitude: f64,
}

impl Location {
    pub fn new(time: f64, latitude: f64, longitude: f64, altitude: f64) -> Self {
        Self {
            time,
            latitude,
            longitude,
            altitude,
        }
    }

    /// Copy of this location with the antenna height offset removed
    pub fn calibrated(&self, height_offset: f64) -> Self {
        Self {
            altitude: self.altitude - height_offset,
            ..*self
        }
    }

    /// One line of the location log, without the trailing newline
    pub fn to_csv_line(&self) -> String {
        format!(
            "{},{},{},{}",
            self.time, self.latitude, self.longitude, self.altitude
        )
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t={} lat={:.7} lon={:.7} alt={:.3}m",
            self.time, self.latitude, self.longitude, self.altitude
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calibration_only_touches_altitude() {
        let raw = Location::new(123519.0, 48.1173, 11.5166, 545.4);
        let calibrated = raw.calibrated(0.26);

        assert_eq!(calibrated.time, raw.time);
        assert_eq!(calibrated.latitude, raw.latitude);
        assert_eq!(calibrated.longitude, raw.longitude);
        assert!((calibrated.altitude - 545.14).abs() < 1e-9);
        // original is untouched
        assert_eq!(raw.altitude, 545.4);
    }

    #[test]
    fn test_csv_line_has_no_header_or_newline() {
        let loc = Location::new(1.5, -2.25, 3.0, 4.75);
        assert_eq!(loc.to_csv_line(), "1.5,-2.25,3,4.75");
    }
}
