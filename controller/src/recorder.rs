/*!
Flat append-only session logs.

Every time a link is opened a new set of files is started, named after the
local time the session began (`YYYYmmdd-HHMMSS`).
*/

use chrono::Local;
use shared::Location;
use std::fs::{File, OpenOptions};
use std::io::{self, LineWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Where and what a link records
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordingOptions {
    /// Base directory; `None` disables all recording
    pub directory: Option<PathBuf>,
    /// Record the unmodified byte stream
    pub raw: bool,
    /// Record parsed fixes as CSV (GPS links only)
    pub locations: bool,
}

/// Timestamp used to name the files of a session
pub fn session_timestamp() -> String {
    Local::now().format("%Y%m%d-%H%M%S").to_string()
}

fn open_append(dir: &Path, extension: &str) -> io::Result<(File, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.{}", session_timestamp(), extension));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

/// Binary dump of everything received during one session
#[derive(Debug)]
pub struct RawLog {
    file: File,
    path: PathBuf,
    bytes_written: u64,
}

impl RawLog {
    /// Start a new raw log in `dir`
    pub fn create_in(dir: &Path) -> io::Result<Self> {
        let (file, path) = open_append(dir, "bin")?;
        info!("📁 Recording raw stream to {}", path.display());
        Ok(Self {
            file,
            path,
            bytes_written: 0,
        })
    }

    pub fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// CSV log of parsed fixes: `time,latitude,longitude,altitude`, no header
#[derive(Debug)]
pub struct LocationLog {
    writer: LineWriter<File>,
    path: PathBuf,
}

impl LocationLog {
    /// Start a new location log in `dir`
    pub fn create_in(dir: &Path) -> io::Result<Self> {
        let (file, path) = open_append(dir, "csv")?;
        info!("📁 Recording locations to {}", path.display());
        Ok(Self {
            writer: LineWriter::new(file),
            path,
        })
    }

    pub fn write(&mut self, location: &Location) -> io::Result<()> {
        writeln!(self.writer, "{}", location.to_csv_line())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_raw_log_is_verbatim() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("raw");
        let mut log = RawLog::create_in(&nested).unwrap();
        log.write(&[0x00, 0xFF, b'\n']).unwrap();
        log.write(b"$GNGGA").unwrap();
        assert_eq!(log.bytes_written(), 9);

        let path = log.path().to_path_buf();
        drop(log);
        assert_eq!(path.extension().unwrap(), "bin");
        assert_eq!(std::fs::read(path).unwrap(), b"\x00\xff\n$GNGGA");
    }

    #[test]
    fn test_location_log_lines() {
        let dir = TempDir::new().unwrap();
        let mut log = LocationLog::create_in(dir.path()).unwrap();
        log.write(&Location::new(1.0, 2.5, -3.5, 4.0)).unwrap();
        log.write(&Location::new(2.0, 2.5, -3.5, 4.25)).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content, "1,2.5,-3.5,4\n2,2.5,-3.5,4.25\n");
    }

    #[test]
    fn test_session_timestamp_format() {
        let ts = session_timestamp();
        assert_eq!(ts.len(), 15);
        assert_eq!(&ts[8..9], "-");
        assert!(ts.chars().filter(|c| *c != '-').all(|c| c.is_ascii_digit()));
    }
}
