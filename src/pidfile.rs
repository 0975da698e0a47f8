//! PID-file lifecycle (§10.5 of SPEC_FULL.md): if configured, refuse to
//! start when the file already exists, and remove it on clean shutdown.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum Error {
    AlreadyRunning { pidfile: PathBuf, existing_pid: String },
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning { pidfile, existing_pid } => write!(
                f,
                "already running (PID {}) per {}",
                existing_pid,
                pidfile.display()
            ),
            Self::Io(e) => write!(f, "can't write PID file: {}", e),
        }
    }
}

impl std::error::Error for Error {}

/// An optionally-held PID file; removed on drop.
pub struct PidFile {
    path: Option<PathBuf>,
}

impl PidFile {
    /// `path` being `None` means no pidfile was configured; acquiring one
    /// is then a no-op.
    pub fn acquire(path: Option<&Path>) -> Result<Self, Error> {
        let Some(path) = path else {
            return Ok(Self { path: None });
        };

        if path.exists() {
            let existing_pid = fs::read_to_string(path).unwrap_or_default();
            return Err(Error::AlreadyRunning {
                pidfile: path.to_path_buf(),
                existing_pid,
            });
        }

        fs::write(path, std::process::id().to_string()).map_err(Error::Io)?;
        Ok(Self {
            path: Some(path.to_path_buf()),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Some(path) = &self.path {
            let _ = fs::remove_file(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_pidfile_configured_is_a_no_op() {
        let guard = PidFile::acquire(None).unwrap();
        drop(guard);
    }

    #[test]
    fn refuses_to_start_when_pidfile_exists() {
        let path = std::env::temp_dir().join("cache-channel-coordinator-test.pid");
        fs::write(&path, "1234").unwrap();
        let err = PidFile::acquire(Some(&path)).unwrap_err();
        assert!(matches!(err, Error::AlreadyRunning { .. }));
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn writes_and_removes_pidfile() {
        let path = std::env::temp_dir().join("cache-channel-coordinator-test2.pid");
        let _ = fs::remove_file(&path);
        {
            let _guard = PidFile::acquire(Some(&path)).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
