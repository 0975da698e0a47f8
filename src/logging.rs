//! A small size-based rotating file logger, standing in for the original's
//! `RotatingFileHandler` (§10.1 of SPEC_FULL.md). Logging is synchronous,
//! so production deployments are expected to run at `log_level = INFO`
//! rather than DEBUG.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::{Level, LevelFilter, Log, Metadata, Record};

/// Matches the original `RotatingFileHandler(maxBytes=1024*1024*10, ...)`.
pub const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

pub struct RotatingFileLogger {
    path: PathBuf,
    backups: usize,
    inner: Mutex<File>,
}

impl RotatingFileLogger {
    fn open(path: &Path) -> std::io::Result<File> {
        OpenOptions::new().create(true).append(true).open(path)
    }

    pub fn init(path: &Path, level: LevelFilter, backups: usize) -> std::io::Result<()> {
        let file = Self::open(path)?;
        let logger = Self {
            path: path.to_path_buf(),
            backups,
            inner: Mutex::new(file),
        };
        log::set_max_level(level);
        log::set_boxed_logger(Box::new(logger))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    }

    fn rotate(&self, file: &mut File) -> std::io::Result<()> {
        // Renaming doesn't disturb the already-open `file` handle (it
        // still points at the same inode); we only need a fresh handle at
        // `self.path` once the rename chain below has moved things along.
        for gen in (1..self.backups).rev() {
            let from = self.numbered(gen);
            let to = self.numbered(gen + 1);
            if from.exists() {
                let _ = fs::rename(&from, &to);
            }
        }
        if self.backups > 0 {
            let _ = fs::rename(&self.path, self.numbered(1));
        }
        *file = Self::open(&self.path)?;
        Ok(())
    }

    fn numbered(&self, gen: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", gen));
        PathBuf::from(name)
    }
}

impl Log for RotatingFileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let level_name = match record.level() {
            Level::Error => "CRITICAL",
            Level::Warn => "WARNING",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        };
        let line = format!(
            "{} {} {}\n",
            chrono::Utc::now().format("%Y-%m-%d %H:%M:%S%.3f"),
            level_name,
            record.args()
        );

        let mut file = self.inner.lock().unwrap();
        if file.metadata().map(|m| m.len()).unwrap_or(0) >= MAX_LOG_BYTES {
            if let Err(e) = self.rotate(&mut file) {
                eprintln!("log rotation failed: {}", e);
            }
        }
        let _ = file.write_all(line.as_bytes());
    }

    fn flush(&self) {
        if let Ok(mut file) = self.inner.lock() {
            let _ = file.flush();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_path_appends_generation_suffix() {
        let logger = RotatingFileLogger {
            path: PathBuf::from("/tmp/x.log"),
            backups: 5,
            inner: Mutex::new(File::open("/dev/null").unwrap()),
        };
        assert_eq!(logger.numbered(1), PathBuf::from("/tmp/x.log.1"));
    }
}
