//! Configuration parsing (§6). Out of scope for the coordinator's core
//! logic, but the plumbing (a typed `Config` and its defaults) is ambient
//! stack every deployment needs.
//!
//! The file format mirrors the original implementation's: a single
//! `[main]` INI section with the keys listed in §6.

use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Parse(ini::Error),
    MissingKey(&'static str),
    InvalidValue { key: &'static str, value: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "configuration file: {}", e),
            Self::Parse(e) => write!(f, "configuration file: {}", e),
            Self::MissingKey(k) => write!(f, "configuration file: missing required key '{}'", k),
            Self::InvalidValue { key, value } => {
                write!(f, "configuration file: invalid value for '{}': {}", key, value)
            }
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<ini::Error> for Error {
    fn from(e: ini::Error) -> Self {
        Self::Parse(e)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub dbfile: PathBuf,
    pub logfile: PathBuf,
    pub log_level: log::LevelFilter,
    pub log_backup: usize,
    pub pidfile: Option<PathBuf>,
    pub http_proxy: Option<String>,
    pub fetch_timeout_secs: u64,
    pub extend_pct: u32,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let ini = ini::Ini::load_from_file(path)?;
        let main = ini.section(Some("main"));

        let get = |key: &'static str| -> Option<&str> { main.and_then(|s| s.get(key)) };

        let dbfile = get("dbfile").ok_or(Error::MissingKey("dbfile"))?.into();
        let logfile = get("logfile").ok_or(Error::MissingKey("logfile"))?.into();

        let log_level = match get("log_level").unwrap_or("INFO").to_uppercase().as_str() {
            "ERROR" | "CRITICAL" => log::LevelFilter::Error,
            "WARN" | "WARNING" => log::LevelFilter::Warn,
            "INFO" => log::LevelFilter::Info,
            "DEBUG" => log::LevelFilter::Debug,
            "TRACE" => log::LevelFilter::Trace,
            other => {
                return Err(Error::InvalidValue {
                    key: "log_level",
                    value: other.to_string(),
                })
            }
        };

        let log_backup = parse_or("log_backup", get("log_backup"), 5)?;
        let pidfile = get("pidfile").map(PathBuf::from);
        let http_proxy = get("http_proxy").map(str::to_string);
        let fetch_timeout_secs = parse_or("fetch_timeout", get("fetch_timeout"), 10)?;
        let extend_pct = parse_or("extend_pct", get("extend_pct"), 33)?;

        Ok(Self {
            dbfile,
            logfile,
            log_level,
            log_backup,
            pidfile,
            http_proxy,
            fetch_timeout_secs,
            extend_pct,
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    key: &'static str,
    raw: Option<&str>,
    default: T,
) -> Result<T, Error> {
    match raw {
        Some(s) => s.trim().parse().map_err(|_| Error::InvalidValue {
            key,
            value: s.to_string(),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(contents: &str) -> tempfile_like::TempIni {
        tempfile_like::TempIni::new(contents)
    }

    // A tiny hand-rolled temp-file helper so the config tests don't need an
    // extra dev-dependency for something this small.
    mod tempfile_like {
        use std::fs;
        use std::path::PathBuf;
        use std::sync::atomic::{AtomicU64, Ordering};

        static COUNTER: AtomicU64 = AtomicU64::new(0);

        pub struct TempIni {
            pub path: PathBuf,
        }

        impl TempIni {
            pub fn new(contents: &str) -> Self {
                let unique = COUNTER.fetch_add(1, Ordering::Relaxed);
                let mut path = std::env::temp_dir();
                path.push(format!(
                    "cache-channel-coordinator-test-{}-{}.ini",
                    std::process::id(),
                    unique
                ));
                let mut f = fs::File::create(&path).unwrap();
                use std::io::Write;
                f.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }
        }

        impl Drop for TempIni {
            fn drop(&mut self) {
                let _ = fs::remove_file(&self.path);
            }
        }
    }

    #[test]
    fn loads_required_keys_and_applies_defaults() {
        let cfg_file = write_config(
            "[main]\ndbfile = /tmp/db.txt\nlogfile = /tmp/log.txt\n",
        );
        let cfg = Config::load(&cfg_file.path).unwrap();
        assert_eq!(cfg.dbfile, PathBuf::from("/tmp/db.txt"));
        assert_eq!(cfg.extend_pct, 33);
        assert_eq!(cfg.fetch_timeout_secs, 10);
        assert_eq!(cfg.log_backup, 5);
        assert!(cfg.pidfile.is_none());
        assert_eq!(cfg.log_level, log::LevelFilter::Info);
    }

    #[test]
    fn missing_required_key_errors() {
        let cfg_file = write_config("[main]\nlogfile = /tmp/log.txt\n");
        let err = Config::load(&cfg_file.path).unwrap_err();
        assert!(matches!(err, Error::MissingKey("dbfile")));
    }

    #[test]
    fn overrides_are_honored() {
        let cfg_file = write_config(
            "[main]\ndbfile = /tmp/db.txt\nlogfile = /tmp/log.txt\nextend_pct = 50\nlog_level = DEBUG\n",
        );
        let cfg = Config::load(&cfg_file.path).unwrap();
        assert_eq!(cfg.extend_pct, 50);
        assert_eq!(cfg.log_level, log::LevelFilter::Debug);
    }
}
