//! Configuration of the pemscout binary and its logging.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::{env, fmt};

use log::{error, LevelFilter};
use serde::de;
use serde::{Deserialize, Deserializer};
#[cfg(unix)]
use syslog::Facility;

use crate::constants::{
    DEFAULT_BLOCK_QUEUE, DEFAULT_KEY_ID_HEADER, DEFAULT_MAX_FILE_SIZE,
    PEMSCOUT_APP, PEMSCOUT_ENV_LOG_LEVEL, PEMSCOUT_ENV_LOG_TYPE,
};
use crate::scanner::{HiddenFiles, ScanOptions};


//------------ ConfigDefaults ------------------------------------------------

pub struct ConfigDefaults;

impl ConfigDefaults {
    fn log_level() -> LevelFilter {
        match env::var(PEMSCOUT_ENV_LOG_LEVEL) {
            Ok(level) => match LevelFilter::from_str(&level) {
                Ok(level) => level,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log level in env var {}",
                        PEMSCOUT_ENV_LOG_LEVEL
                    );
                    ::std::process::exit(1);
                }
            },
            _ => LevelFilter::Warn,
        }
    }

    fn log_type() -> LogType {
        match env::var(PEMSCOUT_ENV_LOG_TYPE) {
            Ok(log_type) => match LogType::from_str(&log_type) {
                Ok(log_type) => log_type,
                Err(_) => {
                    eprintln!(
                        "Unrecognized value for log type in env var {}",
                        PEMSCOUT_ENV_LOG_TYPE
                    );
                    ::std::process::exit(1);
                }
            },
            _ => LogType::Stderr,
        }
    }

    fn log_file() -> PathBuf {
        PathBuf::from("./pemscout.log")
    }

    fn syslog_facility() -> String {
        "user".to_string()
    }

    fn recursive() -> bool {
        true
    }

    fn hidden_files() -> HiddenFiles {
        HiddenFiles::Skip
    }

    fn max_file_size() -> u64 {
        DEFAULT_MAX_FILE_SIZE
    }

    fn suppress_unmatched() -> bool {
        false
    }

    fn key_id_header() -> String {
        DEFAULT_KEY_ID_HEADER.to_string()
    }

    fn block_queue() -> usize {
        DEFAULT_BLOCK_QUEUE
    }
}


//------------ Config --------------------------------------------------------

/// Configuration for pemscout.
///
/// Every setting has a default, so an empty file is a valid
/// configuration. Command line arguments may override some of the
/// settings.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    #[serde(
        default = "ConfigDefaults::log_level",
        deserialize_with = "de_level_filter"
    )]
    pub log_level: LevelFilter,

    #[serde(default = "ConfigDefaults::log_type")]
    pub log_type: LogType,

    #[serde(default = "ConfigDefaults::log_file")]
    pub log_file: PathBuf,

    #[serde(default = "ConfigDefaults::syslog_facility")]
    pub syslog_facility: String,

    #[serde(default = "ConfigDefaults::recursive")]
    pub recursive: bool,

    #[serde(default = "ConfigDefaults::hidden_files")]
    pub hidden_files: HiddenFiles,

    #[serde(default = "ConfigDefaults::max_file_size")]
    pub max_file_size: u64,

    #[serde(default = "ConfigDefaults::suppress_unmatched")]
    pub suppress_unmatched: bool,

    #[serde(default = "ConfigDefaults::key_id_header")]
    pub key_id_header: String,

    #[serde(default = "ConfigDefaults::block_queue")]
    pub block_queue: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: ConfigDefaults::log_level(),
            log_type: ConfigDefaults::log_type(),
            log_file: ConfigDefaults::log_file(),
            syslog_facility: ConfigDefaults::syslog_facility(),
            recursive: ConfigDefaults::recursive(),
            hidden_files: ConfigDefaults::hidden_files(),
            max_file_size: ConfigDefaults::max_file_size(),
            suppress_unmatched: ConfigDefaults::suppress_unmatched(),
            key_id_header: ConfigDefaults::key_id_header(),
            block_queue: ConfigDefaults::block_queue(),
        }
    }
}

impl Config {
    /// Creates the config from an optional config file.
    ///
    /// Without a file, all defaults apply.
    pub fn create(config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match config_file {
            Some(path) => Self::read_config(path).map_err(|e| {
                ConfigError::Other(format!(
                    "Error parsing config file: {}, error: {}",
                    path.display(),
                    e
                ))
            })?,
            None => Self::default(),
        };
        config.verify()?;
        Ok(config)
    }

    pub fn verify(&self) -> Result<(), ConfigError> {
        if self.max_file_size == 0 {
            return Err(ConfigError::other("max_file_size must be at least 1"));
        }
        if self.block_queue == 0 {
            return Err(ConfigError::other("block_queue must be at least 1"));
        }
        if self.key_id_header.is_empty()
            || self.key_id_header.contains(':')
            || self.key_id_header.chars().any(char::is_whitespace)
        {
            return Err(ConfigError::Other(format!(
                "Invalid key_id_header: '{}'",
                self.key_id_header
            )));
        }
        Ok(())
    }

    pub fn read_config(file: &Path) -> Result<Self, ConfigError> {
        let mut s = String::new();
        let mut f = File::open(file)?;
        f.read_to_string(&mut s)?;

        let c: Config = toml::from_str(&s)?;
        Ok(c)
    }

    /// Returns the options for scanning as configured.
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            recursive: self.recursive,
            hidden_files: self.hidden_files,
            max_file_size: self.max_file_size,
            key_id_header: self.key_id_header.clone(),
            suppress_unmatched: self.suppress_unmatched,
            block_queue: self.block_queue,
        }
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        match self.log_type {
            LogType::File => self.file_logger(&self.log_file),
            LogType::Stderr => self.stderr_logger(),
            LogType::Syslog => self.syslog_logger(),
        }
    }

    /// Creates a stderr logger.
    fn stderr_logger(&self) -> Result<(), ConfigError> {
        self.fern_logger()
            .chain(io::stderr())
            .apply()
            .map_err(|e| {
                ConfigError::Other(format!(
                    "Failed to init stderr logging: {}",
                    e
                ))
            })
    }

    /// Creates a file logger using the file provided by `path`.
    fn file_logger(&self, path: &Path) -> Result<(), ConfigError> {
        let file = match fern::log_file(path) {
            Ok(file) => file,
            Err(err) => {
                let error_string = format!(
                    "Failed to open log file '{}': {}",
                    path.display(),
                    err
                );
                error!("{}", error_string.as_str());
                return Err(ConfigError::Other(error_string));
            }
        };
        self.fern_logger()
            .chain(file)
            .apply()
            .map_err(|e| {
                ConfigError::Other(format!(
                    "Failed to init file logging: {}",
                    e
                ))
            })
    }

    /// Creates a syslog logger and configures correctly.
    #[cfg(unix)]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        let facility = Facility::from_str(&self.syslog_facility)
            .map_err(|_| ConfigError::other("Invalid syslog_facility"))?;
        let process = env::current_exe()
            .ok()
            .and_then(|path| {
                path.file_name()
                    .and_then(std::ffi::OsStr::to_str)
                    .map(ToString::to_string)
            })
            .unwrap_or_else(|| String::from(PEMSCOUT_APP));
        let formatter = syslog::Formatter3164 {
            facility,
            hostname: None,
            process,
            pid: std::process::id(),
        };
        let logger = syslog::unix(formatter.clone())
            .or_else(|_| syslog::tcp(formatter.clone(), ("127.0.0.1", 601)))
            .or_else(|_| {
                syslog::udp(formatter, ("127.0.0.1", 0), ("127.0.0.1", 514))
            });
        match logger {
            Ok(logger) => self
                .fern_logger()
                .chain(logger)
                .apply()
                .map_err(|e| {
                    ConfigError::Other(format!("Failed to init syslog: {}", e))
                }),
            Err(err) => {
                let msg = format!("Cannot connect to syslog: {}", err);
                Err(ConfigError::Other(msg))
            }
        }
    }

    #[cfg(not(unix))]
    fn syslog_logger(&self) -> Result<(), ConfigError> {
        Err(ConfigError::other("syslog is not supported on this platform"))
    }

    /// Creates and returns a fern logger with log level tweaks.
    fn fern_logger(&self) -> fern::Dispatch {
        // suppress overly noisy logging
        let framework_level = self.log_level.min(LevelFilter::Warn);
        let walker_level = self.log_level.min(LevelFilter::Debug);

        let show_target = self.log_level == LevelFilter::Trace
            || self.log_level == LevelFilter::Debug;
        fern::Dispatch::new()
            .format(move |out, message, record| {
                if show_target {
                    out.finish(format_args!(
                        "{} [{}] [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        record.target(),
                        message
                    ))
                } else {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                        record.level(),
                        message
                    ))
                }
            })
            .level(self.log_level)
            .level_for("mio", framework_level)
            .level_for("tokio", framework_level)
            .level_for("tokio_util", framework_level)
            .level_for("pemscout::commons::file", walker_level)
    }
}


//------------ ConfigError ---------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    IoError(io::Error),
    TomlError(toml::de::Error),
    Other(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => e.fmt(f),
            ConfigError::TomlError(e) => e.fmt(f),
            ConfigError::Other(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn other(s: &str) -> ConfigError {
        ConfigError::Other(s.to_string())
    }
}

impl From<io::Error> for ConfigError {
    fn from(e: io::Error) -> Self {
        ConfigError::IoError(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::TomlError(e)
    }
}


//------------ LogType -------------------------------------------------------

/// The target to log to.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogType {
    Stderr,
    File,
    Syslog,
}

impl FromStr for LogType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stderr" => Ok(LogType::Stderr),
            "file" => Ok(LogType::File),
            "syslog" => Ok(LogType::Syslog),
            _ => Err(format!(
                "expected \"stderr\", \"file\" or \"syslog\", found : \"{}\"",
                s
            )),
        }
    }
}

impl<'de> Deserialize<'de> for LogType {
    fn deserialize<D>(d: D) -> Result<LogType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(d)?;
        LogType::from_str(&string).map_err(de::Error::custom)
    }
}


//------------ LevelFilter ---------------------------------------------------

fn de_level_filter<'de, D>(d: D) -> Result<LevelFilter, D::Error>
where
    D: Deserializer<'de>,
{
    let string = String::deserialize(d)?;
    LevelFilter::from_str(&string).map_err(de::Error::custom)
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn should_parse_default_config_file() {
        let c = Config::read_config(Path::new("./defaults/pemscout.conf"))
            .unwrap();
        c.verify().unwrap();
        assert_eq!(c.log_type, LogType::Stderr);
        assert_eq!(c.log_file, PathBuf::from("./pemscout.log"));
        assert_eq!(c.scan_options(), ScanOptions::default());
    }

    #[test]
    fn should_parse_scan_settings() {
        test::test_under_tmp(|dir| {
            test::save_file(
                &dir,
                "pemscout.conf",
                br#"
                    hidden_files = "include"
                    recursive = false
                    max_file_size = 4096
                    suppress_unmatched = true
                    key_id_header = "X-Key"
                "#,
            );
            let c = Config::create(Some(&dir.join("pemscout.conf"))).unwrap();
            let options = c.scan_options();
            assert_eq!(options.hidden_files, HiddenFiles::Include);
            assert!(!options.recursive);
            assert_eq!(options.max_file_size, 4096);
            assert!(options.suppress_unmatched);
            assert_eq!(options.key_id_header, "X-Key");
            assert_eq!(options.block_queue, DEFAULT_BLOCK_QUEUE);
        });
    }

    #[test]
    fn should_reject_bad_settings() {
        assert!(toml::from_str::<Config>(r#"log_type = "carrier pigeon""#)
            .is_err());
        assert!(toml::from_str::<Config>(r#"log_level = "loud""#).is_err());

        let c: Config = toml::from_str(r#"key_id_header = "Key Id""#).unwrap();
        assert!(c.verify().is_err());
        let c: Config = toml::from_str("block_queue = 0").unwrap();
        assert!(c.verify().is_err());

        assert!(Config::create(Some(Path::new("/no/such/file.conf"))).is_err());
    }

    #[test]
    fn should_set_correct_log_levels() {
        use log::Level as LL;

        fn void_logger(config: &str) -> Box<dyn log::Log> {
            let c: Config = toml::from_str(config).unwrap();
            let void_output = fern::Output::writer(Box::new(io::sink()), "");
            let (_, void_logger) = c.fern_logger().chain(void_output).into_log();
            void_logger
        }

        fn for_target_at_level(target: &str, level: LL) -> log::Metadata {
            log::Metadata::builder().target(target).level(level).build()
        }

        for config_level in &["error", "warn", "info", "debug", "trace"] {
            let log = void_logger(&format!(r#"log_level = "{}""#, config_level));
            let config_level = LL::from_str(config_level).unwrap();

            for level in &[LL::Error, LL::Warn, LL::Info, LL::Debug, LL::Trace] {
                let enabled = *level <= config_level;
                assert_eq!(
                    enabled,
                    log.enabled(&for_target_at_level("pemscout::scanner", *level)),
                    "Logging at level {} with log_level={} should be {}",
                    level,
                    config_level,
                    if enabled { "enabled" } else { "disabled" },
                );

                // Framework crates never go below warn, the walker never
                // below debug.
                assert_eq!(
                    enabled && *level <= LL::Warn,
                    log.enabled(&for_target_at_level("tokio", *level))
                );
                assert_eq!(
                    enabled && *level <= LL::Debug,
                    log.enabled(
                        &for_target_at_level("pemscout::commons::file", *level)
                    )
                );
            }
        }
    }
}
