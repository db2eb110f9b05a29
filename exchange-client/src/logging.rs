//! Injectable logger handle.
//!
//! Every component of a client logs through the [`Logger`] it was constructed
//! with instead of the process-wide `log` facade, so two clients in the same
//! process can write to different destinations with different levels. The
//! handle stamps records with a per-client target (`exchange_client::<ref>`),
//! which keeps `RUST_LOG=exchange_client=debug` style filters working.

use log::{Level, LevelFilter, Log, Metadata, Record};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::Result;

pub const DEFAULT_TARGET: &str = "exchange_client";

/// Forwards to whatever logger the process installed.
struct ProcessLog;

impl Log for ProcessLog {
    fn enabled(&self, metadata: &Metadata) -> bool {
        log::logger().enabled(metadata)
    }

    fn log(&self, record: &Record) {
        log::logger().log(record)
    }

    fn flush(&self) {
        log::logger().flush()
    }
}

/// A cheap, clonable logging handle.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn Log>,
    target: String,
}

impl Logger {
    /// Wraps an arbitrary `log::Log` implementation.
    pub fn new(sink: Arc<dyn Log>) -> Self {
        Self {
            sink,
            target: DEFAULT_TARGET.to_string(),
        }
    }

    /// A handle writing to the process-wide logger.
    pub fn global() -> Self {
        Self::new(Arc::new(ProcessLog))
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn enabled(&self, level: Level) -> bool {
        let metadata = Metadata::builder()
            .level(level)
            .target(&self.target)
            .build();
        self.sink.enabled(&metadata)
    }

    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let record = Record::builder()
            .level(level)
            .target(&self.target)
            .args(args)
            .build();
        if self.sink.enabled(record.metadata()) {
            self.sink.log(&record);
        }
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::global()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// `emit!(logger, Level::Warn, "fmt", args..)`
macro_rules! emit {
    ($logger:expr, $level:expr, $($arg:tt)+) => {
        $logger.log($level, format_args!($($arg)+))
    };
}
pub(crate) use emit;

/// Where and how verbosely a client logs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Append to this file instead of writing to stderr.
    pub file: Option<PathBuf>,
    /// Minimum severity written (`"off"` .. `"trace"`, any case).
    #[serde(with = "level_name")]
    pub level: LevelFilter,
}

mod level_name {
    use log::LevelFilter;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(level: &LevelFilter, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(level.as_str())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<LevelFilter, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse()
            .map_err(|_| D::Error::custom(format!("unknown log level {:?}", name)))
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            file: None,
            level: LevelFilter::Info,
        }
    }
}

impl LogConfig {
    pub fn console(level: LevelFilter) -> Self {
        Self { file: None, level }
    }

    pub fn file(path: impl Into<PathBuf>, level: LevelFilter) -> Self {
        Self {
            file: Some(path.into()),
            level,
        }
    }

    /// Builds a private `env_logger` instance. Nothing is installed globally.
    pub fn build(&self) -> Result<env_logger::Logger> {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.level);
        if let Some(path) = &self.file {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        }
        Ok(builder.build())
    }

    /// Builds the handle handed to a client.
    pub fn logger(&self) -> Result<Logger> {
        Ok(Logger::new(Arc::new(self.build()?)))
    }
}
