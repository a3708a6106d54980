use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A byte quantity accepted on the command line or in the environment as
/// e.g. `50MiB` or a bare integer, the same role `bytesize::ByteSize` plays
/// in `maelstrom_util::config::common::CacheSize`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ByteSize(#[serde(with = "bytesize_serde")] pub bytesize::ByteSize);

impl ByteSize {
    pub fn as_u64(self) -> u64 {
        self.0.as_u64()
    }

    pub fn as_i64(self) -> i64 {
        self.0.as_u64() as i64
    }
}

impl FromStr for ByteSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<bytesize::ByteSize>().map(Self).map_err(|e| e.to_string())
    }
}

impl std::fmt::Display for ByteSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Minimum log level to emit, parsed the same way
/// `maelstrom_util::config::common::LogLevel` accepts `error`/`warning`/
/// `info`/`debug` on the command line.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_slog_level(self) -> slog::Level {
        match self {
            Self::Error => slog::Level::Error,
            Self::Warning => slog::Level::Warning,
            Self::Info => slog::Level::Info,
            Self::Debug => slog::Level::Debug,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warning" | "warn" => Ok(Self::Warning),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            other => Err(format!("unknown log level {other:?}")),
        }
    }
}

/// Which execution backend the Dispatcher drives (spec §4.5, §6). Only one
/// is active per deployment.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunnerBackendKind {
    Container,
    Orchestrator,
}

impl FromStr for RunnerBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "container" => Ok(Self::Container),
            "orchestrator" => Ok(Self::Orchestrator),
            other => Err(format!("unknown backend kind {other:?}, expected container|orchestrator")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_size_parses_suffixed_values() {
        let parsed: ByteSize = "50MiB".parse().unwrap();
        assert_eq!(parsed.as_u64(), 50 * 1024 * 1024);
    }

    #[test]
    fn log_level_rejects_garbage() {
        assert!("verbose".parse::<LogLevel>().is_err());
    }
}
